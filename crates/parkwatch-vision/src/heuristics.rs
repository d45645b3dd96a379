//! Contour-counting heuristics over a grayscale frame.
//!
//! Both tiers reduce the frame to a binary mask, trace the external contours
//! of that mask and count the blobs whose area and bounding-box shape look
//! like a parked vehicle.

use std::ops::RangeInclusive;

use image::{imageops, GrayImage, ImageBuffer, Rgb};
use imageproc::{
    contours::{find_contours, BorderType, Contour},
    contrast::adaptive_threshold,
    distance_transform::Norm,
    edges::canny,
    filter::gaussian_blur_f32,
    morphology::{close, dilate, open},
    point::Point,
};
use parkwatch_types::{vision::ImageFrame, Result};

use crate::vision_error;

/// Frames smaller than this on either side cannot hold a vehicle-sized blob.
pub const MIN_FRAME_DIMENSION: u32 = 8;

/// Sigma OpenCV derives for a 5x5 Gaussian kernel.
const EDGE_BLUR_SIGMA: f32 = 1.1;
const CANNY_LOW: f32 = 30.0;
const CANNY_HIGH: f32 = 120.0;
/// Chebyshev radius 2 is a 5x5 square structuring element.
const EDGE_DILATE_RADIUS: u8 = 2;
const EDGE_DILATE_ITERATIONS: usize = 3;
/// Blur radius plus the reach of every dilation, on each side of a blob.
const EDGE_MARGIN: u32 = 2 + EDGE_DILATE_RADIUS as u32 * EDGE_DILATE_ITERATIONS as u32;
/// Smallest side the edge pipeline can resolve a blob on.
pub const EDGE_MIN_FRAME_DIMENSION: u32 = 2 * EDGE_MARGIN + 1;

/// 11x11 neighbourhood.
const THRESHOLD_BLOCK_RADIUS: u32 = 5;
/// 3x3 square structuring element.
const THRESHOLD_MORPH_RADIUS: u8 = 1;

/// Area and shape limits a contour must meet to count as a vehicle.
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    pub area: RangeInclusive<f64>,
    /// Exclusive bounds on bounding-box width / height.
    pub aspect: (f64, f64),
}

pub fn edge_filter() -> CandidateFilter {
    CandidateFilter {
        area: 800.0..=200_000.0,
        aspect: (0.2, 5.0),
    }
}

pub fn threshold_filter() -> CandidateFilter {
    CandidateFilter {
        area: 1_000.0..=100_000.0,
        aspect: (0.2, 5.0),
    }
}

impl CandidateFilter {
    pub fn accepts(&self, area: f64, width: u32, height: u32) -> bool {
        let aspect = if height > 0 {
            width as f64 / height as f64
        } else {
            0.0
        };
        self.area.contains(&area) && aspect > self.aspect.0 && aspect < self.aspect.1
    }
}

/// Raw (unclamped) outcome of one heuristic pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub candidates: u32,
    pub areas: Vec<f64>,
}

impl Detection {
    pub fn mean_area(&self) -> Option<f64> {
        if self.areas.is_empty() {
            None
        } else {
            Some(self.areas.iter().sum::<f64>() / self.areas.len() as f64)
        }
    }
}

/// Validates the frame buffer and converts it to luma.
pub fn frame_to_gray(frame: &ImageFrame) -> Result<GrayImage> {
    if frame.is_empty() {
        return Err(vision_error("empty frame"));
    }
    if frame.width < MIN_FRAME_DIMENSION || frame.height < MIN_FRAME_DIMENSION {
        return Err(vision_error(format!(
            "frame {}x{} is below the {}px minimum",
            frame.width, frame.height, MIN_FRAME_DIMENSION
        )));
    }
    if frame.data.len() != frame.expected_len() {
        return Err(vision_error(format!(
            "frame buffer holds {} bytes, expected {}",
            frame.data.len(),
            frame.expected_len()
        )));
    }
    let Some(rgb) =
        ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(frame.width, frame.height, &frame.data[..])
    else {
        return Err(vision_error("image buffer construction failed"));
    };
    Ok(imageops::grayscale(&rgb))
}

/// Blur, Canny, dilate to merge fragments, then count vehicle-shaped blobs.
///
/// Fails on frames too small for the blur and dilation margins.
pub fn detect_edges(gray: &GrayImage) -> Result<Detection> {
    let (width, height) = gray.dimensions();
    if width < EDGE_MIN_FRAME_DIMENSION || height < EDGE_MIN_FRAME_DIMENSION {
        return Err(vision_error(format!(
            "frame {width}x{height} is below the {EDGE_MIN_FRAME_DIMENSION}px edge detection minimum"
        )));
    }
    let blurred = gaussian_blur_f32(gray, EDGE_BLUR_SIGMA);
    let edges = canny(&blurred, CANNY_LOW, CANNY_HIGH);
    let merged = (0..EDGE_DILATE_ITERATIONS).fold(edges, |mask, _| {
        dilate(&mask, Norm::LInf, EDGE_DILATE_RADIUS)
    });
    Ok(count_candidates(&merged, &edge_filter()))
}

/// Locally normalised threshold (dark blobs become foreground), close, open, count.
pub fn detect_threshold(gray: &GrayImage) -> Detection {
    let mut mask = adaptive_threshold(gray, THRESHOLD_BLOCK_RADIUS);
    imageops::invert(&mut mask);
    let mask = close(&mask, Norm::LInf, THRESHOLD_MORPH_RADIUS);
    let mask = open(&mask, Norm::LInf, THRESHOLD_MORPH_RADIUS);
    count_candidates(&mask, &threshold_filter())
}

/// Counts external contours of the non-zero pixels of `mask` that pass `filter`.
pub fn count_candidates(mask: &GrayImage, filter: &CandidateFilter) -> Detection {
    let areas: Vec<f64> = find_contours::<i32>(mask)
        .iter()
        .filter(|contour| is_external(contour))
        .filter_map(|contour| {
            let area = polygon_area(&contour.points);
            let (width, height) = bounding_size(&contour.points);
            filter.accepts(area, width, height).then_some(area)
        })
        .collect();
    Detection {
        candidates: areas.len() as u32,
        areas,
    }
}

fn is_external(contour: &Contour<i32>) -> bool {
    contour.border_type == BorderType::Outer && contour.parent.is_none()
}

/// Shoelace area of the closed polygon through `points`.
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    twice.abs() as f64 / 2.0
}

/// Pixel width and height of the axis-aligned box enclosing `points`.
pub fn bounding_size(points: &[Point<i32>]) -> (u32, u32) {
    let Some(first) = points.first() else {
        return (0, 0);
    };
    let (mut min_x, mut max_x, mut min_y, mut max_y) = (first.x, first.x, first.y, first.y);
    for point in points {
        min_x = min_x.min(point.x);
        max_x = max_x.max(point.x);
        min_y = min_y.min(point.y);
        max_y = max_y.max(point.y);
    }
    ((max_x - min_x + 1) as u32, (max_y - min_y + 1) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn mask_with_boxes(width: u32, height: u32, boxes: &[(u32, u32, u32, u32)]) -> GrayImage {
        let mut mask = GrayImage::new(width, height);
        for &(x, y, w, h) in boxes {
            for py in y..y + h {
                for px in x..x + w {
                    mask.put_pixel(px, py, Luma([255]));
                }
            }
        }
        mask
    }

    #[test]
    fn shoelace_area_of_square() {
        let square = [
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ];
        assert_eq!(polygon_area(&square), 100.0);
        assert_eq!(bounding_size(&square), (11, 11));
        assert_eq!(polygon_area(&square[..2]), 0.0);
    }

    #[test]
    fn filter_rejects_extreme_shapes() {
        let filter = edge_filter();
        assert!(filter.accepts(1_000.0, 40, 25));
        assert!(filter.accepts(800.0, 40, 25));
        assert!(!filter.accepts(799.0, 40, 25));
        assert!(!filter.accepts(1_000.0, 100, 10));
        assert!(!filter.accepts(1_000.0, 10, 100));
        assert!(!filter.accepts(1_000.0, 10, 0));
    }

    #[test]
    fn counts_only_sized_external_blobs() {
        // Two car-sized blobs, one speck, one thin bar.
        let mask = mask_with_boxes(
            300,
            120,
            &[(10, 10, 60, 40), (100, 10, 50, 50), (200, 10, 4, 4), (10, 90, 280, 4)],
        );
        let detection = count_candidates(&mask, &threshold_filter());
        assert_eq!(detection.candidates, 2);
        assert!(detection.mean_area().unwrap() > 1_000.0);
    }

    #[test]
    fn holes_do_not_count_as_blobs() {
        let mut mask = mask_with_boxes(200, 200, &[(20, 20, 160, 160)]);
        for py in 60..140 {
            for px in 60..140 {
                mask.put_pixel(px, py, Luma([0]));
            }
        }
        assert_eq!(count_candidates(&mask, &edge_filter()).candidates, 1);
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(frame_to_gray(&ImageFrame::empty()).is_err());
        assert!(frame_to_gray(&ImageFrame::from_rgb(4, 4, vec![0; 48])).is_err());
        assert!(frame_to_gray(&ImageFrame::from_rgb(16, 16, vec![0; 10])).is_err());
        let gray = frame_to_gray(&ImageFrame::from_rgb(16, 8, vec![90; 16 * 8 * 3])).unwrap();
        assert_eq!(gray.dimensions(), (16, 8));
    }

    #[test]
    fn edge_pipeline_needs_room_for_its_margins() {
        assert_eq!(EDGE_MIN_FRAME_DIMENSION, 17);
        assert!(detect_edges(&GrayImage::new(16, 64)).is_err());
        assert!(detect_edges(&GrayImage::new(64, 16)).is_err());
        assert_eq!(detect_edges(&GrayImage::new(17, 17)).unwrap().candidates, 0);
        // The threshold tier still handles what the edge tier rejects.
        assert_eq!(detect_threshold(&GrayImage::new(12, 12)).candidates, 0);
    }
}
