//! Overlay rendering for the saved output artifact.

use std::path::Path;

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::RawBox;
use crate::error::{WorkerError, WorkerResult};

const LINE_WIDTH: i32 = 2;

const PALETTE: [[u8; 3]; 10] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
    [44, 153, 168],
    [0, 194, 255],
];

pub fn class_color(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}

pub fn open_image(path: &Path) -> WorkerResult<DynamicImage> {
    image::open(path)
        .map_err(|e| WorkerError::ImageIo(format!("Failed to load image {}: {e}", path.display())))
}

/// Draw each box as a hollow rectangle, clipped to the image.
pub fn draw_boxes(image: DynamicImage, boxes: &[RawBox]) -> DynamicImage {
    let mut canvas: RgbImage = image.into_rgb8();
    let (width, height) = canvas.dimensions();

    for bbox in boxes {
        let color = class_color(bbox.class_id);
        for inset in 0..LINE_WIDTH {
            let x1 = (bbox.x1 as i32 + inset).clamp(0, width.saturating_sub(1) as i32);
            let y1 = (bbox.y1 as i32 + inset).clamp(0, height.saturating_sub(1) as i32);
            let x2 = (bbox.x2 as i32 - inset).clamp(0, width.saturating_sub(1) as i32);
            let y2 = (bbox.y2 as i32 - inset).clamp(0, height.saturating_sub(1) as i32);
            if x2 <= x1 || y2 <= y1 {
                break;
            }
            let rect = Rect::at(x1, y1).of_size((x2 - x1 + 1) as u32, (y2 - y1 + 1) as u32);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }
    }

    DynamicImage::ImageRgb8(canvas)
}

/// Write the annotated image; the format follows the path's extension and an
/// existing file is overwritten.
pub fn save_image(image: &DynamicImage, path: &Path) -> WorkerResult<()> {
    image.save(path).map_err(|e| {
        WorkerError::ImageIo(format!("Failed to save annotated image {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([0, 0, 0])))
    }

    #[test]
    fn test_draw_box_outline_only() {
        let boxes = [RawBox { class_id: 0, confidence: 0.8, x1: 2.0, y1: 2.0, x2: 12.0, y2: 12.0 }];
        let out = draw_boxes(blank(20, 20), &boxes).into_rgb8();

        assert_eq!(*out.get_pixel(2, 2), class_color(0));
        assert_eq!(*out.get_pixel(3, 7), class_color(0));
        assert_eq!(*out.get_pixel(7, 7), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_box_out_of_bounds_is_clipped() {
        let boxes = [RawBox { class_id: 3, confidence: 0.5, x1: -50.0, y1: -5.0, x2: 500.0, y2: 8.0 }];
        let out = draw_boxes(blank(10, 10), &boxes).into_rgb8();
        assert_eq!(*out.get_pixel(0, 0), class_color(3));
    }

    #[test]
    fn test_degenerate_box_draws_nothing() {
        let boxes = [RawBox { class_id: 1, confidence: 0.5, x1: 4.0, y1: 4.0, x2: 4.0, y2: 9.0 }];
        let out = draw_boxes(blank(10, 10), &boxes).into_rgb8();
        assert!(out.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_open_missing_image() {
        let err = open_image(Path::new("/no/such/image.jpg")).unwrap_err();
        assert_eq!(err.kind(), "image_io");
    }

    #[test]
    fn test_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        save_image(&blank(4, 4), &path).unwrap();
        save_image(&blank(8, 8), &path).unwrap();
        assert_eq!(image::open(&path).unwrap().width(), 8);
    }
}
