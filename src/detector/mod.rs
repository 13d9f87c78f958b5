//! Detector adapter contract.
//!
//! The model itself is opaque: the lifecycle manager only loads, swaps and
//! drops detectors, and the predict pipeline only calls `infer`/`annotate`.

pub mod annotate;
pub mod yolo_onnx;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::WorkerResult;

pub use yolo_onnx::{YoloOnnxDetector, YoloOnnxLoader};

/// Execution device. Fixed at load time; a different device means a
/// different resident model even for the same path.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda => write!(f, "cuda"),
        }
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            other => Err(format!("unknown device {other:?} (expected \"cpu\" or \"cuda\")")),
        }
    }
}

/// One box as produced by the model, in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawBox {
    pub class_id: usize,
    /// Probability in [0, 1].
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl RawBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &RawBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// A loaded detection model.
pub trait Detector {
    /// Run the model on the image at `image_path`. Boxes come back in the
    /// model's own order; callers must not assume any sorting.
    fn infer(&mut self, image_path: &Path) -> WorkerResult<Vec<RawBox>>;

    /// Class-index-to-name table shared by every box of a response.
    fn class_names(&self) -> &[String];

    /// Render `boxes` over the source image. Only used for the saved artifact.
    fn annotate(&self, image_path: &Path, boxes: &[RawBox]) -> WorkerResult<DynamicImage> {
        let image = annotate::open_image(image_path)?;
        Ok(annotate::draw_boxes(image, boxes))
    }

    /// Release per-request scratch memory. Called after every predict.
    fn reclaim(&mut self) {}
}

/// Creates detectors. Loading is the expensive operation the lifecycle
/// manager avoids repeating.
pub trait DetectorLoader {
    type Detector: Detector;

    fn load(&self, source: &str, device: Device) -> WorkerResult<Self::Detector>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bx(x1: f32, y1: f32, x2: f32, y2: f32) -> RawBox {
        RawBox { class_id: 0, confidence: 0.9, x1, y1, x2, y2 }
    }

    #[test]
    fn test_device_parse_and_display() {
        assert_eq!("CPU".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("gpu".parse::<Device>().unwrap(), Device::Cuda);
        assert!("tpu".parse::<Device>().is_err());
        assert_eq!(Device::Cuda.to_string(), "cuda");
    }

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = bx(0.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&bx(20.0, 20.0, 30.0, 30.0)), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = bx(0.0, 0.0, 10.0, 10.0);
        let b = bx(5.0, 0.0, 15.0, 10.0);
        // 50 / (100 + 100 - 50)
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_box_has_zero_area() {
        let flat = bx(5.0, 5.0, 5.0, 9.0);
        assert_eq!(flat.area(), 0.0);
        assert_eq!(flat.iou(&flat), 0.0);
    }
}
