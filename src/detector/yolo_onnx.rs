//! YOLOv8 detector over ONNX Runtime.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use log::{debug, info, warn};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::Session;
use ort::value::Value;

use super::{annotate, Detector, DetectorLoader, Device, RawBox};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

const LETTERBOX_FILL: u8 = 114;
/// Upper bound on class ids accepted from model metadata.
const MAX_CLASS_ID: usize = 4096;

pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Post-processing knobs taken from the worker config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YoloParams {
    pub input_size: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl From<&WorkerConfig> for YoloParams {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            input_size: config.input_size,
            conf_threshold: config.conf_threshold,
            iou_threshold: config.iou_threshold,
            max_detections: config.max_detections,
        }
    }
}

/// Scale and padding applied when fitting the source image into the square
/// network input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub src_width: u32,
    pub src_height: u32,
}

impl Letterbox {
    pub fn new(src_width: u32, src_height: u32, input_size: u32) -> Self {
        let size = input_size as f32;
        let scale = (size / src_width as f32).min(size / src_height as f32);
        let new_w = (src_width as f32 * scale).round();
        let new_h = (src_height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((size - new_w) / 2.0).floor(),
            pad_y: ((size - new_h) / 2.0).floor(),
            src_width,
            src_height,
        }
    }

    fn resized_dims(&self) -> (u32, u32) {
        (
            ((self.src_width as f32 * self.scale).round() as u32).max(1),
            ((self.src_height as f32 * self.scale).round() as u32).max(1),
        )
    }

    /// Map a network-space box back to clamped source-image pixels.
    fn unmap(&self, x1: f32, y1: f32, x2: f32, y2: f32) -> (f32, f32, f32, f32) {
        let w = self.src_width as f32;
        let h = self.src_height as f32;
        (
            ((x1 - self.pad_x) / self.scale).clamp(0.0, w),
            ((y1 - self.pad_y) / self.scale).clamp(0.0, h),
            ((x2 - self.pad_x) / self.scale).clamp(0.0, w),
            ((y2 - self.pad_y) / self.scale).clamp(0.0, h),
        )
    }
}

/// Builds `YoloOnnxDetector`s with the configured thread count and params.
#[derive(Debug, Clone)]
pub struct YoloOnnxLoader {
    intra_threads: usize,
    params: YoloParams,
}

impl YoloOnnxLoader {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            intra_threads: config.intra_threads,
            params: YoloParams::from(config),
        }
    }
}

impl DetectorLoader for YoloOnnxLoader {
    type Detector = YoloOnnxDetector;

    fn load(&self, source: &str, device: Device) -> WorkerResult<YoloOnnxDetector> {
        YoloOnnxDetector::load(source, device, self.intra_threads, self.params)
    }
}

pub struct YoloOnnxDetector {
    session: Session,
    class_names: Vec<String>,
    params: YoloParams,
    /// Last decoded source image, kept so `annotate` does not decode twice.
    last_image: Option<(PathBuf, DynamicImage)>,
}

impl YoloOnnxDetector {
    pub fn load(
        path: &str,
        device: Device,
        intra_threads: usize,
        params: YoloParams,
    ) -> WorkerResult<Self> {
        if !Path::new(path).exists() {
            return Err(WorkerError::ModelLoad(format!("Model file not found: {path}")));
        }

        let mut builder = Session::builder()
            .map_err(|e| WorkerError::ModelLoad(format!("Failed to create session builder: {e}")))?
            .with_intra_threads(intra_threads)
            .map_err(|e| WorkerError::ModelLoad(format!("Failed to set intra-thread count: {e}")))?;

        if device == Device::Cuda {
            let cuda = CUDAExecutionProvider::default().build();
            match builder.clone().with_execution_providers([cuda]) {
                Ok(with_cuda) => builder = with_cuda,
                Err(e) => warn!("CUDA execution provider unavailable, running on CPU: {e}"),
            }
        }

        let session = builder
            .commit_from_file(path)
            .map_err(|e| WorkerError::ModelLoad(format!("{path}: {e}")))?;

        let class_names = read_class_names(&session);
        info!(
            "Loaded detector {path} on {device} ({} classes, input {}px)",
            class_names.len(),
            params.input_size
        );

        Ok(Self {
            session,
            class_names,
            params,
            last_image: None,
        })
    }

    fn run(&mut self, image: &DynamicImage) -> WorkerResult<Vec<RawBox>> {
        let (tensor, letterbox) = preprocess(image, self.params.input_size);
        let size = self.params.input_size as i64;
        let input = Value::from_array((vec![1, 3, size, size], tensor))
            .map_err(|e| WorkerError::Inference(format!("Failed to create input tensor: {e}")))?;

        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| WorkerError::Inference(e.to_string()))?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| WorkerError::Inference(format!("Failed to extract output: {e}")))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();

        decode_predictions(data, &dims, &self.params, &letterbox)
    }
}

impl Detector for YoloOnnxDetector {
    fn infer(&mut self, image_path: &Path) -> WorkerResult<Vec<RawBox>> {
        let image = annotate::open_image(image_path)?;
        let boxes = self.run(&image)?;
        debug!("{} raw boxes for {}", boxes.len(), image_path.display());
        self.last_image = Some((image_path.to_path_buf(), image));
        Ok(boxes)
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn annotate(&self, image_path: &Path, boxes: &[RawBox]) -> WorkerResult<DynamicImage> {
        let image = match self.last_image {
            Some((ref cached, ref image)) if cached == image_path => image.clone(),
            _ => annotate::open_image(image_path)?,
        };
        Ok(annotate::draw_boxes(image, boxes))
    }

    fn reclaim(&mut self) {
        self.last_image = None;
    }
}

/// Letterbox into a square RGB canvas and lay out as normalized CHW floats.
pub fn preprocess(image: &DynamicImage, input_size: u32) -> (Vec<f32>, Letterbox) {
    let rgb = image.to_rgb8();
    let letterbox = Letterbox::new(rgb.width().max(1), rgb.height().max(1), input_size);
    let (new_w, new_h) = letterbox.resized_dims();
    let resized = image::imageops::resize(&rgb, new_w, new_h, FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(input_size, input_size, Rgb([LETTERBOX_FILL; 3]));
    image::imageops::replace(
        &mut canvas,
        &resized,
        letterbox.pad_x as i64,
        letterbox.pad_y as i64,
    );

    let plane = (input_size * input_size) as usize;
    let mut tensor = vec![0f32; 3 * plane];
    for (x, y, pixel) in canvas.enumerate_pixels() {
        let idx = (y * input_size + x) as usize;
        tensor[idx] = pixel[0] as f32 / 255.0;
        tensor[plane + idx] = pixel[1] as f32 / 255.0;
        tensor[2 * plane + idx] = pixel[2] as f32 / 255.0;
    }

    (tensor, letterbox)
}

/// Decode a YOLOv8 head output. Accepts `[1, 4 + nc, N]` and the transposed
/// `[1, N, 4 + nc]` layout. Result is sorted by confidence, highest first.
pub fn decode_predictions(
    data: &[f32],
    dims: &[usize],
    params: &YoloParams,
    letterbox: &Letterbox,
) -> WorkerResult<Vec<RawBox>> {
    let (rows, cols) = match dims {
        [1, a, b] | [a, b] => (*a, *b),
        _ => {
            return Err(WorkerError::Inference(format!(
                "Unexpected output shape {dims:?}"
            )))
        }
    };
    if rows * cols != data.len() {
        return Err(WorkerError::Inference(format!(
            "Output shape {dims:?} does not match {} values",
            data.len()
        )));
    }

    // Candidates vastly outnumber attributes in every YOLOv8 export.
    let transposed = rows > cols;
    let (attrs, candidates) = if transposed { (cols, rows) } else { (rows, cols) };
    if attrs <= 4 {
        return Err(WorkerError::Inference(format!(
            "Output has no class scores (shape {dims:?})"
        )));
    }
    let at = |attr: usize, i: usize| {
        if transposed {
            data[i * attrs + attr]
        } else {
            data[attr * candidates + i]
        }
    };

    let mut boxes = Vec::new();
    for i in 0..candidates {
        let (class_id, score) = (4..attrs)
            .map(|a| (a - 4, at(a, i)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score <= params.conf_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        let (x1, y1, x2, y2) =
            letterbox.unmap(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        boxes.push(RawBox {
            class_id,
            confidence: score.min(1.0),
            x1,
            y1,
            x2,
            y2,
        });
    }

    let mut kept = nms(boxes, params.iou_threshold);
    kept.truncate(params.max_detections);
    Ok(kept)
}

/// Greedy per-class NMS: sort by confidence descending, suppress same-class
/// boxes overlapping a kept one by more than `iou_threshold`.
pub fn nms(mut boxes: Vec<RawBox>, iou_threshold: f32) -> Vec<RawBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<RawBox> = Vec::new();
    let mut suppressed = vec![false; boxes.len()];
    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }
        kept.push(boxes[i]);
        for j in (i + 1)..boxes.len() {
            if boxes[j].class_id == boxes[i].class_id && boxes[i].iou(&boxes[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }
    kept
}

fn read_class_names(session: &Session) -> Vec<String> {
    let names = session
        .metadata()
        .ok()
        .and_then(|meta| meta.custom("names"))
        .map(|raw| parse_names(&raw))
        .filter(|names| !names.is_empty());

    match names {
        Some(names) => names,
        None => {
            debug!("Model carries no class names, using COCO labels");
            COCO_CLASSES.iter().map(|s| s.to_string()).collect()
        }
    }
}

/// Parse Ultralytics' `names` metadata, e.g. `{0: 'person', 1: "bicycle"}`,
/// into an index-ordered table. Gaps are filled with `class_<id>`. A table
/// with an id above `MAX_CLASS_ID` is rejected as empty.
pub fn parse_names(raw: &str) -> Vec<String> {
    let mut entries: Vec<(usize, String)> = Vec::new();
    let mut rest = raw.trim().trim_start_matches('{');

    while let Some(colon) = rest.find(':') {
        let key = rest[..colon].trim().trim_start_matches(',').trim();
        let after = rest[colon + 1..].trim_start();
        let Some(quote) = after.chars().next().filter(|c| *c == '\'' || *c == '"') else {
            break;
        };
        let Some(end) = after[1..].find(quote) else {
            break;
        };
        if let Ok(id) = key.parse::<usize>() {
            entries.push((id, after[1..1 + end].to_string()));
        }
        rest = &after[end + 2..];
    }

    let Some(max_id) = entries.iter().map(|(id, _)| *id).max() else {
        return Vec::new();
    };
    if max_id > MAX_CLASS_ID {
        warn!("Class id {max_id} in model metadata exceeds {MAX_CLASS_ID}, ignoring names table");
        return Vec::new();
    }
    let mut names: Vec<String> = (0..=max_id).map(|i| format!("class_{i}")).collect();
    for (id, name) in entries {
        names[id] = name;
    }
    names
}
