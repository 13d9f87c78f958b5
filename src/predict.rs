//! The predict pipeline shared by the persistent worker and the one-shot
//! binary: resolve model, infer, save the annotated artifact, normalize.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::info;

use crate::detector::{annotate, Detector, DetectorLoader};
use crate::error::{WorkerError, WorkerResult};
use crate::model_manager::ModelManager;
use crate::results::normalize;
use crate::worker::ipc_types::{InferenceResponse, PredictRequest};

/// `<dir>/<stem><suffix>.<ext>`. `dir` is `output_dir` (created if absent)
/// or else the image's own directory.
pub fn output_path_for(
    image_path: &Path,
    output_dir: Option<&str>,
    suffix: &str,
) -> WorkerResult<PathBuf> {
    let stem = image_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            WorkerError::InvalidCommand(format!("Not a file path: {}", image_path.display()))
        })?;
    let file_name = match image_path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}{suffix}.{ext}"),
        None => format!("{stem}{suffix}"),
    };

    let dir = match output_dir.map(str::trim).filter(|d| !d.is_empty()) {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            PathBuf::from(dir)
        }
        None => image_path.parent().map(Path::to_path_buf).unwrap_or_default(),
    };

    Ok(dir.join(file_name))
}

pub fn run_prediction<L: DetectorLoader>(
    manager: &mut ModelManager<L>,
    request: &PredictRequest,
    output_suffix: &str,
) -> WorkerResult<InferenceResponse> {
    let image_path = request
        .image_path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| WorkerError::InvalidCommand("Missing or non-string field: image_path".into()))?;
    let image = Path::new(image_path);

    let handle = manager.ensure_loaded(request.model_path.as_deref())?;
    let started = Instant::now();

    let boxes = handle.detector.infer(image)?;
    let output_path = output_path_for(image, request.output_dir.as_deref(), output_suffix)?;
    let annotated = handle.detector.annotate(image, &boxes)?;
    annotate::save_image(&annotated, &output_path)?;

    let (detections, stats) = normalize(&boxes, handle.detector.class_names());
    info!(
        "Predicted {image_path} with {}: {} detections in {} ms",
        handle.source,
        stats.total_detections,
        started.elapsed().as_millis()
    );

    Ok(InferenceResponse::ok(
        image_path.to_string(),
        output_path.to_string_lossy().to_string(),
        detections,
        stats,
        handle.source.clone(),
    ))
}

/// Like `run_prediction`, but failures become a failed response. Always
/// ends with a reclamation pass.
pub fn predict_response<L: DetectorLoader>(
    manager: &mut ModelManager<L>,
    request: &PredictRequest,
    output_suffix: &str,
) -> InferenceResponse {
    let response = run_prediction(manager, request, output_suffix)
        .unwrap_or_else(|e| InferenceResponse::error(&e));
    manager.reclaim();
    response
}
