//! One-shot prediction: `yolo_predict <image_path> [model_path] [output_dir]`.
//!
//! Loads the model fresh on every run and prints a single JSON response.

use std::process::ExitCode;

use yolo_worker::detector::YoloOnnxLoader;
use yolo_worker::logger::setup_logging;
use yolo_worker::predict::predict_response;
use yolo_worker::worker::{InferenceResponse, PredictRequest};
use yolo_worker::{ModelManager, WorkerConfig};

fn request_from_args(args: &[String]) -> Option<PredictRequest> {
    let image_path = args.get(1)?.clone();
    Some(PredictRequest {
        image_path: Some(image_path),
        model_path: args.get(2).cloned(),
        output_dir: args.get(3).cloned(),
    })
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let Some(request) = request_from_args(&args) else {
        let response = InferenceResponse::error_message("No image path provided", "invalid_command");
        println!("{}", response.to_json());
        return ExitCode::FAILURE;
    };

    let config = match WorkerConfig::load(None) {
        Ok(config) => config,
        Err(e) => {
            println!("{}", InferenceResponse::error(&e).to_json());
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = setup_logging(&config) {
        eprintln!("Failed to set up logging: {e}");
    }

    let loader = YoloOnnxLoader::new(&config);
    let mut manager = ModelManager::new(loader, config.default_model.clone(), config.device);
    let response = predict_response(&mut manager, &request, &config.output_suffix);
    println!("{}", response.to_json());

    if !response.success {
        log::warn!("Prediction failed for {:?}", request.image_path);
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_image_path() {
        assert!(request_from_args(&args(&["yolo_predict"])).is_none());
    }

    #[test]
    fn test_positional_args() {
        let request =
            request_from_args(&args(&["yolo_predict", "a.jpg", "best.onnx", "out"])).unwrap();
        assert_eq!(request.image_path.as_deref(), Some("a.jpg"));
        assert_eq!(request.model_path.as_deref(), Some("best.onnx"));
        assert_eq!(request.output_dir.as_deref(), Some("out"));

        let request = request_from_args(&args(&["yolo_predict", "a.jpg"])).unwrap();
        assert_eq!(request.model_path, None);
    }
}
