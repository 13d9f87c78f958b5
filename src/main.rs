use std::io;
use std::process::ExitCode;

use log::{error, info};

use yolo_worker::detector::YoloOnnxLoader;
use yolo_worker::logger::setup_logging;
use yolo_worker::worker::ipc_types::ResponseLine;
use yolo_worker::worker::worker_main::write_line;
use yolo_worker::worker::{CommandLoop, ExitReason};
use yolo_worker::{ModelManager, WorkerConfig};

fn config_path_arg(args: &[String]) -> Option<&str> {
    args.windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| w[1].as_str())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config = match WorkerConfig::load(config_path_arg(&args)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            let _ = write_line(&mut io::stdout().lock(), &ResponseLine::Error(e.to_string()));
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = setup_logging(&config) {
        eprintln!("Failed to set up logging: {e}");
    }
    info!(
        "Starting YOLO worker (pid={}, default model {}, device {})",
        std::process::id(),
        config.default_model,
        config.device
    );

    let loader = YoloOnnxLoader::new(&config);
    let manager = ModelManager::new(loader, config.default_model.clone(), config.device);
    let mut worker = CommandLoop::new(manager, config.output_suffix.clone());

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match worker.run(stdin.lock(), &mut out) {
        Ok(ExitReason::Shutdown) => {
            info!("Worker shut down on request");
            ExitCode::SUCCESS
        }
        Ok(ExitReason::EndOfInput) => {
            info!("Worker exiting at end of input");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Worker terminated: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_arg() {
        let args: Vec<String> = ["yolo_worker", "--config", "worker.json"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(config_path_arg(&args), Some("worker.json"));
        assert_eq!(config_path_arg(&args[..1]), None);
    }
}
