//! Persistent inference worker.
//!
//! The detector stays resident across requests so each `predict` only pays
//! for inference, not for model loading.

pub mod ipc_types;
pub mod worker_main;

pub use ipc_types::{Command, InferenceResponse, Outcome, PredictRequest, ResponseLine};
pub use worker_main::{CommandLoop, ExitReason, LoopState};
