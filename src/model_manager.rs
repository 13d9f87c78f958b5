use std::path::Path;
use std::time::Instant;

use log::{debug, info, warn};

use crate::detector::{Detector, DetectorLoader, Device};
use crate::error::{WorkerError, WorkerResult};

/// The resident detector plus the identity it was loaded under.
pub struct ModelHandle<D> {
    pub detector: D,
    /// Filesystem path or the default identifier.
    pub source: String,
    pub device: Device,
}

impl<D> ModelHandle<D> {
    fn matches(&self, source: &str, device: Device) -> bool {
        self.source == source && self.device == device
    }
}

/// Requests that mean "no override": absent, empty, `default` or `null`.
pub fn is_default_request(requested: Option<&str>) -> bool {
    match requested.map(str::trim) {
        None => true,
        Some(p) => p.is_empty() || p.eq_ignore_ascii_case("default") || p.eq_ignore_ascii_case("null"),
    }
}

/// Owns at most one loaded detector and decides when a load is needed.
pub struct ModelManager<L: DetectorLoader> {
    loader: L,
    default_model: String,
    device: Device,
    resident: Option<ModelHandle<L::Detector>>,
    load_count: u64,
}

impl<L: DetectorLoader> ModelManager<L> {
    pub fn new(loader: L, default_model: impl Into<String>, device: Device) -> Self {
        Self {
            loader,
            default_model: default_model.into(),
            device,
            resident: None,
            load_count: 0,
        }
    }

    /// Change the device policy. The resident model is kept until the next
    /// `ensure_loaded`, which then reloads it on the new device.
    pub fn set_device(&mut self, device: Device) {
        if device != self.device {
            info!("Device policy changed: {} -> {device}", self.device);
            self.device = device;
        }
    }

    pub fn resident_source(&self) -> Option<&str> {
        self.resident.as_ref().map(|h| h.source.as_str())
    }

    pub fn is_loaded(&self) -> bool {
        self.resident.is_some()
    }

    /// Number of successful loads performed by this manager.
    pub fn load_count(&self) -> u64 {
        self.load_count
    }

    /// Which source a request resolves to. Missing paths fall back to the
    /// default identifier instead of failing.
    pub fn resolve_target(&self, requested: Option<&str>) -> String {
        if is_default_request(requested) {
            return match self.resident {
                Some(ref handle) => handle.source.clone(),
                None => self.default_model.clone(),
            };
        }

        let path = requested.map(str::trim).unwrap_or_default();
        if Path::new(path).exists() {
            path.to_string()
        } else {
            warn!("Model path {path} does not exist, falling back to {}", self.default_model);
            self.default_model.clone()
        }
    }

    /// Make sure the requested model is resident and return it. Reuses the
    /// resident model when source and device match. A failed load leaves the
    /// previously resident model in place.
    pub fn ensure_loaded(
        &mut self,
        requested: Option<&str>,
    ) -> WorkerResult<&mut ModelHandle<L::Detector>> {
        let target = self.resolve_target(requested);
        let reuse = self
            .resident
            .as_ref()
            .is_some_and(|h| h.matches(&target, self.device));

        if reuse {
            debug!("Model {target} already resident, reusing");
        } else {
            self.load(&target)?;
        }

        self.resident
            .as_mut()
            .ok_or_else(|| WorkerError::ModelLoad("No model resident".to_string()))
    }

    fn load(&mut self, source: &str) -> WorkerResult<()> {
        info!("Loading model from: {source} (device: {})", self.device);
        let started = Instant::now();

        let detector = self.loader.load(source, self.device).map_err(|e| match e {
            WorkerError::ModelLoad(_) => e,
            other => WorkerError::ModelLoad(other.to_string()),
        })?;

        let handle = ModelHandle {
            detector,
            source: source.to_string(),
            device: self.device,
        };
        if let Some(previous) = self.resident.replace(handle) {
            info!("Releasing previous model {}", previous.source);
            drop(previous);
        }
        self.load_count += 1;

        info!("Model loaded in {} ms", started.elapsed().as_millis());
        Ok(())
    }

    /// Per-request hygiene: let the resident detector drop scratch buffers.
    pub fn reclaim(&mut self) {
        if let Some(ref mut handle) = self.resident {
            handle.detector.reclaim();
        }
    }

    /// Drop the resident model, if any. Returns whether one was released.
    pub fn unload(&mut self) -> bool {
        match self.resident.take() {
            Some(handle) => {
                info!("Unloading model {}", handle.source);
                drop(handle);
                true
            }
            None => false,
        }
    }
}

impl<L: DetectorLoader> Drop for ModelManager<L> {
    fn drop(&mut self) {
        self.unload();
    }
}
