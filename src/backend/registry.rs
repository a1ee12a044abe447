//! Lookup of configured adapters by [`BackendKind`].
//!
//! The registry is assembled once at startup and then shared read-only
//! behind an `Arc`; controllers resolve their adapter through it and never
//! name a concrete provider type.

use super::modal::ModalBackend;
use super::runpod::RunpodBackend;
use super::worker::WorkerBackend;
use super::{Capabilities, ConversionBackend};
use crate::config::{BackendConfig, BackendKind};
use crate::error::JobError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Adapters available to this process.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<BackendKind, Arc<dyn ConversionBackend>>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the adapter serving `kind`.
    pub fn register(mut self, kind: BackendKind, backend: Arc<dyn ConversionBackend>) -> Self {
        debug!("registry: {} → {}", kind, backend.name());
        self.backends.insert(kind, backend);
        self
    }

    /// Build the stock HTTP adapter for every config.
    pub fn from_configs(configs: &[BackendConfig]) -> Result<Self, JobError> {
        configs.iter().try_fold(Self::new(), |registry, config| {
            let backend: Arc<dyn ConversionBackend> = match config.kind {
                BackendKind::Worker => Arc::new(WorkerBackend::new(config)?),
                BackendKind::Modal => Arc::new(ModalBackend::new(config)?),
                BackendKind::Runpod => Arc::new(RunpodBackend::new(config)?),
            };
            Ok(registry.register(config.kind, backend))
        })
    }

    /// The adapter serving `kind`.
    ///
    /// # Errors
    /// [`JobError::UnknownBackend`] when nothing is registered for `kind`.
    pub fn select(&self, kind: BackendKind) -> Result<Arc<dyn ConversionBackend>, JobError> {
        self.backends
            .get(&kind)
            .cloned()
            .ok_or_else(|| JobError::UnknownBackend {
                kind: kind.to_string(),
            })
    }

    pub fn capabilities(&self, kind: BackendKind) -> Result<Capabilities, JobError> {
        self.select(kind).map(|b| Capabilities::of(b.as_ref()))
    }

    /// Registered kinds, in declaration order.
    pub fn kinds(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|k| self.backends.contains_key(k))
            .collect()
    }
}
