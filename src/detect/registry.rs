use std::collections::HashMap;

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use super::backends::StubBackend;
use crate::config::{DetectorSettings, WeightsSettings};

type BackendFactory = Box<dyn Fn() -> Result<Box<dyn DetectorBackend>> + Send + Sync>;

/// Named detector constructors.
///
/// Sessions never share a detector: every session asks the registry for a
/// fresh instance, so concurrent sessions hold no common mutable state.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry holding every backend this build supports, defaulting to
    /// the one named in `settings`.
    pub fn from_settings(settings: &DetectorSettings, weights: &WeightsSettings) -> Result<Self> {
        let mut registry = Self::new();

        let lot = settings.stub.clone();
        registry.register("stub", move || {
            Ok(Box::new(StubBackend::new(lot.clone())?) as Box<dyn DetectorBackend>)
        });

        #[cfg(feature = "backend-tract")]
        {
            let tract = super::backends::TractConfig {
                model_path: settings.model_path.clone(),
                input_width: settings.input_width,
                input_height: settings.input_height,
                min_confidence: settings.min_confidence,
                nms_iou: settings.nms_iou,
            };
            let weights = weights.clone();
            registry.register("tract", move || {
                crate::weights::ensure_weights(
                    &tract.model_path,
                    weights.url.as_deref(),
                    weights.sha256.as_deref(),
                )?;
                Ok(Box::new(super::backends::TractBackend::new(tract.clone())?)
                    as Box<dyn DetectorBackend>)
            });
        }
        #[cfg(not(feature = "backend-tract"))]
        let _ = weights;

        registry.set_default(&settings.backend)?;
        Ok(registry)
    }

    /// Register a backend constructor. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<Box<dyn DetectorBackend>> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!(
                "detector backend '{}' not available (registered: {})",
                name,
                self.list().join(", ")
            ));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Build a new instance of the named backend and warm it up.
    pub fn create(&self, name: &str) -> Result<Box<dyn DetectorBackend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("detector backend '{}' not registered", name))?;
        let mut backend = factory()?;
        backend.warm_up()?;
        Ok(backend)
    }

    /// Build a new instance of the default backend.
    pub fn create_default(&self) -> Result<Box<dyn DetectorBackend>> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        self.create(name)
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// Registered backend names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
