//! One-time loading of the engine runtime modules.

use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::{oneshot, OnceCell};

use crate::{
    config::RuntimeConfig,
    engine::{BackendReadiness, RuntimeHost},
    error::RuntimeLoadError,
};

/// Loads the runtime modules in order, at most once per loader.
///
/// The composition root builds a single loader and shares it; every caller of
/// [`RuntimeLoader::ensure_loaded`], concurrent ones included, awaits the same
/// initialisation and observes the same outcome.
pub struct RuntimeLoader {
    host: Arc<dyn RuntimeHost>,
    modules: Vec<String>,
    init: OnceCell<Result<(), RuntimeLoadError>>,
}

impl RuntimeLoader {
    pub fn new(host: Arc<dyn RuntimeHost>, modules: Vec<String>) -> Self {
        Self {
            host,
            modules,
            init: OnceCell::new(),
        }
    }

    pub fn from_config(host: Arc<dyn RuntimeHost>, config: &RuntimeConfig) -> Self {
        Self::new(host, config.module_paths())
    }

    /// Resolves once the runtime is loaded, ready and exposes its capabilities.
    pub async fn ensure_loaded(&self) -> Result<(), RuntimeLoadError> {
        self.init.get_or_init(|| self.load_runtime()).await.clone()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.init.get(), Some(Ok(())))
    }

    async fn load_runtime(&self) -> Result<(), RuntimeLoadError> {
        for module in &self.modules {
            debug!("RuntimeLoader: loading module {}", module);
            if let Err(err) = self.load_module(module).await {
                error!("RuntimeLoader: {}", err);
                return Err(err);
            }
        }

        self.wait_for_backend_ready().await?;

        if !self.host.has_capabilities() {
            error!("RuntimeLoader: runtime loaded without playback capabilities");
            return Err(RuntimeLoadError::MissingCapabilities);
        }

        info!(
            "Playback runtime initialised ({} modules)",
            self.modules.len()
        );
        Ok(())
    }

    async fn load_module(&self, module: &str) -> Result<(), RuntimeLoadError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.host.load_module(
            module,
            Box::new(move |result| {
                let _ = done_tx.send(result);
            }),
        );

        match done_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(RuntimeLoadError::Module {
                module: module.to_string(),
                reason,
            }),
            Err(_) => Err(RuntimeLoadError::Module {
                module: module.to_string(),
                reason: "load callback dropped".to_string(),
            }),
        }
    }

    // The decoder backend finishes its own setup after the modules load.
    async fn wait_for_backend_ready(&self) -> Result<(), RuntimeLoadError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let readiness = self.host.backend_readiness(Box::new(move || {
            let _ = ready_tx.send(());
        }));

        match readiness {
            BackendReadiness::Ready => Ok(()),
            BackendReadiness::Pending => {
                debug!("RuntimeLoader: waiting for backend readiness");
                ready_rx.await.map_err(|_| RuntimeLoadError::ReadinessLost)
            }
        }
    }
}
