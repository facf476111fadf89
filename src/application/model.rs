//! Lazily loaded model handle.
//!
//! The bundle loads on first use and is shared as `Arc<ModelBundle>`
//! afterwards. Concurrent first callers wait on a mutex and the loader runs
//! at most once per successful load; a failed load is not cached, so the
//! next call retries.

use std::sync::{Arc, Mutex, OnceLock};

use crate::adapters::BundleLoader;
use crate::domain::PipelineError;
use crate::ports::ModelBundle;

type Loader = Box<dyn Fn() -> Result<ModelBundle, PipelineError> + Send + Sync>;

/// Process-wide handle to the model bundle.
pub struct LazyModel {
    bundle: OnceLock<Arc<ModelBundle>>,
    init: Mutex<()>,
    loader: Loader,
}

impl LazyModel {
    /// Handle that runs `loader` on first use.
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<ModelBundle, PipelineError> + Send + Sync + 'static,
    {
        Self {
            bundle: OnceLock::new(),
            init: Mutex::new(()),
            loader: Box::new(loader),
        }
    }

    /// Handle backed by a bundle directory.
    #[must_use]
    pub fn from_loader(loader: BundleLoader) -> Self {
        Self::new(move || loader.load().map_err(PipelineError::from))
    }

    /// Handle around an already loaded bundle.
    #[must_use]
    pub fn ready(bundle: ModelBundle) -> Self {
        let model = Self::new(|| {
            Err(PipelineError::ModelUnavailable(
                "preloaded model handle has no loader".into(),
            ))
        });
        let _ = model.bundle.set(Arc::new(bundle));
        model
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.bundle.get().is_some()
    }

    /// The bundle, loading it if this is the first call.
    ///
    /// # Errors
    /// Returns `PipelineError::ModelUnavailable` if loading fails.
    pub fn get(&self) -> Result<Arc<ModelBundle>, PipelineError> {
        if let Some(bundle) = self.bundle.get() {
            return Ok(Arc::clone(bundle));
        }

        let _guard = self
            .init
            .lock()
            .map_err(|_| PipelineError::ModelUnavailable("model loader lock poisoned".into()))?;
        if let Some(bundle) = self.bundle.get() {
            return Ok(Arc::clone(bundle));
        }

        tracing::info!("Loading model bundle...");
        let bundle = Arc::new((self.loader)()?);
        let _ = self.bundle.set(Arc::clone(&bundle));
        Ok(bundle)
    }
}

impl std::fmt::Debug for LazyModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyModel")
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::LogisticScorer;
    use crate::adapters::bundle::LogisticModel;
    use crate::domain::{StandardScaler, UsedFeatureSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bundle() -> ModelBundle {
        let scorer = LogisticScorer::new(LogisticModel {
            coefficients: vec![0.0; 8],
            intercept: 0.0,
            threshold: 0.5,
        })
        .expect("Should build scorer");
        ModelBundle::new(
            UsedFeatureSet::standard(),
            StandardScaler::new(vec![0.0; 8], vec![1.0; 8]).expect("Should build scaler"),
            Arc::new(scorer),
        )
        .expect("Should assemble")
    }

    #[test]
    fn test_loads_once_under_concurrency() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let model = LazyModel::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(bundle())
        });

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| model.get().expect("Should load"));
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(model.is_loaded());
    }

    #[test]
    fn test_failed_load_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let model = LazyModel::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(PipelineError::ModelUnavailable("missing scaler.json".into()))
            } else {
                Ok(bundle())
            }
        });

        assert!(matches!(model.get(), Err(PipelineError::ModelUnavailable(_))));
        assert!(!model.is_loaded());
        model.get().expect("Second attempt should load");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_ready_handle() {
        let model = LazyModel::ready(bundle());
        assert!(model.is_loaded());
        assert_eq!(model.get().expect("Should be loaded").used_features.len(), 8);
    }
}
