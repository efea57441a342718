use super::{SideEffect, SideEffectKind};
use async_trait::async_trait;
use chaoscore::EngineError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Executes one family of side effects
#[async_trait]
pub trait SideEffectBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Side effect kinds this backend owns
    fn kinds(&self) -> &'static [SideEffectKind];

    async fn apply(&self, effect: SideEffect) -> Result<(), EngineError>;
}

/// Static map from side effect kind to the backend that applies it
pub struct SideEffectResolver {
    backends: HashMap<SideEffectKind, Arc<dyn SideEffectBackend>>,
}

impl SideEffectResolver {
    /// Build the map; two backends claiming the same kind is an error
    pub fn new(backends: Vec<Arc<dyn SideEffectBackend>>) -> Result<Self, EngineError> {
        let mut map: HashMap<SideEffectKind, Arc<dyn SideEffectBackend>> = HashMap::new();
        for backend in backends {
            for kind in backend.kinds() {
                if let Some(existing) = map.get(kind) {
                    return Err(EngineError::DuplicateResolver(format!(
                        "{} (claimed by {} and {})",
                        kind,
                        existing.name(),
                        backend.name()
                    )));
                }
                map.insert(*kind, backend.clone());
            }
        }
        Ok(Self { backends: map })
    }

    pub async fn resolve(&self, effect: SideEffect) -> Result<(), EngineError> {
        let kind = effect.kind();
        let backend = self
            .backends
            .get(&kind)
            .ok_or_else(|| EngineError::UnresolvedSideEffect(kind.to_string()))?;
        trace!(backend = backend.name(), effect = ?effect, "resolving side effect");
        backend.apply(effect).await
    }

    /// Apply in order; the first failure aborts the rest
    pub async fn resolve_all(&self, effects: Vec<SideEffect>) -> Result<(), EngineError> {
        for effect in effects {
            self.resolve(effect).await?;
        }
        Ok(())
    }
}
