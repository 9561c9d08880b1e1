//! Specification cache
//!
//! Compiled specifications are immutable, so the cache only ever grows until
//! a specification is explicitly unloaded. Concurrent loads of the same key
//! may both reach the loader; the first insert wins.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::identifier::SpecificationKey;
use crate::domain::repository::SpecificationLoader;
use crate::domain::specification::SpecificationModel;
use crate::CoreError;

/// Shared cache of compiled specifications
pub struct SpecificationCache {
    loader: Arc<dyn SpecificationLoader>,
    entries: DashMap<SpecificationKey, Arc<SpecificationModel>>,
}

impl SpecificationCache {
    /// Cache backed by `loader`
    pub fn new(loader: Arc<dyn SpecificationLoader>) -> Self {
        Self {
            loader,
            entries: DashMap::new(),
        }
    }

    /// Cached specification, loading it on first use
    pub async fn get_or_load(
        &self,
        key: &SpecificationKey,
    ) -> Result<Arc<SpecificationModel>, CoreError> {
        if let Some(model) = self.entries.get(key).map(|e| Arc::clone(e.value())) {
            return Ok(model);
        }

        debug!(specification = %key, "Loading specification");
        let model = Arc::new(self.loader.load(key).await?);
        if model.key() != key {
            return Err(CoreError::StructuralError(format!(
                "Loader returned {} when asked for {}",
                model.key(),
                key
            )));
        }
        let entry = self.entries.entry(key.clone()).or_insert(model);
        Ok(Arc::clone(entry.value()))
    }

    /// Insert an already compiled specification
    pub fn insert(&self, model: SpecificationModel) -> Arc<SpecificationModel> {
        let key = model.key().clone();
        info!(specification = %key, "Specification cached");
        let entry = self.entries.entry(key).or_insert_with(|| Arc::new(model));
        Arc::clone(entry.value())
    }

    /// Drop a specification from the cache
    pub fn unload(&self, key: &SpecificationKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Whether `key` is cached
    pub fn contains(&self, key: &SpecificationKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Cached specification count
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
