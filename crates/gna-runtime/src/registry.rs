//! Compiled models and request configurations owned by a device

use crate::error::{Error, IdentifierKind, Result};
use crate::model::CompiledModel;
use crate::request::RequestConfiguration;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identifier maps of one device.
///
/// Ids start at 1, grow monotonically and are never reused while the device
/// lives.
#[derive(Debug)]
pub struct ModelRegistry {
    models: BTreeMap<u32, Arc<CompiledModel>>,
    configs: BTreeMap<u32, RequestConfiguration>,
    next_model_id: u32,
    next_config_id: u32,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            models: BTreeMap::new(),
            configs: BTreeMap::new(),
            next_model_id: 1,
            next_config_id: 1,
        }
    }

    pub fn insert_model(&mut self, model: CompiledModel) -> u32 {
        let id = self.next_model_id;
        self.next_model_id += 1;
        self.models.insert(id, Arc::new(model));
        id
    }

    pub fn model(&self, id: u32) -> Result<&Arc<CompiledModel>> {
        self.models
            .get(&id)
            .ok_or_else(|| Error::not_found(IdentifierKind::Model, id))
    }

    /// Drop a model no configuration refers to.
    pub fn remove_model(&mut self, id: u32) -> Result<()> {
        self.model(id)?;
        let referencing = self.configs.values().filter(|config| config.model_id() == id).count();
        if referencing > 0 {
            return Err(Error::busy(
                IdentifierKind::Model,
                id,
                format!("{referencing} request configuration(s) use it"),
            ));
        }
        self.models.remove(&id);
        Ok(())
    }

    pub fn create_config(&mut self, model_id: u32) -> Result<u32> {
        let model = Arc::clone(self.model(model_id)?);
        let id = self.next_config_id;
        self.next_config_id += 1;
        self.configs.insert(id, RequestConfiguration::new(id, model_id, model));
        Ok(id)
    }

    pub fn config(&self, id: u32) -> Result<&RequestConfiguration> {
        self.configs
            .get(&id)
            .ok_or_else(|| Error::not_found(IdentifierKind::RequestConfig, id))
    }

    pub fn config_mut(&mut self, id: u32) -> Result<&mut RequestConfiguration> {
        self.configs
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(IdentifierKind::RequestConfig, id))
    }

    pub fn remove_config(&mut self, id: u32) -> Result<RequestConfiguration> {
        self.configs
            .remove(&id)
            .ok_or_else(|| Error::not_found(IdentifierKind::RequestConfig, id))
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn config_count(&self) -> usize {
        self.configs.len()
    }
}
