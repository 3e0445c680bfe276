use crate::router::ChangeRouter;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use tag_gateway_models::{ModelKey, TagValue};

/// Latest value per node for every (model, environment), plus one staleness clock
/// per environment.
///
/// Values are keyed by [`NodeAddress::cache_key`](tag_gateway_sdk::NodeAddress::cache_key).
/// Every accepted value is offered to the [`ChangeRouter`] when its node is bound to
/// a mapping key.
pub struct ValueCache {
    values: DashMap<ModelKey, HashMap<String, TagValue>>,
    /// node key -> mapping key
    bindings: DashMap<ModelKey, HashMap<String, String>>,
    updated: DashMap<String, DateTime<Utc>>,
    router: ChangeRouter,
}

impl ValueCache {
    pub fn new(router: ChangeRouter) -> Self {
        Self {
            values: DashMap::new(),
            bindings: DashMap::new(),
            updated: DashMap::new(),
            router,
        }
    }

    /// Records `value`, stamps the environment clock and routes the change.
    pub fn set_value(&self, model: &ModelKey, node_key: &str, value: TagValue) {
        let previous = self
            .values
            .entry(model.clone())
            .or_default()
            .insert(node_key.to_string(), value.clone());
        self.stamp(&model.env, Utc::now());

        let mapping_key = self
            .bindings
            .get(model)
            .and_then(|b| b.get(node_key).cloned());
        if let Some(mapping_key) = mapping_key {
            self.router.route(
                &model.name,
                &model.env,
                &mapping_key,
                previous.as_ref(),
                &value,
            );
        }
    }

    /// Snapshot of the cached values; empty when nothing is cached.
    pub fn get_values(&self, model: &ModelKey) -> HashMap<String, TagValue> {
        self.values
            .get(model)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn get_value(&self, model: &ModelKey, node_key: &str) -> Option<TagValue> {
        self.values
            .get(model)
            .and_then(|v| v.get(node_key).cloned())
    }

    /// Drops values and key bindings of `model`.
    pub fn remove(&self, model: &ModelKey) {
        self.values.remove(model);
        self.bindings.remove(model);
    }

    /// Replaces the node -> mapping key bindings of `model`. An empty set clears them,
    /// which stops routing while keeping cached values.
    pub fn register_mappings(&self, model: &ModelKey, bindings: HashMap<String, String>) {
        if bindings.is_empty() {
            self.bindings.remove(model);
        } else {
            self.bindings.insert(model.clone(), bindings);
        }
    }

    pub fn binding(&self, model: &ModelKey, node_key: &str) -> Option<String> {
        self.bindings
            .get(model)
            .and_then(|b| b.get(node_key).cloned())
    }

    /// Last time a value was accepted for `env`; the Unix epoch when never.
    pub fn staleness(&self, env: &str) -> DateTime<Utc> {
        self.updated
            .get(env)
            .map(|t| *t)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn stamp(&self, env: &str, at: DateTime<Utc>) {
        self.updated.insert(env.to_string(), at);
    }
}
