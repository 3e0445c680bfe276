use crate::{
    cache::ValueCache,
    mapping::MappingResolver,
    southward::{ConnectionManager, EnvGuard, SubscriptionManager},
};
use dashmap::DashMap;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};
use tag_gateway_error::{GatewayError, GatewayResult, NotFoundKind};
use tag_gateway_models::{
    constants::STATUS_KEY, request::ValueUpdateRequest, MappingDesc, ModelKey, ModelMeta,
    TagValue,
};
use tag_gateway_sdk::{BrowseEntry, ConnectionState, NodeAddress, StatusClass, UaScalar};
use tracing::{info, warn};
use validator::Validate;

/// Declared mapping sets per (model, environment) and the entry point of every
/// model-facing operation.
pub struct ModelRegistry {
    models: DashMap<ModelKey, ModelMeta>,
    connections: Arc<ConnectionManager>,
    subscriptions: Arc<SubscriptionManager>,
    cache: Arc<ValueCache>,
}

impl ModelRegistry {
    pub fn new(
        connections: Arc<ConnectionManager>,
        subscriptions: Arc<SubscriptionManager>,
        cache: Arc<ValueCache>,
    ) -> Self {
        Self {
            models: DashMap::new(),
            connections,
            subscriptions,
            cache,
        }
    }

    fn ensure_declared(&self, env: &str) -> GatewayResult<()> {
        if self.connections.is_declared(env) {
            Ok(())
        } else {
            Err(GatewayError::not_found(NotFoundKind::Environment, env))
        }
    }

    /// Replaces the mapping set of `name` on `env` wholesale.
    ///
    /// A live subscription of the previous set is removed first. The whole
    /// replacement runs under the environment lock.
    pub async fn replace_mappings(
        &self,
        name: &str,
        env: &str,
        mappings: Vec<MappingDesc>,
    ) -> GatewayResult<ModelMeta> {
        self.ensure_declared(env)?;
        Self::validate_mappings(&mappings)?;

        let key = ModelKey::new(name, env);
        let guard = self.connections.lock(env).await;
        if !self.subscriptions.unsubscribe_locked(&guard, &key).await? {
            return Err(GatewayError::Internal(format!(
                "subscription of {key} could not be removed"
            )));
        }

        let bindings = Self::bindings(&mappings);
        let meta = ModelMeta {
            name: name.to_string(),
            env: env.to_string(),
            mappings,
        };
        self.models.insert(key.clone(), meta.clone());
        self.cache.register_mappings(&key, bindings);
        info!(model = %key, mappings = meta.mappings.len(), "Mappings replaced");
        Ok(meta)
    }

    fn validate_mappings(mappings: &[MappingDesc]) -> GatewayResult<()> {
        let mut fields = BTreeMap::new();
        let mut seen = HashSet::new();
        for mapping in mappings {
            if let Err(e) = mapping.validate() {
                fields.insert(mapping.key.clone(), format!("Validation error: {e}"));
                continue;
            }
            if !seen.insert(mapping.key.as_str()) {
                fields.insert(mapping.key.clone(), "Duplicate mapping key".to_string());
                continue;
            }
            if let Err(GatewayError::Validation { fields: errors, .. }) =
                MappingResolver::identifier(mapping)
            {
                fields.extend(errors);
            }
        }
        if fields.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::validation("Invalid mappings", fields))
        }
    }

    /// node key -> mapping key, for every mapping with a valid selector.
    fn bindings(mappings: &[MappingDesc]) -> HashMap<String, String> {
        mappings
            .iter()
            .filter_map(|m| {
                MappingResolver::identifier(m)
                    .ok()
                    .map(|id| (id.to_string(), m.key.clone()))
            })
            .collect()
    }

    /// Mapping set of `name` on the guarded environment, read under its lock.
    fn mappings_locked(&self, guard: &EnvGuard, name: &str) -> GatewayResult<ModelMeta> {
        self.mappings(name, guard.env())
    }

    pub fn mappings(&self, name: &str, env: &str) -> GatewayResult<ModelMeta> {
        let key = ModelKey::new(name, env);
        self.models
            .get(&key)
            .map(|m| m.value().clone())
            .ok_or_else(|| GatewayError::not_found(NotFoundKind::Model, key.to_string()))
    }

    /// Mapping sets of `name` keyed by environment.
    pub fn mappings_all(&self, name: &str) -> GatewayResult<BTreeMap<String, Vec<MappingDesc>>> {
        let all: BTreeMap<String, Vec<MappingDesc>> = self
            .models
            .iter()
            .filter(|e| e.key().name == name)
            .map(|e| (e.key().env.clone(), e.value().mappings.clone()))
            .collect();
        if all.is_empty() {
            return Err(GatewayError::not_found(NotFoundKind::Model, name));
        }
        Ok(all)
    }

    /// Unsubscribes and forgets `name` on every environment. Unknown models succeed.
    pub async fn remove_all_mappings(&self, name: &str) -> GatewayResult<()> {
        let mut keys: Vec<ModelKey> = self
            .models
            .iter()
            .filter(|e| e.key().name == name)
            .map(|e| e.key().clone())
            .collect();
        keys.sort();

        let mut failures = Vec::new();
        for key in keys {
            let guard = self.connections.lock(&key.env).await;
            match self.subscriptions.unsubscribe_locked(&guard, &key).await {
                Ok(true) => {
                    self.models.remove(&key);
                    self.cache.remove(&key);
                    info!(model = %key, "Mappings removed");
                }
                Ok(false) => failures.push(format!("{key}: unsubscribe timed out")),
                Err(e) => failures.push(format!("{key}: {e}")),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::Internal(format!(
                "failed to remove mappings: {}",
                failures.join("; ")
            )))
        }
    }

    /// Registered mappings named by `keys`, in request order. Empty `keys` selects all.
    pub fn mappings_by_keys(meta: &ModelMeta, keys: &[String]) -> GatewayResult<Vec<MappingDesc>> {
        if keys.is_empty() {
            return Ok(meta.mappings.clone());
        }
        let mut selected = Vec::with_capacity(keys.len());
        let mut unknown = BTreeMap::new();
        for key in keys {
            match meta.mapping(key) {
                Some(m) if !selected.contains(m) => selected.push(m.clone()),
                Some(_) => {}
                None => {
                    unknown.insert(key.clone(), "Unknown mapping".to_string());
                }
            }
        }
        if unknown.is_empty() {
            Ok(selected)
        } else {
            Err(GatewayError::validation("Unknown mappings found", unknown))
        }
    }

    /// Subscribes to the named mappings and returns the seeded values.
    pub async fn subscribe(
        &self,
        name: &str,
        env: &str,
        keys: &[String],
    ) -> GatewayResult<HashMap<String, TagValue>> {
        self.ensure_declared(env)?;
        let guard = self.connections.lock(env).await;
        let meta = self.mappings_locked(&guard, name)?;
        let selected = Self::mappings_by_keys(&meta, keys)?;
        self.subscriptions
            .subscribe_locked(&guard, &meta.key(), &selected)
            .await
    }

    pub async fn unsubscribe(&self, name: &str, env: &str) -> GatewayResult<()> {
        let key = ModelKey::new(name, env);
        if self.subscriptions.unsubscribe(&key).await? {
            Ok(())
        } else {
            Err(GatewayError::Internal(format!(
                "unsubscribe of {key} timed out"
            )))
        }
    }

    /// Cached values keyed by mapping key. Nodes without a mapping are left out.
    pub fn values(&self, name: &str, env: &str) -> GatewayResult<HashMap<String, TagValue>> {
        let meta = self.mappings(name, env)?;
        let mut cached = self.cache.get_values(&meta.key());
        Ok(meta
            .mappings
            .iter()
            .filter_map(|m| {
                let node_key = MappingResolver::identifier(m).ok()?.to_string();
                cached.remove(&node_key).map(|v| (m.key.clone(), v))
            })
            .collect())
    }

    /// Fresh read of the named mappings, bypassing the cache.
    pub async fn read_values(
        &self,
        name: &str,
        env: &str,
        keys: &[String],
    ) -> GatewayResult<HashMap<String, TagValue>> {
        self.ensure_declared(env)?;
        let guard = self.connections.lock(env).await;
        let meta = self.mappings_locked(&guard, name)?;
        let selected = Self::mappings_by_keys(&meta, keys)?;
        self.subscriptions
            .get_all_values_locked(&guard, &meta.key(), &selected)
            .await
    }

    /// Writes `request`; returns the write status per mapping key.
    ///
    /// Any unknown required key rejects the whole request before anything is
    /// written. Unknown optional keys are skipped. Required and optional values go
    /// out as two separate writes.
    pub async fn set_values(
        &self,
        name: &str,
        env: &str,
        request: &ValueUpdateRequest,
    ) -> GatewayResult<HashMap<String, StatusClass>> {
        self.ensure_declared(env)?;
        let guard = self.connections.lock(env).await;
        let meta = self.mappings_locked(&guard, name)?;

        let unknown: BTreeMap<String, String> = request
            .required
            .keys()
            .filter(|k| meta.mapping(k).is_none())
            .map(|k| (k.clone(), "Unknown mapping".to_string()))
            .collect();
        if !unknown.is_empty() {
            return Err(GatewayError::validation("Unknown mappings found", unknown));
        }

        let required: Vec<(&MappingDesc, f64)> = request
            .required
            .iter()
            .filter_map(|(k, v)| Some((meta.mapping(k)?, (*v)?)))
            .collect();
        let optional: Vec<(&MappingDesc, f64)> = request
            .optional
            .iter()
            .filter_map(|(k, v)| match meta.mapping(k) {
                Some(m) => Some((m, (*v)?)),
                None => {
                    warn!(model = %meta.key(), key = %k, "Unknown optional mapping skipped");
                    None
                }
            })
            .collect();

        let mut statuses = self.write(&guard, &meta.key(), &required).await?;
        statuses.extend(self.write(&guard, &meta.key(), &optional).await?);
        Ok(statuses)
    }

    async fn write(
        &self,
        guard: &EnvGuard,
        model: &ModelKey,
        items: &[(&MappingDesc, f64)],
    ) -> GatewayResult<HashMap<String, StatusClass>> {
        if items.is_empty() {
            return Ok(HashMap::new());
        }
        let session = self.connections.ensure_connected(guard).await?;

        let mut pairs: Vec<(NodeAddress, UaScalar)> = Vec::with_capacity(items.len());
        for (mapping, value) in items {
            let address = self.connections.resolve(guard, &session, mapping)?;
            let scalar = if mapping.key.eq_ignore_ascii_case(STATUS_KEY) {
                UaScalar::Int32(*value as i32)
            } else {
                UaScalar::Float(*value as f32)
            };
            pairs.push((address, scalar));
        }

        let results = self.connections.write(guard, &pairs).await?;
        let mut statuses = HashMap::with_capacity(items.len());
        for (((mapping, value), (address, _)), status) in
            items.iter().zip(pairs.iter()).zip(results)
        {
            if status.is_good() {
                self.cache
                    .set_value(model, &address.cache_key(), TagValue::written(*value));
            }
            statuses.insert(mapping.key.clone(), status);
        }
        Ok(statuses)
    }

    /// Diagnostic browse of `env`.
    pub async fn browse(&self, env: &str) -> GatewayResult<Vec<BrowseEntry>> {
        self.ensure_declared(env)?;
        let guard = self.connections.lock(env).await;
        self.connections.browse(&guard).await
    }

    pub fn environments(&self) -> Vec<(String, ConnectionState)> {
        self.connections.states()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ModelMeta {
        ModelMeta {
            name: "boiler".into(),
            env: "iot".into(),
            mappings: vec![
                MappingDesc::numeric("a", 2, 1),
                MappingDesc::numeric("b", 2, 2),
            ],
        }
    }

    #[test]
    fn empty_keys_select_everything() {
        let selected = ModelRegistry::mappings_by_keys(&meta(), &[]).unwrap();
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn unknown_keys_are_all_named() {
        let keys = vec!["a".to_string(), "x".to_string(), "y".to_string()];
        match ModelRegistry::mappings_by_keys(&meta(), &keys) {
            Err(GatewayError::Validation { fields, .. }) => {
                assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["x", "y"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn repeated_keys_select_once() {
        let keys = vec!["b".to_string(), "b".to_string()];
        let selected = ModelRegistry::mappings_by_keys(&meta(), &keys).unwrap();
        assert_eq!(selected, vec![MappingDesc::numeric("b", 2, 2)]);
    }

    #[test]
    fn invalid_and_duplicate_mappings_are_reported_together() {
        let bare = MappingDesc {
            node_id: None,
            ..MappingDesc::numeric("bare", 2, 0)
        };
        let mappings = vec![
            MappingDesc::numeric("a", 2, 1),
            MappingDesc::numeric("a", 2, 2),
            bare,
        ];
        match ModelRegistry::validate_mappings(&mappings) {
            Err(GatewayError::Validation { fields, .. }) => {
                assert!(fields.contains_key("a"));
                assert!(fields.contains_key("bare"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
