use dashmap::DashMap;
use std::collections::HashMap;
use tag_gateway_sdk::UaSession;

/// Cached translation of one requested namespace index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceBinding {
    pub uri: Option<String>,
    pub index: u16,
}

/// Per-environment cache translating requested namespace indexes into the
/// indexes currently assigned by the live connection.
///
/// Cached URIs are re-validated on every lookup so that a server renumbering its
/// namespace table after a reconnect is picked up without clearing the cache.
#[derive(Default)]
pub struct NamespaceResolver {
    bindings: DashMap<String, HashMap<u16, NamespaceBinding>>,
}

impl NamespaceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve_index(&self, env: &str, requested: u16, session: &dyn UaSession) -> u16 {
        let cached = self
            .bindings
            .get(env)
            .and_then(|m| m.get(&requested).cloned());

        match cached {
            None => {
                // Unresolved lookups are not cached.
                let Some(uri) = session.namespace_uri(requested) else {
                    tracing::debug!(env, requested, "Namespace index not in live table");
                    return requested;
                };
                let index = session.namespace_index(&uri).unwrap_or(requested);
                self.store(env, requested, Some(uri), index);
                index
            }
            Some(binding) => {
                if let Some(uri) = binding.uri.as_deref() {
                    if let Some(index) = session.namespace_index(uri) {
                        if index != binding.index {
                            tracing::info!(env, uri, from = binding.index, to = index, "Namespace renumbered");
                            self.store(env, requested, Some(uri.to_string()), index);
                        }
                        return index;
                    }
                }
                if let Some(uri) = session.namespace_uri(requested) {
                    if let Some(index) = session.namespace_index(&uri) {
                        self.store(env, requested, Some(uri), index);
                        return index;
                    }
                }
                tracing::warn!(
                    env,
                    requested,
                    fallback = binding.index,
                    "Namespace could not be re-validated; using last known index"
                );
                binding.index
            }
        }
    }

    pub fn binding(&self, env: &str, requested: u16) -> Option<NamespaceBinding> {
        self.bindings
            .get(env)
            .and_then(|m| m.get(&requested).cloned())
    }

    /// Drops every binding of `env`.
    pub fn clear(&self, env: &str) {
        self.bindings.remove(env);
    }

    fn store(&self, env: &str, requested: u16, uri: Option<String>, index: u16) {
        self.bindings
            .entry(env.to_string())
            .or_default()
            .insert(requested, NamespaceBinding { uri, index });
    }
}
