use super::namespace::NamespaceResolver;
use crate::mapping::MappingResolver;
use dashmap::DashMap;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tag_gateway_error::{GatewayError, GatewayResult, NotFoundKind};
use tag_gateway_models::{
    constants::{BROWSE_CHILDREN_PER_LEVEL, BROWSE_MAX_DEPTH, OBJECTS_FOLDER_ID},
    settings::Opc,
    MappingDesc,
};
use tag_gateway_sdk::{
    with_deadline, BrowseEntry, ClientIdentity, ConnectionState, DataSample, Endpoint,
    NodeAddress, StatusClass, UaConnector, UaScalar, UaSession,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Proof that the caller holds the lock of one environment.
///
/// Operations that must run under the lock take `&EnvGuard` instead of locking
/// again, so a held lock is never re-acquired.
pub struct EnvGuard {
    env: String,
    _guard: OwnedMutexGuard<()>,
}

impl EnvGuard {
    #[inline]
    pub fn env(&self) -> &str {
        &self.env
    }
}

/// Lazily built, never shrinking set of per-environment locks.
#[derive(Default)]
struct EnvLocks {
    per_env: DashMap<String, Arc<Mutex<()>>>,
}

impl EnvLocks {
    #[inline]
    fn mutex_for(&self, env: &str) -> Arc<Mutex<()>> {
        self.per_env
            .entry(env.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Owns one live session per declared environment.
pub struct ConnectionManager {
    endpoints: HashMap<String, Endpoint>,
    identity: ClientIdentity,
    connector: Arc<dyn UaConnector>,
    namespaces: NamespaceResolver,
    sessions: DashMap<String, Arc<dyn UaSession>>,
    /// Environments whose last connect attempt failed; retried on every health tick.
    failed: DashMap<String, Endpoint>,
    states: DashMap<String, ConnectionState>,
    locks: EnvLocks,
    timeout: Duration,
    connect_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(
        endpoints: Vec<Endpoint>,
        identity: ClientIdentity,
        connector: Arc<dyn UaConnector>,
        opc: &Opc,
    ) -> Self {
        let mut declared = HashMap::with_capacity(endpoints.len());
        for endpoint in endpoints {
            if let Some(previous) = declared.insert(endpoint.name.clone(), endpoint) {
                warn!(env = %previous.name, "Duplicate endpoint declaration; last one wins");
            }
        }
        Self {
            endpoints: declared,
            identity,
            connector,
            namespaces: NamespaceResolver::new(),
            sessions: DashMap::new(),
            failed: DashMap::new(),
            states: DashMap::new(),
            locks: EnvLocks::default(),
            timeout: opc.timeout(),
            connect_timeout: opc.connect_timeout(),
        }
    }

    /// Acquires the lock serializing every state-changing operation on `env`.
    pub async fn lock(&self, env: &str) -> EnvGuard {
        let guard = self.locks.mutex_for(env).lock_owned().await;
        EnvGuard {
            env: env.to_string(),
            _guard: guard,
        }
    }

    /// Connects every configured endpoint once. Failures land in the failed set.
    pub async fn connect_all(&self) {
        let mut names: Vec<&String> = self.endpoints.keys().collect();
        names.sort();
        for env in names {
            let guard = self.lock(env).await;
            self.connect(&guard).await;
        }
    }

    /// Opens a fresh session for the guarded environment.
    ///
    /// On success the new session replaces the old one, whose disconnect runs in the
    /// background, and the namespace cache and failed entry are cleared. On failure
    /// the environment is put into the failed set and any previous session is kept.
    pub async fn connect(&self, guard: &EnvGuard) -> bool {
        let env = guard.env();
        let Some(endpoint) = self.endpoints.get(env).cloned() else {
            warn!(env, "Connect requested for an undeclared environment");
            return false;
        };

        self.states
            .insert(env.to_string(), ConnectionState::Connecting);
        info!(env, url = %endpoint.url, kind = ?endpoint.kind, "Connecting");

        let connecting = self.connector.connect(&endpoint, &self.identity);
        match with_deadline(format!("connect@{env}"), self.connect_timeout, connecting).await {
            Ok(session) => {
                if let Some(old) = self.sessions.insert(env.to_string(), session) {
                    disconnect_in_background(old);
                }
                self.namespaces.clear(env);
                self.failed.remove(env);
                self.states
                    .insert(env.to_string(), ConnectionState::Connected);
                info!(env, "Connected");
                true
            }
            Err(e) => {
                warn!(env, error = %e, "Connect failed; scheduled for retry");
                self.failed.insert(env.to_string(), endpoint);
                self.states
                    .insert(env.to_string(), ConnectionState::Failed(e.to_string()));
                false
            }
        }
    }

    /// Live session of the guarded environment, connecting first when it has none.
    pub async fn ensure_connected(&self, guard: &EnvGuard) -> GatewayResult<Arc<dyn UaSession>> {
        let env = guard.env();
        self.drop_lost_session(guard);
        if let Some(session) = self.session(env) {
            return Ok(session);
        }
        if !self.is_declared(env) {
            return Err(GatewayError::not_found(NotFoundKind::Environment, env));
        }
        if self.connect(guard).await {
            if let Some(session) = self.session(env) {
                return Ok(session);
            }
        }
        Err(GatewayError::Internal(format!("environment `{env}` is not connected")))
    }

    /// Drops the session of the guarded environment when its connection is gone
    /// and puts the environment into the failed set. Returns true if it did.
    pub fn drop_lost_session(&self, guard: &EnvGuard) -> bool {
        let env = guard.env();
        if !self.has_lost_session(env) {
            return false;
        }
        if let Some((_, session)) = self.sessions.remove(env) {
            disconnect_in_background(session);
        }
        if let Some(endpoint) = self.endpoints.get(env) {
            self.failed.insert(env.to_string(), endpoint.clone());
        }
        self.states.insert(
            env.to_string(),
            ConnectionState::Failed("connection lost".to_string()),
        );
        warn!(env, "Session lost; scheduled for reconnect");
        true
    }

    /// True when `env` holds a session whose connection is gone.
    pub fn has_lost_session(&self, env: &str) -> bool {
        self.sessions.get(env).is_some_and(|s| !s.is_alive())
    }

    pub fn session(&self, env: &str) -> Option<Arc<dyn UaSession>> {
        self.sessions.get(env).map(|s| Arc::clone(s.value()))
    }

    /// Address of `mapping` on the guarded environment's live namespace table.
    pub fn resolve(
        &self,
        guard: &EnvGuard,
        session: &Arc<dyn UaSession>,
        mapping: &MappingDesc,
    ) -> GatewayResult<NodeAddress> {
        let namespace =
            self.namespaces
                .resolve_index(guard.env(), mapping.namespace_index, session.as_ref());
        MappingResolver::resolve(mapping, namespace)
    }

    pub async fn read(
        &self,
        guard: &EnvGuard,
        nodes: &[NodeAddress],
    ) -> GatewayResult<Vec<DataSample>> {
        let env = guard.env();
        let session = self.ensure_connected(guard).await?;
        let samples =
            with_deadline(format!("read@{env}"), self.timeout, session.read(nodes)).await?;
        if samples.len() != nodes.len() {
            return Err(GatewayError::Internal(format!(
                "read@{env} returned {} results for {} nodes",
                samples.len(),
                nodes.len()
            )));
        }
        debug!(env, count = nodes.len(), "Read completed");
        Ok(samples)
    }

    pub async fn write(
        &self,
        guard: &EnvGuard,
        values: &[(NodeAddress, UaScalar)],
    ) -> GatewayResult<Vec<StatusClass>> {
        let env = guard.env();
        let session = self.ensure_connected(guard).await?;
        let statuses =
            with_deadline(format!("write@{env}"), self.timeout, session.write(values)).await?;
        if statuses.len() != values.len() {
            return Err(GatewayError::Internal(format!(
                "write@{env} returned {} results for {} nodes",
                statuses.len(),
                values.len()
            )));
        }
        for ((node, _), status) in values.iter().zip(statuses.iter()) {
            if !status.is_good() {
                warn!(env, node = %node, status = %status, "Write rejected");
            }
        }
        Ok(statuses)
    }

    /// Depth-first walk from the Objects folder, logging every visited node.
    pub async fn browse(&self, guard: &EnvGuard) -> GatewayResult<Vec<BrowseEntry>> {
        let env = guard.env();
        let session = self.ensure_connected(guard).await?;
        let root = NodeAddress::numeric(0, OBJECTS_FOLDER_ID);

        let mut visited = Vec::new();
        let mut stack: Vec<BrowseEntry> = Vec::new();
        let children = self.children(env, &session, &root, 1).await?;
        stack.extend(children.into_iter().rev());

        while let Some(entry) = stack.pop() {
            info!(
                env,
                depth = entry.depth,
                node = %entry.node,
                browse_name = %entry.browse_name,
                display_name = %entry.display_name,
                "Browsed"
            );
            if entry.depth < BROWSE_MAX_DEPTH {
                let children = self
                    .children(env, &session, &entry.node, entry.depth + 1)
                    .await?;
                stack.extend(children.into_iter().rev());
            }
            visited.push(entry);
        }
        Ok(visited)
    }

    async fn children(
        &self,
        env: &str,
        session: &Arc<dyn UaSession>,
        node: &NodeAddress,
        depth: usize,
    ) -> GatewayResult<Vec<BrowseEntry>> {
        let children =
            with_deadline(format!("browse@{env}"), self.timeout, session.browse(node)).await?;
        Ok(children
            .into_iter()
            .take(BROWSE_CHILDREN_PER_LEVEL)
            .map(|mut c| {
                c.depth = depth;
                c
            })
            .collect())
    }

    /// True when the environment has a live session or a failed connect on record.
    pub fn is_declared(&self, env: &str) -> bool {
        self.sessions.contains_key(env) || self.failed.contains_key(env)
    }

    pub fn is_failed(&self, env: &str) -> bool {
        self.failed.contains_key(env)
    }

    pub fn failed_envs(&self) -> Vec<String> {
        let mut envs: Vec<String> = self.failed.iter().map(|e| e.key().clone()).collect();
        envs.sort();
        envs
    }

    /// Every configured environment name, sorted.
    pub fn declared_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.endpoints.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn state(&self, env: &str) -> ConnectionState {
        self.states
            .get(env)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    pub fn states(&self) -> Vec<(String, ConnectionState)> {
        self.declared_names()
            .into_iter()
            .map(|env| {
                let state = self.state(&env);
                (env, state)
            })
            .collect()
    }

    pub fn namespaces(&self) -> &NamespaceResolver {
        &self.namespaces
    }

    /// Disconnects every session, each bounded in time.
    pub async fn shutdown(&self) {
        let envs: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for env in envs {
            let guard = self.lock(&env).await;
            if let Some((_, session)) = self.sessions.remove(guard.env()) {
                let res = with_deadline(format!("disconnect@{env}"), DISCONNECT_TIMEOUT, async {
                    session.disconnect().await;
                    Ok::<_, GatewayError>(())
                })
                .await;
                if res.is_ok() {
                    info!(env = %env, "Disconnected");
                }
            }
            self.states
                .insert(env.clone(), ConnectionState::Disconnected);
        }
    }
}

fn disconnect_in_background(session: Arc<dyn UaSession>) {
    tokio::spawn(async move {
        let _ = with_deadline("disconnect", DISCONNECT_TIMEOUT, async {
            session.disconnect().await;
            Ok::<_, GatewayError>(())
        })
        .await;
    });
}
