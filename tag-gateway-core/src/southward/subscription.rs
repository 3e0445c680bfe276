use super::connection::{ConnectionManager, EnvGuard};
use crate::cache::ValueCache;
use dashmap::DashMap;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tag_gateway_error::{GatewayError, GatewayResult, ItemError};
use tag_gateway_models::{settings::Opc, MappingDesc, ModelKey, TagValue};
use tag_gateway_sdk::{
    with_deadline, NodeAddress, SubscriptionEvent, SubscriptionListener, UaSession,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// A mapping key together with the address it was resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedNode {
    pub key: String,
    pub address: NodeAddress,
}

/// Asks for a subscription to be rebuilt after the server dropped it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResubscribeRequest {
    pub model: ModelKey,
    pub subscription_id: u32,
}

#[derive(Clone)]
struct SubscriptionHandle {
    id: u32,
    nodes: Arc<Vec<MappedNode>>,
    sink: Arc<CacheSink>,
}

/// Listener feeding one model's notifications into the value cache.
///
/// Data is only accepted while armed, i.e. between a completed subscribe and the
/// start of its teardown.
struct CacheSink {
    model: ModelKey,
    cache: Arc<ValueCache>,
    armed: AtomicBool,
    resubscribe_tx: mpsc::UnboundedSender<ResubscribeRequest>,
}

impl CacheSink {
    fn new(
        model: ModelKey,
        cache: Arc<ValueCache>,
        resubscribe_tx: mpsc::UnboundedSender<ResubscribeRequest>,
    ) -> Self {
        Self {
            model,
            cache,
            armed: AtomicBool::new(false),
            resubscribe_tx,
        }
    }

    #[inline]
    fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    #[inline]
    fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }
}

impl SubscriptionListener for CacheSink {
    fn on_event(&self, subscription_id: u32, event: SubscriptionEvent) {
        let model = &self.model;
        match event {
            SubscriptionEvent::DataReceived(items) => {
                if !self.armed.load(Ordering::Acquire) {
                    trace!(model = %model, subscription_id, "Notification before subscribe completed; ignored");
                    return;
                }
                for (address, sample) in items {
                    match TagValue::from_notification(&sample) {
                        Ok(value) => {
                            trace!(model = %model, node = %address, value = ?value.value, "Value changed");
                            self.cache.set_value(model, &address.cache_key(), value);
                        }
                        Err(e) => {
                            warn!(model = %model, node = %address, error = %e, "Notification skipped");
                        }
                    }
                }
            }
            SubscriptionEvent::KeepAlive => {
                trace!(model = %model, subscription_id, "Keep-alive");
            }
            SubscriptionEvent::StatusChanged(status) => {
                info!(model = %model, subscription_id, status = %status, "Subscription status changed");
            }
            SubscriptionEvent::TransferFailed(status) => {
                warn!(model = %model, subscription_id, status = %status, "Subscription transfer failed; resubscribing");
                let request = ResubscribeRequest {
                    model: model.clone(),
                    subscription_id,
                };
                if self.resubscribe_tx.send(request).is_err() {
                    error!(model = %model, "Resubscribe worker is gone");
                }
            }
            SubscriptionEvent::WatchdogElapsed => {
                warn!(model = %model, subscription_id, "Subscription watchdog elapsed");
            }
        }
    }
}

/// Creates, tears down and recreates one subscription per (model, environment).
///
/// Public operations take the environment lock; the `*_locked` variants expect the
/// caller to hold it already.
pub struct SubscriptionManager {
    connections: Arc<ConnectionManager>,
    cache: Arc<ValueCache>,
    subscriptions: DashMap<ModelKey, SubscriptionHandle>,
    interval: Duration,
    timeout: Duration,
    resubscribe_timeout: Duration,
    resubscribe_tx: mpsc::UnboundedSender<ResubscribeRequest>,
}

impl SubscriptionManager {
    pub fn new(
        connections: Arc<ConnectionManager>,
        cache: Arc<ValueCache>,
        opc: &Opc,
    ) -> (Self, mpsc::UnboundedReceiver<ResubscribeRequest>) {
        let (resubscribe_tx, rx) = mpsc::unbounded_channel();
        let manager = Self {
            connections,
            cache,
            subscriptions: DashMap::new(),
            interval: opc.subscription_interval(),
            timeout: opc.timeout(),
            resubscribe_timeout: opc.resubscribe_timeout(),
            resubscribe_tx,
        };
        (manager, rx)
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Subscribes `model` to `mappings`, replacing any previous subscription, and
    /// returns the values of one seeding read keyed by mapping key.
    ///
    /// Every item that cannot be created is reported in one
    /// [`GatewayError::Subscription`]; the subscription is then discarded.
    pub async fn subscribe_locked(
        &self,
        guard: &EnvGuard,
        model: &ModelKey,
        mappings: &[MappingDesc],
    ) -> GatewayResult<HashMap<String, TagValue>> {
        let env = guard.env();
        if self.subscriptions.contains_key(model) && !self.unsubscribe_locked(guard, model).await? {
            return Err(GatewayError::Internal(format!(
                "previous subscription of {model} could not be removed"
            )));
        }

        let session = self.connections.ensure_connected(guard).await?;

        let mut errors = Vec::new();
        let mut nodes = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            match self.connections.resolve(guard, &session, mapping) {
                Ok(address) => nodes.push(MappedNode {
                    key: mapping.key.clone(),
                    address,
                }),
                Err(e) => errors.push(ItemError::new(
                    &mapping.key,
                    format!("ns={}", mapping.namespace_index),
                    e.to_string(),
                )),
            }
        }

        let sink = Arc::new(CacheSink::new(
            model.clone(),
            Arc::clone(&self.cache),
            self.resubscribe_tx.clone(),
        ));
        let id = self
            .create_with_items(env, &session, &sink, &nodes, self.timeout, &mut errors)
            .await?;

        if !errors.is_empty() {
            if let Err(e) = self.delete_remote(env, &session, id, self.timeout).await {
                warn!(model = %model, subscription_id = id, error = %e, "Failed to discard rejected subscription");
            }
            for e in errors.iter() {
                warn!(model = %model, "{e}");
            }
            return Err(GatewayError::Subscription(errors));
        }

        let bindings = nodes
            .iter()
            .map(|n| (n.address.cache_key(), n.key.clone()))
            .collect();
        self.cache.register_mappings(model, bindings);
        let nodes = Arc::new(nodes);
        self.subscriptions.insert(
            model.clone(),
            SubscriptionHandle {
                id,
                nodes: Arc::clone(&nodes),
                sink: Arc::clone(&sink),
            },
        );
        sink.arm();
        info!(model = %model, subscription_id = id, items = nodes.len(), "Subscribed");

        self.read_locked(guard, model, &nodes).await
    }

    /// Creates a subscription and its items. Items that fail are appended to
    /// `errors`; a transport failure discards the subscription and is returned.
    async fn create_with_items(
        &self,
        env: &str,
        session: &Arc<dyn UaSession>,
        sink: &Arc<CacheSink>,
        nodes: &[MappedNode],
        timeout: Duration,
        errors: &mut Vec<ItemError>,
    ) -> GatewayResult<u32> {
        let listener: Arc<dyn SubscriptionListener> = sink.clone();
        let id = with_deadline(
            format!("create subscription@{env}"),
            timeout,
            session.create_subscription(self.interval, listener),
        )
        .await?;

        let addresses: Vec<NodeAddress> = nodes.iter().map(|n| n.address.clone()).collect();
        let statuses = match with_deadline(
            format!("create items@{env}"),
            timeout,
            session.create_items(id, &addresses),
        )
        .await
        {
            Ok(statuses) if statuses.len() == nodes.len() => statuses,
            Ok(statuses) => {
                if let Err(e) = self.delete_remote(env, session, id, timeout).await {
                    warn!(env, subscription_id = id, error = %e, "Failed to discard incomplete subscription");
                }
                return Err(GatewayError::Internal(format!(
                    "create items@{env} returned {} results for {} nodes",
                    statuses.len(),
                    nodes.len()
                )));
            }
            Err(e) => {
                if let Err(delete) = self.delete_remote(env, session, id, timeout).await {
                    warn!(env, subscription_id = id, error = %delete, "Failed to discard incomplete subscription");
                }
                return Err(e);
            }
        };

        for (node, status) in nodes.iter().zip(statuses) {
            if !status.status.is_good() {
                errors.push(ItemError::new(
                    &node.key,
                    node.address.to_string(),
                    format!("create data item failure: {}", status.detail),
                ));
            }
        }
        Ok(id)
    }

    async fn delete_remote(
        &self,
        env: &str,
        session: &Arc<dyn UaSession>,
        id: u32,
        timeout: Duration,
    ) -> GatewayResult<()> {
        with_deadline(
            format!("delete subscription@{env}"),
            timeout,
            session.delete_subscription(id),
        )
        .await
    }

    /// Removes the subscription of `model`. Unknown subscriptions succeed without
    /// touching the transport.
    ///
    /// Returns `false` when the delete timed out; the subscription is then kept so
    /// the call can be retried.
    pub async fn unsubscribe(&self, model: &ModelKey) -> GatewayResult<bool> {
        let guard = self.connections.lock(&model.env).await;
        self.unsubscribe_locked(&guard, model).await
    }

    pub async fn unsubscribe_locked(&self, guard: &EnvGuard, model: &ModelKey) -> GatewayResult<bool> {
        let env = guard.env();
        let Some((_, handle)) = self.subscriptions.remove(model) else {
            debug!(model = %model, "No subscription to remove");
            return Ok(true);
        };
        handle.sink.disarm();

        if let Some(session) = self.connections.session(env) {
            match self.delete_remote(env, &session, handle.id, self.timeout).await {
                Ok(()) => {}
                Err(e) if e.is_timeout() => {
                    warn!(model = %model, subscription_id = handle.id, "Unsubscribe timed out; subscription kept");
                    handle.sink.arm();
                    self.subscriptions.insert(model.clone(), handle);
                    return Ok(false);
                }
                Err(e) => {
                    warn!(model = %model, subscription_id = handle.id, error = %e, "Server rejected subscription delete; dropping it locally");
                }
            }
        }

        self.cache.remove(model);
        info!(model = %model, subscription_id = handle.id, "Unsubscribed");
        Ok(true)
    }

    /// Replaces the subscription of `model` with a new one over the same nodes and
    /// the same listener. A model without subscription is left alone.
    pub async fn recreate_locked(&self, guard: &EnvGuard, model: &ModelKey) -> GatewayResult<()> {
        let env = guard.env();
        let Some(handle) = self.subscriptions.get(model).map(|h| h.value().clone()) else {
            return Ok(());
        };

        let session = self.connections.ensure_connected(guard).await?;
        if let Err(e) = self
            .delete_remote(env, &session, handle.id, self.resubscribe_timeout)
            .await
        {
            debug!(model = %model, subscription_id = handle.id, error = %e, "Broken subscription could not be deleted");
        }

        let mut errors = Vec::new();
        let id = self
            .create_with_items(
                env,
                &session,
                &handle.sink,
                &handle.nodes,
                self.resubscribe_timeout,
                &mut errors,
            )
            .await?;
        for e in errors.iter() {
            warn!(model = %model, "{e}");
        }

        self.subscriptions.insert(
            model.clone(),
            SubscriptionHandle {
                id,
                nodes: Arc::clone(&handle.nodes),
                sink: Arc::clone(&handle.sink),
            },
        );
        info!(model = %model, old = handle.id, new = id, "Subscription recreated");
        Ok(())
    }

    /// Recreates every subscription of the guarded environment; returns how many
    /// succeeded.
    pub async fn recreate_all_locked(&self, guard: &EnvGuard) -> usize {
        let mut recreated = 0;
        for model in self.models(guard.env()) {
            match self.recreate_locked(guard, &model).await {
                Ok(()) => recreated += 1,
                Err(e) => error!(model = %model, error = %e, "Failed to recreate subscription"),
            }
        }
        recreated
    }

    /// Handles a transfer failure reported by the transport. Requests for a
    /// subscription that has since been replaced are ignored.
    pub async fn resubscribe(&self, request: &ResubscribeRequest) -> GatewayResult<()> {
        let guard = self.connections.lock(&request.model.env).await;
        if self.subscription_id(&request.model) != Some(request.subscription_id) {
            debug!(model = %request.model, subscription_id = request.subscription_id, "Stale resubscribe request ignored");
            return Ok(());
        }
        self.recreate_locked(&guard, &request.model).await
    }

    /// Fresh read of `mappings` that bypasses the cache. Non-good results are
    /// returned with their status; good ones also update the cache.
    pub async fn get_all_values_locked(
        &self,
        guard: &EnvGuard,
        model: &ModelKey,
        mappings: &[MappingDesc],
    ) -> GatewayResult<HashMap<String, TagValue>> {
        let session = self.connections.ensure_connected(guard).await?;
        let nodes = mappings
            .iter()
            .map(|m| {
                Ok(MappedNode {
                    key: m.key.clone(),
                    address: self.connections.resolve(guard, &session, m)?,
                })
            })
            .collect::<GatewayResult<Vec<_>>>()?;
        self.read_locked(guard, model, &nodes).await
    }

    pub async fn read_locked(
        &self,
        guard: &EnvGuard,
        model: &ModelKey,
        nodes: &[MappedNode],
    ) -> GatewayResult<HashMap<String, TagValue>> {
        if nodes.is_empty() {
            return Ok(HashMap::new());
        }
        let addresses: Vec<NodeAddress> = nodes.iter().map(|n| n.address.clone()).collect();
        let samples = self.connections.read(guard, &addresses).await?;

        let mut values = HashMap::with_capacity(nodes.len());
        for (node, sample) in nodes.iter().zip(samples.iter()) {
            let value = TagValue::from_read(sample);
            if value.status.is_good() {
                self.cache
                    .set_value(model, &node.address.cache_key(), value.clone());
            } else {
                warn!(model = %model, key = %node.key, node = %node.address, status = %value.status, "Read returned non-good status");
            }
            values.insert(node.key.clone(), value);
        }
        Ok(values)
    }

    pub fn has_subscriptions(&self, env: &str) -> bool {
        self.subscriptions.iter().any(|e| e.key().env == env)
    }

    /// Subscribed models of `env`, sorted.
    pub fn models(&self, env: &str) -> Vec<ModelKey> {
        let mut models: Vec<ModelKey> = self
            .subscriptions
            .iter()
            .filter(|e| e.key().env == env)
            .map(|e| e.key().clone())
            .collect();
        models.sort();
        models
    }

    pub fn subscription_id(&self, model: &ModelKey) -> Option<u32> {
        self.subscriptions.get(model).map(|h| h.id)
    }

    pub fn is_subscribed(&self, model: &ModelKey) -> bool {
        self.subscriptions.contains_key(model)
    }

    /// Unsubscribes every model; failures are logged.
    pub async fn shutdown(&self) {
        let mut models: Vec<ModelKey> = self.subscriptions.iter().map(|e| e.key().clone()).collect();
        models.sort();
        for model in models {
            match self.unsubscribe(&model).await {
                Ok(true) => {}
                Ok(false) => warn!(model = %model, "Subscription left behind on shutdown"),
                Err(e) => warn!(model = %model, error = %e, "Unsubscribe failed on shutdown"),
            }
        }
    }
}

/// Background task serving [`ResubscribeRequest`]s one at a time.
pub struct ResubscribeWorker {
    rx: mpsc::UnboundedReceiver<ResubscribeRequest>,
    subscriptions: Arc<SubscriptionManager>,
    cancel: CancellationToken,
}

impl ResubscribeWorker {
    pub fn new(
        rx: mpsc::UnboundedReceiver<ResubscribeRequest>,
        subscriptions: Arc<SubscriptionManager>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rx,
            subscriptions,
            cancel,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = self.rx.recv() => {
                    let Some(request) = next else { break };
                    if let Err(e) = self.subscriptions.resubscribe(&request).await {
                        error!(model = %request.model, subscription_id = request.subscription_id, error = %e, "Resubscribe failed");
                    }
                }
            }
        }
        debug!("Resubscribe worker stopped");
    }
}
