use crate::{
    cache::ValueCache,
    controller::{CommandDispatcher, ControllerApi},
    registry::ModelRegistry,
    router::ChangeRouter,
    southward::{AvailabilityMonitor, ConnectionManager, ResubscribeWorker, SubscriptionManager},
};
use std::{sync::Arc, time::Duration};
use tag_gateway_models::settings::Settings;
use tag_gateway_sdk::UaConnector;
use tokio::{sync::Mutex, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything the gateway runs, wired together.
pub struct TagGateway {
    registry: Arc<ModelRegistry>,
    connections: Arc<ConnectionManager>,
    subscriptions: Arc<SubscriptionManager>,
    cache: Arc<ValueCache>,
    monitor: Arc<AvailabilityMonitor>,
    shutdown_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TagGateway {
    /// Builds the gateway and starts its background workers (controller dispatch,
    /// resubscribe). Must be called inside a tokio runtime.
    pub fn new(
        settings: &Settings,
        connector: Arc<dyn UaConnector>,
        controller: Arc<dyn ControllerApi>,
    ) -> Self {
        let shutdown_token = CancellationToken::new();

        let (router, commands) = ChangeRouter::new();
        let cache = Arc::new(ValueCache::new(router));
        let connections = Arc::new(ConnectionManager::new(
            settings.opc.endpoints(),
            settings.client_identity(),
            connector,
            &settings.opc,
        ));
        let (subscriptions, resubscribe_rx) =
            SubscriptionManager::new(Arc::clone(&connections), Arc::clone(&cache), &settings.opc);
        let subscriptions = Arc::new(subscriptions);
        let registry = Arc::new(ModelRegistry::new(
            Arc::clone(&connections),
            Arc::clone(&subscriptions),
            Arc::clone(&cache),
        ));
        let monitor = Arc::new(AvailabilityMonitor::new(
            Arc::clone(&connections),
            Arc::clone(&subscriptions),
            Arc::clone(&cache),
            settings.opc.disconnect_threshold(),
            settings.opc.health_check_interval(),
        ));

        let dispatcher = CommandDispatcher::new(commands, controller, shutdown_token.clone());
        let resubscriber = ResubscribeWorker::new(
            resubscribe_rx,
            Arc::clone(&subscriptions),
            shutdown_token.clone(),
        );
        let tasks = vec![
            tokio::spawn(dispatcher.run()),
            tokio::spawn(resubscriber.run()),
        ];

        Self {
            registry,
            connections,
            subscriptions,
            cache,
            monitor,
            shutdown_token,
            tasks: Mutex::new(tasks),
        }
    }

    /// Connects every declared environment and starts the periodic health check.
    pub async fn start(&self) {
        self.connections.connect_all().await;
        let failed = self.connections.failed_envs();
        if !failed.is_empty() {
            warn!(?failed, "Some environments are unavailable; retrying on health check");
        }
        let handle = tokio::spawn(Arc::clone(&self.monitor).run(self.shutdown_token.clone()));
        self.tasks.lock().await.push(handle);
        info!("Tag gateway started");
    }

    /// Stops background tasks, removes every subscription and disconnects.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for mut handle in handles {
            tokio::select! {
                _ = &mut handle => {}
                _ = sleep(TASK_STOP_TIMEOUT) => {
                    handle.abort();
                }
            }
        }
        self.subscriptions.shutdown().await;
        self.connections.shutdown().await;
        info!("Tag gateway stopped");
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn cache(&self) -> &Arc<ValueCache> {
        &self.cache
    }

    pub fn monitor(&self) -> &Arc<AvailabilityMonitor> {
        &self.monitor
    }
}
