#![allow(dead_code)]

use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex, Once,
    },
    time::Duration,
};
use tag_gateway_core::{ControllerApi, ControllerCommand, TagGateway};
use tag_gateway_error::{GatewayError, GatewayResult};
use tag_gateway_models::settings::{Inner, Settings};
use tag_gateway_sdk::{
    BrowseEntry, ClientIdentity, DataSample, Endpoint, EndpointKind, ItemStatus, NodeAddress,
    SampleValue, StatusClass, SubscriptionEvent, SubscriptionListener, UaConnector, UaScalar,
    UaSession,
};
use tokio::sync::Notify;
use tracing::Level;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

pub const PLANT_NS: &str = "urn:plant";

/// Server side of one environment, shared by every session opened against it.
pub struct FakeBackend {
    pub namespaces: Mutex<Vec<String>>,
    pub values: Mutex<HashMap<NodeAddress, DataSample>>,
    pub bad_items: Mutex<HashSet<NodeAddress>>,
    pub written: Mutex<Vec<(NodeAddress, UaScalar)>>,
    pub children: Mutex<HashMap<NodeAddress, Vec<BrowseEntry>>>,
    pub listeners: Mutex<HashMap<u32, Arc<dyn SubscriptionListener>>>,
    /// Ordered record of transport calls.
    pub events: Mutex<Vec<String>>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub subscriptions_created: AtomicUsize,
    pub subscriptions_deleted: AtomicUsize,
    pub fail_connect: AtomicBool,
    pub hang_delete: AtomicBool,
    /// When set, `create_items` fails at the transport level.
    pub fail_items: AtomicBool,
    /// Sessions opened at or before this connect count report a lost connection.
    lost_through: AtomicUsize,
    /// When set, `create_subscription` parks until `release` is notified.
    pub hold_subscribe: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
    next_id: AtomicU32,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            namespaces: Mutex::new(vec![
                "http://opcfoundation.org/UA/".to_string(),
                "urn:server".to_string(),
                PLANT_NS.to_string(),
            ]),
            values: Mutex::new(HashMap::new()),
            bad_items: Mutex::new(HashSet::new()),
            written: Mutex::new(Vec::new()),
            children: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            subscriptions_created: AtomicUsize::new(0),
            subscriptions_deleted: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            hang_delete: AtomicBool::new(false),
            fail_items: AtomicBool::new(false),
            lost_through: AtomicUsize::new(0),
            hold_subscribe: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
            next_id: AtomicU32::new(1),
        }
    }
}

impl FakeBackend {
    pub fn set_value(&self, node: NodeAddress, sample: DataSample) {
        self.values.lock().unwrap().insert(node, sample);
    }

    pub fn set_namespaces(&self, uris: &[&str]) {
        *self.namespaces.lock().unwrap() = uris.iter().map(|s| s.to_string()).collect();
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Delivers `event` to the listener of `subscription_id`, as the transport would.
    pub fn push(&self, subscription_id: u32, event: SubscriptionEvent) {
        let listener = self.listeners.lock().unwrap().get(&subscription_id).cloned();
        if let Some(listener) = listener {
            listener.on_event(subscription_id, event);
        }
    }

    /// Drops the connection of every session opened so far.
    pub fn lose_connection(&self) {
        self.lost_through.store(self.connects(), Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.subscriptions_created.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> usize {
        self.subscriptions_deleted.load(Ordering::SeqCst)
    }
}

pub struct FakeSession {
    backend: Arc<FakeBackend>,
    serial: usize,
}

#[async_trait]
impl UaSession for FakeSession {
    fn is_alive(&self) -> bool {
        self.serial > self.backend.lost_through.load(Ordering::SeqCst)
    }

    fn namespace_uri(&self, index: u16) -> Option<String> {
        self.backend
            .namespaces
            .lock()
            .unwrap()
            .get(index as usize)
            .cloned()
    }

    fn namespace_index(&self, uri: &str) -> Option<u16> {
        self.backend
            .namespaces
            .lock()
            .unwrap()
            .iter()
            .position(|u| u == uri)
            .map(|i| i as u16)
    }

    async fn read(&self, nodes: &[NodeAddress]) -> GatewayResult<Vec<DataSample>> {
        self.backend.record("read");
        let values = self.backend.values.lock().unwrap();
        Ok(nodes
            .iter()
            .map(|n| {
                values
                    .get(n)
                    .cloned()
                    .unwrap_or_else(|| DataSample::with_status(SampleValue::Empty, StatusClass::Bad))
            })
            .collect())
    }

    async fn write(&self, values: &[(NodeAddress, UaScalar)]) -> GatewayResult<Vec<StatusClass>> {
        self.backend.record("write");
        let bad = self.backend.bad_items.lock().unwrap().clone();
        self.backend
            .written
            .lock()
            .unwrap()
            .extend(values.iter().cloned());
        Ok(values
            .iter()
            .map(|(n, _)| {
                if bad.contains(n) {
                    StatusClass::Bad
                } else {
                    StatusClass::Good
                }
            })
            .collect())
    }

    async fn create_subscription(
        &self,
        _interval: Duration,
        listener: Arc<dyn SubscriptionListener>,
    ) -> GatewayResult<u32> {
        if self.backend.hold_subscribe.load(Ordering::SeqCst) {
            self.backend.entered.notify_one();
            self.backend.release.notified().await;
        }
        self.backend.record("create_subscription");
        let id = self.backend.next_id.fetch_add(1, Ordering::SeqCst);
        self.backend.listeners.lock().unwrap().insert(id, listener);
        self.backend
            .subscriptions_created
            .fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn create_items(
        &self,
        _subscription_id: u32,
        nodes: &[NodeAddress],
    ) -> GatewayResult<Vec<ItemStatus>> {
        if self.backend.fail_items.load(Ordering::SeqCst) {
            return Err(GatewayError::Internal("BadTooManyMonitoredItems".into()));
        }
        let bad = self.backend.bad_items.lock().unwrap().clone();
        Ok(nodes
            .iter()
            .map(|n| {
                if bad.contains(n) {
                    ItemStatus::bad("BadNodeIdUnknown")
                } else {
                    ItemStatus::good()
                }
            })
            .collect())
    }

    async fn delete_subscription(&self, subscription_id: u32) -> GatewayResult<()> {
        if self.backend.hang_delete.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.backend.record("delete_subscription");
        self.backend
            .listeners
            .lock()
            .unwrap()
            .remove(&subscription_id);
        self.backend
            .subscriptions_deleted
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn browse(&self, node: &NodeAddress) -> GatewayResult<Vec<BrowseEntry>> {
        Ok(self
            .backend
            .children
            .lock()
            .unwrap()
            .get(node)
            .cloned()
            .unwrap_or_default())
    }

    async fn disconnect(&self) {
        self.backend.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector handing out sessions on per-environment fake backends.
#[derive(Default)]
pub struct FakeConnector {
    pub backends: HashMap<String, Arc<FakeBackend>>,
}

impl FakeConnector {
    pub fn new(envs: &[&str]) -> Self {
        Self {
            backends: envs
                .iter()
                .map(|e| (e.to_string(), Arc::new(FakeBackend::default())))
                .collect(),
        }
    }

    pub fn backend(&self, env: &str) -> Arc<FakeBackend> {
        Arc::clone(&self.backends[env])
    }
}

#[async_trait]
impl UaConnector for FakeConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        _identity: &ClientIdentity,
    ) -> GatewayResult<Arc<dyn UaSession>> {
        let backend = self
            .backends
            .get(&endpoint.name)
            .cloned()
            .ok_or_else(|| GatewayError::Internal(format!("no backend for {}", endpoint.name)))?;
        let serial = backend.connects.fetch_add(1, Ordering::SeqCst) + 1;
        backend.record("connect");
        if backend.fail_connect.load(Ordering::SeqCst) {
            return Err(GatewayError::Internal("connection refused".into()));
        }
        Ok(Arc::new(FakeSession { backend, serial }))
    }
}

/// Controller that records every command it is asked to execute.
#[derive(Default)]
pub struct RecordingController {
    pub calls: Mutex<Vec<(String, String, ControllerCommand)>>,
}

impl RecordingController {
    pub fn commands(&self) -> Vec<ControllerCommand> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, c)| c.clone())
            .collect()
    }

    /// Waits until at least `count` commands arrived.
    pub async fn wait_for(&self, count: usize) -> Vec<ControllerCommand> {
        for _ in 0..200 {
            let commands = self.commands();
            if commands.len() >= count {
                return commands;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.commands()
    }
}

#[async_trait]
impl ControllerApi for RecordingController {
    async fn execute(
        &self,
        env: &str,
        controller_id: &str,
        command: &ControllerCommand,
    ) -> GatewayResult<()> {
        self.calls.lock().unwrap().push((
            env.to_string(),
            controller_id.to_string(),
            command.clone(),
        ));
        Ok(())
    }
}

pub fn settings(envs: &[&str]) -> Settings {
    let mut inner = Inner::default();
    inner.opc.providers = envs
        .iter()
        .map(|e| Endpoint {
            name: e.to_string(),
            url: format!("opc.tcp://{e}:4840"),
            kind: EndpointKind::Simulator,
            selector: String::new(),
            user: None,
            password: None,
        })
        .collect();
    inner.opc.providers_json_env = "TG_TEST_ENDPOINTS_NEVER_SET".into();
    Settings::from_inner(inner)
}

pub struct Harness {
    pub gateway: TagGateway,
    pub connector: Arc<FakeConnector>,
    pub controller: Arc<RecordingController>,
}

impl Harness {
    pub fn backend(&self, env: &str) -> Arc<FakeBackend> {
        self.connector.backend(env)
    }
}

/// Gateway over fake backends for `envs`, already connected.
pub async fn started(envs: &[&str]) -> Harness {
    init_tracing();
    let connector = Arc::new(FakeConnector::new(envs));
    let controller = Arc::new(RecordingController::default());
    let gateway = TagGateway::new(
        &settings(envs),
        Arc::clone(&connector) as Arc<dyn UaConnector>,
        Arc::clone(&controller) as Arc<dyn ControllerApi>,
    );
    gateway.connections().connect_all().await;
    Harness {
        gateway,
        connector,
        controller,
    }
}

/// Node of `id` in the plant namespace as currently numbered.
pub fn plant(index: u16, id: u32) -> NodeAddress {
    NodeAddress::numeric(index, id)
}
