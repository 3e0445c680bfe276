use crate::{
    address::NodeAddress,
    endpoint::{ClientIdentity, Endpoint},
    sample::{DataSample, StatusClass, UaScalar},
};
use async_trait::async_trait;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tag_gateway_error::GatewayResult;

/// Connection lifecycle of one environment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Failed with a human-readable reason string
    Failed(String),
}

impl Serialize for ConnectionState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Failed(_) => "Failed",
        };
        serializer.serialize_str(s)
    }
}

/// Outcome of creating one monitored item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStatus {
    pub status: StatusClass,
    /// Protocol status text, e.g. `BadNodeIdUnknown`.
    pub detail: String,
}

impl ItemStatus {
    pub fn good() -> Self {
        Self {
            status: StatusClass::Good,
            detail: "Good".into(),
        }
    }

    pub fn bad(detail: impl Into<String>) -> Self {
        Self {
            status: StatusClass::Bad,
            detail: detail.into(),
        }
    }
}

/// A child reference discovered while browsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseEntry {
    pub node: NodeAddress,
    pub browse_name: String,
    pub display_name: String,
    pub depth: usize,
}

/// Everything a live subscription reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// Value changes in delivery order.
    DataReceived(Vec<(NodeAddress, DataSample)>),
    KeepAlive,
    StatusChanged(String),
    /// The server can no longer serve the subscription on this session.
    TransferFailed(String),
    WatchdogElapsed,
}

/// Sink for subscription events. Called on the transport's delivery task, so
/// implementations must not block.
pub trait SubscriptionListener: Send + Sync {
    fn on_event(&self, subscription_id: u32, event: SubscriptionEvent);
}

/// Opens sessions against declared endpoints.
#[async_trait]
pub trait UaConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        identity: &ClientIdentity,
    ) -> GatewayResult<Arc<dyn UaSession>>;
}

/// A live protocol session.
///
/// Calls are not bounded in time here; callers wrap them with
/// [`with_deadline`](crate::with_deadline).
#[async_trait]
pub trait UaSession: Send + Sync {
    /// False once the underlying connection is gone for good.
    fn is_alive(&self) -> bool;

    /// URI registered at `index` in the live namespace table.
    fn namespace_uri(&self, index: u16) -> Option<String>;

    /// Index currently assigned to `uri` in the live namespace table.
    fn namespace_index(&self, uri: &str) -> Option<u16>;

    /// Reads current values; one sample per requested node, in order.
    async fn read(&self, nodes: &[NodeAddress]) -> GatewayResult<Vec<DataSample>>;

    /// Writes values; one status per requested pair, in order.
    async fn write(&self, values: &[(NodeAddress, UaScalar)]) -> GatewayResult<Vec<StatusClass>>;

    async fn create_subscription(
        &self,
        interval: Duration,
        listener: Arc<dyn SubscriptionListener>,
    ) -> GatewayResult<u32>;

    /// Adds one monitored item per node; one status per node, in order.
    async fn create_items(
        &self,
        subscription_id: u32,
        nodes: &[NodeAddress],
    ) -> GatewayResult<Vec<ItemStatus>>;

    async fn delete_subscription(&self, subscription_id: u32) -> GatewayResult<()>;

    /// Direct hierarchical children of `node`.
    async fn browse(&self, node: &NodeAddress) -> GatewayResult<Vec<BrowseEntry>>;

    async fn disconnect(&self);
}
