use crate::codec::{MonitoredItemFailureKind, OpcUaCodec};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures::{pin_mut, StreamExt};
use opcua::{
    client::{
        MonitoredItem, Session, SessionActivity, SessionEventLoop, SessionPollResult,
        SubscriptionCallbacks,
    },
    types::{
        enums::MonitoringMode, BrowseDescription, BrowseDirection, BrowseResultMask, DataValue,
        MonitoredItemCreateRequest, MonitoringParameters, NodeId, ReadValueId, ReferenceTypeId,
        StatusCode, TimestampsToReturn, Variant, WriteValue,
    },
};
use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tag_gateway_error::{GatewayError, GatewayResult};
use tag_gateway_sdk::{
    BrowseEntry, DataSample, ItemStatus, NodeAddress, StatusClass, SubscriptionEvent,
    SubscriptionListener, UaScalar, UaSession,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Server_NamespaceArray
const NAMESPACE_ARRAY_ID: u32 = 2255;

/// A connected OPC UA session plus the task that drives its event loop.
pub struct OpcUaSession {
    env: String,
    session: Arc<Session>,
    namespaces: Arc<ArcSwap<Vec<String>>>,
    cancel: CancellationToken,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    next_handle: AtomicU32,
}

impl OpcUaSession {
    /// Spawn the event loop, wait for the session to activate and load the namespace table.
    ///
    /// If the returned future is dropped before completing, the event loop is cancelled.
    pub(crate) async fn start(
        env: &str,
        session: Arc<Session>,
        ev: SessionEventLoop,
    ) -> GatewayResult<Self> {
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        let namespaces = Arc::new(ArcSwap::from_pointee(Vec::new()));

        let handle = tokio::spawn(Self::run_event_loop(
            env.to_string(),
            Arc::clone(&session),
            ev,
            Arc::clone(&namespaces),
            cancel.clone(),
        ));

        if !session.wait_for_connection().await {
            handle.abort();
            return Err(GatewayError::Internal(format!(
                "session for `{env}` could not be activated"
            )));
        }

        let table = read_namespace_array(&session).await?;
        info!(env, namespaces = ?table, "OPC UA namespace table loaded");
        namespaces.store(Arc::new(table));

        guard.disarm();
        Ok(Self {
            env: env.to_string(),
            session,
            namespaces,
            cancel,
            event_loop: Mutex::new(Some(handle)),
            next_handle: AtomicU32::new(1),
        })
    }

    /// Drive the session event loop until cancelled or the stream ends.
    async fn run_event_loop(
        env: String,
        session: Arc<Session>,
        ev: SessionEventLoop,
        namespaces: Arc<ArcSwap<Vec<String>>>,
        cancel: CancellationToken,
    ) {
        let stream = ev.enter();
        pin_mut!(stream);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    session.disable_reconnects();
                    let _ = tokio::time::timeout(Duration::from_secs(2), session.disconnect()).await;
                    return;
                }
                maybe_item = stream.next() => {
                    match maybe_item {
                        Some(Ok(SessionPollResult::Reconnected(_))) => {
                            info!(env = %env, "OPC UA session reconnected");
                            // The table can only be read while this loop keeps polling.
                            let session = Arc::clone(&session);
                            let namespaces = Arc::clone(&namespaces);
                            let env = env.clone();
                            tokio::spawn(async move {
                                match read_namespace_array(&session).await {
                                    Ok(table) => namespaces.store(Arc::new(table)),
                                    Err(e) => warn!(env = %env, error = %e, "Namespace table refresh failed"),
                                }
                            });
                        }
                        Some(Ok(SessionPollResult::SessionActivity(SessionActivity::KeepAliveFailed(code)))) => {
                            warn!(env = %env, status = %code, "OPC UA keep-alive failed");
                        }
                        Some(Ok(SessionPollResult::ConnectionLost(code))) => {
                            warn!(env = %env, status = %code, "OPC UA connection lost");
                            return;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(code)) => {
                            warn!(env = %env, status = %code, "OPC UA event loop error");
                            return;
                        }
                        None => return,
                    }
                }
            }
        }
    }

    fn build_reqs(&self, nodes: &[NodeAddress]) -> Vec<MonitoredItemCreateRequest> {
        nodes
            .iter()
            .map(|n| MonitoredItemCreateRequest {
                item_to_monitor: ReadValueId::new_value(OpcUaCodec::node_id(n)),
                monitoring_mode: MonitoringMode::Reporting,
                requested_parameters: MonitoringParameters {
                    client_handle: self.next_handle.fetch_add(1, Ordering::Relaxed),
                    // Negative sampling follows the publishing interval.
                    sampling_interval: -1.0,
                    filter: Default::default(),
                    queue_size: 20,
                    discard_oldest: true,
                },
            })
            .collect()
    }
}

async fn read_namespace_array(session: &Session) -> GatewayResult<Vec<String>> {
    let results = session
        .read(
            &[ReadValueId::new_value(NodeId::new(0, NAMESPACE_ARRAY_ID))],
            TimestampsToReturn::Neither,
            0.0,
        )
        .await
        .map_err(|code| GatewayError::Internal(format!("namespace table read failed: {code}")))?;

    match results.into_iter().next().and_then(|dv| dv.value) {
        Some(Variant::Array(array)) => Ok(array
            .values
            .iter()
            .map(|v| match v {
                Variant::String(s) => s.as_ref().to_string(),
                _ => String::new(),
            })
            .collect()),
        other => Err(GatewayError::Internal(format!(
            "unexpected namespace table value: {other:?}"
        ))),
    }
}

fn make_callbacks(
    listener: Arc<dyn SubscriptionListener>,
    subscription_id: Arc<AtomicU32>,
) -> SubscriptionCallbacks {
    let status_listener = Arc::clone(&listener);
    let status_sid = Arc::clone(&subscription_id);
    SubscriptionCallbacks::new(
        move |notification| {
            let status: StatusCode = notification.status;
            status_listener.on_event(
                status_sid.load(Ordering::Acquire),
                OpcUaCodec::status_event(status),
            );
        },
        move |dv: DataValue, item: &MonitoredItem| {
            let address = OpcUaCodec::node_address(&item.item_to_monitor().node_id);
            let sample: DataSample = OpcUaCodec::data_sample(&dv);
            listener.on_event(
                subscription_id.load(Ordering::Acquire),
                SubscriptionEvent::DataReceived(vec![(address, sample)]),
            );
        },
        |_event, _item| {},
    )
}

#[async_trait]
impl UaSession for OpcUaSession {
    /// The event loop ends on connection loss and is never restarted.
    fn is_alive(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.event_loop
            .lock()
            .map(|handle| handle.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    fn namespace_uri(&self, index: u16) -> Option<String> {
        self.namespaces.load().get(index as usize).cloned()
    }

    fn namespace_index(&self, uri: &str) -> Option<u16> {
        self.namespaces
            .load()
            .iter()
            .position(|u| u == uri)
            .and_then(|i| u16::try_from(i).ok())
    }

    async fn read(&self, nodes: &[NodeAddress]) -> GatewayResult<Vec<DataSample>> {
        let reqs: Vec<ReadValueId> = nodes
            .iter()
            .map(|n| ReadValueId::new_value(OpcUaCodec::node_id(n)))
            .collect();
        let values = self
            .session
            .read(&reqs, TimestampsToReturn::Both, 0.0)
            .await
            .map_err(|code| GatewayError::Internal(format!("read failed: {code}")))?;
        Ok(values.iter().map(OpcUaCodec::data_sample).collect())
    }

    async fn write(&self, values: &[(NodeAddress, UaScalar)]) -> GatewayResult<Vec<StatusClass>> {
        let reqs: Vec<WriteValue> = values
            .iter()
            .map(|(n, v)| WriteValue::value_attr(OpcUaCodec::node_id(n), OpcUaCodec::scalar(*v)))
            .collect();
        let results = self
            .session
            .write(&reqs)
            .await
            .map_err(|code| GatewayError::Internal(format!("write failed: {code}")))?;
        for ((node, _), code) in values.iter().zip(results.iter()) {
            if !code.is_good() {
                debug!(env = %self.env, %node, status = %code, "OPC UA write rejected");
            }
        }
        Ok(results
            .into_iter()
            .map(|code| OpcUaCodec::status_class(Some(code)))
            .collect())
    }

    async fn create_subscription(
        &self,
        interval: Duration,
        listener: Arc<dyn SubscriptionListener>,
    ) -> GatewayResult<u32> {
        let sid_slot = Arc::new(AtomicU32::new(0));
        let callbacks = make_callbacks(listener, Arc::clone(&sid_slot));
        let sid = self
            .session
            .create_subscription(interval, 60, 20, 0, 0, true, callbacks)
            .await
            .map_err(|code| {
                GatewayError::Internal(format!("Failed to create OPC UA subscription: {code}"))
            })?;
        sid_slot.store(sid, Ordering::Release);
        info!(env = %self.env, subscription_id = sid, "OPC UA subscription created");
        Ok(sid)
    }

    async fn create_items(
        &self,
        subscription_id: u32,
        nodes: &[NodeAddress],
    ) -> GatewayResult<Vec<ItemStatus>> {
        let reqs = self.build_reqs(nodes);
        let results = self
            .session
            .create_monitored_items(subscription_id, TimestampsToReturn::Both, reqs)
            .await
            .map_err(|code| {
                GatewayError::Internal(format!("create monitored items failed: {code}"))
            })?;

        Ok(results
            .into_iter()
            .zip(nodes.iter())
            .map(|(res, node)| {
                let status = res.result.status_code;
                if status.is_good() {
                    ItemStatus::good()
                } else {
                    let kind = MonitoredItemFailureKind::from(status);
                    warn!(
                        env = %self.env,
                        subscription_id,
                        %node,
                        %status,
                        failure_kind = kind.as_str(),
                        "OPC UA monitored item creation failed"
                    );
                    ItemStatus::bad(status.to_string())
                }
            })
            .collect())
    }

    async fn delete_subscription(&self, subscription_id: u32) -> GatewayResult<()> {
        self.session
            .delete_subscription(subscription_id)
            .await
            .map(|_| ())
            .map_err(|code| {
                GatewayError::Internal(format!(
                    "delete subscription {subscription_id} failed: {code}"
                ))
            })
    }

    async fn browse(&self, node: &NodeAddress) -> GatewayResult<Vec<BrowseEntry>> {
        let description = BrowseDescription {
            node_id: OpcUaCodec::node_id(node),
            browse_direction: BrowseDirection::Forward,
            reference_type_id: ReferenceTypeId::HierarchicalReferences.into(),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: BrowseResultMask::All as u32,
        };
        let results = self
            .session
            .browse(&[description], 0, None)
            .await
            .map_err(|code| GatewayError::Internal(format!("browse {node} failed: {code}")))?;

        Ok(results
            .into_iter()
            .flat_map(|r| r.references.unwrap_or_default())
            .map(|r| BrowseEntry {
                node: OpcUaCodec::node_address(&r.node_id.node_id),
                browse_name: r.browse_name.name.as_ref().to_string(),
                display_name: r.display_name.text.as_ref().to_string(),
                depth: 0,
            })
            .collect())
    }

    async fn disconnect(&self) {
        self.cancel.cancel();
        let handle = self.event_loop.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(3), handle).await.is_err() {
                warn!(env = %self.env, "OPC UA event loop did not stop in time");
            }
        }
        info!(env = %self.env, "OPC UA session closed");
    }
}
