use crate::router::{ControllerCommand, RoutedCommand};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tag_gateway_error::{GatewayError, GatewayResult};
use tag_gateway_models::settings::Controller;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Downstream controller service.
#[async_trait]
pub trait ControllerApi: Send + Sync {
    async fn execute(
        &self,
        env: &str,
        controller_id: &str,
        command: &ControllerCommand,
    ) -> GatewayResult<()>;
}

/// HTTP request a command turns into, relative to `{base}/{controller_id}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerCall {
    pub method: reqwest::Method,
    pub suffix: &'static str,
    pub body: Option<Value>,
}

impl ControllerCall {
    pub fn of(command: &ControllerCommand) -> Self {
        let post = |suffix| Self {
            method: reqwest::Method::POST,
            suffix,
            body: None,
        };
        let patch = |suffix, body| Self {
            method: reqwest::Method::PATCH,
            suffix,
            body: Some(body),
        };
        match command {
            ControllerCommand::Stop => post("/stop"),
            ControllerCommand::StartPredict => post("/start-predict"),
            ControllerCommand::Start => post("/start"),
            ControllerCommand::SetOptimization { enabled } => {
                patch("/optimization", json!({ "enabled": enabled }))
            }
            ControllerCommand::SetVariableState { variable, on } => patch(
                "/variables/state",
                json!({ variable.as_str(): if *on { "ON" } else { "OFF" } }),
            ),
            ControllerCommand::SetLimits {
                variable,
                property,
                value,
            } => patch(
                "/variables/limits",
                json!({ variable.as_str(): { property.as_str(): value } }),
            ),
            ControllerCommand::SetOptimizationVar {
                variable,
                property,
                value,
            } => patch(
                "/optimization",
                json!({ "vars": { variable.as_str(): { property.as_str(): value } } }),
            ),
        }
    }
}

/// [`ControllerApi`] over REST.
pub struct HttpControllerApi {
    client: reqwest::Client,
    settings: Controller,
}

impl HttpControllerApi {
    pub fn new(settings: Controller) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms.max(1)))
            .user_agent(concat!("tag-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::from_reqwest(client, settings))
    }

    pub fn from_reqwest(client: reqwest::Client, settings: Controller) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl ControllerApi for HttpControllerApi {
    async fn execute(
        &self,
        env: &str,
        controller_id: &str,
        command: &ControllerCommand,
    ) -> GatewayResult<()> {
        let base = self.settings.resolve_base_url(env);
        if base.is_empty() {
            error!(env, controller_id, command = command.name(), "Controller base URL is not configured; command skipped");
            return Ok(());
        }

        let call = ControllerCall::of(command);
        let url = format!("{base}/{controller_id}{}", call.suffix);
        let mut request = self.client.request(call.method.clone(), &url);
        if let Some(body) = &call.body {
            request = request.json(body);
        }

        request
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| GatewayError::Internal(format!("{} {url} failed: {e}", call.method)))?;
        debug!(method = %call.method, url = %url, "Controller call succeeded");
        Ok(())
    }
}

/// Drains routed commands and executes them one by one, in routing order.
///
/// Failures are logged and dropped; nothing upstream waits on a dispatch.
pub struct CommandDispatcher {
    rx: UnboundedReceiver<RoutedCommand>,
    api: Arc<dyn ControllerApi>,
    cancel: CancellationToken,
}

impl CommandDispatcher {
    pub fn new(
        rx: UnboundedReceiver<RoutedCommand>,
        api: Arc<dyn ControllerApi>,
        cancel: CancellationToken,
    ) -> Self {
        Self { rx, api, cancel }
    }

    pub async fn run(mut self) {
        info!("Controller command dispatcher started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = self.rx.recv() => {
                    let Some(routed) = next else { break };
                    if let Err(e) = self
                        .api
                        .execute(&routed.env, &routed.controller_id, &routed.command)
                        .await
                    {
                        error!(
                            env = %routed.env,
                            controller_id = %routed.controller_id,
                            command = routed.command.name(),
                            error = %e,
                            "Controller command failed"
                        );
                    }
                }
            }
        }
        info!("Controller command dispatcher stopped");
    }
}
