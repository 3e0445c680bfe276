use crate::session::OpcUaSession;
use async_trait::async_trait;
use opcua::{
    client::{ClientBuilder, IdentityToken, Password},
    types::EndpointDescription,
};
use std::{sync::Arc, time::Duration};
use tag_gateway_error::{GatewayError, GatewayResult};
use tag_gateway_sdk::{ClientIdentity, Endpoint, EndpointKind, UaConnector, UaSession};
use tracing::{debug, info};
use url::Url;

/// Opens OPC UA sessions for declared endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpcUaConnector;

impl OpcUaConnector {
    pub fn new() -> Self {
        Self
    }

    #[inline]
    fn build_client(identity: &ClientIdentity) -> ClientBuilder {
        ClientBuilder::new()
            .application_name(&identity.application_name)
            .application_uri(&identity.application_uri)
            .pki_dir(&identity.pki_dir)
            .session_retry_limit(0)
            .session_timeout(identity.session_timeout_ms)
            .keep_alive_interval(Duration::from_millis(identity.keep_alive_interval_ms))
            .trust_server_certs(true)
            .create_sample_keypair(true)
    }

    fn identity_token(endpoint: &Endpoint) -> IdentityToken {
        match (endpoint.kind, &endpoint.user) {
            (EndpointKind::Hub, Some(user)) => IdentityToken::UserName(
                user.clone(),
                Password::new(endpoint.password.clone().unwrap_or_default()),
            ),
            _ => IdentityToken::Anonymous,
        }
    }

    /// Hub endpoints are matched by URL prefix, falling back to the first advertised one.
    /// Simulators always take the first.
    fn select_endpoint(
        endpoint: &Endpoint,
        advertised: Vec<EndpointDescription>,
    ) -> Option<EndpointDescription> {
        match endpoint.kind {
            EndpointKind::Hub if !endpoint.selector.is_empty() => {
                let matched = advertised
                    .iter()
                    .position(|ep| ep.endpoint_url.as_ref().starts_with(&endpoint.selector));
                match matched {
                    Some(i) => advertised.into_iter().nth(i),
                    None => advertised.into_iter().next(),
                }
            }
            _ => advertised.into_iter().next(),
        }
    }

    /// Use the configured host and port for transport; servers often advertise
    /// names that are not reachable from the gateway.
    fn override_host(configured: &str, selected: &mut EndpointDescription) {
        let (Ok(cfg_uri), Ok(mut ep_uri)) = (
            Url::parse(configured),
            Url::parse(selected.endpoint_url.as_ref()),
        ) else {
            return;
        };
        if let Some(host) = cfg_uri.host_str() {
            if let Err(err) = ep_uri.set_host(Some(host)) {
                debug!(error = ?err, "Keeping advertised endpoint host");
            }
        }
        if let Some(port) = cfg_uri.port() {
            if ep_uri.set_port(Some(port)).is_err() {
                debug!("Keeping advertised endpoint port");
            }
        }
        selected.endpoint_url = ep_uri.to_string().into();
    }
}

#[async_trait]
impl UaConnector for OpcUaConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        identity: &ClientIdentity,
    ) -> GatewayResult<Arc<dyn UaSession>> {
        let mut client = Self::build_client(identity).client().map_err(|e| {
            GatewayError::Internal(format!("OPC UA build client error: {e:?}"))
        })?;

        let url = endpoint.url.trim();
        let advertised = client
            .get_server_endpoints_from_url(url)
            .await
            .map_err(|e| {
                GatewayError::Internal(format!("OPC UA get endpoints error from {url}: {e}"))
            })?;
        for ep in &advertised {
            info!(
                env = %endpoint.name,
                endpoint_url = %ep.endpoint_url,
                security_policy_uri = %ep.security_policy_uri,
                security_mode = ?ep.security_mode,
                "OPC UA discovered endpoint"
            );
        }

        let mut selected = Self::select_endpoint(endpoint, advertised).ok_or_else(|| {
            GatewayError::Internal(format!("No OPC UA endpoint advertised at {url}"))
        })?;
        Self::override_host(url, &mut selected);
        info!(
            env = %endpoint.name,
            kind = %endpoint.kind,
            endpoint_url = %selected.endpoint_url,
            security_policy_uri = %selected.security_policy_uri,
            "OPC UA selected endpoint for connection"
        );

        let (session, ev) = client
            .connect_to_endpoint_directly(selected, Self::identity_token(endpoint))
            .map_err(|e| GatewayError::Internal(format!("OPC UA connect-direct error: {e}")))?;

        let session = OpcUaSession::start(&endpoint.name, session, ev).await?;
        Ok(Arc::new(session))
    }
}
