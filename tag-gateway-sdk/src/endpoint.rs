use serde::{Deserialize, Serialize};
use std::fmt;

/// Flavour of a declared endpoint; drives authentication and endpoint selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EndpointKind {
    /// Production hub: username/password identity, endpoint picked by URL prefix.
    #[serde(rename = "iothub", alias = "hub")]
    Hub,
    /// Simulator: anonymous identity, first advertised endpoint.
    #[default]
    #[serde(rename = "simulator")]
    Simulator,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Hub => f.write_str("iothub"),
            EndpointKind::Simulator => f.write_str("simulator"),
        }
    }
}

/// A declared environment: one external endpoint the gateway connects to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
    #[serde(default, rename = "type", alias = "kind")]
    pub kind: EndpointKind,
    /// Prefix matched against advertised endpoint URLs.
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("kind", &self.kind)
            .field("selector", &self.selector)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Application identity used when opening protocol sessions.
///
/// Key pair and certificate material live under `pki_dir`; they are provisioned
/// and persisted by the protocol client itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub application_name: String,
    pub application_uri: String,
    pub pki_dir: String,
    pub session_timeout_ms: u32,
    pub keep_alive_interval_ms: u64,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            application_name: "tag-gateway".into(),
            application_uri: "urn:tag-gateway".into(),
            pki_dir: "./pki".into(),
            session_timeout_ms: 60_000,
            keep_alive_interval_ms: 5_000,
        }
    }
}
