use config::{Config, File};
use serde::{self, Deserialize};
use std::{collections::HashMap, ops::Deref, sync::Arc, time::Duration};
use sysinfo::System;
use tag_gateway_error::GatewayResult;
use tag_gateway_sdk::{ClientIdentity, Endpoint};

use crate::constants::ENV_PREFIX;

#[derive(Debug, Clone, Default)]
pub struct Settings(Arc<Inner>);

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    pub fn new(config_path: String) -> GatewayResult<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(config_path.as_str()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );
        let inner: Inner = builder.build()?.try_deserialize()?;
        Ok(Self(Arc::new(inner)))
    }

    pub fn from_inner(inner: Inner) -> Self {
        Self(Arc::new(inner))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub opc: Opc,
    #[serde(default)]
    pub controller: Controller,
    #[serde(default)]
    pub web: Web,
    #[serde(default)]
    pub log: Log,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    #[serde(default = "General::application_name_default")]
    pub application_name: String,
    #[serde(default = "General::application_uri_default")]
    pub application_uri: String,
    /// Directory holding the client key pair and certificates.
    #[serde(default = "General::pki_dir_default")]
    pub pki_dir: String,
}

impl Default for General {
    fn default() -> Self {
        General {
            application_name: General::application_name_default(),
            application_uri: General::application_uri_default(),
            pki_dir: General::pki_dir_default(),
        }
    }
}

impl General {
    fn application_name_default() -> String {
        "tag-gateway".into()
    }

    fn application_uri_default() -> String {
        "urn:tag-gateway".into()
    }

    fn pki_dir_default() -> String {
        "./pki".into()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Opc {
    /// Statically declared endpoints.
    #[serde(default)]
    pub providers: Vec<Endpoint>,
    /// Environment variable carrying a JSON array of endpoints that replaces `providers`.
    #[serde(default = "Opc::providers_json_env_default")]
    pub providers_json_env: String,
    /// Bound for read, write, subscription create and subscription delete.
    #[serde(default = "Opc::timeout_ms_default")]
    pub timeout_ms: u64,
    #[serde(default = "Opc::connect_timeout_ms_default")]
    pub connect_timeout_ms: u64,
    /// Bound for recreating a subscription after the server dropped it.
    #[serde(default = "Opc::resubscribe_timeout_ms_default")]
    pub resubscribe_timeout_ms: u64,
    #[serde(default = "Opc::subscription_interval_ms_default")]
    pub subscription_interval_ms: u64,
    /// An environment with subscriptions and no update for longer than this is reconnected.
    #[serde(default = "Opc::disconnect_threshold_secs_default")]
    pub disconnect_threshold_secs: u64,
    #[serde(default = "Opc::health_check_interval_secs_default")]
    pub health_check_interval_secs: u64,
    #[serde(default = "Opc::session_timeout_ms_default")]
    pub session_timeout_ms: u32,
    #[serde(default = "Opc::keep_alive_interval_ms_default")]
    pub keep_alive_interval_ms: u64,
}

impl Default for Opc {
    fn default() -> Self {
        Opc {
            providers: Vec::new(),
            providers_json_env: Opc::providers_json_env_default(),
            timeout_ms: Opc::timeout_ms_default(),
            connect_timeout_ms: Opc::connect_timeout_ms_default(),
            resubscribe_timeout_ms: Opc::resubscribe_timeout_ms_default(),
            subscription_interval_ms: Opc::subscription_interval_ms_default(),
            disconnect_threshold_secs: Opc::disconnect_threshold_secs_default(),
            health_check_interval_secs: Opc::health_check_interval_secs_default(),
            session_timeout_ms: Opc::session_timeout_ms_default(),
            keep_alive_interval_ms: Opc::keep_alive_interval_ms_default(),
        }
    }
}

impl Opc {
    fn providers_json_env_default() -> String {
        "OPC_ENDPOINTS".into()
    }

    fn timeout_ms_default() -> u64 {
        1000
    }

    fn connect_timeout_ms_default() -> u64 {
        1000
    }

    fn resubscribe_timeout_ms_default() -> u64 {
        5000
    }

    fn subscription_interval_ms_default() -> u64 {
        100
    }

    fn disconnect_threshold_secs_default() -> u64 {
        30
    }

    fn health_check_interval_secs_default() -> u64 {
        60
    }

    fn session_timeout_ms_default() -> u32 {
        60_000
    }

    fn keep_alive_interval_ms_default() -> u64 {
        5_000
    }

    /// Declared endpoints, taking the JSON override into account.
    ///
    /// A non-blank override replaces the static list. One that fails to parse is
    /// logged and ignored.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let raw = std::env::var(&self.providers_json_env).ok();
        Self::endpoints_with_override(&self.providers, raw.as_deref())
    }

    pub fn endpoints_with_override(statics: &[Endpoint], raw: Option<&str>) -> Vec<Endpoint> {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            None => statics.to_vec(),
            Some(json) => match serde_json::from_str::<Vec<Endpoint>>(json) {
                Ok(endpoints) => {
                    tracing::info!(count = endpoints.len(), "Endpoints loaded from environment");
                    endpoints
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to parse endpoint override; keeping configured providers");
                    statics.to_vec()
                }
            },
        }
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    #[inline]
    pub fn resubscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.resubscribe_timeout_ms.max(1))
    }

    #[inline]
    pub fn subscription_interval(&self) -> Duration {
        Duration::from_millis(self.subscription_interval_ms)
    }

    #[inline]
    pub fn disconnect_threshold(&self) -> Duration {
        Duration::from_secs(self.disconnect_threshold_secs)
    }

    #[inline]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Controller {
    #[serde(default = "Controller::host_default")]
    pub host: String,
    #[serde(default = "Controller::port_default")]
    pub port: u16,
    #[serde(default = "Controller::base_path_default")]
    pub base_path: String,
    /// Global base URL; wins over host/port/base_path when set.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Per-environment base URL overrides.
    #[serde(default)]
    pub environments: HashMap<String, String>,
    #[serde(default = "Controller::request_timeout_ms_default")]
    pub request_timeout_ms: u64,
}

impl Default for Controller {
    fn default() -> Self {
        Controller {
            host: Controller::host_default(),
            port: Controller::port_default(),
            base_path: Controller::base_path_default(),
            base_url: None,
            environments: HashMap::new(),
            request_timeout_ms: Controller::request_timeout_ms_default(),
        }
    }
}

impl Controller {
    fn host_default() -> String {
        "localhost".into()
    }

    fn port_default() -> u16 {
        80
    }

    fn base_path_default() -> String {
        "/api/controller".into()
    }

    fn request_timeout_ms_default() -> u64 {
        5000
    }

    /// Base URL for controller calls made on behalf of `env`, without a trailing slash.
    ///
    /// Resolution order: environment override, global base URL, then
    /// `http://host:port` + base path. Blank when nothing is configured.
    pub fn resolve_base_url(&self, env: &str) -> String {
        let non_blank = |s: &&String| !s.trim().is_empty();
        let raw = if let Some(url) = self.environments.get(env).filter(non_blank) {
            url.trim().to_string()
        } else if let Some(url) = self.base_url.as_ref().filter(non_blank) {
            url.trim().to_string()
        } else if self.host.trim().is_empty() {
            String::new()
        } else {
            let path = self.base_path.trim();
            let sep = if path.is_empty() || path.starts_with('/') { "" } else { "/" };
            format!("http://{}:{}{}{}", self.host.trim(), self.port, sep, path)
        };
        raw.trim_end_matches('/').to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Web {
    #[serde(default = "Web::router_prefix_default")]
    pub router_prefix: String,
    #[serde(default = "Web::host_default")]
    pub host: String,
    #[serde(default = "Web::port_default")]
    pub port: u16,
    #[serde(default = "Web::workers_default")]
    pub workers: i32,
}

impl Default for Web {
    fn default() -> Self {
        Web {
            router_prefix: Web::router_prefix_default(),
            host: Web::host_default(),
            port: Web::port_default(),
            workers: Web::workers_default(),
        }
    }
}

impl Web {
    fn router_prefix_default() -> String {
        "/api".into()
    }

    fn port_default() -> u16 {
        8080
    }

    fn host_default() -> String {
        "0.0.0.0".into()
    }

    fn workers_default() -> i32 {
        0
    }

    /// Get actual number of workers based on configuration
    pub fn get_worker_count(&self) -> usize {
        match self.workers {
            0 => System::new_all().cpus().len().max(1),
            n if n > 0 => n as usize,
            n => std::cmp::max(
                1,
                (System::new_all().cpus().len() as i32 / n.abs()) as usize,
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    #[serde(default = "Log::level_default")]
    pub level: String,
    #[serde(default = "Log::dir_default")]
    pub dir: String,
}

impl Default for Log {
    fn default() -> Self {
        Log {
            level: Log::level_default(),
            dir: Log::dir_default(),
        }
    }
}

impl Log {
    fn level_default() -> String {
        "info".into()
    }

    fn dir_default() -> String {
        "logs".into()
    }
}

impl Inner {
    /// Identity handed to the protocol client for every session.
    pub fn client_identity(&self) -> ClientIdentity {
        ClientIdentity {
            application_name: self.general.application_name.clone(),
            application_uri: self.general.application_uri.clone(),
            pki_dir: self.general.pki_dir.clone(),
            session_timeout_ms: self.opc.session_timeout_ms,
            keep_alive_interval_ms: self.opc.keep_alive_interval_ms,
        }
    }
}
