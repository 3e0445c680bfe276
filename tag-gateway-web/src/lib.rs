//! REST front door of the tag gateway
mod api;

use actix_web::{
    dev::{Server, ServerHandle},
    error::JsonPayloadError,
    middleware::{Logger, NormalizePath},
    web::{self, Data, ServiceConfig},
    App, HttpRequest, HttpServer,
};
use std::{collections::BTreeMap, sync::Arc};
use tag_gateway_core::TagGateway;
use tag_gateway_error::{GatewayError, GatewayResult};
use tag_gateway_models::settings::Settings;
use tokio::sync::Mutex;
use tracing::{error, info, instrument};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    gateway: Arc<TagGateway>,
}

impl AppState {
    pub fn new(gateway: Arc<TagGateway>) -> Self {
        Self { gateway }
    }
}

/// Owns the running HTTP server
#[derive(Clone)]
pub struct TagGatewayWebServer {
    /// Server handle for graceful shutdown
    server: Arc<Mutex<Option<ServerHandle>>>,
}

impl TagGatewayWebServer {
    fn create_server(settings: &Settings, gateway: Arc<TagGateway>) -> GatewayResult<Server> {
        let addr = format!("{}:{}", settings.web.host, settings.web.port);
        let router_prefix = settings.web.router_prefix.clone();
        let worker_count = settings.web.get_worker_count();
        let state = AppState::new(gateway);

        let server = HttpServer::new(move || {
            let prefix = router_prefix.clone();
            App::new()
                .app_data(Data::new(Arc::new(state.clone())))
                .wrap(Logger::default())
                .wrap(NormalizePath::trim())
                .configure(move |cfg| configure_app(cfg, &prefix))
        })
        .workers(worker_count)
        .bind(&addr)
        .map_err(|e| GatewayError::from(format!("Failed to bind HTTP server to {addr}: {e}")))?;

        Ok(server.run())
    }

    /// Bind and start serving in the background
    #[instrument(name = "init-web-server", skip_all)]
    pub fn init(settings: &Settings, gateway: Arc<TagGateway>) -> GatewayResult<Self> {
        let server = Self::create_server(settings, gateway)?;
        let handle = server.handle();

        tokio::spawn(async move {
            if let Err(e) = server.await {
                error!(error = %e, "Web server failed");
            }
        });
        info!(
            host = %settings.web.host,
            port = settings.web.port,
            prefix = %settings.web.router_prefix,
            "Web server started"
        );

        Ok(Self {
            server: Arc::new(Mutex::new(Some(handle))),
        })
    }

    /// Gracefully stop the web server
    #[instrument(name = "web-server-stop", skip_all)]
    pub async fn stop(&self) {
        info!("Stopping web server...");
        if let Some(handle) = self.server.lock().await.take() {
            handle.stop(true).await;
        }
        info!("Web server stopped");
    }
}

/// Extractor configuration, public routes, and the API scope under `router_prefix`.
pub fn configure_app(cfg: &mut ServiceConfig, router_prefix: &str) {
    cfg.app_data(
        actix_web_validator::JsonConfig::default()
            .error_handler(|err, _req| validator_error(err).into()),
    )
    .app_data(
        actix_web_validator::PathConfig::default()
            .error_handler(|err, _req| validator_error(err).into()),
    )
    .app_data(web::JsonConfig::default().error_handler(json_error))
    .configure(api::configure_public_routes)
    .service(web::scope(router_prefix).configure(api::configure_routes));
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    GatewayError::validation(format!("Invalid request body: {err}"), BTreeMap::new()).into()
}

fn validator_error(err: actix_web_validator::Error) -> GatewayError {
    match err {
        actix_web_validator::Error::Validate(errors) => {
            let fields = errors
                .field_errors()
                .into_iter()
                .map(|(field, problems)| {
                    let message = problems
                        .iter()
                        .map(|p| p.code.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    (field.to_string(), message)
                })
                .collect();
            GatewayError::validation("Invalid request", fields)
        }
        other => GatewayError::validation(format!("Invalid request: {other}"), BTreeMap::new()),
    }
}
