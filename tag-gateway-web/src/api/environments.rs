use crate::AppState;
use actix_web::web::{self, ServiceConfig};
use actix_web_validator::Path;
use std::sync::Arc;
use tag_gateway_error::WebResult;
use tag_gateway_models::{
    request::EnvPath,
    web::{EnvironmentInfo, WebResponse},
};
use tag_gateway_sdk::BrowseEntry;

pub(super) const ROUTER_PREFIX: &str = "/environments";

/// Configure environment routes
///
/// # Routes
/// - GET ``: Declared environments with their connection state
/// - GET `/{env}/browse`: Diagnostic browse from the Objects folder
pub(crate) fn configure_routes(cfg: &mut ServiceConfig) {
    cfg.route("", web::get().to(list))
        .route("/{env}/browse", web::get().to(browse));
}

pub async fn list(state: web::Data<Arc<AppState>>) -> WebResult<WebResponse<Vec<EnvironmentInfo>>> {
    let environments = state
        .gateway
        .registry()
        .environments()
        .into_iter()
        .map(|(name, state)| EnvironmentInfo { name, state })
        .collect();
    Ok(WebResponse::ok(environments))
}

pub async fn browse(
    req: Path<EnvPath>,
    state: web::Data<Arc<AppState>>,
) -> WebResult<WebResponse<Vec<BrowseEntry>>> {
    let entries = state.gateway.registry().browse(&req.env).await?;
    Ok(WebResponse::ok(entries))
}
