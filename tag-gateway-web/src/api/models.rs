use crate::AppState;
use actix_web::web::{self, ServiceConfig};
use actix_web_validator::{Json, Path};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tag_gateway_error::WebResult;
use tag_gateway_models::{
    request::{ModelEnvPath, ModelPath, SubscribeRequest, ValueUpdateRequest},
    web::WebResponse,
    MappingDesc, ModelMeta, TagValue,
};
use tag_gateway_sdk::StatusClass;
use tracing::{info, instrument};

pub(super) const ROUTER_PREFIX: &str = "/models";

/// Configure model routes
///
/// # Routes
/// - PUT/POST `/{name}/{env}/mappings`: Replace the mapping set of a model on one environment
/// - GET `/{name}/mappings`: Mapping sets of a model on every environment
/// - GET `/{name}/{env}/mappings`: Mapping set of a model on one environment
/// - DELETE `/{name}/mappings`: Remove a model from every environment
/// - POST `/{name}/{env}/subscribe`: Subscribe to some or all mappings
/// - POST `/{name}/{env}/unsubscribe`: Drop the live subscription
/// - GET `/{name}/{env}/values`: Cached values
/// - POST `/{name}/{env}/values/all`: Fresh read bypassing the cache
/// - POST `/{name}/{env}/values`: Write values
pub(crate) fn configure_routes(cfg: &mut ServiceConfig) {
    cfg.route("/{name}/{env}/mappings", web::put().to(replace_mappings))
        .route("/{name}/{env}/mappings", web::post().to(replace_mappings))
        .route("/{name}/{env}/mappings", web::get().to(get_mappings))
        .route("/{name}/mappings", web::get().to(get_all_mappings))
        .route("/{name}/mappings", web::delete().to(delete_mappings))
        .route("/{name}/{env}/subscribe", web::post().to(subscribe))
        .route("/{name}/{env}/unsubscribe", web::post().to(unsubscribe))
        .route("/{name}/{env}/values", web::get().to(get_values))
        .route("/{name}/{env}/values/all", web::post().to(read_values))
        .route("/{name}/{env}/values", web::post().to(set_values));
}

/// Replace the mapping set of a model
///
/// # Endpoint
/// `PUT /api/models/{name}/{env}/mappings`
///
/// Any live subscription of the previous set is dropped.
#[instrument(name = "replace-mappings", skip_all, fields(model = %req.name, env = %req.env))]
pub async fn replace_mappings(
    req: Path<ModelEnvPath>,
    mappings: web::Json<Vec<MappingDesc>>,
    state: web::Data<Arc<AppState>>,
) -> WebResult<WebResponse<ModelMeta>> {
    let meta = state
        .gateway
        .registry()
        .replace_mappings(&req.name, &req.env, mappings.into_inner())
        .await?;
    info!(count = meta.mappings.len(), "Mappings replaced");
    Ok(WebResponse::ok(meta))
}

pub async fn get_mappings(
    req: Path<ModelEnvPath>,
    state: web::Data<Arc<AppState>>,
) -> WebResult<WebResponse<ModelMeta>> {
    Ok(WebResponse::ok(
        state.gateway.registry().mappings(&req.name, &req.env)?,
    ))
}

pub async fn get_all_mappings(
    req: Path<ModelPath>,
    state: web::Data<Arc<AppState>>,
) -> WebResult<WebResponse<BTreeMap<String, Vec<MappingDesc>>>> {
    Ok(WebResponse::ok(
        state.gateway.registry().mappings_all(&req.name)?,
    ))
}

/// Remove a model from every environment
///
/// # Endpoint
/// `DELETE /api/models/{name}/mappings`
///
/// Removing an unknown model succeeds.
#[instrument(name = "delete-mappings", skip_all, fields(model = %req.name))]
pub async fn delete_mappings(
    req: Path<ModelPath>,
    state: web::Data<Arc<AppState>>,
) -> WebResult<WebResponse<bool>> {
    state.gateway.registry().remove_all_mappings(&req.name).await?;
    Ok(WebResponse::ok(true))
}

/// Subscribe to mappings of a model
///
/// # Endpoint
/// `POST /api/models/{name}/{env}/subscribe`
///
/// # Returns
/// The values read right after the subscription was created, keyed by mapping key.
#[instrument(name = "subscribe", skip_all, fields(model = %req.name, env = %req.env))]
pub async fn subscribe(
    req: Path<ModelEnvPath>,
    body: Json<SubscribeRequest>,
    state: web::Data<Arc<AppState>>,
) -> WebResult<WebResponse<HashMap<String, TagValue>>> {
    let values = state
        .gateway
        .registry()
        .subscribe(&req.name, &req.env, &body.keys)
        .await?;
    Ok(WebResponse::ok(values))
}

#[instrument(name = "unsubscribe", skip_all, fields(model = %req.name, env = %req.env))]
pub async fn unsubscribe(
    req: Path<ModelEnvPath>,
    state: web::Data<Arc<AppState>>,
) -> WebResult<WebResponse<bool>> {
    state
        .gateway
        .registry()
        .unsubscribe(&req.name, &req.env)
        .await?;
    Ok(WebResponse::ok(true))
}

pub async fn get_values(
    req: Path<ModelEnvPath>,
    state: web::Data<Arc<AppState>>,
) -> WebResult<WebResponse<HashMap<String, TagValue>>> {
    Ok(WebResponse::ok(
        state.gateway.registry().values(&req.name, &req.env)?,
    ))
}

pub async fn read_values(
    req: Path<ModelEnvPath>,
    body: Json<SubscribeRequest>,
    state: web::Data<Arc<AppState>>,
) -> WebResult<WebResponse<HashMap<String, TagValue>>> {
    let values = state
        .gateway
        .registry()
        .read_values(&req.name, &req.env, &body.keys)
        .await?;
    Ok(WebResponse::ok(values))
}

/// Write values of a model
///
/// # Endpoint
/// `POST /api/models/{name}/{env}/values`
///
/// # Returns
/// The write status per mapping key.
#[instrument(name = "set-values", skip_all, fields(model = %req.name, env = %req.env))]
pub async fn set_values(
    req: Path<ModelEnvPath>,
    body: Json<ValueUpdateRequest>,
    state: web::Data<Arc<AppState>>,
) -> WebResult<WebResponse<HashMap<String, StatusClass>>> {
    let statuses = state
        .gateway
        .registry()
        .set_values(&req.name, &req.env, &body)
        .await?;
    Ok(WebResponse::ok(statuses))
}
