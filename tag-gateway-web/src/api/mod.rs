//! Router module for handling all API routes
mod environments;
mod health;
mod models;

use actix_web::web;

/// Configure all routes mounted under the router prefix
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope(models::ROUTER_PREFIX).configure(models::configure_routes))
        .service(
            web::scope(environments::ROUTER_PREFIX).configure(environments::configure_routes),
        );
}

/// Configure root routes mounted outside the router prefix.
pub fn configure_public_routes(cfg: &mut web::ServiceConfig) {
    cfg.configure(health::configure_health_routes);
}
