// Re-export route modules
pub mod health;
pub mod notify;
pub mod wsroute;

use actix_web::web;

/// Every HTTP and WebSocket route of the service
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(wsroute::ws_handler)
        .configure(health::configure)
        .configure(notify::configure);
}
