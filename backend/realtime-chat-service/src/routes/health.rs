use crate::metrics;
use crate::state::AppState;
use actix_web::{get, web, HttpResponse};

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let online = state.hub.presence().online_count().await;
    HttpResponse::Ok().json(metrics::health_snapshot(online))
}

#[get("/metrics")]
pub async fn prometheus_metrics() -> HttpResponse {
    metrics::metrics_handler().await
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health).service(prometheus_metrics);
}
