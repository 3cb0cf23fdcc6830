use actix_web::{web, App, HttpServer};
use realtime_chat_service::{
    config::{self, StoreBackend},
    db, error, logging, metrics, routes,
    services::ChatHub,
    state::AppState,
    store::{DynChatStore, InMemoryStore, PgChatStore},
};
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;

    let store: DynChatStore = match cfg.store_backend {
        StoreBackend::Postgres => {
            let database_url = cfg
                .database_url
                .as_deref()
                .ok_or_else(|| error::AppError::Config("DATABASE_URL missing".into()))?;
            let pool = db::init_pool(database_url, cfg.db_max_connections)
                .await
                .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
            Arc::new(PgChatStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("STORE_BACKEND=memory: chat data is lost on restart");
            Arc::new(InMemoryStore::new())
        }
    };

    let hub = ChatHub::new(store);
    let _load_monitor = metrics::spawn_load_monitor(hub.presence().clone(), cfg.load_monitor.clone());

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    let state = AppState::new(hub, cfg);
    tracing::info!(%bind_addr, "starting realtime-chat-service");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure_routes)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind REST: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("REST server: {e}")))
}
