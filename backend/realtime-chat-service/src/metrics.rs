use std::time::Instant;

use actix_web::{http::header, HttpResponse};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::LoadMonitorConfig;
use crate::services::presence::PresenceRegistry;

static STARTED_AT: Lazy<Instant> = Lazy::new(Instant::now);

fn register<C: prometheus::core::Collector + Clone + 'static>(collector: C, name: &str) -> C {
    prometheus::default_registry()
        .register(Box::new(collector.clone()))
        .unwrap_or_else(|e| panic!("failed to register {name}: {e}"));
    collector
}

static CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "realtime_chat_connections_total",
        "WebSocket connections accepted since start",
    )
    .expect("failed to create realtime_chat_connections_total");
    register(counter, "realtime_chat_connections_total")
});

static ACTIVE_SOCKETS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "realtime_chat_active_sockets",
        "WebSocket connections currently open",
    )
    .expect("failed to create realtime_chat_active_sockets");
    register(gauge, "realtime_chat_active_sockets")
});

static PEAK_SOCKETS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "realtime_chat_peak_sockets",
        "Highest number of concurrently open WebSocket connections",
    )
    .expect("failed to create realtime_chat_peak_sockets");
    register(gauge, "realtime_chat_peak_sockets")
});

static MESSAGES_TRANSMITTED: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "realtime_chat_messages_transmitted_total",
        "Chat messages persisted and fanned out",
    )
    .expect("failed to create realtime_chat_messages_transmitted_total");
    register(counter, "realtime_chat_messages_transmitted_total")
});

static BYTES_RECEIVED: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "realtime_chat_message_bytes_received_total",
        "Approximate payload bytes of received chat messages",
    )
    .expect("failed to create realtime_chat_message_bytes_received_total");
    register(counter, "realtime_chat_message_bytes_received_total")
});

static ERRORS_LOGGED: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "realtime_chat_errors_total",
            "Errors raised while handling client events",
        ),
        &["event"],
    )
    .expect("failed to create realtime_chat_errors_total");
    register(counter, "realtime_chat_errors_total")
});

static ONLINE_USERS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "realtime_chat_online_users",
        "Users with at least one live session",
    )
    .expect("failed to create realtime_chat_online_users");
    register(gauge, "realtime_chat_online_users")
});

pub fn record_connection() {
    Lazy::force(&STARTED_AT);
    CONNECTIONS_TOTAL.inc();
    ACTIVE_SOCKETS.inc();
    let active = ACTIVE_SOCKETS.get();
    if active > PEAK_SOCKETS.get() {
        PEAK_SOCKETS.set(active);
    }
}

pub fn record_disconnection() {
    if ACTIVE_SOCKETS.get() > 0 {
        ACTIVE_SOCKETS.dec();
    }
}

pub fn record_message(size_bytes: u64) {
    MESSAGES_TRANSMITTED.inc();
    BYTES_RECEIVED.inc_by(size_bytes);
}

pub fn record_error(event: &str) {
    ERRORS_LOGGED.with_label_values(&[event]).inc();
}

pub fn set_online_users(count: usize) {
    ONLINE_USERS.set(count as i64);
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadSnapshot {
    pub active_online_users: usize,
    pub active_sockets: i64,
    pub message_throughput: u64,
    pub peak_sockets: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemSnapshot {
    pub platform: &'static str,
    pub service_version: &'static str,
}

/// Served by `GET /health` and the `system:health_check` socket event
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub uptime: String,
    pub timestamp: DateTime<Utc>,
    pub load: LoadSnapshot,
    pub system: SystemSnapshot,
}

pub fn health_snapshot(online_users: usize) -> HealthSnapshot {
    HealthSnapshot {
        status: "HEALTHY",
        uptime: format!("{:.2}s", STARTED_AT.elapsed().as_secs_f64()),
        timestamp: Utc::now(),
        load: LoadSnapshot {
            active_online_users: online_users,
            active_sockets: ACTIVE_SOCKETS.get(),
            message_throughput: MESSAGES_TRANSMITTED.get(),
            peak_sockets: PEAK_SOCKETS.get(),
        },
        system: SystemSnapshot {
            platform: std::env::consts::OS,
            service_version: env!("CARGO_PKG_VERSION"),
        },
    }
}

/// Periodically logs a warning while the socket count is above the threshold
pub fn spawn_load_monitor(presence: PresenceRegistry, config: LoadMonitorConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.check_interval);
        // First tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let online = presence.online_count().await;
            set_online_users(online);
            let health = health_snapshot(online);
            if health.load.active_sockets > config.high_load_socket_threshold {
                tracing::warn!(
                    active_sockets = health.load.active_sockets,
                    online_users = online,
                    peak_sockets = health.load.peak_sockets,
                    threshold = config.high_load_socket_threshold,
                    "high load detected"
                );
            }
        }
    })
}

pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, encoder.format_type()))
        .body(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracks_high_water_mark() {
        record_connection();
        record_connection();
        let peak = PEAK_SOCKETS.get();
        assert!(peak >= 2);

        record_disconnection();
        assert!(PEAK_SOCKETS.get() >= peak);
        assert!(ACTIVE_SOCKETS.get() >= 0);
    }

    #[test]
    fn test_health_snapshot_shape() {
        record_message(5);
        let value = serde_json::to_value(health_snapshot(3)).unwrap();
        assert_eq!(value["status"], "HEALTHY");
        assert_eq!(value["load"]["active_online_users"], 3);
        assert!(value["load"]["message_throughput"].as_u64().unwrap() >= 1);
        assert!(value["uptime"].as_str().unwrap().ends_with('s'));
    }
}
