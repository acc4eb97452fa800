use actix_web::{http::header::ContentType, HttpResponse};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

pub static ONLINE_USERS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "marketplace_chat_online_users",
        "Users with an authenticated WebSocket session",
    )
    .expect("failed to create marketplace_chat_online_users");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register marketplace_chat_online_users");
    gauge
});

pub static WS_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "marketplace_chat_ws_connections",
        "Open WebSocket connections, authenticated or not",
    )
    .expect("failed to create marketplace_chat_ws_connections");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register marketplace_chat_ws_connections");
    gauge
});

/// Dispatch outcomes: delivered, queued, failed
pub static MESSAGES_DISPATCHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "marketplace_chat_messages_dispatched_total",
            "Send attempts by outcome",
        ),
        &["delivery"],
    )
    .expect("failed to create marketplace_chat_messages_dispatched_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register marketplace_chat_messages_dispatched_total");
    counter
});

pub static PENDING_NOTIFICATIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "marketplace_chat_pending_notifications_total",
        "Notifications queued for offline users",
    )
    .expect("failed to create marketplace_chat_pending_notifications_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register marketplace_chat_pending_notifications_total");
    counter
});

pub static PENDING_NOTIFICATIONS_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "marketplace_chat_pending_notifications_dropped_total",
        "Queued notifications evicted because a user's queue was full",
    )
    .expect("failed to create marketplace_chat_pending_notifications_dropped_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register marketplace_chat_pending_notifications_dropped_total");
    counter
});

/// Read-receipt outcomes: committed, transient_exhausted, failed
pub static READ_RECEIPTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "marketplace_chat_read_receipts_total",
            "Read-receipt updates by final outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create marketplace_chat_read_receipts_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register marketplace_chat_read_receipts_total");
    counter
});

pub static READ_RECEIPT_RETRIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "marketplace_chat_read_receipt_retries_total",
        "Read-receipt attempts retried after a transient conflict",
    )
    .expect("failed to create marketplace_chat_read_receipt_retries_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register marketplace_chat_read_receipt_retries_total");
    counter
});

pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .insert_header(ContentType::plaintext())
        .body(buffer)
}
