// Re-export route modules
pub mod conversations;
pub mod health;
pub mod wsroute;

use actix_web::web;

/// Mount every HTTP and WebSocket route
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(conversations::get_conversations_for_user)
        .service(conversations::get_conversation_messages)
        .service(health::health)
        .service(wsroute::ws_handler)
        .route("/metrics", web::get().to(crate::metrics::metrics_handler));
}
