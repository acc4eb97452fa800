use actix_web::{web, App, HttpServer};
use marketplace_chat_service::{
    config::{self, StoreBackend},
    db, error, logging, routes,
    state::AppState,
    store::{ChatStore, InMemoryChatStore, PgChatStore},
};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;

    let store: Arc<dyn ChatStore> = match (cfg.store_backend, cfg.database.as_ref()) {
        (StoreBackend::Postgres, Some(database)) => {
            let pool = db::init_pool(database)
                .await
                .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
            Arc::new(PgChatStore::new(pool))
        }
        (StoreBackend::Postgres, None) => {
            return Err(error::AppError::Config("DATABASE_URL missing".into()));
        }
        (StoreBackend::Memory, _) => {
            tracing::warn!("running with the in-memory store; nothing survives a restart");
            Arc::new(InMemoryChatStore::new())
        }
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    let state = AppState::new(cfg, store);
    tracing::info!(%bind_addr, "starting marketplace-chat-service");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST"])
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind REST: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("REST server: {e}")))
}
