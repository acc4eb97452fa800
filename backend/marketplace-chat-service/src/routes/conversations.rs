//! Conversation history endpoints
//!
//! Read-only projections used by clients to rebuild their inbox and fetch
//! history after reconnecting.

use crate::error::AppError;
use crate::state::AppState;
use actix_web::{get, web, HttpResponse};

/// Conversations a user takes part in, most recent activity first
///
/// **Endpoint**: `GET /conversations/:user_id`
#[get("/conversations/{user_id}")]
pub async fn get_conversations_for_user(
    state: web::Data<AppState>,
    user_id: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let conversations = state
        .store
        .conversations_for_user(user_id.into_inner())
        .await?;

    Ok(HttpResponse::Ok().json(conversations))
}

/// Messages of a conversation in send order
///
/// Returns 404 if the conversation does not exist.
///
/// **Endpoint**: `GET /conversations/:conversation_id/messages`
#[get("/conversations/{conversation_id}/messages")]
pub async fn get_conversation_messages(
    state: web::Data<AppState>,
    conversation_id: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = conversation_id.into_inner();
    state
        .store
        .get_conversation(conversation_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let messages = state.store.messages_for_conversation(conversation_id).await?;
    Ok(HttpResponse::Ok().json(messages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ReadReceiptConfig, StoreBackend};
    use crate::models::{ListingSnapshot, NewMessage, UserPair, UserProfile};
    use crate::store::{ChatStore, InMemoryChatStore};
    use actix_web::{http::StatusCode, test, App};
    use std::sync::Arc;

    fn config() -> Config {
        Config {
            store_backend: StoreBackend::Memory,
            database: None,
            port: 0,
            read_receipts: ReadReceiptConfig::default(),
            pending_notifications_per_user: 10,
        }
    }

    async fn seeded() -> (AppState, i64) {
        let store = Arc::new(InMemoryChatStore::with_users([
            UserProfile::new(1, "Ana", None),
            UserProfile::new(2, "Ben", Some("ben.png".into())),
        ]));
        let conversation_id = store.insert_conversation(UserPair::new(1, 2), None).await.unwrap();
        for (sender, receiver, body) in [(1, 2, "first"), (2, 1, "second")] {
            store
                .insert_message(&NewMessage {
                    conversation_id,
                    sender_id: sender,
                    receiver_id: receiver,
                    body: body.into(),
                    listing: ListingSnapshot::default(),
                })
                .await
                .unwrap();
        }
        (AppState::new(config(), store), conversation_id)
    }

    #[actix_rt::test]
    async fn test_conversations_for_user() {
        let (state, conversation_id) = seeded().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .service(get_conversations_for_user),
        )
        .await;

        let req = test::TestRequest::get().uri("/conversations/1").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body[0]["id"], conversation_id);
        assert_eq!(body[0]["other_user_id"], 2);
        assert_eq!(body[0]["other_user_name"], "Ben");
        assert_eq!(body[0]["last_message"], "second");
    }

    #[actix_rt::test]
    async fn test_messages_in_send_order_and_404_for_unknown() {
        let (state, conversation_id) = seeded().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .service(get_conversation_messages),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!("/conversations/{conversation_id}/messages"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body[0]["message"], "first");
        assert_eq!(body[0]["sender_name"], "Ana");
        assert_eq!(body[1]["message"], "second");

        let req = test::TestRequest::get()
            .uri("/conversations/999/messages")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
