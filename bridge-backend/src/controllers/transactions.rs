//! Appservice transaction endpoint.
//!
//! The homeserver PUTs event batches here, authenticated by the shared
//! hs_token. Transaction ids repeat on retry and retries can arrive out
//! of order, so a window of recent ids is persisted and replays are acked
//! without reprocessing.

use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use serde_json::Value;

use crate::chat::ChatEvent;
use crate::AppState;

#[derive(Deserialize)]
pub struct TransactionQuery {
    access_token: Option<String>,
}

#[derive(Deserialize)]
pub struct TransactionBody {
    #[serde(default)]
    events: Vec<Value>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/_matrix/app/v1/transactions/{txn_id}")
            .route(web::put().to(transaction)),
    );
}

async fn transaction(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<TransactionQuery>,
    body: web::Json<TransactionBody>,
) -> impl Responder {
    if query.access_token.as_deref() != Some(state.config.hs_token.as_str()) {
        return HttpResponse::Forbidden().json(serde_json::json!({
            "errcode": "M_FORBIDDEN"
        }));
    }

    let txn_id = path.into_inner();
    if state.db.txn_already_processed(&txn_id).unwrap_or(false) {
        log::info!("Transaction {} replayed, acking without processing", txn_id);
        return HttpResponse::Ok().json(serde_json::json!({}));
    }

    for raw in &body.events {
        if let Some(event) = decode_event(raw) {
            state.orchestrator.handle_chat_event(event).await;
        }
    }

    if let Err(e) = state.db.record_processed_txn(&txn_id) {
        log::warn!("Could not record transaction id {}: {}", txn_id, e);
    }
    HttpResponse::Ok().json(serde_json::json!({}))
}

fn decode_event(raw: &Value) -> Option<ChatEvent> {
    let room_id = raw.get("room_id")?.as_str()?.to_string();
    match raw.get("type")?.as_str()? {
        "m.room.message" => Some(ChatEvent::Message {
            room_id,
            sender: raw.get("sender")?.as_str()?.to_string(),
            body: raw
                .get("content")?
                .get("body")?
                .as_str()?
                .to_string(),
        }),
        "m.room.member" => Some(ChatEvent::Membership {
            room_id,
            user_id: raw.get("state_key")?.as_str()?.to_string(),
            membership: raw
                .get("content")?
                .get("membership")?
                .as_str()?
                .to_string(),
        }),
        _ => None,
    }
}
