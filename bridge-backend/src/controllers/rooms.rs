//! Appservice room alias query endpoint.
//!
//! The homeserver asks here when a user tries to join an alias in our
//! reserved namespace. A successful answer means the bridge created the
//! room behind the alias, so the homeserver completes the join.

use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;

use crate::AppState;

#[derive(Deserialize)]
pub struct RoomQuery {
    access_token: Option<String>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/_matrix/app/v1/rooms/{room_alias}")
            .route(web::get().to(room_alias_query)),
    );
}

async fn room_alias_query(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<RoomQuery>,
) -> impl Responder {
    if query.access_token.as_deref() != Some(state.config.hs_token.as_str()) {
        return HttpResponse::Forbidden().json(serde_json::json!({
            "errcode": "M_FORBIDDEN"
        }));
    }

    let alias = path.into_inner();
    match state.orchestrator.provision_alias_room(&alias).await {
        Some(handle) => {
            let profiles = state.profiles.clone();
            tokio::spawn(async move {
                profiles.queue_immediate(&handle).await;
            });
            HttpResponse::Ok().json(serde_json::json!({}))
        }
        None => HttpResponse::NotFound().json(serde_json::json!({
            "errcode": "M_NOT_FOUND"
        })),
    }
}
