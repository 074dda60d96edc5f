//! Media push webhook.
//!
//! The path carries a persistent secret token; an unknown token is
//! rejected before anything reaches the pipeline. GET is the subscription
//! challenge; POST is the actual push, acknowledged immediately with the
//! work spawned off the request path.

use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;

use crate::AppState;

#[derive(Deserialize)]
pub struct ChallengeQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
}

#[derive(Deserialize)]
pub struct PushEntry {
    #[serde(default)]
    pub object_id: String,
    pub data: Option<PushData>,
}

#[derive(Deserialize)]
pub struct PushData {
    pub media_id: String,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/v1/media/push/{token}")
            .route(web::get().to(challenge))
            .route(web::post().to(push)),
    );
}

async fn challenge(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ChallengeQuery>,
) -> impl Responder {
    if path.as_str() != state.media.install_token() {
        return HttpResponse::BadRequest().finish();
    }
    if query.mode.as_deref() != Some("subscribe") {
        return HttpResponse::BadRequest().body("unsupported hub.mode");
    }
    let verify_token = query.verify_token.as_deref().unwrap_or_default();
    if !state.media.consume_verify_token(verify_token) {
        log::warn!("Subscription challenge with unknown verify token");
        return HttpResponse::BadRequest().body("unknown verify token");
    }
    log::info!("Media subscription challenge accepted");
    HttpResponse::Ok().body(query.challenge.clone().unwrap_or_default())
}

async fn push(
    state: web::Data<AppState>,
    path: web::Path<String>,
    entries: web::Json<Vec<PushEntry>>,
) -> impl Responder {
    if path.as_str() != state.media.install_token() {
        return HttpResponse::BadRequest().finish();
    }

    let media_ids: Vec<String> = entries
        .into_inner()
        .into_iter()
        .filter_map(|e| e.data.map(|d| d.media_id))
        .collect();
    log::info!("Push received with {} media reference(s)", media_ids.len());

    // Ack fast; resolution and ingestion happen in the background.
    let media = state.media.clone();
    tokio::spawn(async move {
        media.handle_push(media_ids).await;
    });
    HttpResponse::Ok().json(serde_json::json!({}))
}
