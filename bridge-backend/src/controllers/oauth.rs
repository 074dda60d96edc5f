//! OAuth redirect target for account linking.
//!
//! The remote service sends the user here after authorization. Outcomes
//! land on static fragment routes so the page can render them without a
//! second round trip.

use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;

use crate::linking::LinkOutcome;
use crate::AppState;

const SUCCESS_LOCATION: &str = "/#/auth/success";
const FAILED_LOCATION: &str = "/#/auth/failed";

#[derive(Deserialize)]
pub struct AuthCheckQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
    code: Option<String>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/v1/auth/check").route(web::get().to(auth_check)));
}

async fn auth_check(
    state: web::Data<AppState>,
    query: web::Query<AuthCheckQuery>,
) -> impl Responder {
    let code = match &query.code {
        Some(code) => code,
        // User declined or the remote service sent an error redirect.
        None => {
            log::warn!("Auth redirect without code for session {}", query.session_id);
            return redirect(FAILED_LOCATION);
        }
    };

    match state.link.redeem_session(&query.session_id, code).await {
        LinkOutcome::Linked { handle } => {
            let profiles = state.profiles.clone();
            tokio::spawn(async move {
                profiles.queue_immediate(&handle).await;
            });
            redirect(SUCCESS_LOCATION)
        }
        LinkOutcome::Failed => redirect(FAILED_LOCATION),
    }
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found()
        .insert_header(("Location", location))
        .finish()
}
