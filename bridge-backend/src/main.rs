use actix_files::Files;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;

mod bridge;
mod chat;
mod config;
mod controllers;
mod db;
mod linking;
mod models;
mod remote;
mod sync;

use bridge::BridgeOrchestrator;
use chat::matrix::MatrixChat;
use chat::ChatApi;
use config::Config;
use db::Database;
use linking::LinkManager;
use remote::{ApiClient, CredentialPool, RemoteApi, TokenExchanger};
use sync::{MediaSyncEngine, ProfileSyncEngine};

pub struct AppState {
    pub db: Arc<Database>,
    pub config: Config,
    pub link: Arc<LinkManager>,
    pub profiles: Arc<ProfileSyncEngine>,
    pub media: Arc<MediaSyncEngine>,
    pub orchestrator: Arc<BridgeOrchestrator>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let port = config.port;

    log::info!("Initializing database at {}", config.database_url);
    let db = Database::new(&config.database_url).expect("Failed to initialize database");
    let db = Arc::new(db);

    let chat: Arc<dyn ChatApi> = Arc::new(MatrixChat::new(
        config.homeserver_url.clone(),
        config.as_token.clone(),
        config.homeserver_domain.clone(),
        config.bot_localpart.clone(),
    ));

    let api = Arc::new(ApiClient::new(
        CredentialPool::new(db.clone()),
        config.remote_api_base.clone(),
        config.remote_client_id.clone(),
        config.remote_client_secret.clone(),
        config.api_max_attempts,
    ));
    let exchanger: Arc<dyn TokenExchanger> = api.clone();
    let remote: Arc<dyn RemoteApi> = api;

    let link = Arc::new(LinkManager::new(
        db.clone(),
        exchanger,
        config.remote_api_base.clone(),
        config.remote_client_id.clone(),
        config.public_url_base.clone(),
    ));

    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();

    let profiles = Arc::new(ProfileSyncEngine::new(
        db.clone(),
        remote.clone(),
        events_tx.clone(),
        config.profile_cache_hours,
        config.profile_updates_per_tick,
    ));
    let media = Arc::new(
        MediaSyncEngine::new(
            db.clone(),
            remote.clone(),
            events_tx,
            config.media_check_hours,
        )
        .expect("Failed to initialize media sync"),
    );

    let orchestrator = Arc::new(BridgeOrchestrator::new(
        db.clone(),
        chat,
        remote,
        link.clone(),
        media.clone(),
        config.clone(),
    ));

    log::info!("Running startup reconciliation");
    orchestrator.startup().await;

    // Polling covers the gap if the subscription cannot be installed now.
    if let Err(e) = media.prepare(&config.public_url_base).await {
        log::warn!("Media subscription setup failed: {}", e);
    }

    tokio::spawn(Arc::clone(&orchestrator).run_event_loop(events_rx));

    let (profile_shutdown_tx, profile_shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(Arc::clone(&profiles).start(
        Duration::from_secs(config.profile_tick_minutes * 60),
        profile_shutdown_rx,
    ));

    let (media_shutdown_tx, media_shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(Arc::clone(&media).start(
        Duration::from_secs(config.media_poll_seconds),
        media_shutdown_rx,
    ));

    log::info!("Starting bridge server on port {}", port);

    let bind_address = config.bind_address.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(AppState {
                db: Arc::clone(&db),
                config: config.clone(),
                link: Arc::clone(&link),
                profiles: Arc::clone(&profiles),
                media: Arc::clone(&media),
                orchestrator: Arc::clone(&orchestrator),
            }))
            .wrap(Logger::default())
            .configure(controllers::health::config)
            .configure(controllers::oauth::config)
            .configure(controllers::webhook::config)
            .configure(controllers::transactions::config)
            .configure(controllers::rooms::config)
            .service(Files::new("/", "./web").index_file("index.html"))
    })
    .bind((bind_address, port))?
    .run()
    .await;

    let _ = profile_shutdown_tx.send(());
    let _ = media_shutdown_tx.send(());
    server
}
