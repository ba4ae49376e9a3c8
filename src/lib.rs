pub mod append;
pub mod config;
pub mod cursor;
pub mod db;
pub mod error;
pub mod hub;
pub mod models;
pub mod rate_limit;
pub mod registry;
pub mod replay;
pub mod retention;
pub mod routes;
pub mod sessions;
pub mod store;
pub mod wire;

use config::GatewayConfig;
use db::Db;
use hub::{ConnectionTracker, FanoutHub};
use rate_limit::{RateLimitConfig, RateLimiter};
use rocket_cors::CorsOptions;
use std::env;

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    let db_path = env::var("DATABASE_PATH").unwrap_or_else(|_| "data/gateway.db".to_string());
    rocket_with_db(&db_path)
}

pub fn rocket_with_db(db_path: &str) -> rocket::Rocket<rocket::Build> {
    build_rocket(db_path, GatewayConfig::from_env(), RateLimitConfig::from_env())
}

pub fn rocket_with_config(
    db_path: &str,
    config: GatewayConfig,
    rate_config: RateLimitConfig,
) -> rocket::Rocket<rocket::Build> {
    build_rocket(db_path, config, rate_config)
}

fn build_rocket(
    db_path: &str,
    config: GatewayConfig,
    rate_config: RateLimitConfig,
) -> rocket::Rocket<rocket::Build> {
    // Ensure data directory exists
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let db = Db::new(db_path);
    let hub = FanoutHub::new(config.subscription_queue_len, config.slow_consumer_ms);
    let rate_limiter = RateLimiter::new();

    let cors = CorsOptions::default()
        .to_cors()
        .expect("Failed to create CORS");

    // Envelope ceiling plus base64 and frame overhead.
    let json_limit = (config.max_env_bytes * 3) / 2 + 64 * 1024;
    let figment = rocket::Config::figment().merge(("limits.json", json_limit as u64));

    let prune_db_path = db_path.to_string();
    let prune_config = config.clone();

    rocket::custom(figment)
        .manage(db)
        .manage(hub)
        .manage(ConnectionTracker::new())
        .manage(config)
        .manage(rate_config)
        .manage(rate_limiter)
        .attach(cors)
        .register(
            "/",
            rocket::catchers![
                routes::bad_request,
                routes::unauthorized,
                routes::not_found,
                routes::unprocessable,
                routes::too_many_requests,
                routes::internal_error,
            ],
        )
        .mount(
            "/",
            rocket::routes![
                routes::healthz,
                routes::stats,
                routes::llms_txt_root,
                routes::llms_txt_api,
                routes::start_session,
                routes::resume_session,
                routes::logout,
                routes::logout_all,
                routes::revoke_sessions,
                routes::list_sessions,
                routes::create_room,
                routes::invite_member,
                routes::remove_member,
                routes::promote_member,
                routes::demote_member,
                routes::list_room_members,
                routes::inbox,
                routes::read_envelopes,
                routes::list_conversations,
                routes::get_cursor,
                routes::sse_stream,
                routes::ws_connect,
                routes::prune_now,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Envelope Pruning",
            move |_rocket| {
                Box::pin(async move {
                    retention::spawn_prune_task(prune_db_path, prune_config);
                    println!("🧹 Envelope pruning task started");
                })
            },
        ))
}
