use std::sync::Arc;

use tokio::net::TcpListener;

use chorusserver::config::Config;
use chorusserver::gateway::heartbeat::REAPER_INTERVAL;
use chorusserver::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chorusserver=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env();
    print_banner(&config);

    let db = chorusserver::db::create_pool(&config.database_url)
        .await
        .expect("failed to create database pool");

    let (state, events_rx) = AppState::new(db, config.gateway.clone());
    Arc::clone(&state.dispatcher).spawn(events_rx);

    // Sweep sessions whose resume grace window has lapsed.
    let reaper_registry = Arc::clone(&state.registry);
    let reaper_router = Arc::clone(&state.router);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REAPER_INTERVAL);
        loop {
            interval.tick().await;
            let reaped = reaper_registry.reap_expired(tokio::time::Instant::now());
            for session in &reaped {
                reaper_router.remove_session(&session.session_id);
            }
            if !reaped.is_empty() {
                tracing::info!("reaped {} expired session(s)", reaped.len());
            }
        }
    });

    let app = chorusserver::routes::router(state.clone());

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .expect("failed to bind");
    let actual_port = listener
        .local_addr()
        .expect("failed to get local address")
        .port();
    eprintln!("  \x1b[32m→ listening on 0.0.0.0:{actual_port}\x1b[0m");
    eprintln!();

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .expect("server error");

    // Tell every live session to reconnect before the process exits.
    state.registry.shutdown_all();
}

fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");

    eprintln!();
    eprintln!("  \x1b[1;36mchorus\x1b[0m \x1b[2mv{version}\x1b[0m");
    eprintln!();
    eprintln!("  \x1b[2mport\x1b[0m         {}", config.port);
    eprintln!("  \x1b[2mdatabase\x1b[0m     {}", config.database_url);
    eprintln!(
        "  \x1b[2mheartbeat\x1b[0m    {}s",
        config.gateway.heartbeat_interval.as_secs()
    );
    eprintln!(
        "  \x1b[2mresume\x1b[0m       {} frames / {}s grace",
        config.gateway.resume_buffer_capacity,
        config.gateway.resume_grace.as_secs()
    );
    eprintln!();
}
