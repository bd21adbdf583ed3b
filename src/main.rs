use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::signal;

use kyc_verification_svc::challenge::store::{spawn_sweeper, ChallengeStore};
use kyc_verification_svc::config::settings::SETTINGS;
use kyc_verification_svc::logger::logger::setup_logger;
use kyc_verification_svc::routes::root::{root_routes, RouterState};
use kyc_verification_svc::stage::registry::StageRegistry;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

const SWEEP_PERIOD: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    setup_logger();

    SETTINGS
        .security
        .validate()
        .unwrap_or_else(|e| panic!("Invalid configuration: {e}"));

    let addr = format!("0.0.0.0:{}", SETTINGS.server.http_port);

    let registry = Arc::new(StageRegistry::new(SETTINGS.verification.similarity_threshold));
    registry.warm_up();
    info!("completed initializing inference stages");

    let store = Arc::new(ChallengeStore::new(
        SETTINGS.security.hmac_secret.as_bytes().to_vec(),
        Duration::from_secs(SETTINGS.challenge.ttl_seconds),
        SETTINGS.challenge.count,
    ));
    spawn_sweeper(Arc::clone(&store), SWEEP_PERIOD);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to create new listener: {}", e));

    info!("starting inference gateway on {:?}", addr);

    let router_state = RouterState::new(registry, store);

    axum::serve(listener, root_routes(router_state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|e| panic!("Failed to start api server: {}", e));
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
