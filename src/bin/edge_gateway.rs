use std::time::Duration;

use log::info;
use tokio::signal;

use kyc_verification_svc::config::settings::SETTINGS;
use kyc_verification_svc::edge::handler::EdgeState;
use kyc_verification_svc::edge::routes::edge_routes;
use kyc_verification_svc::logger::logger::setup_logger;

#[tokio::main]
async fn main() {
    setup_logger();

    let addr = format!("0.0.0.0:{}", SETTINGS.edge.http_port);
    let request_timeout = SETTINGS.server.request_timeout.unwrap_or(60);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(request_timeout + 5))
        .build()
        .unwrap_or_else(|e| panic!("Failed to build http client: {}", e));

    let state = EdgeState::new(
        client,
        SETTINGS.edge.inference_url.clone(),
        SETTINGS.upload.max_upload_bytes(),
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to create new listener: {}", e));

    info!(
        "starting edge gateway on {:?} (inference at {})",
        addr, SETTINGS.edge.inference_url
    );

    axum::serve(listener, edge_routes(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|e| panic!("Failed to start edge gateway: {}", e));
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
