use deck_director::server::config::{configure_app, AppState, Settings};
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_env_filter("deck_director=debug,tower_http=debug")
        .init();

    let settings = Settings::from_env();
    let port = settings.port;

    let state = AppState::build(settings)
        .await
        .expect("Failed to build application state");
    let app = configure_app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    info!("✨ Server ready:");
    info!("  🌎 http://{}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}
