use axum::{
    Json, Router,
    extract::{Path, State},
    response::Response,
    routing,
};
use rearch::Container;
use shortlink::{
    api::{self, ErrorResponse, ShortenedUrl, SubmitUrlPayload},
    config,
    url_service::url_shortener_service_capsule,
};
use tokio::{net::TcpListener, signal};
use tracing::{error, info, instrument};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let container = config::init_container().await?;

    let app = Router::new()
        .route("/", routing::post(submit_url))
        .route("/{token}", routing::get(resolve_url))
        .with_state(container.clone());

    let listener = TcpListener::bind(container.read(config::addr_capsule)).await?;
    info!(addr = %listener.local_addr()?, "Started listening on TCP");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    config::shutdown_container(&container).await
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
    info!("Shutting down gracefully");
}

#[instrument(skip(container))]
async fn resolve_url(
    State(container): State<Container>,
    Path(token): Path<String>,
) -> Result<Response, ErrorResponse> {
    let redirect = container
        .read(url_shortener_service_capsule)
        .resolve(&token)
        .await
        .map_err(api::resolve_error_response)?;
    api::redirect_response(redirect)
}

#[instrument(skip(container))]
async fn submit_url(
    State(container): State<Container>,
    Json(SubmitUrlPayload { long_url }): Json<SubmitUrlPayload>,
) -> Result<Json<ShortenedUrl>, ErrorResponse> {
    api::check_redirectable(&long_url)?;

    let mapping = container
        .read(url_shortener_service_capsule)
        .submit(&long_url)
        .await
        .map_err(api::submit_error_response)?;

    ShortenedUrl::new(&container.read(config::public_base_url_capsule), mapping)
        .map(Json)
        .map_err(|parse_error| {
            let err_uuid = Uuid::new_v4();
            error!(?err_uuid, ?parse_error, "Failed to build short URL");
            api::internal_server_error(err_uuid)
        })
}
