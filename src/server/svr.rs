use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
};
use futures::TryStreamExt;
use std::{io, io::ErrorKind, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::server::store::ReceiveStore;

async fn receive(
    State(store): State<Arc<ReceiveStore>>,
    Path(name): Path<String>,
    body: Body,
) -> Response {
    let stream = body.into_data_stream().map_err(io::Error::other);

    match store.store(&name, stream).await {
        Ok(receipt) => {
            info!(name = %receipt.name, size = receipt.size, "upload received");
            (StatusCode::CREATED, Json(receipt)).into_response()
        }
        Err(err) if err.kind() == ErrorKind::InvalidInput => {
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        Err(err) => {
            warn!(%name, %err, "failed to store upload");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal server error: {}", err),
            )
                .into_response()
        }
    }
}

async fn list_receipts(State(store): State<Arc<ReceiveStore>>) -> impl IntoResponse {
    Json(store.receipts().await)
}

pub fn build_app(store: Arc<ReceiveStore>, body_limit: usize) -> Router {
    Router::new()
        .route("/", get(list_receipts))
        .route("/{name}", put(receive))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

/// Serves the receiving endpoint until the listener fails.
pub async fn startup(
    address: String,
    port: u16,
    root: PathBuf,
    body_limit: usize,
) -> io::Result<()> {
    let store = Arc::new(ReceiveStore::open(root).await?);
    info!(root = %store.root().display(), "storing uploads");

    let app = build_app(store, body_limit);

    let addr = format!("{}:{}", address, port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Listening on http://{}", addr);

    axum::serve(listener, app).await
}
