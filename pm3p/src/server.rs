use std::{future::Future, io, net::SocketAddr, sync::Arc};

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::exposition::Format;
use crate::modbus::connection::Connect;
use crate::poll::PollCoordinator;
use crate::Error;

pub fn router<C: Connect>(coordinator: Arc<PollCoordinator<C>>) -> Router {
    Router::new()
        .route("/stats", get(stats::<C>))
        .with_state(coordinator)
}

async fn stats<C: Connect>(
    State(coordinator): State<Arc<PollCoordinator<C>>>,
    Query(params): Query<Vec<(String, String)>>,
) -> crate::Result<Response> {
    let format = Format::from_param(requested_format(&params));
    let snapshot = coordinator.poll().await?;
    let body = format.render(&snapshot)?;
    Ok(([(header::CONTENT_TYPE, format.content_type())], body).into_response())
}

/// First `format` pair of the query string. Repeated or odd keys never reject the request.
fn requested_format(params: &[(String, String)]) -> Option<&str> {
    params
        .iter()
        .find(|(key, _)| key == "format")
        .map(|(_, value)| value.as_str())
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        error!(cause = %self, "Poll failed");
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

pub async fn run<C: Connect>(
    addr: SocketAddr,
    coordinator: Arc<PollCoordinator<C>>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> crate::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Listening");

    axum::serve(listener, router(coordinator))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server finished running");
    Ok(())
}

/// Resolves once `signal` fires. If the signal cannot be listened for, the error is logged and this
/// never resolves, so the server keeps running instead of stopping straight away.
pub async fn shutdown_on<F>(signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("shutting down"),
        Err(err) => {
            error!(%err, "Could not listen for shutdown signal");
            std::future::pending::<()>().await
        }
    }
}

#[test]
fn first_format_pair_wins() {
    let params = vec![
        ("x".to_owned(), "1".to_owned()),
        ("format".to_owned(), "prometheus".to_owned()),
        ("format".to_owned(), "json".to_owned()),
    ];
    assert_eq!(requested_format(&params), Some("prometheus"));
    assert_eq!(requested_format(&[]), None);
}

#[tokio::test]
async fn shutdown_resolves_on_signal() {
    let done = tokio::time::timeout(
        std::time::Duration::from_millis(100),
        shutdown_on(async { Ok(()) }),
    )
    .await;
    assert!(done.is_ok());
}

#[tokio::test]
async fn failed_signal_handler_keeps_serving() {
    let done = tokio::time::timeout(
        std::time::Duration::from_millis(20),
        shutdown_on(async { Err(io::Error::new(io::ErrorKind::Other, "no signal driver")) }),
    )
    .await;
    assert!(done.is_err());
}
