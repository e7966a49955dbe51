use crate::plugin::schema::PluginRequest;
use crate::proxy::{RequestHandler, RouteTable};
use crate::state::AppState;
use std::sync::Arc;
use warp::{Filter, Rejection, Reply};

const MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

pub fn routes(
    state: Arc<AppState>,
    table: Arc<RouteTable>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let plugins = plugins_route(state.clone());
    let health = health_route(state.clone());
    let metrics = metrics_route(state);
    let invoke = invoke_route(table);

    plugins.or(health).or(metrics).or(invoke)
}

fn plugins_route(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("plugins")
        .and(warp::get())
        .and(with_state(state))
        .and_then(list_plugins)
}

fn health_route(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("health")
        .and(warp::get())
        .and(with_state(state))
        .map(|state: Arc<AppState>| {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "plugin-relay",
                "pending": state.queue.pending(),
            }))
        })
}

fn metrics_route(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("metrics")
        .and(warp::get())
        .and(with_state(state))
        .and_then(get_metrics)
}

/// `POST /{identifier}`; the handler is resolved before the body is read so
/// unknown identifiers are rejected with 404
fn invoke_route(
    table: Arc<RouteTable>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::param::<String>()
        .and(warp::path::end())
        .and(warp::post())
        .and(with_table(table))
        .and_then(resolve_handler)
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and_then(invoke_plugin)
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn with_table(
    table: Arc<RouteTable>,
) -> impl Filter<Extract = (Arc<RouteTable>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || table.clone())
}

async fn list_plugins(state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&serde_json::json!({
        "plugins": state.registry.listing()
    })))
}

async fn get_metrics(state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    match state.metrics.encode_text() {
        Ok(body) => Ok(warp::reply::with_status(
            warp::reply::with_header(body, "content-type", "text/plain; version=0.0.4"),
            warp::http::StatusCode::OK,
        )),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            Ok(warp::reply::with_status(
                warp::reply::with_header(String::new(), "content-type", "text/plain"),
                warp::http::StatusCode::INTERNAL_SERVER_ERROR,
            ))
        }
    }
}

async fn resolve_handler(
    identifier: String,
    table: Arc<RouteTable>,
) -> Result<Arc<RequestHandler>, Rejection> {
    table.get(&identifier).cloned().ok_or_else(warp::reject::not_found)
}

async fn invoke_plugin(
    handler: Arc<RequestHandler>,
    request: PluginRequest,
) -> Result<impl Reply, Rejection> {
    let response = handler.handle(request).await;
    Ok(warp::reply::json(&response))
}
