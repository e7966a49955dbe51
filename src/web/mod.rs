use crate::error::{ConfigError, RelayError, Result};
use crate::proxy::RouteTable;
use crate::state::AppState;
use std::sync::Arc;

pub mod api;


pub async fn start_server(state: Arc<AppState>, table: Arc<RouteTable>) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let addr: std::net::SocketAddr = addr.parse().map_err(|e| {
        RelayError::Config(ConfigError::Parse(format!(
            "Invalid server address {addr}: {e}"
        )))
    })?;

    tracing::info!("Starting plugin relay on {} ({} routes)", addr, table.len());

    let routes = api::routes(state.clone(), table);

    let mut shutdown_rx = state.shutdown_tx.subscribe();
    let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async move {
        let _ = shutdown_rx.recv().await;
    });

    server.await;

    tracing::info!("Plugin relay server stopped");
    Ok(())
}
