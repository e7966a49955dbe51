use super::handler::RequestHandler;
use crate::state::AppState;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Static table of inbound routes, keyed by plugin identifier.
///
/// Built once from the registry; only HTTP plugins get a route.
pub struct RouteTable {
    routes: HashMap<String, Arc<RequestHandler>>,
}

impl RouteTable {
    pub fn build(state: &AppState) -> Self {
        let routes = state
            .registry
            .http_plugins()
            .map(|plugin| {
                if !state.config.server.prod {
                    info!("registering endpoint '/{}'", plugin.identifier());
                }
                (
                    plugin.identifier().to_string(),
                    Arc::new(RequestHandler::new(state, plugin.clone())),
                )
            })
            .collect();

        Self { routes }
    }

    pub fn get(&self, identifier: &str) -> Option<&Arc<RequestHandler>> {
        self.routes.get(identifier)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
