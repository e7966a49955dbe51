//! Plugin system for the relay
//!
//! Plugins are registered once at startup into a [`PluginRegistry`]. Each
//! registration draws a fresh nonce, so the identity hash a caller cached from
//! `GET /plugins` stops matching as soon as the server-side instance changes.
//!
//! # Modules
//!
//! - `schema`: request/response types shared with callers
//! - `registry`: identifier → plugin mapping and identity hashes
//! - `chain`: category-scoped middleware chain
//! - `timer`: middleware attaching `elapsedTimes` to responses
//! - `builtin`: small plugins shipped with the binary

pub mod builtin;
pub mod chain;
pub mod registry;
pub mod schema;
pub mod timer;

pub use chain::{Middleware, MiddlewareChain, MiddlewareContext};
pub use registry::{IdentityHash, PluginRegistry, RegisteredPlugin};
pub use schema::{
    ElapsedTimes, PluginCategory, PluginError, PluginOutput, PluginRequest, PluginResponse,
    PluginTransport,
};
pub use timer::TimerMiddleware;

use async_trait::async_trait;
use std::time::Duration;

/// Execution capability every plugin provides
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Category used to select middlewares
    fn category(&self) -> PluginCategory;

    /// Transport the plugin is served over
    fn transport(&self) -> PluginTransport {
        PluginTransport::Http
    }

    /// Upper bound for a single execution, overriding the queue default
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Run the plugin against one request
    async fn execute(&self, request: &PluginRequest) -> Result<PluginOutput, PluginError>;
}
