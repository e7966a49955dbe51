//! Middleware chain execution logic
//!
//! Middlewares post-process a plugin's raw output. Each one subscribes to a set
//! of plugin categories; for a given category the subscribed middlewares run
//! sequentially in registration order, each receiving the previous output.

use crate::plugin::schema::{
    ElapsedTimes, PluginCategory, PluginError, PluginOutput, PluginResponse,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-request state a middleware may read or update
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    pub request_id: Uuid,
    pub identifier: String,
    pub category: PluginCategory,
    pub elapsed_times: ElapsedTimes,
}

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this middleware also processes responses the plugin formed
    /// itself (`PluginOutput::Message`)
    fn can_handle_message(&self) -> bool;

    /// Categories this middleware is applied to
    fn subscriptions(&self) -> &[PluginCategory];

    async fn process(
        &self,
        response: PluginResponse,
        ctx: &mut MiddlewareContext,
    ) -> Result<PluginResponse, PluginError>;
}

/// Ordered set of middlewares, indexed by category at registration time
#[derive(Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
    by_category: HashMap<PluginCategory, Vec<usize>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware; it runs after every middleware registered before it
    pub fn register(&mut self, middleware: Arc<dyn Middleware>) {
        let slot = self.middlewares.len();
        for category in middleware.subscriptions() {
            let slots = self.by_category.entry(*category).or_default();
            if !slots.contains(&slot) {
                slots.push(slot);
            }
        }
        debug!(
            middleware = middleware.name(),
            subscriptions = ?middleware.subscriptions(),
            "Registered middleware"
        );
        self.middlewares.push(middleware);
    }

    /// Middlewares that apply to `category`, in execution order
    pub fn build(&self, category: PluginCategory) -> Vec<&Arc<dyn Middleware>> {
        self.by_category
            .get(&category)
            .map(|slots| slots.iter().map(|&slot| &self.middlewares[slot]).collect())
            .unwrap_or_default()
    }

    /// Turn a plugin's raw output into the final response
    pub async fn apply(
        &self,
        output: PluginOutput,
        ctx: &mut MiddlewareContext,
    ) -> Result<PluginResponse, PluginError> {
        let is_message = output.is_message();
        let mut response = output.into_response();

        for middleware in self.build(ctx.category) {
            if is_message && !middleware.can_handle_message() {
                debug!(
                    middleware = middleware.name(),
                    request_id = %ctx.request_id,
                    "Skipping middleware for plugin-formed message"
                );
                continue;
            }

            response = middleware.process(response, ctx).await.map_err(|e| {
                warn!(
                    middleware = middleware.name(),
                    request_id = %ctx.request_id,
                    error = %e,
                    "Middleware failed"
                );
                match e {
                    PluginError::Middleware { .. } => e,
                    other => PluginError::Middleware {
                        name: middleware.name().to_string(),
                        reason: other.to_string(),
                    },
                }
            })?;
        }

        Ok(response)
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Appends its tag to `data.trail`
    struct TagMiddleware {
        tag: &'static str,
        subscriptions: Vec<PluginCategory>,
        handles_messages: bool,
        calls: AtomicUsize,
    }

    impl TagMiddleware {
        fn new(tag: &'static str, subscriptions: Vec<PluginCategory>) -> Arc<Self> {
            Arc::new(Self {
                tag,
                subscriptions,
                handles_messages: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Middleware for TagMiddleware {
        fn name(&self) -> &str {
            self.tag
        }

        fn can_handle_message(&self) -> bool {
            self.handles_messages
        }

        fn subscriptions(&self) -> &[PluginCategory] {
            &self.subscriptions
        }

        async fn process(
            &self,
            mut response: PluginResponse,
            _ctx: &mut MiddlewareContext,
        ) -> Result<PluginResponse, PluginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut trail = response.data["trail"].as_str().unwrap_or("").to_string();
            trail.push_str(self.tag);
            response.insert_data("trail", json!(trail));
            Ok(response)
        }
    }

    struct FailingMiddleware;

    #[async_trait]
    impl Middleware for FailingMiddleware {
        fn name(&self) -> &str {
            "failing"
        }

        fn can_handle_message(&self) -> bool {
            true
        }

        fn subscriptions(&self) -> &[PluginCategory] {
            &[PluginCategory::Fields]
        }

        async fn process(
            &self,
            _response: PluginResponse,
            _ctx: &mut MiddlewareContext,
        ) -> Result<PluginResponse, PluginError> {
            Err(anyhow::anyhow!("broken").into())
        }
    }

    fn context(category: PluginCategory) -> MiddlewareContext {
        MiddlewareContext {
            request_id: Uuid::new_v4(),
            identifier: "test".to_string(),
            category,
            elapsed_times: ElapsedTimes::new(),
        }
    }

    #[tokio::test]
    async fn test_empty_chain_wraps_data() {
        let chain = MiddlewareChain::new();
        let mut ctx = context(PluginCategory::Fields);

        let response = chain
            .apply(PluginOutput::Data(json!({"text": "hi"})), &mut ctx)
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.data, json!({"text": "hi"}));
    }

    #[tokio::test]
    async fn test_chain_ordering() {
        let mut chain = MiddlewareChain::new();
        chain.register(TagMiddleware::new("a", vec![PluginCategory::Fields]));
        chain.register(TagMiddleware::new("b", vec![PluginCategory::Fields]));
        chain.register(TagMiddleware::new("c", vec![PluginCategory::Fields]));

        let mut ctx = context(PluginCategory::Fields);
        let response = chain
            .apply(PluginOutput::Data(Value::Null), &mut ctx)
            .await
            .unwrap();
        assert_eq!(response.data["trail"], "abc");
    }

    #[tokio::test]
    async fn test_category_filtering() {
        let fields_only = TagMiddleware::new("f", vec![PluginCategory::Fields]);
        let qa_only = TagMiddleware::new("q", vec![PluginCategory::Qa]);

        let mut chain = MiddlewareChain::new();
        chain.register(fields_only.clone());
        chain.register(qa_only.clone());

        let mut ctx = context(PluginCategory::Qa);
        let response = chain
            .apply(PluginOutput::Data(Value::Null), &mut ctx)
            .await
            .unwrap();

        assert_eq!(response.data["trail"], "q");
        assert_eq!(fields_only.calls.load(Ordering::SeqCst), 0);
        assert_eq!(qa_only.calls.load(Ordering::SeqCst), 1);
        assert!(chain.build(PluginCategory::Markdown).is_empty());
    }

    #[tokio::test]
    async fn test_messages_skip_non_message_middlewares() {
        let mut chain = MiddlewareChain::new();
        chain.register(Arc::new(TagMiddleware {
            tag: "skip",
            subscriptions: vec![PluginCategory::Fields],
            handles_messages: false,
            calls: AtomicUsize::new(0),
        }));
        chain.register(TagMiddleware::new("keep", vec![PluginCategory::Fields]));

        let mut ctx = context(PluginCategory::Fields);
        let output = PluginOutput::Message(PluginResponse::failure("refused"));
        let response = chain.apply(output, &mut ctx).await.unwrap();

        assert!(!response.success);
        assert_eq!(response.data["trail"], "keep");
    }

    #[tokio::test]
    async fn test_middleware_failure_is_named() {
        let mut chain = MiddlewareChain::new();
        chain.register(Arc::new(FailingMiddleware));

        let mut ctx = context(PluginCategory::Fields);
        let err = chain
            .apply(PluginOutput::Data(Value::Null), &mut ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failing"));
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_duplicate_subscriptions_registered_once() {
        let mut chain = MiddlewareChain::new();
        chain.register(TagMiddleware::new(
            "a",
            vec![PluginCategory::Fields, PluginCategory::Fields],
        ));
        assert_eq!(chain.build(PluginCategory::Fields).len(), 1);
        assert_eq!(chain.len(), 1);
    }
}
