//! Plugin registry and identity hashing

use crate::error::RegistryError;
use crate::plugin::schema::{PluginCategory, PluginTransport};
use crate::plugin::Plugin;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Hash proving a cached identifier still refers to the live plugin instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct IdentityHash(String);

impl IdentityHash {
    fn derive(nonce: &Uuid, identifier: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(nonce.as_bytes());
        hasher.update(identifier.as_bytes());
        let digest = hasher.finalize();
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.0 == candidate
    }
}

impl std::fmt::Display for IdentityHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A plugin together with the metadata resolved when it was registered
pub struct RegisteredPlugin {
    identifier: String,
    category: PluginCategory,
    transport: PluginTransport,
    hash: IdentityHash,
    plugin: Arc<dyn Plugin>,
}

impl RegisteredPlugin {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn category(&self) -> PluginCategory {
        self.category
    }

    pub fn transport(&self) -> PluginTransport {
        self.transport
    }

    pub fn hash(&self) -> &IdentityHash {
        &self.hash
    }

    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }
}

impl std::fmt::Debug for RegisteredPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPlugin")
            .field("identifier", &self.identifier)
            .field("category", &self.category)
            .field("transport", &self.transport)
            .finish()
    }
}

/// Entry of the discovery listing served at `GET /plugins`
#[derive(Debug, Clone, Serialize)]
pub struct PluginListing {
    pub identifier: String,
    pub hash: IdentityHash,
    pub category: PluginCategory,
}

/// Fixed mapping from identifier to plugin instance.
///
/// Built mutably at startup, then shared read-only behind an `Arc`.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<RegisteredPlugin>>,
    index: HashMap<String, usize>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under `identifier`
    pub fn register(
        &mut self,
        identifier: impl Into<String>,
        plugin: Arc<dyn Plugin>,
    ) -> Result<&Arc<RegisteredPlugin>, RegistryError> {
        let identifier = identifier.into();
        if identifier.is_empty() || identifier.chars().any(char::is_whitespace) {
            return Err(RegistryError::InvalidIdentifier(identifier));
        }
        if self.index.contains_key(&identifier) {
            return Err(RegistryError::Duplicate(identifier));
        }

        let nonce = Uuid::new_v4();
        let registered = Arc::new(RegisteredPlugin {
            hash: IdentityHash::derive(&nonce, &identifier),
            category: plugin.category(),
            transport: plugin.transport(),
            identifier: identifier.clone(),
            plugin,
        });

        debug!(
            identifier = %identifier,
            category = %registered.category,
            "Registered plugin"
        );

        let slot = self.plugins.len();
        self.plugins.push(registered);
        self.index.insert(identifier, slot);
        Ok(&self.plugins[slot])
    }

    pub fn get(&self, identifier: &str) -> Option<&Arc<RegisteredPlugin>> {
        self.index.get(identifier).map(|&slot| &self.plugins[slot])
    }

    /// Current identity hash for `identifier`
    pub fn hash(&self, identifier: &str) -> Option<&IdentityHash> {
        self.get(identifier).map(|p| p.hash())
    }

    /// Identifiers in registration order
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.plugins.iter().map(|p| p.identifier())
    }

    /// Plugins that are reachable over HTTP
    pub fn http_plugins(&self) -> impl Iterator<Item = &Arc<RegisteredPlugin>> {
        self.plugins
            .iter()
            .filter(|p| p.transport() == PluginTransport::Http)
    }

    pub fn listing(&self) -> Vec<PluginListing> {
        self.http_plugins()
            .map(|p| PluginListing {
                identifier: p.identifier.clone(),
                hash: p.hash.clone(),
                category: p.category,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
