//! Service registry: typed key→instance mapping frozen at bootstrap
//!
//! External collaborators (LLM clients, HTTP invokers, blob stores, key
//! stores) are registered once during bootstrap and looked up by handlers
//! through their well-known keys. The registry is immutable after
//! [`ServiceRegistryBuilder::build`]; there is deliberately no way to
//! register a service afterwards.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Well-known service keys used by the core
pub mod keys {
    pub const STATE_REPOSITORY: &str = "state_repository";
    pub const STATE_CACHE: &str = "state_cache";
    pub const EVENT_BUS: &str = "event_bus";
    pub const MESSAGE_ROUTER: &str = "message_router";
    pub const LLM_SERVICE: &str = "llm_service";
    pub const API_INVOKER: &str = "api_invoker";
    pub const API_KEY_SERVICE: &str = "api_key_service";
    pub const BLOB_STORE: &str = "blob_store";
    pub const FILESYSTEM_ADAPTER: &str = "filesystem_adapter";
    pub const TEMPLATE_RENDERER: &str = "template_renderer";
    pub const TEMPLATE_PROCESSOR: &str = "template_processor";
    pub const AST_PARSER: &str = "ast_parser";
    pub const IR_CACHE: &str = "ir_cache";
    pub const IR_BUILDER_REGISTRY: &str = "ir_builder_registry";
}

type Service = Arc<dyn Any + Send + Sync>;

/// Builder collecting services before the registry freezes
#[derive(Default)]
pub struct ServiceRegistryBuilder {
    services: HashMap<String, Service>,
}

impl ServiceRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service instance under a key. Re-registering a key
    /// replaces the earlier instance (feature flags may override defaults
    /// during bootstrap).
    pub fn register<T: Any + Send + Sync>(mut self, key: impl Into<String>, service: Arc<T>) -> Self {
        self.services.insert(key.into(), service);
        self
    }

    /// Freeze into an immutable registry
    pub fn build(self) -> Arc<ServiceRegistry> {
        Arc::new(ServiceRegistry {
            services: self.services,
        })
    }
}

/// Immutable post-bootstrap service registry
pub struct ServiceRegistry {
    services: HashMap<String, Service>,
}

impl ServiceRegistry {
    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::new()
    }

    /// Look up a service by key, downcasting to its concrete type
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.services
            .get(key)
            .and_then(|service| service.clone().downcast::<T>().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.services.contains_key(key)
    }

    /// Registered keys, for diagnostics
    pub fn keys(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }
}
