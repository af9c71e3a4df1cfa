//! Shared router state.

use std::sync::Arc;

use trove_api::{ApiContext, Services};
use trove_core::Registry;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub registry: Arc<Registry<ApiContext>>,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        let registry = Arc::new(trove_api::build_registry(&services.config));
        Self { services, registry }
    }

    /// A fresh method context for one request.
    pub fn context(&self, username: &str) -> ApiContext {
        ApiContext::new(self.services.clone(), username).with_registry(self.registry.clone())
    }
}
