use std::sync::Arc;

use axum::http::HeaderValue;
use lib_common::registry::RegistryService;

/// Shared, read-only handler state. Cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RegistryService>,
    pub cors_origin: HeaderValue,
}

impl AppState {
    pub fn new(service: RegistryService, cors_origin: &str) -> anyhow::Result<Self> {
        let cors_origin = HeaderValue::from_str(cors_origin)
            .map_err(|e| anyhow::anyhow!("invalid CORS origin '{}': {}", cors_origin, e))?;
        Ok(Self {
            service: Arc::new(service),
            cors_origin,
        })
    }
}
