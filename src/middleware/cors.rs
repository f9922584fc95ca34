/*!
 * CORS (Cross-Origin Resource Sharing) Configuration
 *
 * Configures CORS headers so the clinic web UI can talk to this API.
 * Development allows the usual localhost dev servers; production
 * requires explicit origins via `CORS_ALLOWED_ORIGINS`.
 */

use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use std::time::Duration;
use tower_http::cors::CorsLayer;

/// CORS configuration builder
pub struct CorsConfig {
    /// Allowed origins (defaults to localhost for development)
    pub allowed_origins: Vec<String>,
    /// Maximum age for preflight cache
    pub max_age: Duration,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:5173".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            max_age: Duration::from_secs(3600),
        }
    }
}

impl CorsConfig {
    /// Build the CORS layer for Axum
    pub fn into_layer(self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE])
            .allow_credentials(true)
            .max_age(self.max_age)
    }
}

/// Build the CORS layer from the environment. `CORS_ALLOWED_ORIGINS` is
/// a comma-separated origin list; unset falls back to the development
/// defaults.
pub fn cors_from_env() -> CorsLayer {
    let config = match std::env::var("CORS_ALLOWED_ORIGINS") {
        Ok(origins) => CorsConfig {
            allowed_origins: origins
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            max_age: Duration::from_secs(600),
        },
        Err(_) => CorsConfig::default(),
    };
    config.into_layer()
}
