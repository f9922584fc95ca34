/*!
 * Configuration Module
 *
 * Handles application configuration loading from environment variables
 * and provides structured access to configuration values.
 */

use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Auth token configuration
    pub auth: AuthConfig,
    /// Base URL of the patient-facing LIFF frontend
    pub frontend_url: String,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server host address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
    /// Environment (development, production)
    pub environment: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    pub min_connections: u32,
    /// Connection acquire timeout
    pub acquire_timeout: Duration,
    /// Idle connection timeout
    pub idle_timeout: Duration,
    /// Maximum connection lifetime
    pub max_lifetime: Duration,
}

impl DatabaseConfig {
    /// Open the connection pool and verify the database answers. Pool
    /// sizing matters here: every booking holds a transaction with row
    /// locks for its conflict re-check, so the pool must stay ahead of
    /// the clinic UIs' burst traffic while `acquire_timeout` bounds how
    /// long a request waits for a free connection.
    pub async fn connect(&self) -> Result<sqlx::PgPool, sqlx::Error> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .min_connections(self.min_connections)
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(self.idle_timeout)
            .max_lifetime(self.max_lifetime)
            .connect(&self.url)
            .await?;

        // One round-trip up front so a bad URL fails at startup, not on
        // the first booking.
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(pool)
    }
}

/// Auth token configuration. Tokens are issued by the external identity
/// layer; this service only verifies them.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC secret shared with the token issuer
    pub secret: String,
}

impl Config {
    /// Load configuration from environment variables (and .env in
    /// development)
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let server = ServerConfig {
            host: env_or("SERVER_HOST", "0.0.0.0"),
            port: env_or("SERVER_PORT", "8000").parse()?,
            environment: env_or("ENVIRONMENT", "development"),
        };

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", "20").parse()?,
            min_connections: env_or("DATABASE_MIN_CONNECTIONS", "2").parse()?,
            acquire_timeout: Duration::from_secs(env_or("DATABASE_ACQUIRE_TIMEOUT", "30").parse()?),
            idle_timeout: Duration::from_secs(env_or("DATABASE_IDLE_TIMEOUT", "600").parse()?),
            max_lifetime: Duration::from_secs(env_or("DATABASE_MAX_LIFETIME", "1800").parse()?),
        };

        let auth = AuthConfig {
            secret: std::env::var("AUTH_TOKEN_SECRET")
                .map_err(|_| anyhow::anyhow!("AUTH_TOKEN_SECRET must be set"))?,
        };

        let frontend_url = env_or("FRONTEND_URL", "http://localhost:5173");

        Ok(Self {
            server,
            database,
            auth,
            frontend_url,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_default() {
        assert_eq!(env_or("DEFINITELY_NOT_SET_12345", "fallback"), "fallback");
    }
}
