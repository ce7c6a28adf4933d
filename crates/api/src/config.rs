//! Application configuration

use std::env;
use std::time::Duration;

use sitecraft_shared::AdminEmails;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub cors_allowed_origins: Vec<String>,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_acquire_timeout: Duration,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub admin_emails: AdminEmails,

    // Feature flags
    pub enable_billing: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),
            database_acquire_timeout: Duration::from_secs(
                env::var("DATABASE_ACQUIRE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            ),

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            jwt_expiry_hours: env::var("JWT_EXPIRY_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24),
            admin_emails: AdminEmails::from_csv(&env::var("ADMIN_EMAILS").unwrap_or_default()),

            // Feature flags
            enable_billing: env::var("ENABLE_BILLING")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(true),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Config tests mutate shared env vars
    static CONFIG_TEST_MUTEX: Mutex<()> = Mutex::new(());

    fn setup_minimal_config() {
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var(
            "JWT_SECRET",
            "test-jwt-secret-must-be-at-least-32-characters-long",
        );
    }

    fn cleanup_config() {
        env::remove_var("DATABASE_URL");
        env::remove_var("JWT_SECRET");
        env::remove_var("ADMIN_EMAILS");
        env::remove_var("ENABLE_BILLING");
        env::remove_var("CORS_ALLOWED_ORIGINS");
    }

    #[test]
    fn test_required_variables() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();

        // === Missing database URL ===
        cleanup_config();
        env::set_var("JWT_SECRET", "test-jwt-secret-must-be-at-least-32-characters-long");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("DATABASE_URL"))
        ));

        // === Missing JWT secret ===
        cleanup_config();
        env::set_var("DATABASE_URL", "postgres://test");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("JWT_SECRET"))
        ));

        // === Short JWT secret ===
        env::set_var("JWT_SECRET", "too-short");
        assert!(matches!(Config::from_env(), Err(ConfigError::WeakSecret(_))));

        cleanup_config();
    }

    #[test]
    fn test_defaults_and_admin_emails() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        cleanup_config();
        setup_minimal_config();
        env::set_var("ADMIN_EMAILS", "Root@Example.com, ops@example.com");
        env::set_var("CORS_ALLOWED_ORIGINS", "https://app.example.com, ");

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.database_max_connections, 20);
        assert!(config.enable_billing);
        assert!(config.admin_emails.contains("root@example.com"));
        assert_eq!(config.admin_emails.len(), 2);
        assert_eq!(config.cors_allowed_origins, vec!["https://app.example.com"]);

        env::set_var("ENABLE_BILLING", "false");
        assert!(!Config::from_env().unwrap().enable_billing);

        cleanup_config();
    }
}
