use std::{env, time::Duration};

use crate::error::ConfigError;

/// AppConfig
///
/// Holds the console server's entire configuration state. The struct is
/// immutable once loaded and is pulled into handlers via `FromRef`, the same
/// way the repository and cache are.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Runtime environment marker. Controls the development role bypass.
    pub env: Env,
    // Base URL of the university REST backend, without a trailing slash.
    pub backend_url: String,
    // Secret key used to validate incoming bearer tokens (HS256).
    pub jwt_secret: String,
    // Socket address the HTTP server binds to.
    pub bind_addr: String,
    // Locale segments recognised as a route prefix (e.g. "vi", "en").
    pub locales: Vec<String>,
    // Locale used for login redirects when the request path carries none.
    pub default_locale: String,
    // Page size used when a list request does not specify one.
    pub default_page_size: u32,
    // How long a cached list result stays fresh. `None` keeps results for
    // the lifetime of the process.
    pub query_stale_after: Option<Duration>,
}

/// Env
///
/// Runtime context. `Local` enables developer conveniences (role bypass
/// header, pretty logs); `Production` requires every secret to be set.
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

const LOCAL_JWT_SECRET: &str = "super-secure-test-secret-value-local";
const LOCAL_BACKEND_URL: &str = "http://localhost:8000/api";

impl Default for AppConfig {
    /// Safe, non-panicking configuration used for test scaffolding.
    fn default() -> Self {
        Self {
            env: Env::Local,
            backend_url: LOCAL_BACKEND_URL.to_string(),
            jwt_secret: LOCAL_JWT_SECRET.to_string(),
            bind_addr: "0.0.0.0:3000".to_string(),
            locales: vec!["vi".to_string(), "en".to_string()],
            default_locale: "vi".to_string(),
            default_page_size: 10,
            query_stale_after: None,
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from environment variables. Production fails
    /// fast when `BACKEND_URL` or `JWT_SECRET` is missing; local mode falls
    /// back to development defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let (backend_url, jwt_secret) = match env {
            Env::Production => (
                env::var("BACKEND_URL").map_err(|_| ConfigError::Missing("BACKEND_URL"))?,
                env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?,
            ),
            Env::Local => (
                env::var("BACKEND_URL").unwrap_or_else(|_| LOCAL_BACKEND_URL.to_string()),
                env::var("JWT_SECRET").unwrap_or_else(|_| LOCAL_JWT_SECRET.to_string()),
            ),
        };

        let locales: Vec<String> = env::var("LOCALES")
            .unwrap_or_else(|_| "vi,en".to_string())
            .split(',')
            .map(|locale| locale.trim().to_ascii_lowercase())
            .filter(|locale| !locale.is_empty())
            .collect();
        if locales.is_empty() {
            return Err(ConfigError::Invalid {
                var: "LOCALES",
                value: String::new(),
            });
        }

        let default_locale = env::var("DEFAULT_LOCALE").unwrap_or_else(|_| locales[0].clone());
        if !locales.contains(&default_locale) {
            return Err(ConfigError::Invalid {
                var: "DEFAULT_LOCALE",
                value: default_locale,
            });
        }

        let default_page_size = match env::var("DEFAULT_PAGE_SIZE") {
            Ok(raw) => match raw.parse::<u32>() {
                Ok(size) if size > 0 => size,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "DEFAULT_PAGE_SIZE",
                        value: raw,
                    });
                }
            },
            Err(_) => 10,
        };

        let query_stale_after = match env::var("QUERY_STALE_SECS") {
            Ok(raw) => Some(Duration::from_secs(raw.parse::<u64>().map_err(|_| {
                ConfigError::Invalid {
                    var: "QUERY_STALE_SECS",
                    value: raw.clone(),
                }
            })?)),
            Err(_) => None,
        };

        Ok(Self {
            env,
            backend_url: backend_url.trim_end_matches('/').to_string(),
            jwt_secret,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            locales,
            default_locale,
            default_page_size,
            query_stale_after,
        })
    }
}
