use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Problems with the process environment found at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    /// `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub auth_disabled: bool,
    pub session_cookie: String,
    pub bind_addr: SocketAddr,
    pub max_transaction_attempts: u32,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            jwt_secret: String::new(),
            auth_disabled: false,
            session_cookie: "session".to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            max_transaction_attempts: 5,
            log_dir: None,
        }
    }
}

impl Config {
    /// Load environment variables and apply defaults. Call `dotenvy::dotenv`
    /// first if a `.env` file should be honoured.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let auth_disabled = match var("AUTH_DISABLED") {
            None => false,
            Some(value) => parse_bool("AUTH_DISABLED", &value)?,
        };
        let jwt_secret = match var("JWT_SECRET") {
            Some(secret) => secret,
            None if auth_disabled => String::new(),
            None => return Err(ConfigError::Missing("JWT_SECRET")),
        };
        let bind_addr = match var("BIND_ADDR") {
            None => defaults.bind_addr,
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: "BIND_ADDR",
                value,
            })?,
        };
        let max_transaction_attempts = match var("MAX_TRANSACTION_ATTEMPTS") {
            None => defaults.max_transaction_attempts,
            Some(value) => match value.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "MAX_TRANSACTION_ATTEMPTS",
                        value,
                    })
                }
            },
        };

        Ok(Self {
            database_url: var("DATABASE_URL"),
            jwt_secret,
            auth_disabled,
            session_cookie: var("SESSION_COOKIE").unwrap_or(defaults.session_cookie),
            bind_addr,
            max_transaction_attempts,
            log_dir: var("LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.database_url, None);
        assert_eq!(config.session_cookie, "session");
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.max_transaction_attempts, 5);
        assert!(!config.auth_disabled);
    }

    #[test]
    fn secret_required_unless_auth_disabled() {
        assert!(matches!(load(&[]), Err(ConfigError::Missing("JWT_SECRET"))));
        let config = load(&[("AUTH_DISABLED", "true")]).unwrap();
        assert!(config.auth_disabled);
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(matches!(
            load(&[("JWT_SECRET", "x"), ("MAX_TRANSACTION_ATTEMPTS", "0")]),
            Err(ConfigError::Invalid { name: "MAX_TRANSACTION_ATTEMPTS", .. })
        ));
        assert!(matches!(
            load(&[("JWT_SECRET", "x"), ("BIND_ADDR", "localhost")]),
            Err(ConfigError::Invalid { name: "BIND_ADDR", .. })
        ));
        assert!(load(&[("AUTH_DISABLED", "maybe")]).is_err());
    }
}
