use crate::{env_optional, env_parse_or_default, ConfigError, FromEnv};
use std::net::Ipv4Addr;

pub const DEFAULT_ADMIN_PORT: u16 = 8082;

/// Listener for the operator endpoints (health, metrics, dead letter admin)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminServerConfig {
    pub host: String,
    pub port: u16,
}

impl AdminServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromEnv for AdminServerConfig {
    /// - ADMIN_HOST, then HOST: defaults to 0.0.0.0
    /// - ADMIN_PORT, then PORT: defaults to 8082
    fn from_env() -> Result<Self, ConfigError> {
        let host = env_optional("ADMIN_HOST")
            .or_else(|| env_optional("HOST"))
            .unwrap_or_else(|| Ipv4Addr::UNSPECIFIED.to_string());

        let port_key = if env_optional("ADMIN_PORT").is_some() {
            "ADMIN_PORT"
        } else {
            "PORT"
        };
        let port = env_parse_or_default(port_key, DEFAULT_ADMIN_PORT)?;

        Ok(Self { host, port })
    }
}

impl Default for AdminServerConfig {
    fn default() -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED.to_string(), DEFAULT_ADMIN_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: [&str; 4] = ["ADMIN_HOST", "ADMIN_PORT", "HOST", "PORT"];

    fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let all: Vec<(&str, Option<&str>)> = KEYS
            .iter()
            .map(|key| {
                let value = vars.iter().find(|(k, _)| k == key).map(|(_, v)| *v);
                (*key, value)
            })
            .collect();
        temp_env::with_vars(all, f);
    }

    #[test]
    fn test_defaults() {
        with_env(&[], || {
            let config = AdminServerConfig::from_env().unwrap();
            assert_eq!(config.address(), "0.0.0.0:8082");
            assert_eq!(config, AdminServerConfig::default());
        });
    }

    #[test]
    fn test_admin_vars_take_precedence() {
        with_env(
            &[
                ("ADMIN_HOST", "127.0.0.1"),
                ("ADMIN_PORT", "9100"),
                ("HOST", "10.0.0.1"),
                ("PORT", "3000"),
            ],
            || {
                let config = AdminServerConfig::from_env().unwrap();
                assert_eq!(config.address(), "127.0.0.1:9100");
            },
        );
    }

    #[test]
    fn test_falls_back_to_generic_vars() {
        with_env(&[("HOST", "10.0.0.1"), ("PORT", "3000")], || {
            let config = AdminServerConfig::from_env().unwrap();
            assert_eq!(config.host, "10.0.0.1");
            assert_eq!(config.port, 3000);
        });
    }

    #[test]
    fn test_invalid_port_names_the_variable() {
        with_env(&[("ADMIN_PORT", "99999")], || {
            let err = AdminServerConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("ADMIN_PORT"));
        });

        with_env(&[("PORT", "not_a_number")], || {
            let err = AdminServerConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("PORT"));
        });
    }
}
