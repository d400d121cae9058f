//! Connection options.

use std::time::Duration;

use no_panic::no_panic;
use url::Url;

use crate::error::Error;

/// SSL connection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Don't use SSL
    Disable,
    /// Try SSL, fall back to unencrypted if not supported
    #[default]
    Prefer,
    /// Require SSL connection
    Require,
}

/// Connection options for the monitored PostgreSQL server.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Hostname or IP address.
    ///
    /// Default: `""`
    pub host: String,

    /// Port number for the PostgreSQL server.
    ///
    /// Default: `5432`
    pub port: u16,

    /// Unix socket path. Takes precedence over `host` when set.
    ///
    /// Default: `None`
    pub socket: Option<String>,

    /// Username for authentication.
    ///
    /// Default: `""`
    pub user: String,

    /// Database name to use. The user name is used when unset.
    ///
    /// Default: `None`
    pub database: Option<String>,

    /// Password for authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Application name to report to the server.
    ///
    /// Default: `None` (reports `pgvictoria`)
    pub application_name: Option<String>,

    /// SSL connection mode.
    ///
    /// Default: `SslMode::Prefer`
    pub ssl_mode: SslMode,

    /// Accept server certificates that fail verification.
    ///
    /// Default: `false`
    pub accept_invalid_certs: bool,

    /// Open a physical replication connection (`replication=1` in the startup packet).
    ///
    /// Default: `false`
    pub replication: bool,

    /// Overall deadline for one query exchange.
    ///
    /// With `None` an exchange waits until the response completes. A peer that closes
    /// the socket mid-exchange only yields empty reads, so the exchange keeps retrying
    /// until a [`CancelToken`](crate::sync::CancelToken) passed through
    /// [`ExchangeOptions`](crate::sync::ExchangeOptions) fires.
    ///
    /// Default: `None`
    pub query_timeout: Option<Duration>,
}

impl Default for Opts {
    #[no_panic]
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5432,
            socket: None,
            user: String::new(),
            database: None,
            password: None,
            application_name: None,
            ssl_mode: SslMode::Prefer,
            accept_invalid_certs: false,
            replication: false,
            query_timeout: None,
        }
    }
}

impl Opts {
    /// Database name sent in the startup packet.
    pub fn database_or_user(&self) -> &str {
        self.database.as_deref().unwrap_or(&self.user)
    }

    /// Application name sent in the startup packet.
    pub fn application_name_or_default(&self) -> &str {
        self.application_name
            .as_deref()
            .unwrap_or(crate::protocol::frontend::startup::APPLICATION_NAME)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value {
        "true" | "True" | "1" | "yes" | "on" => Ok(true),
        "false" | "False" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidUsage(format!("Invalid {}: {}", key, value))),
    }
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Parse a PostgreSQL connection URL.
    ///
    /// Format: `postgres://[user[:password]@]host[:port][/database][?param1=value1&param2=value2&..]`
    ///
    /// Supported query parameters:
    /// - `sslmode`: disable, prefer, require
    /// - `application_name`: application name
    /// - `replication`: true/True/1/yes/on or false/False/0/no/off
    /// - `query_timeout`: seconds (positive integer)
    /// - `accept_invalid_certs`: boolean
    /// - `host`: Unix socket directory or path when it starts with `/`
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !["postgres", "postgresql", "pg"].contains(&url.scheme()) {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'postgres://' or 'pg://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts {
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(5432),
            user: url.username().to_string(),
            password: url.password().map(|s| s.to_string()),
            database: url
                .path()
                .strip_prefix('/')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
            ..Opts::default()
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "sslmode" => {
                    opts.ssl_mode = match value.as_ref() {
                        "disable" => SslMode::Disable,
                        "prefer" => SslMode::Prefer,
                        "require" => SslMode::Require,
                        _ => {
                            return Err(Error::InvalidUsage(format!(
                                "Invalid sslmode: expected one of ['disable', 'prefer', 'require'], got {}",
                                value
                            )));
                        }
                    };
                }
                "application_name" => {
                    opts.application_name = Some(value.to_string());
                }
                "replication" => {
                    opts.replication = parse_bool("replication", &value)?;
                }
                "accept_invalid_certs" => {
                    opts.accept_invalid_certs = parse_bool("accept_invalid_certs", &value)?;
                }
                "query_timeout" => {
                    let secs: u64 = value
                        .parse()
                        .ok()
                        .filter(|s| *s > 0)
                        .ok_or_else(|| {
                            Error::InvalidUsage(format!("Invalid query_timeout: {}", value))
                        })?;
                    opts.query_timeout = Some(Duration::from_secs(secs));
                }
                "host" if value.starts_with('/') => {
                    opts.socket = Some(value.to_string());
                }
                _ => {
                    return Err(Error::InvalidUsage(format!(
                        "Unknown connection parameter: {}",
                        key
                    )));
                }
            }
        }

        Ok(opts)
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let url = Url::parse(s).map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
        Self::try_from(&url)
    }
}
