//! Connection options.

use std::time::Duration;

use url::Url;

use crate::error::Error;

/// Character sets accepted for the `encoding` option.
const KNOWN_ENCODINGS: &[&str] = &[
    "utf8mb4", "utf8mb3", "utf8", "latin1", "latin2", "ascii", "binary", "ucs2", "utf16",
    "utf16le", "utf32", "cp1250", "cp1251", "cp1256", "cp1257", "cp850", "cp852", "cp866",
    "koi8r", "koi8u", "greek", "hebrew", "gbk", "gb2312", "gb18030", "big5", "sjis", "cp932",
    "ujis", "eucjpms", "euckr", "tis620", "swe7", "armscii8", "geostd8", "keybcs2", "macce",
    "macroman", "dec8", "hp8",
];

/// Connection options.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Hostname or IP address.
    ///
    /// Default: `""`
    pub host: String,

    /// Port number of the server.
    ///
    /// Default: `3306`
    pub port: u16,

    /// Unix socket path. Takes precedence over `host`/`port` when set.
    ///
    /// Default: `None`
    pub socket: Option<String>,

    /// Username for authentication.
    ///
    /// Default: `""`
    pub user: String,

    /// Password for authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Default database.
    ///
    /// Default: `None`
    pub database: Option<String>,

    /// Upper bound on establishing the session.
    ///
    /// Default: `Some(120s)`
    pub connect_timeout: Option<Duration>,

    /// Upper bound on each gated call after the session is up (query, prepare,
    /// execute, fetch, drain, ping).
    ///
    /// Default: `None`
    pub read_timeout: Option<Duration>,

    /// Connection character set.
    ///
    /// Default: `"utf8mb4"`
    pub encoding: String,

    /// Re-establish a lost session at the start of the next call.
    ///
    /// Default: `false`
    pub reconnect: bool,

    /// Close the session gracefully when the last owner goes away without an
    /// explicit close. When false the session is abandoned instead.
    ///
    /// Default: `true`
    pub automatic_close: bool,

    /// Additional driver-specific parameters.
    ///
    /// Default: `[]`
    pub params: Vec<(String, String)>,

    /// Maximum number of idle connections in the pool.
    ///
    /// Default: `100`
    pub pool_max_idle_conn: usize,

    /// Maximum number of concurrent connections (None = unlimited).
    ///
    /// Default: `None`
    pub pool_max_concurrency: Option<usize>,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 3306,
            socket: None,
            user: String::new(),
            password: None,
            database: None,
            connect_timeout: Some(Duration::from_secs(120)),
            read_timeout: None,
            encoding: String::from("utf8mb4"),
            reconnect: false,
            automatic_close: true,
            params: Vec::new(),
            pool_max_idle_conn: 100,
            pool_max_concurrency: None,
        }
    }
}

impl Opts {
    /// Check that option values are usable before connecting.
    pub fn validate(&self) -> Result<(), Error> {
        if self.socket.is_none() && self.host.is_empty() {
            return Err(Error::InvalidUsage("host is empty".into()));
        }
        if !is_known_encoding(&self.encoding) {
            return Err(Error::InvalidUsage(format!(
                "Unknown encoding: {}",
                self.encoding
            )));
        }
        if self.pool_max_concurrency == Some(0) {
            return Err(Error::InvalidUsage(
                "pool_max_concurrency must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn is_known_encoding(name: &str) -> bool {
    KNOWN_ENCODINGS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(name))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value {
        "true" | "True" | "1" | "yes" | "on" => Ok(true),
        "false" | "False" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidUsage(format!("Invalid {}: {}", key, value))),
    }
}

fn parse_seconds(key: &str, value: &str) -> Result<Option<Duration>, Error> {
    let secs: u64 = value
        .parse()
        .map_err(|_e| Error::InvalidUsage(format!("Invalid {}: {}", key, value)))?;
    // 0 disables the limit
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Parse a connection URL.
    ///
    /// Format: `mysql://[user[:password]@]host[:port][/database][?param1=value1&..]`
    ///
    /// Supported query parameters:
    /// - `socket`: unix socket path
    /// - `connect_timeout`, `read_timeout`: seconds, `0` disables
    /// - `encoding`: character set name
    /// - `reconnect`, `automatic_close`: true/True/1/yes/on or false/False/0/no/off
    /// - `pool_max_idle_conn`: maximum idle connections (positive integer)
    /// - `pool_max_concurrency`: maximum concurrent connections (positive integer)
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !["mysql", "mariadb"].contains(&url.scheme()) {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'mysql://' or 'mariadb://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts {
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(3306),
            user: url.username().to_string(),
            password: url.password().map(|s| s.to_string()),
            database: url.path().strip_prefix('/').and_then(|s| {
                if s.is_empty() {
                    None
                } else {
                    Some(s.to_string())
                }
            }),
            ..Opts::default()
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "socket" => opts.socket = Some(value.to_string()),
                "connect_timeout" => opts.connect_timeout = parse_seconds(&key, &value)?,
                "read_timeout" => opts.read_timeout = parse_seconds(&key, &value)?,
                "encoding" => {
                    if !is_known_encoding(&value) {
                        return Err(Error::InvalidUsage(format!("Unknown encoding: {}", value)));
                    }
                    opts.encoding = value.to_string();
                }
                "reconnect" => opts.reconnect = parse_bool(&key, &value)?,
                "automatic_close" => opts.automatic_close = parse_bool(&key, &value)?,
                "pool_max_idle_conn" => {
                    opts.pool_max_idle_conn = value.parse().map_err(|_e| {
                        Error::InvalidUsage(format!("Invalid pool_max_idle_conn: {}", value))
                    })?;
                }
                "pool_max_concurrency" => {
                    opts.pool_max_concurrency = Some(value.parse().map_err(|_e| {
                        Error::InvalidUsage(format!("Invalid pool_max_concurrency: {}", value))
                    })?);
                }
                _ => {
                    opts.params.push((key.to_string(), value.to_string()));
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
