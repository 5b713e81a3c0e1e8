use crate::{CrateDbError, Result};

/// Shape in which result rows are delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RowMode {
    /// Positional arrays aligned with `cols`.
    #[default]
    Array,
    /// Keyed mappings using `cols` as the key source.
    Object,
}

/// Decode policy for `BIGINT` columns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LongMode {
    /// Leave cells as the parser produced them. Integral lexemes still
    /// arrive as `Value::BigInt` with full 64-bit precision.
    #[default]
    Number,
    /// Enforce `Value::BigInt`, converting stray numeric lexemes via their
    /// string form and failing on fractional input.
    BigInt,
}

/// Decode policy for `TIMESTAMP` and `DATE` columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemporalMode {
    /// Leave the epoch-millisecond integer untouched.
    Number,
    /// Wrap the epoch-millisecond integer as `Value::Timestamp`.
    Date,
}

/// Per-type decode policies applied to result cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeserializationConfig {
    pub long: LongMode,
    pub timestamp: TemporalMode,
    pub date: TemporalMode,
}

impl Default for DeserializationConfig {
    fn default() -> Self {
        Self {
            long: LongMode::Number,
            timestamp: TemporalMode::Date,
            date: TemporalMode::Date,
        }
    }
}

/// Resolved client configuration. Read-only once constructed; per-call
/// options are overlays that never mutate it.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    pub user: String,
    pub password: String,
    /// Takes precedence over basic auth when set; sent as `Bearer`.
    pub jwt: Option<String>,
    pub host: String,
    pub port: u16,
    /// Sent as the `Default-Schema` request header when set.
    pub default_schema: Option<String>,
    pub ssl: bool,
    pub keep_alive: bool,
    pub max_connections: usize,
    pub deserialization: DeserializationConfig,
    pub row_mode: RowMode,
    pub enable_compression: bool,
    /// Minimum request body size, in bytes, before gzip kicks in.
    pub compression_threshold: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user: "crate".to_owned(),
            password: String::new(),
            jwt: None,
            host: "localhost".to_owned(),
            port: 4200,
            default_schema: None,
            ssl: false,
            keep_alive: true,
            max_connections: 20,
            deserialization: DeserializationConfig::default(),
            row_mode: RowMode::default(),
            enable_compression: true,
            compression_threshold: 1024,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub(crate) fn endpoint(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}/_sql?types", self.host, self.port)
    }
}

/// Layered configuration: defaults, then environment, then explicit fields,
/// then a connection string filling any field not explicitly set.
#[derive(Clone, Debug, Default)]
pub struct ClientConfigBuilder {
    user: Option<String>,
    password: Option<String>,
    jwt: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    default_schema: Option<String>,
    connection_string: Option<String>,
    ssl: Option<bool>,
    keep_alive: Option<bool>,
    max_connections: Option<usize>,
    deserialization: Option<DeserializationConfig>,
    row_mode: Option<RowMode>,
    enable_compression: Option<bool>,
    compression_threshold: Option<usize>,
}

impl ClientConfigBuilder {
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn jwt(mut self, jwt: impl Into<String>) -> Self {
        self.jwt = Some(jwt.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = Some(schema.into());
        self
    }

    /// URL-form connection string: `http(s)://user:password@host:port/`.
    /// The scheme selects SSL; fields not explicitly set are taken from it.
    pub fn connection_string(mut self, url: impl Into<String>) -> Self {
        self.connection_string = Some(url.into());
        self
    }

    pub fn ssl(mut self, ssl: bool) -> Self {
        self.ssl = Some(ssl);
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = Some(max_connections);
        self
    }

    pub fn deserialization(mut self, config: DeserializationConfig) -> Self {
        self.deserialization = Some(config);
        self
    }

    pub fn row_mode(mut self, row_mode: RowMode) -> Self {
        self.row_mode = Some(row_mode);
        self
    }

    pub fn enable_compression(mut self, enable: bool) -> Self {
        self.enable_compression = Some(enable);
        self
    }

    pub fn compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = Some(threshold);
        self
    }

    /// Resolves the final configuration against process environment
    /// variables (`USER`, `PASSWORD`, `HOST`, `PORT`, `DEFAULT_SCHEMA`).
    pub fn build(self) -> Result<ClientConfig> {
        self.build_with_env(|name| std::env::var(name).ok())
    }

    pub(crate) fn build_with_env(
        self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<ClientConfig> {
        let url = self
            .connection_string
            .as_deref()
            .map(ConnectionUrl::parse)
            .transpose()?;

        let defaults = ClientConfig::default();
        let url_field = |get: fn(&ConnectionUrl) -> Option<String>| {
            url.as_ref().and_then(get)
        };

        let port = match self.port {
            Some(port) => port,
            None => match url.as_ref().and_then(|u| u.port) {
                Some(port) => port,
                None => match env("PORT") {
                    Some(raw) => raw.parse::<u16>().map_err(|_| {
                        CrateDbError::Validation(format!("invalid PORT value '{raw}'"))
                    })?,
                    None => defaults.port,
                },
            },
        };

        Ok(ClientConfig {
            user: self
                .user
                .or_else(|| url_field(|u| u.user.clone()))
                .or_else(|| env("USER"))
                .unwrap_or(defaults.user),
            password: self
                .password
                .or_else(|| url_field(|u| u.password.clone()))
                .or_else(|| env("PASSWORD"))
                .unwrap_or(defaults.password),
            jwt: self.jwt,
            host: self
                .host
                .or_else(|| url_field(|u| Some(u.host.clone())))
                .or_else(|| env("HOST"))
                .unwrap_or(defaults.host),
            port,
            default_schema: self.default_schema.or_else(|| env("DEFAULT_SCHEMA")),
            ssl: self
                .ssl
                .or_else(|| url.as_ref().map(|u| u.ssl))
                .unwrap_or(defaults.ssl),
            keep_alive: self.keep_alive.unwrap_or(defaults.keep_alive),
            max_connections: self.max_connections.unwrap_or(defaults.max_connections),
            deserialization: self.deserialization.unwrap_or_default(),
            row_mode: self.row_mode.unwrap_or_default(),
            enable_compression: self
                .enable_compression
                .unwrap_or(defaults.enable_compression),
            compression_threshold: self
                .compression_threshold
                .unwrap_or(defaults.compression_threshold),
        })
    }
}

/// Parsed `http(s)://user:password@host:port/` connection string.
#[derive(Debug)]
struct ConnectionUrl {
    ssl: bool,
    user: Option<String>,
    password: Option<String>,
    host: String,
    port: Option<u16>,
}

impl ConnectionUrl {
    fn parse(url: &str) -> Result<Self> {
        let (ssl, rest) = if let Some(rest) = url.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("http://") {
            (false, rest)
        } else {
            return Err(CrateDbError::Validation(format!(
                "connection string must start with http:// or https://, got '{url}'"
            )));
        };

        let authority = rest.split('/').next().unwrap_or(rest);
        if authority.is_empty() {
            return Err(CrateDbError::Validation(
                "connection string is missing a host".to_owned(),
            ));
        }

        let (credentials, host_part) = match authority.rfind('@') {
            Some(at) => (Some(&authority[..at]), &authority[at + 1..]),
            None => (None, authority),
        };

        let (user, password) = match credentials {
            Some(credentials) => match credentials.find(':') {
                Some(colon) => (
                    Some(credentials[..colon].to_owned()),
                    Some(credentials[colon + 1..].to_owned()),
                ),
                None => (Some(credentials.to_owned()), None),
            },
            None => (None, None),
        };

        let (host, port) = match host_part.rfind(':') {
            Some(colon) => {
                let raw = &host_part[colon + 1..];
                let port = raw.parse::<u16>().map_err(|_| {
                    CrateDbError::Validation(format!("invalid port '{raw}' in connection string"))
                })?;
                (host_part[..colon].to_owned(), Some(port))
            }
            None => (host_part.to_owned(), None),
        };

        if host.is_empty() {
            return Err(CrateDbError::Validation(
                "connection string is missing a host".to_owned(),
            ));
        }

        Ok(Self {
            ssl,
            user,
            password,
            host,
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_apply_without_overrides() {
        let config = ClientConfig::builder()
            .build_with_env(no_env)
            .expect("must resolve");
        assert_eq!(config.user, "crate");
        assert_eq!(config.password, "");
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 4200);
        assert!(!config.ssl);
        assert!(config.keep_alive);
        assert_eq!(config.max_connections, 20);
        assert!(config.enable_compression);
        assert_eq!(config.compression_threshold, 1024);
        assert_eq!(config.row_mode, RowMode::Array);
    }

    #[test]
    fn environment_overrides_defaults() {
        let env = |name: &str| match name {
            "USER" => Some("alice".to_owned()),
            "PASSWORD" => Some("secret".to_owned()),
            "HOST" => Some("db.internal".to_owned()),
            "PORT" => Some("4300".to_owned()),
            "DEFAULT_SCHEMA" => Some("analytics".to_owned()),
            _ => None,
        };
        let config = ClientConfig::builder()
            .build_with_env(env)
            .expect("must resolve");
        assert_eq!(config.user, "alice");
        assert_eq!(config.password, "secret");
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 4300);
        assert_eq!(config.default_schema.as_deref(), Some("analytics"));
    }

    #[test]
    fn explicit_fields_override_environment() {
        let env = |name: &str| match name {
            "HOST" => Some("db.internal".to_owned()),
            _ => None,
        };
        let config = ClientConfig::builder()
            .host("explicit.example")
            .build_with_env(env)
            .expect("must resolve");
        assert_eq!(config.host, "explicit.example");
    }

    #[test]
    fn connection_string_fills_blanks_but_never_overrides_explicit() {
        let config = ClientConfig::builder()
            .connection_string("https://bob:pw@db.example:4500/")
            .user("explicit-user")
            .build_with_env(no_env)
            .expect("must resolve");
        assert_eq!(config.user, "explicit-user");
        assert_eq!(config.password, "pw");
        assert_eq!(config.host, "db.example");
        assert_eq!(config.port, 4500);
        assert!(config.ssl);
    }

    #[test]
    fn connection_string_wins_over_environment() {
        let env = |name: &str| match name {
            "HOST" => Some("env-host".to_owned()),
            _ => None,
        };
        let config = ClientConfig::builder()
            .connection_string("http://url-host:4201/")
            .build_with_env(env)
            .expect("must resolve");
        assert_eq!(config.host, "url-host");
        assert_eq!(config.port, 4201);
    }

    #[test]
    fn plain_host_url_without_credentials() {
        let config = ClientConfig::builder()
            .connection_string("http://db.example/")
            .build_with_env(no_env)
            .expect("must resolve");
        assert_eq!(config.host, "db.example");
        assert_eq!(config.port, 4200);
        assert_eq!(config.user, "crate");
    }

    #[test]
    fn invalid_scheme_is_rejected() {
        let err = ClientConfig::builder()
            .connection_string("postgres://db.example/")
            .build_with_env(no_env)
            .expect_err("must fail");
        assert!(matches!(err, CrateDbError::Validation(_)));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = ClientConfig::builder()
            .connection_string("http://db.example:notaport/")
            .build_with_env(no_env)
            .expect_err("must fail");
        assert!(matches!(err, CrateDbError::Validation(_)));
    }

    #[test]
    fn endpoint_reflects_ssl_flag() {
        let plain = ClientConfig::default();
        assert_eq!(plain.endpoint(), "http://localhost:4200/_sql?types");
        let tls = ClientConfig {
            ssl: true,
            ..ClientConfig::default()
        };
        assert_eq!(tls.endpoint(), "https://localhost:4200/_sql?types");
    }
}
