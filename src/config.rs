use std::fmt;

pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_PLATFORM_URL: &str = "http://localhost:9090";
pub const DEFAULT_BASE_IMAGE: &str = "agent-sandbox/opencode:latest";
pub const DEFAULT_MAX_READ_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub sentry_dsn: Option<String>,
    pub environment: String,
    /// Bearer secret for the HTTP API. `None` leaves the API open.
    pub api_secret: Option<String>,
    pub platform_url: String,
    pub platform_token: Option<String>,
    pub base_image: String,
    pub max_read_bytes: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("sentry_dsn", &self.sentry_dsn)
            .field("environment", &self.environment)
            .field("api_secret", &redact(&self.api_secret))
            .field("platform_url", &self.platform_url)
            .field("platform_token", &redact(&self.platform_token))
            .field("base_image", &self.base_image)
            .field("max_read_bytes", &self.max_read_bytes)
            .finish()
    }
}

/// Unparsed environment values, one per setting.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawConfig<'a> {
    pub port: Option<&'a str>,
    pub sentry_dsn: Option<&'a str>,
    pub environment: Option<&'a str>,
    pub api_secret: Option<&'a str>,
    pub platform_url: Option<&'a str>,
    pub platform_token: Option<&'a str>,
    pub base_image: Option<&'a str>,
    pub max_read_bytes: Option<&'a str>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(String::from)
}

impl Config {
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok();
        let port = var("PORT");
        let sentry_dsn = var("SENTRY_DSN");
        let environment = var("ENVIRONMENT");
        let api_secret = var("SANDBOX_API_SECRET");
        let platform_url = var("SANDBOX_PLATFORM_URL");
        let platform_token = var("SANDBOX_PLATFORM_TOKEN");
        let base_image = var("SANDBOX_BASE_IMAGE");
        let max_read_bytes = var("SANDBOX_MAX_READ_BYTES");

        Self::from_raw_values(RawConfig {
            port: port.as_deref(),
            sentry_dsn: sentry_dsn.as_deref(),
            environment: environment.as_deref(),
            api_secret: api_secret.as_deref(),
            platform_url: platform_url.as_deref(),
            platform_token: platform_token.as_deref(),
            base_image: base_image.as_deref(),
            max_read_bytes: max_read_bytes.as_deref(),
        })
    }

    pub fn from_raw_values(raw: RawConfig<'_>) -> Self {
        let port = raw
            .port
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let max_read_bytes = raw
            .max_read_bytes
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_READ_BYTES);

        Config {
            port,
            sentry_dsn: non_empty(raw.sentry_dsn),
            environment: non_empty(raw.environment).unwrap_or_else(|| "local".to_string()),
            api_secret: non_empty(raw.api_secret),
            platform_url: non_empty(raw.platform_url)
                .unwrap_or_else(|| DEFAULT_PLATFORM_URL.to_string()),
            platform_token: non_empty(raw.platform_token),
            base_image: non_empty(raw.base_image)
                .unwrap_or_else(|| DEFAULT_BASE_IMAGE.to_string()),
            max_read_bytes,
        }
    }
}
