//! Client configuration
//!
//! `ClientConfig` carries sensible defaults and can be read from the
//! environment. With the `cli` feature, `ClientArgs` exposes the same
//! settings as clap arguments bound to the same environment variables.

use std::path::PathBuf;
use std::str::FromStr;

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Default number of requests per page
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Reserved email of the shared guest account
pub const DEFAULT_GUEST_EMAIL: &str = "guest@example.com";

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the request API
    pub base_url: String,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Fixed page size for the request collection
    pub page_size: u32,
    /// Email that identifies the guest account
    pub guest_email: String,
    /// Where the session is persisted between runs (None keeps it in memory)
    pub session_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            page_size: DEFAULT_PAGE_SIZE,
            guest_email: DEFAULT_GUEST_EMAIL.to_string(),
            session_file: None,
        }
    }
}

impl ClientConfig {
    /// Build a configuration from `REQUEST_DESK_*` environment variables.
    ///
    /// Unset variables keep their defaults; unparseable numbers are logged
    /// and ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("REQUEST_DESK_BASE_URL").unwrap_or(defaults.base_url),
            timeout_secs: env_number("REQUEST_DESK_TIMEOUT_SECS", defaults.timeout_secs),
            page_size: env_number("REQUEST_DESK_PAGE_SIZE", defaults.page_size),
            guest_email: std::env::var("REQUEST_DESK_GUEST_EMAIL").unwrap_or(defaults.guest_email),
            session_file: std::env::var_os("REQUEST_DESK_SESSION_FILE").map(PathBuf::from),
        }
    }

    /// Base URL without a trailing slash
    pub fn api_root(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Page size, never zero
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.max(1)
    }
}

fn env_number<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Ignoring unparseable {}={:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

/// Command-line flavour of [`ClientConfig`]
#[cfg(feature = "cli")]
#[derive(clap::Args, Debug, Clone)]
pub struct ClientArgs {
    /// Base URL of the request API
    #[arg(long, env = "REQUEST_DESK_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Request timeout in seconds
    #[arg(long, env = "REQUEST_DESK_TIMEOUT_SECS", default_value = "30")]
    pub timeout_secs: u64,

    /// Requests per page
    #[arg(long, env = "REQUEST_DESK_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: u32,

    /// Email of the shared guest account
    #[arg(long, env = "REQUEST_DESK_GUEST_EMAIL", default_value = DEFAULT_GUEST_EMAIL)]
    pub guest_email: String,

    /// File the session is persisted to between invocations
    #[arg(long, env = "REQUEST_DESK_SESSION_FILE", default_value = ".request-desk-session.json")]
    pub session_file: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: String,
}

#[cfg(feature = "cli")]
impl From<ClientArgs> for ClientConfig {
    fn from(args: ClientArgs) -> Self {
        Self {
            base_url: args.base_url,
            timeout_secs: args.timeout_secs,
            page_size: args.page_size,
            guest_email: args.guest_email,
            session_file: Some(args.session_file),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:3000");
        assert_eq!(config.page_size, 10);
        assert_eq!(config.guest_email, "guest@example.com");
        assert!(config.session_file.is_none());
    }

    #[test]
    fn test_api_root_and_page_size_guards() {
        let config = ClientConfig {
            base_url: "https://api.example.com/".into(),
            page_size: 0,
            ..Default::default()
        };
        assert_eq!(config.api_root(), "https://api.example.com");
        assert_eq!(config.effective_page_size(), 1);
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_client_args_into_config() {
        use clap::Parser;

        #[derive(Parser)]
        struct Cli {
            #[command(flatten)]
            client: ClientArgs,
        }

        let cli = Cli::parse_from([
            "request-desk",
            "--base-url",
            "https://api.example.com",
            "--page-size",
            "5",
            "--session-file",
            "/tmp/session.json",
        ]);
        let config = ClientConfig::from(cli.client);
        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.page_size, 5);
        assert_eq!(config.session_file, Some(PathBuf::from("/tmp/session.json")));
    }
}
