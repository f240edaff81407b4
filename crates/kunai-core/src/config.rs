use std::path::PathBuf;

use anyhow::Result;
use config::Config;
use serde::Deserialize;

use crate::types::{DkimAlgorithm, KeyLookupMethod};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub federation: FederationConfig,
    #[serde(default)]
    pub ischedule: IScheduleConfig,
    #[serde(default)]
    pub dkim: DkimConfig,
    #[serde(default)]
    pub imip: ImipConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub serve_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8698,
            serve_origin: None,
        }
    }
}

impl ServerConfig {
    /// ## Summary
    /// Returns the server address as a string in the format "host:port".
    #[must_use]
    pub fn serve_origin(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// ## Summary
    /// Returns the server origin URL.
    #[must_use]
    pub fn origin(&self) -> String {
        if let Some(origin) = &self.serve_origin {
            origin.clone()
        } else {
            self.serve_origin()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
        }
    }
}

/// How users of this deployment are spread over servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// A single server hosts every user.
    #[default]
    Standalone,
    /// Legacy partitioning: users split across partitions sharing one directory.
    Partitioned,
    /// Multi-pod federation: each pod is its own iSchedule peer.
    Pods,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Email domains whose users live in this deployment.
    pub local_email_domains: Vec<String>,
    /// Host names of this deployment's calendar-user URLs.
    pub local_http_domains: Vec<String>,
    /// Maximum number of free-busy recipients; 0 disables the limit.
    pub limit_freebusy_attendees: usize,
    pub uid_lock_timeout_seconds: u64,
    pub uid_lock_expiry_seconds: u64,
    pub accounting: AccountingConfig,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            local_email_domains: Vec::new(),
            local_http_domains: Vec::new(),
            limit_freebusy_attendees: 30,
            uid_lock_timeout_seconds: 60,
            uid_lock_expiry_seconds: 300,
            accounting: AccountingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AccountingConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    /// Principal UIDs to record; empty means every local organizer.
    pub principals: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FederationConfig {
    pub mode: DeploymentMode,
    /// XML description of the servers making up this deployment.
    pub servers_file: Option<PathBuf>,
    pub this_server_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IScheduleConfig {
    pub enabled: bool,
    /// XML registry of remote iSchedule servers.
    pub servers_file: Option<PathBuf>,
    /// Regular expressions for addresses delivered over iSchedule.
    pub address_patterns: Vec<String>,
    pub request_timeout_seconds: u64,
    /// Reject inbound requests without a DKIM signature.
    pub require_dkim: bool,
}

impl Default for IScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            servers_file: None,
            address_patterns: Vec::new(),
            request_timeout_seconds: 30,
            require_dkim: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DkimConfig {
    pub enabled: bool,
    pub domain: String,
    pub selector: String,
    pub private_key_file: Option<PathBuf>,
    pub algorithm: DkimAlgorithm,
    /// Value of the `q=` tag on outgoing signatures.
    pub sign_key_methods: Vec<KeyLookupMethod>,
    /// Verifier strategies, in the order they are tried.
    pub lookup_methods: Vec<KeyLookupMethod>,
    pub signature_expiration_seconds: u64,
    pub private_exchanges_dir: Option<PathBuf>,
    /// Lifetime of cached public keys; 0 keeps them until flushed.
    pub key_cache_ttl_seconds: u64,
    pub lookup_timeout_seconds: u64,
    /// Origin used for well-known key fetches instead of `https://{domain}`.
    pub http_key_origin: Option<String>,
}

impl Default for DkimConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            domain: String::new(),
            selector: "ischedule".to_string(),
            private_key_file: None,
            algorithm: DkimAlgorithm::RsaSha256,
            sign_key_methods: vec![KeyLookupMethod::DnsTxt],
            lookup_methods: KeyLookupMethod::DEFAULT_ORDER.to_vec(),
            signature_expiration_seconds: 3600,
            private_exchanges_dir: None,
            key_cache_ttl_seconds: 3600,
            lookup_timeout_seconds: 10,
            http_key_origin: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImipConfig {
    pub enabled: bool,
    /// The only host allowed to inject inbound iMIP replies.
    pub mail_gateway_host: String,
    pub address_patterns: Vec<String>,
    /// Endpoint of the outbound mail gateway.
    pub gateway_url: Option<String>,
}

impl Default for ImipConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mail_gateway_host: "localhost".to_string(),
            address_patterns: vec!["^mailto:.*".to_string()],
            gateway_url: None,
        }
    }
}

/// Principals known to the built-in directory.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DirectoryConfig {
    pub principals: Vec<PrincipalConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrincipalConfig {
    pub uid: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Calendar-user addresses, the first being the preferred one.
    pub addresses: Vec<String>,
    /// Server hosting this principal; absent means this server.
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub calendars_enabled: bool,
}

const fn enabled_by_default() -> bool {
    true
}

impl Settings {
    /// ## Summary
    /// Loads configuration from `.env` file and environment variables into a `Settings`.
    /// Environment variables take precedence over `.env` file values.
    ///
    /// ## Errors
    /// Returns an error if building the configuration or deserializing it fails.
    pub fn load() -> Result<Self> {
        Ok(Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8698)?
            .set_default("logging.level", "debug")?
            // Env file
            .add_source(
                config::Environment::default()
                    .convert_case(config::Case::Snake)
                    .separator("_")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            // TOML file
            .add_source(config::File::with_name("config.toml").required(false))
            .build()?
            .try_deserialize::<Settings>()?)
    }
}

/// ## Summary
/// Loads configuration from environment variables and `.env` file.
///
/// ## Errors
/// Returns an error if loading or deserializing the configuration fails.
pub fn load_config() -> Result<Settings> {
    dotenvy::dotenv().ok();

    Settings::load()
}
