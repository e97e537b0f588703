use std::collections::BTreeSet;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::trace;

use crate::{Importance, Label};

/// Errors raised while loading or resolving the configuration
///
/// All of them are fatal: the process does not start with a configuration it
/// cannot act on.
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    Io(std::io::Error),

    /// The file is not valid YAML for the configuration schema
    Parse(serde_yaml::Error),

    /// A node declares neither a hostname nor an IP
    UnresolvedAddress { collector: usize, node: usize },

    /// The collector `type` does not name a known strategy
    UnknownCollector(String),

    /// A polling interval or timeout of zero
    InvalidInterval(String),

    /// Only the SQLite backend exists
    UnsupportedBackend(String),

    /// The HTTP bind address could not be resolved
    InvalidBindAddress(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "failed to read configuration: {}", err),
            ConfigError::Parse(err) => write!(f, "invalid configuration: {}", err),
            ConfigError::UnresolvedAddress { collector, node } => write!(
                f,
                "collector {} node {}: hostname and IP are empty, declare at least one of them",
                collector + 1,
                node + 1
            ),
            ConfigError::UnknownCollector(kind) => write!(f, "unsupported collector: {}", kind),
            ConfigError::InvalidInterval(msg) => write!(f, "invalid interval: {}", msg),
            ConfigError::UnsupportedBackend(backend) => {
                write!(f, "unsupported database backend: {}", backend)
            }
            ConfigError::InvalidBindAddress(msg) => write!(f, "invalid HTTP address: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Parse(err)
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub collectors: Vec<CollectorConfig>,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

impl Config {
    /// Every group declared by any service of any collector
    ///
    /// The health report always lists all of them, observed or not.
    pub fn groups(&self) -> BTreeSet<String> {
        self.collectors
            .iter()
            .flat_map(|collector| collector.nodes.iter())
            .flat_map(|node| node.services.iter())
            .filter(|service| !service.group.is_empty())
            .map(|service| service.group.clone())
            .collect()
    }

    /// Checks that do not depend on any collector being started
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.backend != "sqlite" {
            return Err(ConfigError::UnsupportedBackend(
                self.database.backend.clone(),
            ));
        }

        for (index, collector) in self.collectors.iter().enumerate() {
            if collector.interval.is_zero() {
                return Err(ConfigError::InvalidInterval(format!(
                    "collector {} polls with a zero interval",
                    index + 1
                )));
            }
            if collector.command_timeout.is_zero() {
                return Err(ConfigError::InvalidInterval(format!(
                    "collector {} has a zero command timeout",
                    index + 1
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CollectorConfig {
    /// Strategy name (`systemd` or `helper`)
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Upper bound for one remote command
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Remote executable invoked by the `helper` strategy
    #[serde(default = "default_helper_command")]
    pub helper_command: String,

    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

impl CollectorConfig {
    /// Resolve every node's address
    ///
    /// `index` is the collector's position in the configuration, used in the
    /// error message only.
    pub fn resolve_nodes(&self, index: usize) -> Result<Vec<ResolvedNode>, ConfigError> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(node_index, node)| {
                node.resolve().ok_or(ConfigError::UnresolvedAddress {
                    collector: index,
                    node: node_index,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub username: String,
    pub hostname: Option<String>,
    pub ip: Option<String>,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

impl NodeConfig {
    /// IP takes precedence over hostname; blank values count as absent
    pub fn address(&self) -> Option<&str> {
        [self.ip.as_deref(), self.hostname.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|addr| !addr.is_empty())
    }

    pub fn resolve(&self) -> Option<ResolvedNode> {
        let address = self.address()?.to_string();
        Some(ResolvedNode {
            username: self.username.clone(),
            address,
            services: self.services.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub suffix: Vec<String>,
}

impl ServiceConfig {
    /// Concrete unit names this service stands for
    ///
    /// `nginx` with ports `[80, 443]` becomes `nginx@80.service` and
    /// `nginx@443.service`; without ports or suffixes it is `nginx.service`.
    pub fn instance_names(&self) -> Vec<String> {
        let instances: Vec<String> = self
            .ports
            .iter()
            .map(ToString::to_string)
            .chain(self.suffix.iter().cloned())
            .map(|instance| format!("{}@{}.service", self.name, instance))
            .collect();

        if instances.is_empty() {
            vec![format!("{}.service", self.name)]
        } else {
            instances
        }
    }

    pub fn label(&self, hostname: &str) -> Label {
        Label::new(self.group.clone(), self.importance, hostname)
    }
}

/// A node whose connection target is known
#[derive(Debug, Clone)]
pub struct ResolvedNode {
    pub username: String,
    pub address: String,
    pub services: Vec<ServiceConfig>,
}

impl ResolvedNode {
    /// Remote target in `user@host` form
    pub fn destination(&self) -> String {
        if self.username.is_empty() {
            self.address.clone()
        } else {
            format!("{}@{}", self.username, self.address)
        }
    }

    /// Every expected unit name, in configuration order
    pub fn expected_units(&self) -> Vec<String> {
        self.services
            .iter()
            .flat_map(ServiceConfig::instance_names)
            .collect()
    }

    /// Label of the configured service owning `unit_name`, if any
    pub fn label_for(&self, unit_name: &str) -> Option<Label> {
        self.services
            .iter()
            .find(|service| {
                service
                    .instance_names()
                    .iter()
                    .any(|instance| instance == unit_name)
            })
            .map(|service| service.label(&self.address))
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct StoreConfig {
    /// Skip rows that repeat a steady `loaded/active/running` observation
    #[serde(default)]
    pub on_change: bool,

    #[serde(default, with = "humantime_serde")]
    pub retention: Option<Duration>,
}

impl StoreConfig {
    /// Configured retention, falling back to 24 hours when unset or zero
    pub fn retention(&self) -> Duration {
        self.retention
            .filter(|retention| !retention.is_zero())
            .unwrap_or(DEFAULT_RETENTION)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_host")]
    pub host: String,

    #[serde(default = "default_http_port")]
    pub port: u16,

    #[serde(default = "default_cors")]
    pub enable_cors: bool,
}

impl HttpConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| ConfigError::InvalidBindAddress(format!("{}: {}", self.host, e)))?
            .next()
            .ok_or_else(|| ConfigError::InvalidBindAddress(self.host.clone()))
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
            enable_cors: default_cors(),
        }
    }
}

const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_helper_command() -> String {
    String::from("unitwatch-client")
}

fn default_backend() -> String {
    String::from("sqlite")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./unitwatch.db")
}

fn default_http_host() -> String {
    String::from("127.0.0.1")
}

fn default_http_port() -> u16 {
    8080
}

fn default_cors() -> bool {
    true
}

pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

pub fn read_config_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content).inspect(|config| trace!("loaded config: {config:?}"))
}
