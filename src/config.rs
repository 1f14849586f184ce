//! Access log configuration and auto-detection.
//!
//! One external setting, `ACCESS_LOG_CONFIG`, names the access log file to load. Without it the
//! well-known file names in [`CONFIG_CANDIDATES`] are probed in order, and with none present a
//! single `tracing` appender in common format is used.
//!
//! A file names the capture flags and the appenders that receive each event:
//!
//! ```toml
//! capture_response_body = true
//!
//! [[appenders]]
//! kind = "logging"
//! format = "combined"
//!
//! [[appenders]]
//! kind = "queue"
//! name = "audit"
//! ```
//!
//! `queue` appenders push into the [`NamedEventQueues`] registry passed to
//! [`AccessLogFile::build_handler`], so the owner of the registry can drain them.

use figment::{
    providers::{Env, Format, Toml, Yaml},
    Figment,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{
    error::AccessLogError, logging_handler::LogFormat, queue::NamedEventQueues, AccessLogConfig,
    AccessLogLayer, LoggingHandler, MultiHandler,
};

/// File names probed by [`AccessLogSettings::resolve_config_path`], in priority order.
pub const CONFIG_CANDIDATES: [&str; 6] = [
    "access-log-test.toml",
    "access-log-test.yaml",
    "access-log-test.yml",
    "access-log.toml",
    "access-log.yaml",
    "access-log.yml",
];

/// External settings selecting the access log file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AccessLogSettings {
    /// Path of the file to load; when unset the well-known names are probed
    #[serde(default)]
    pub config: Option<PathBuf>,
}

impl AccessLogSettings {
    /// Reads `ACCESS_LOG_*` environment variables.
    pub fn from_env() -> Result<Self, AccessLogError> {
        Self::from_figment(Figment::new().merge(Env::prefixed("ACCESS_LOG_")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, AccessLogError> {
        Ok(figment.extract()?)
    }

    /// Resolves which file to load.
    ///
    /// An explicit path (relative paths are taken from `base_dir`) must exist. Otherwise the first
    /// existing [`CONFIG_CANDIDATES`] entry in `base_dir` wins, and `Ok(None)` means none exists.
    pub fn resolve_config_path(&self, base_dir: &Path) -> Result<Option<PathBuf>, AccessLogError> {
        if let Some(explicit) = &self.config {
            let path = base_dir.join(explicit);
            return if path.is_file() {
                Ok(Some(path))
            } else {
                Err(AccessLogError::ConfigNotFound(path))
            };
        }

        Ok(CONFIG_CANDIDATES
            .iter()
            .map(|name| base_dir.join(name))
            .find(|path| path.is_file()))
    }
}

/// One destination for events.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AppenderConfig {
    /// Log through `tracing`.
    Logging {
        #[serde(default)]
        format: LogFormat,
    },
    /// Push into the named queue of the supplied registry.
    Queue { name: String },
}

/// Contents of an access log file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessLogFile {
    #[serde(default)]
    pub capture_request_body: bool,
    #[serde(default)]
    pub capture_response_body: bool,
    #[serde(default = "default_appenders")]
    pub appenders: Vec<AppenderConfig>,
}

fn default_appenders() -> Vec<AppenderConfig> {
    vec![AppenderConfig::Logging {
        format: LogFormat::Common,
    }]
}

impl Default for AccessLogFile {
    fn default() -> Self {
        Self {
            capture_request_body: false,
            capture_response_body: false,
            appenders: default_appenders(),
        }
    }
}

impl AccessLogFile {
    /// Loads a TOML or YAML file, chosen by extension.
    pub fn load(path: &Path) -> Result<Self, AccessLogError> {
        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Figment::new().merge(Toml::file(path)),
            Some("yaml" | "yml") => Figment::new().merge(Yaml::file(path)),
            _ => return Err(AccessLogError::UnsupportedFormat(path.to_path_buf())),
        };
        Ok(figment.extract()?)
    }

    pub fn layer_config(&self) -> AccessLogConfig {
        AccessLogConfig {
            capture_request_body: self.capture_request_body,
            capture_response_body: self.capture_response_body,
        }
    }

    /// Builds one handler fanning out to every configured appender.
    pub fn build_handler(&self, queues: &NamedEventQueues) -> MultiHandler {
        self.appenders
            .iter()
            .fold(MultiHandler::new(), |handler, appender| match appender {
                AppenderConfig::Logging { format } => handler.with(LoggingHandler::new(*format)),
                AppenderConfig::Queue { name } => handler.with(queues.queue(name)),
            })
    }

    /// Builds the layer. Must be called inside a Tokio runtime.
    pub fn build_layer(&self, queues: &NamedEventQueues) -> AccessLogLayer {
        AccessLogLayer::new(self.layer_config(), self.build_handler(queues))
    }
}

/// Resolves, loads and wires the access log configuration in one step.
///
/// # Examples
///
/// ```rust,no_run
/// use access_event::config::{auto_configure, AccessLogSettings};
/// use access_event::queue::NamedEventQueues;
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), access_event::AccessLogError> {
/// let queues = NamedEventQueues::new();
/// let settings = AccessLogSettings::from_env()?;
/// let layer = auto_configure(&settings, Path::new("."), &queues)?;
/// # Ok(())
/// # }
/// ```
pub fn auto_configure(
    settings: &AccessLogSettings,
    base_dir: &Path,
    queues: &NamedEventQueues,
) -> Result<AccessLogLayer, AccessLogError> {
    let file = match settings.resolve_config_path(base_dir)? {
        Some(path) => {
            info!(path = %path.display(), "Loading access log configuration");
            AccessLogFile::load(&path)?
        }
        None => {
            debug!(base_dir = %base_dir.display(), "No access log configuration found, using defaults");
            AccessLogFile::default()
        }
    };
    Ok(file.build_layer(queues))
}
