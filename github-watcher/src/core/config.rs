/*!
Configuration management for the watcher
*/

use std::fmt;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

/// Shown next to the settings form.
pub const DISPLAY_TEXT: &str =
    "Configure your GitHub token and polling interval below to receive notifications";

const DESCRIPTION: &str = "Enter your GitHub token, polling interval (in seconds), \
    optionally a Gotify application token to deliver alerts through a dedicated application, \
    and whether new repository stars should be watched";

pub const DEFAULT_POLL_INTERVAL_SECONDS: i64 = 60;

/// The settings payload as the host hands it over. Nothing here is trusted
/// until it has gone through [`validate`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawConfig {
    pub token: String,
    #[serde(deserialize_with = "lenient_seconds")]
    pub interval: i64,
    pub apptoken: String,
    pub watch_stars: bool,
    pub description: String,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            interval: DEFAULT_POLL_INTERVAL_SECONDS,
            apptoken: String::new(),
            watch_stars: false,
            description: DESCRIPTION.to_string(),
        }
    }
}

impl RawConfig {
    /// Template the host persists before the user has filled anything in.
    pub fn default_template() -> Self {
        Self::default()
    }

    /// Decode a loosely-typed host payload.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(|e| ConfigError::Malformed(e.to_string()))
    }
}

// JSON hosts frequently hand numbers over as floats.
fn lenient_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Whole(i64),
        Fractional(f64),
    }

    Ok(match Seconds::deserialize(deserializer)? {
        Seconds::Whole(s) => s,
        Seconds::Fractional(s) => s.trunc() as i64,
    })
}

/// Validated watcher settings. Only [`validate`] constructs one.
#[derive(Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    access_token: String,
    poll_interval_seconds: NonZeroU64,
    delegate_app_token: Option<String>,
    watch_stars: bool,
}

impl WatcherConfig {
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn poll_interval_seconds(&self) -> u64 {
        self.poll_interval_seconds.get()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.get())
    }

    pub fn delegate_app_token(&self) -> Option<&str> {
        self.delegate_app_token.as_deref()
    }

    pub fn watch_stars(&self) -> bool {
        self.watch_stars
    }
}

// Tokens stay out of logs.
impl fmt::Debug for WatcherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherConfig")
            .field("access_token", &"<redacted>")
            .field("poll_interval_seconds", &self.poll_interval_seconds)
            .field(
                "delegate_app_token",
                &self.delegate_app_token.as_ref().map(|_| "<redacted>"),
            )
            .field("watch_stars", &self.watch_stars)
            .finish()
    }
}

/// Validate and normalize a raw payload.
pub fn validate(raw: &RawConfig) -> Result<WatcherConfig, ConfigError> {
    let access_token = raw.token.trim();
    if access_token.is_empty() {
        return Err(ConfigError::MissingToken);
    }

    let poll_interval_seconds = u64::try_from(raw.interval)
        .ok()
        .and_then(NonZeroU64::new)
        .ok_or(ConfigError::NonPositiveInterval(raw.interval))?;

    let delegate_app_token = Some(raw.apptoken.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    Ok(WatcherConfig {
        access_token: access_token.to_string(),
        poll_interval_seconds,
        delegate_app_token,
        watch_stars: raw.watch_stars,
    })
}

/// Tuning knobs for the polling engine.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Priority attached to every alert
    pub priority: u8,
    /// Prefix notification titles with their subject type
    pub tag_subject_type: bool,
    /// Maximum identities remembered per kind; unbounded when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seen_capacity: Option<usize>,
    /// Stargazer requests in flight at once during a star check
    pub star_concurrency: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            priority: 2,
            tag_subject_type: true,
            seen_capacity: None,
            star_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GitHubSettings {
    pub api_base_url: String,
    pub request_timeout_seconds: u64,
    /// Upper bound on `Link: rel="next"` pages followed per collection
    pub max_pages: usize,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.github.com".to_string(),
            request_timeout_seconds: 30,
            max_pages: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Output plugin type
    pub plugin: OutputPlugin,
    /// Whether this output is enabled
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum OutputPlugin {
    JsonLines { path: PathBuf },
    Gotify {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_token: Option<String>,
    },
    Terminal { format: TerminalFormat },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum TerminalFormat {
    Plain,
    Colored,
    Json,
}

/// Everything the standalone binary reads from its TOML file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    pub watcher: RawConfig,
    pub github: GitHubSettings,
    pub engine: WatchOptions,
    pub outputs: Vec<OutputConfig>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            watcher: RawConfig::default_template(),
            github: GitHubSettings::default(),
            engine: WatchOptions::default(),
            outputs: vec![OutputConfig {
                plugin: OutputPlugin::Terminal {
                    format: TerminalFormat::Colored,
                },
                enabled: true,
            }],
        }
    }
}

impl FileConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("github-watcher")
            .join("config.toml")
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ConfigError::Unreadable {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Malformed(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Malformed(e.to_string()))
    }
}
