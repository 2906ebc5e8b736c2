/*!
Modular alert sinks
*/

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use crate::core::{
    config::{OutputConfig, OutputPlugin, TerminalFormat},
    event_system::{Alert, AlertRoute},
};
use crate::error::DispatchError;

/// Downstream receiver of alerts.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Name of the sink
    fn name(&self) -> &'static str;

    /// Deliver one alert. Failures are reported, never retried.
    async fn send_alert(&self, alert: &Alert) -> Result<(), DispatchError>;
}

/// Fans an alert out to every enabled sink.
pub struct SinkSet {
    sinks: Vec<Box<dyn MessageSink>>,
}

impl SinkSet {
    pub fn new(sinks: Vec<Box<dyn MessageSink>>) -> Self {
        Self { sinks }
    }

    pub fn from_configs(configs: &[OutputConfig]) -> Self {
        let mut sinks: Vec<Box<dyn MessageSink>> = Vec::new();

        for config in configs {
            if !config.enabled {
                continue;
            }

            let sink: Box<dyn MessageSink> = match &config.plugin {
                OutputPlugin::JsonLines { path } => Box::new(JsonLinesSink::new(path.clone())),
                OutputPlugin::Gotify { url, app_token } => {
                    Box::new(GotifySink::new(url.clone(), app_token.clone()))
                }
                OutputPlugin::Terminal { format } => Box::new(TerminalSink::new(*format)),
            };

            sinks.push(sink);
        }

        info!("Initialized alert output with {} sinks", sinks.len());
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl MessageSink for SinkSet {
    fn name(&self) -> &'static str {
        "SinkSet"
    }

    async fn send_alert(&self, alert: &Alert) -> Result<(), DispatchError> {
        let mut failed = 0;
        for sink in &self.sinks {
            if let Err(e) = sink.send_alert(alert).await {
                error!("Sink {} failed to deliver \"{}\": {}", sink.name(), alert.title, e);
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(DispatchError::Partial {
                failed,
                total: self.sinks.len(),
            });
        }
        Ok(())
    }
}

/// Appends one JSON object per alert to a file.
pub struct JsonLinesSink {
    file_path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(file_path: PathBuf) -> Self {
        Self { file_path }
    }
}

#[async_trait]
impl MessageSink for JsonLinesSink {
    fn name(&self) -> &'static str {
        "JSON"
    }

    async fn send_alert(&self, alert: &Alert) -> Result<(), DispatchError> {
        let mut line = serde_json::to_string(alert)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Posts alerts to a Gotify server.
pub struct GotifySink {
    url: String,
    default_app_token: Option<String>,
    client: reqwest::Client,
}

impl GotifySink {
    pub fn new(url: String, default_app_token: Option<String>) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            default_app_token,
            client: reqwest::Client::new(),
        }
    }

    fn app_token<'a>(&'a self, route: &'a AlertRoute) -> Result<&'a str, DispatchError> {
        match route {
            AlertRoute::Delegate(token) => Ok(token.as_str()),
            AlertRoute::Instance(id) => self.default_app_token.as_deref().ok_or_else(|| {
                DispatchError::Rejected(format!("no application token for instance {}", id))
            }),
        }
    }
}

#[async_trait]
impl MessageSink for GotifySink {
    fn name(&self) -> &'static str {
        "Gotify"
    }

    async fn send_alert(&self, alert: &Alert) -> Result<(), DispatchError> {
        let token = self.app_token(&alert.route)?;

        let mut payload = json!({
            "title": alert.title,
            "message": alert.body,
            "priority": alert.priority,
        });
        if let Some(link) = &alert.deep_link {
            payload["extras"] = json!({
                "client::notification": { "click": { "url": link } }
            });
        }

        let response = self
            .client
            .post(format!("{}/message", self.url))
            .header("X-Gotify-Key", token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DispatchError::Rejected(format!(
                "Gotify answered with status {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Terminal sink
pub struct TerminalSink {
    format: TerminalFormat,
}

impl TerminalSink {
    pub fn new(format: TerminalFormat) -> Self {
        Self { format }
    }

    fn format_alert(&self, alert: &Alert) -> String {
        let link = alert.deep_link.as_deref().unwrap_or("[no link]");
        match self.format {
            TerminalFormat::Plain => {
                format!("{}\n{}\n{}", alert.title, alert.body, link)
            }
            TerminalFormat::Colored => {
                format!(
                    "\x1b[33m🔔 {}\x1b[0m\n\
                     \x1b[36m📝\x1b[0m {}\n\
                     \x1b[36m🔗\x1b[0m {}",
                    alert.title, alert.body, link
                )
            }
            TerminalFormat::Json => serde_json::to_string_pretty(alert)
                .unwrap_or_else(|_| "JSON serialization failed".to_string()),
        }
    }
}

#[async_trait]
impl MessageSink for TerminalSink {
    fn name(&self) -> &'static str {
        "Terminal"
    }

    async fn send_alert(&self, alert: &Alert) -> Result<(), DispatchError> {
        println!("{}", self.format_alert(alert));
        println!();
        Ok(())
    }
}
