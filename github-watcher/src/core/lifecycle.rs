/*!
Enable/disable state machine that owns the polling task
*/

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::{
    config::{DISPLAY_TEXT, RawConfig, WatchOptions, WatcherConfig, validate},
    event_system::AlertRoute,
    output_plugins::MessageSink,
    polling_engine::PollingEngine,
};
use crate::error::WatcherError;
use crate::github::ActivitySource;

/// Lifecycle of one watcher. Transitions strictly follow
/// `Disabled -> Enabling -> Enabled -> Disabling -> Disabled`. The one
/// extra edge, `Enabling -> Disabled`, rolls back an `enable` whose future
/// was dropped before its baseline completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Disabled,
    Enabling,
    Enabled,
    Disabling,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Disabled, Enabling)
                | (Enabling, Enabled)
                | (Enabled, Disabling)
                | (Disabling, Disabled)
                | (Enabling, Disabled)
        )
    }
}

/// Identity the host assigned to this watcher instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserContext {
    pub instance_id: u64,
}

/// Handles to the running polling task.
struct Session {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    config: watch::Sender<WatcherConfig>,
}

/// Starts and stops polling for one set of credentials.
///
/// The polling task owns all seen-state. [`ActivityWatcher::disable`] never
/// touches that state directly: it signals cancellation and joins the task.
pub struct ActivityWatcher {
    context: UserContext,
    source: Arc<dyn ActivitySource>,
    sink: Arc<dyn MessageSink>,
    options: WatchOptions,
    config: Option<WatcherConfig>,
    state: watch::Sender<LifecycleState>,
    session: Option<Session>,
}

impl ActivityWatcher {
    pub fn new(
        context: UserContext,
        source: Arc<dyn ActivitySource>,
        sink: Arc<dyn MessageSink>,
        options: WatchOptions,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Disabled);
        Self {
            context,
            source,
            sink,
            options,
            config: None,
            state,
            session: None,
        }
    }

    /// Settings template for hosts that persist configuration.
    pub fn default_config() -> RawConfig {
        RawConfig::default_template()
    }

    pub fn display(&self) -> &'static str {
        DISPLAY_TEXT
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn config(&self) -> Option<&WatcherConfig> {
        self.config.as_ref()
    }

    fn transition(&self, next: LifecycleState) {
        let current = self.state();
        debug_assert!(
            current.can_transition_to(next),
            "illegal lifecycle transition {:?} -> {:?}",
            current,
            next
        );
        self.state.send_replace(next);
        debug!("Watcher {}: {:?} -> {:?}", self.context.instance_id, current, next);
    }

    /// No session exists while `Enabling` only when an `enable` future was
    /// dropped mid-baseline.
    fn roll_back_abandoned_enable(&self) {
        if self.session.is_none() && self.state() == LifecycleState::Enabling {
            warn!(
                "Watcher {}: enable was abandoned before its baseline completed",
                self.context.instance_id
            );
            self.transition(LifecycleState::Disabled);
        }
    }

    /// Validate `raw`, record a baseline, and start polling.
    ///
    /// Blocks until the baseline has been recorded; the first tick fires one
    /// poll interval after this returns. Calling it while already enabled is a
    /// no-op once the config has validated; use
    /// [`ActivityWatcher::apply_config`] to change settings of a running
    /// watcher.
    pub async fn enable(&mut self, raw: &RawConfig) -> Result<(), WatcherError> {
        let config = validate(raw)?;
        if self.state() == LifecycleState::Enabled {
            debug!("Watcher {} already enabled", self.context.instance_id);
            return Ok(());
        }
        self.roll_back_abandoned_enable();

        self.transition(LifecycleState::Enabling);

        let route = match config.delegate_app_token() {
            Some(token) => {
                info!("Using custom application token");
                AlertRoute::Delegate(token.to_string())
            }
            None => {
                info!("Using default application with ID: {}", self.context.instance_id);
                AlertRoute::Instance(self.context.instance_id)
            }
        };

        let mut engine = PollingEngine::new(
            Arc::clone(&self.source),
            Arc::clone(&self.sink),
            self.options.clone(),
            route,
        );
        engine.baseline(&config).await;

        let (config_tx, config_rx) = watch::channel(config.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(engine.run(config_rx, cancel.clone()));

        self.config = Some(config);
        self.session = Some(Session {
            cancel,
            task,
            config: config_tx,
        });
        self.transition(LifecycleState::Enabled);
        info!("Watcher {} enabled", self.context.instance_id);
        Ok(())
    }

    /// Stop polling. Waits for an in-flight tick to finish; no alert is sent
    /// after this returns.
    pub async fn disable(&mut self) {
        let Some(session) = self.session.take() else {
            self.roll_back_abandoned_enable();
            return;
        };

        self.transition(LifecycleState::Disabling);
        session.cancel.cancel();
        if let Err(e) = session.task.await {
            error!("Polling task of watcher {} ended abnormally: {}", self.context.instance_id, e);
        }
        self.transition(LifecycleState::Disabled);
        info!("Watcher {} disabled", self.context.instance_id);
    }

    /// Validate and store new settings. A running task picks up the token and
    /// star setting on its next tick and restarts its clock if the interval
    /// changed. The alert route stays as chosen by `enable`.
    pub fn apply_config(&mut self, raw: &RawConfig) -> Result<(), WatcherError> {
        let config = validate(raw)?;
        if let Some(session) = &self.session {
            session.config.send_replace(config.clone());
        }
        self.config = Some(config);
        Ok(())
    }
}

impl Drop for ActivityWatcher {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.cancel.cancel();
        }
    }
}
