/*!
Watch a GitHub account for new notifications and repository stars and forward
each new one to an alert sink exactly once per enabled session.
*/

pub mod core;
pub mod error;
pub mod github;

pub use crate::core::config::{RawConfig, WatchOptions, WatcherConfig, validate};
pub use crate::core::event_system::{Alert, AlertRoute, NotificationEvent, StarEvent, SubjectType};
pub use crate::core::lifecycle::{ActivityWatcher, LifecycleState, UserContext};
pub use crate::core::output_plugins::MessageSink;
pub use crate::core::polling_engine::{PollingEngine, TickReport};
pub use crate::error::{ConfigError, DispatchError, SourceError, WatcherError};
pub use crate::github::{ActivitySource, GitHubClient};
