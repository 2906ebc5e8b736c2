/*!
Change events observed on GitHub and the alerts built from them
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::config::WatchOptions;

/// What a notification is about, as classified by GitHub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum SubjectType {
    Issue,
    PullRequest,
    Release,
    Discussion,
    #[serde(other)]
    Other,
}

impl SubjectType {
    pub fn label(self) -> Option<&'static str> {
        match self {
            SubjectType::Issue => Some("Issue"),
            SubjectType::PullRequest => Some("Pull request"),
            SubjectType::Release => Some("Release"),
            SubjectType::Discussion => Some("Discussion"),
            SubjectType::Other => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationEvent {
    /// Opaque, unique per source
    pub id: String,
    pub repository_full_name: String,
    pub subject_title: String,
    pub subject_type: SubjectType,
    /// API URL of the subject; GitHub leaves it null for some subject kinds
    pub subject_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StarEvent {
    pub repository_full_name: String,
    pub starring_user: String,
    pub starred_at: DateTime<Utc>,
}

impl StarEvent {
    /// Stars carry no id of their own; identity is the (repository, user) pair.
    pub fn identity(&self) -> (&str, &str) {
        (&self.repository_full_name, &self.starring_user)
    }
}

/// Where a sink should deliver an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AlertRoute {
    /// A dedicated application credential configured by the user
    Delegate(String),
    /// The host instance this watcher belongs to
    Instance(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub title: String,
    pub body: String,
    pub priority: u8,
    pub deep_link: Option<String>,
    #[serde(skip)]
    pub route: AlertRoute,
}

impl Alert {
    pub fn for_notification(
        event: &NotificationEvent,
        options: &WatchOptions,
        route: &AlertRoute,
    ) -> Self {
        let label = event.subject_type.label();
        let title = match label {
            Some(label) if options.tag_subject_type => {
                format!("[{}] {}", label, event.subject_title)
            }
            _ => event.subject_title.clone(),
        };
        let body = match label {
            Some(label) => format!(
                "New {} activity in {}",
                label.to_lowercase(),
                event.repository_full_name
            ),
            None => format!("New notification in {}", event.repository_full_name),
        };

        Self {
            title,
            body,
            priority: options.priority,
            deep_link: event.subject_url.as_deref().map(web_url),
            route: route.clone(),
        }
    }

    pub fn for_star(event: &StarEvent, options: &WatchOptions, route: &AlertRoute) -> Self {
        Self {
            title: format!("New star on {}", event.repository_full_name),
            body: format!(
                "{} starred {}",
                event.starring_user, event.repository_full_name
            ),
            priority: options.priority,
            deep_link: Some(format!("https://github.com/{}", event.starring_user)),
            route: route.clone(),
        }
    }
}

/// Turn a REST subject URL into the page a person would open. URLs of any
/// other shape are returned unchanged.
pub fn web_url(api_url: &str) -> String {
    let Some(rest) = api_url.strip_prefix("https://api.github.com/repos/") else {
        return api_url.to_string();
    };

    let mut segments: Vec<&str> = rest.split('/').collect();
    // Release API ids have no web page of their own.
    if segments.len() >= 3 && segments[2] == "releases" {
        return format!("https://github.com/{}/{}", segments[0], segments[1]);
    }
    if segments.len() >= 4 {
        segments[2] = match segments[2] {
            "pulls" => "pull",
            "commits" => "commit",
            other => other,
        };
    }
    format!("https://github.com/{}", segments.join("/"))
}
