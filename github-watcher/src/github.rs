/*!
GitHub REST reader
Performs the three read-only calls the watcher needs and turns the payloads into events.
*/

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use reqwest::header::{ACCEPT, HeaderMap, LINK};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::core::config::GitHubSettings;
use crate::core::event_system::{NotificationEvent, StarEvent, SubjectType};
use crate::error::SourceError;

const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
/// Stargazer listings only include `starred_at` with this media type.
const STAR_MEDIA_TYPE: &str = "application/vnd.github.star+json";
const API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: u32 = 100;

/// Remote reads the watcher depends on. Each call is independent: a failure
/// affects only the resource it was reading.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    async fn fetch_notifications(&self, token: &str)
    -> Result<Vec<NotificationEvent>, SourceError>;

    /// Full names (`owner/name`) of the repositories owned by the token's user.
    async fn fetch_repositories(&self, token: &str) -> Result<Vec<String>, SourceError>;

    async fn fetch_stargazers(
        &self,
        token: &str,
        repository: &str,
    ) -> Result<Vec<StarEvent>, SourceError>;
}

#[derive(Debug, Deserialize)]
struct WireNotification {
    id: String,
    repository: WireRepository,
    subject: WireSubject,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct WireRepository {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct WireSubject {
    title: String,
    #[serde(rename = "type")]
    kind: SubjectType,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireStargazer {
    starred_at: DateTime<Utc>,
    user: Option<WireUser>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    login: String,
}

/// [`ActivitySource`] backed by the GitHub REST API.
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    max_pages: usize,
}

impl GitHubClient {
    pub fn new(settings: &GitHubSettings) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("github-watcher/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            max_pages: settings.max_pages.max(1),
        })
    }

    fn first_page_url(&self, path: &str) -> String {
        let separator = if path.contains('?') { '&' } else { '?' };
        format!("{}{}{}per_page={}", self.base_url, path, separator, PAGE_SIZE)
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        token: &str,
        url: String,
        accept: &str,
    ) -> Result<Page<T>, SourceError> {
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header(ACCEPT, accept)
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let next = link_relation(response.headers(), "next");
        let last = link_relation(response.headers(), "last");
        let body = response.bytes().await?;
        let items = serde_json::from_slice(&body).map_err(|e| SourceError::Decode {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        Ok(Page { items, next, last })
    }

    /// GET a collection from its first page, following `Link: rel="next"`
    /// for at most `max_pages` pages.
    async fn get_collection<T: DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        accept: &str,
    ) -> Result<Vec<T>, SourceError> {
        let first = self.get_page(token, self.first_page_url(path), accept).await?;
        self.follow_next(token, path, accept, first).await
    }

    async fn follow_next<T: DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        accept: &str,
        first: Page<T>,
    ) -> Result<Vec<T>, SourceError> {
        debug!("Fetched page 1 of {} ({} items)", path, first.items.len());
        let mut items = first.items;
        let mut next = first.next;

        for page in 2..=self.max_pages {
            let Some(url) = next.take() else {
                break;
            };
            let batch: Page<T> = self.get_page(token, url, accept).await?;
            debug!("Fetched page {} of {} ({} items)", page, path, batch.items.len());
            items.extend(batch.items);
            next = batch.next;
        }

        Ok(items)
    }

    /// GET the newest `max_pages` pages of an oldest-first collection. When
    /// the collection fits the page limit this is the same as
    /// [`GitHubClient::get_collection`]; otherwise the pages before the
    /// window are skipped by addressing pages from `Link: rel="last"`.
    async fn get_newest<T: DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        accept: &str,
    ) -> Result<Vec<T>, SourceError> {
        let first: Page<T> = self.get_page(token, self.first_page_url(path), accept).await?;
        let Some((last_url, last_page)) = first.last.as_deref().and_then(page_of) else {
            return self.follow_next(token, path, accept, first).await;
        };
        if last_page <= self.max_pages {
            return self.follow_next(token, path, accept, first).await;
        }

        let start = last_page + 1 - self.max_pages;
        debug!("{} has {} pages, reading pages {} to {}", path, last_page, start, last_page);
        let mut items = Vec::new();
        for page in start..=last_page {
            let batch: Page<T> = self.get_page(token, with_page(&last_url, page), accept).await?;
            items.extend(batch.items);
        }
        Ok(items)
    }
}

/// One decoded page plus its pagination links.
struct Page<T> {
    items: Vec<T>,
    next: Option<String>,
    last: Option<String>,
}

#[async_trait]
impl ActivitySource for GitHubClient {
    async fn fetch_notifications(
        &self,
        token: &str,
    ) -> Result<Vec<NotificationEvent>, SourceError> {
        let wire: Vec<WireNotification> = self
            .get_collection(token, "/notifications", JSON_MEDIA_TYPE)
            .await?;

        Ok(wire
            .into_iter()
            .map(|n| NotificationEvent {
                id: n.id,
                repository_full_name: n.repository.full_name,
                subject_title: n.subject.title,
                subject_type: n.subject.kind,
                subject_url: n.subject.url,
                updated_at: n.updated_at,
            })
            .collect())
    }

    async fn fetch_repositories(&self, token: &str) -> Result<Vec<String>, SourceError> {
        let wire: Vec<WireRepository> = self
            .get_collection(token, "/user/repos?affiliation=owner", JSON_MEDIA_TYPE)
            .await?;
        Ok(wire.into_iter().map(|r| r.full_name).collect())
    }

    async fn fetch_stargazers(
        &self,
        token: &str,
        repository: &str,
    ) -> Result<Vec<StarEvent>, SourceError> {
        let path = format!("/repos/{}/stargazers", repository);
        // Stargazers are listed oldest first, so new stars are on the last pages.
        let wire: Vec<WireStargazer> = self.get_newest(token, &path, STAR_MEDIA_TYPE).await?;

        Ok(wire
            .into_iter()
            .filter_map(|s| match s.user {
                Some(user) => Some(StarEvent {
                    repository_full_name: repository.to_string(),
                    starring_user: user.login,
                    starred_at: s.starred_at,
                }),
                None => {
                    debug!("Skipping star by a deleted account on {}", repository);
                    None
                }
            })
            .collect())
    }
}

fn link_relation(headers: &HeaderMap, relation: &str) -> Option<String> {
    let wanted = format!("rel=\"{}\"", relation);
    let value = headers.get(LINK)?.to_str().ok()?;
    value.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces
            .next()?
            .trim()
            .strip_prefix('<')?
            .strip_suffix('>')?;
        pieces
            .any(|param| param.trim() == wanted)
            .then(|| target.to_string())
    })
}

/// Parse a page link into its URL and `page` number.
fn page_of(link: &str) -> Option<(Url, usize)> {
    let url = Url::parse(link).ok()?;
    let page = url
        .query_pairs()
        .find(|(key, _)| key == "page")?
        .1
        .parse()
        .ok()?;
    Some((url, page))
}

fn with_page(url: &Url, page: usize) -> String {
    let query: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "page")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    let mut url = url.clone();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(query)
        .append_pair("page", &page.to_string());
    url.to_string()
}
