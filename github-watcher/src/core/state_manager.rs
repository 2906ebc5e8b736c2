/*!
In-memory seen-state deciding whether an observed event is novel
*/

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

/// Identity of an observed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity<'a> {
    Notification(&'a str),
    Star { repository: &'a str, user: &'a str },
}

/// A remote collection that is primed once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource<'a> {
    Notifications,
    Stargazers(&'a str),
}

impl<'a> Identity<'a> {
    /// The collection this identity is listed in.
    pub fn resource(&self) -> Resource<'a> {
        match *self {
            Identity::Notification(_) => Resource::Notifications,
            Identity::Star { repository, .. } => Resource::Stargazers(repository),
        }
    }
}

impl Identity<'_> {
    fn key(&self) -> String {
        match *self {
            Identity::Notification(id) => id.to_string(),
            Identity::Star { repository, user } => star_key(repository, user),
        }
    }
}

/// Insertion-ordered set with an optional upper bound.
///
/// Identities in the latest listing of the resource are never evicted, so
/// the bound gives way when a single listing is larger than the capacity.
#[derive(Debug, Default)]
struct IdentitySet {
    members: HashSet<String>,
    order: VecDeque<String>,
    listed: HashSet<String>,
    capacity: Option<usize>,
}

impl IdentitySet {
    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.members.contains(key)
    }

    fn insert(&mut self, key: String) -> bool {
        if self.members.contains(&key) {
            return false;
        }
        self.order.push_back(key.clone());
        self.members.insert(key);
        self.evict();
        true
    }

    fn evict(&mut self) {
        let Some(capacity) = self.capacity else {
            return;
        };
        let mut remaining = self.order.len();
        while self.order.len() > capacity.max(1) && remaining > 0 {
            remaining -= 1;
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.listed.contains(&oldest) {
                self.order.push_back(oldest);
            } else {
                self.members.remove(&oldest);
            }
        }
    }

    /// Record a complete listing and return, in listing order, whether each
    /// key was new.
    fn observe(&mut self, keys: Vec<String>) -> Vec<bool> {
        self.listed = keys.iter().cloned().collect();
        keys.into_iter().map(|key| self.insert(key)).collect()
    }

    fn clear(&mut self) {
        self.members.clear();
        self.order.clear();
        self.listed.clear();
    }

    fn len(&self) -> usize {
        self.members.len()
    }
}

/// Remembers every identity observed during one enabled session.
///
/// Sets grow monotonically until [`SeenStateTracker::reset`] unless a
/// capacity is configured. A capacity applies to each resource on its own:
/// the notification feed and every repository's stargazers. The oldest
/// identity that is absent from the resource's latest listing is evicted
/// first.
#[derive(Debug)]
pub struct SeenStateTracker {
    capacity: Option<usize>,
    notifications: IdentitySet,
    stars: HashMap<String, IdentitySet>,
    notifications_primed: bool,
    primed_repositories: HashSet<String>,
}

impl Default for SeenStateTracker {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SeenStateTracker {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            notifications: IdentitySet::with_capacity(capacity),
            stars: HashMap::new(),
            notifications_primed: false,
            primed_repositories: HashSet::new(),
        }
    }

    /// Forget everything, including which resources have been primed.
    pub fn reset(&mut self) {
        self.notifications.clear();
        self.stars.clear();
        self.notifications_primed = false;
        self.primed_repositories.clear();
        debug!("Seen state cleared");
    }

    fn set_mut(&mut self, resource: Resource<'_>) -> &mut IdentitySet {
        match resource {
            Resource::Notifications => &mut self.notifications,
            Resource::Stargazers(repository) => {
                let capacity = self.capacity;
                self.stars
                    .entry(repository.to_string())
                    .or_insert_with(|| IdentitySet::with_capacity(capacity))
            }
        }
    }

    /// Returns true when the identity was not already present.
    pub fn mark_seen(&mut self, identity: Identity<'_>) -> bool {
        let key = identity.key();
        self.set_mut(identity.resource()).insert(key)
    }

    /// Mark every identity of a successful listing of `resource` seen and
    /// report, in listing order, which ones were new. The listing stays
    /// protected from eviction until the next listing of the same resource.
    pub fn observe_listing(
        &mut self,
        resource: Resource<'_>,
        listing: &[Identity<'_>],
    ) -> Vec<bool> {
        debug_assert!(listing.iter().all(|identity| identity.resource() == resource));
        let keys = listing.iter().map(Identity::key).collect();
        self.set_mut(resource).observe(keys)
    }

    pub fn is_novel(&self, identity: Identity<'_>) -> bool {
        let key = identity.key();
        match identity {
            Identity::Notification(_) => !self.notifications.contains(&key),
            Identity::Star { repository, .. } => self
                .stars
                .get(repository)
                .is_none_or(|set| !set.contains(&key)),
        }
    }

    pub fn is_primed(&self, resource: Resource<'_>) -> bool {
        match resource {
            Resource::Notifications => self.notifications_primed,
            Resource::Stargazers(repository) => self.primed_repositories.contains(repository),
        }
    }

    pub fn mark_primed(&mut self, resource: Resource<'_>) {
        match resource {
            Resource::Notifications => self.notifications_primed = true,
            Resource::Stargazers(repository) => {
                self.primed_repositories.insert(repository.to_string());
            }
        }
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.len()
    }

    pub fn star_count(&self) -> usize {
        self.stars.values().map(IdentitySet::len).sum()
    }
}

/// Fingerprint of a (repository, user) pair. The separator cannot occur in
/// either GitHub name, so distinct pairs never collide on concatenation.
pub fn star_key(repository: &str, user: &str) -> String {
    let input = format!("{}\0{}", repository, user);
    blake3::hash(input.as_bytes()).to_hex().to_string()
}
