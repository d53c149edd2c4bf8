use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::time::Instant;

use super::fallback::bundled_options;
use super::{CatalogError, Locale};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionItem {
    pub value: String,
    pub label: String,
}

/// Choices plus display metadata for one field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSet {
    pub options: Vec<OptionItem>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
}

#[async_trait]
pub trait OptionSource: Send + Sync {
    async fn fetch(
        &self,
        context: &str,
        field: &str,
        locale: &Locale,
    ) -> Result<OptionSet, CatalogError>;
}

#[async_trait]
impl<T: OptionSource + ?Sized> OptionSource for Arc<T> {
    async fn fetch(
        &self,
        context: &str,
        field: &str,
        locale: &Locale,
    ) -> Result<OptionSet, CatalogError> {
        (**self).fetch(context, field, locale).await
    }
}

/// What a form renders for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionsView {
    pub options: Vec<OptionItem>,
    pub label: Option<String>,
    pub placeholder: Option<String>,
    pub loading: bool,
    pub stale: bool,
    /// A newer request for the same field resolved first; this result was not cached.
    pub superseded: bool,
    pub error: Option<String>,
}

impl OptionsView {
    fn from_set(set: &OptionSet) -> Self {
        Self {
            options: set.options.clone(),
            label: set.label.clone(),
            placeholder: set.placeholder.clone(),
            loading: false,
            stale: false,
            superseded: false,
            error: None,
        }
    }

    fn empty() -> Self {
        Self::from_set(&OptionSet::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    context: String,
    field: String,
    locale: Locale,
}

impl CacheKey {
    fn new(context: &str, field: &str, locale: &Locale) -> Self {
        Self {
            context: context.to_string(),
            field: field.to_string(),
            locale: locale.clone(),
        }
    }

    fn slot(&self) -> (String, String) {
        (self.context.clone(), self.field.clone())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    set: OptionSet,
    fetched_at: Instant,
}

#[derive(Debug)]
struct CatalogState {
    active_locale: Locale,
    entries: HashMap<CacheKey, CacheEntry>,
    tickets: HashMap<(String, String), u64>,
    next_ticket: u64,
    refreshing: HashSet<CacheKey>,
}

impl CatalogState {
    fn activate(&mut self, locale: &Locale) {
        if &self.active_locale != locale {
            tracing::debug!(
                from = %self.active_locale,
                to = %locale,
                "option catalog locale changed"
            );
            self.active_locale = locale.clone();
            self.entries.clear();
            self.refreshing.clear();
        }
    }

    fn issue_ticket(&mut self, key: &CacheKey) -> u64 {
        self.next_ticket += 1;
        self.tickets.insert(key.slot(), self.next_ticket);
        self.next_ticket
    }

    fn is_current(&self, key: &CacheKey, ticket: u64) -> bool {
        self.active_locale == key.locale && self.tickets.get(&key.slot()) == Some(&ticket)
    }
}

struct Inner<S> {
    source: S,
    ttl: Duration,
    state: Mutex<CatalogState>,
}

/// Cached access to option catalogs keyed by context, field and locale.
pub struct OptionCatalogClient<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for OptionCatalogClient<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum Lookup {
    Fresh(OptionSet),
    Stale(OptionSet),
    Miss,
}

impl<S> OptionCatalogClient<S>
where
    S: OptionSource + 'static,
{
    pub fn new(source: S, ttl: Duration, locale: Locale) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                ttl,
                state: Mutex::new(CatalogState {
                    active_locale: locale,
                    entries: HashMap::new(),
                    tickets: HashMap::new(),
                    next_ticket: 0,
                    refreshing: HashSet::new(),
                }),
            }),
        }
    }

    pub fn active_locale(&self) -> Locale {
        self.lock().active_locale.clone()
    }

    /// Resolve options, fetching on a miss. Requesting a new locale makes it active.
    pub async fn get_options(&self, context: &str, field: &str, locale: &Locale) -> OptionsView {
        let key = CacheKey::new(context, field, locale);
        let (lookup, ticket) = {
            let mut state = self.lock();
            state.activate(locale);
            let lookup = self.lookup(&state, &key);
            let ticket = match lookup {
                Lookup::Miss => state.issue_ticket(&key),
                _ => 0,
            };
            (lookup, ticket)
        };

        match lookup {
            Lookup::Fresh(set) => {
                tracing::debug!(context, field, locale = %locale, "option cache hit");
                OptionsView::from_set(&set)
            }
            Lookup::Stale(set) => {
                self.spawn_refresh(key);
                OptionsView {
                    stale: true,
                    ..OptionsView::from_set(&set)
                }
            }
            Lookup::Miss => self.fetch_and_store(key, ticket).await,
        }
    }

    /// Synchronous view from cache or the bundled table; never waits.
    pub fn peek(&self, context: &str, field: &str, locale: &Locale) -> OptionsView {
        let key = CacheKey::new(context, field, locale);
        let lookup = {
            let state = self.lock();
            if &state.active_locale == locale {
                self.lookup(&state, &key)
            } else {
                Lookup::Miss
            }
        };

        match lookup {
            Lookup::Fresh(set) => OptionsView::from_set(&set),
            Lookup::Stale(set) => {
                self.spawn_refresh(key);
                OptionsView {
                    stale: true,
                    ..OptionsView::from_set(&set)
                }
            }
            Lookup::Miss => {
                if let Ok(handle) = Handle::try_current() {
                    let client = self.clone();
                    let (context, field, locale) =
                        (context.to_string(), field.to_string(), locale.clone());
                    handle.spawn(async move {
                        client.get_options(&context, &field, &locale).await;
                    });
                }
                let view = bundled_options(context, field, locale)
                    .map(|set| OptionsView::from_set(&set))
                    .unwrap_or_else(OptionsView::empty);
                OptionsView {
                    loading: true,
                    ..view
                }
            }
        }
    }

    pub fn set_locale(&self, locale: &Locale) {
        self.lock().activate(locale);
    }

    /// Drop every entry; in-flight fetches are discarded when they land.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.tickets.clear();
        state.refreshing.clear();
    }

    pub fn cached(&self, context: &str, field: &str, locale: &Locale) -> Option<OptionSet> {
        self.lock()
            .entries
            .get(&CacheKey::new(context, field, locale))
            .map(|entry| entry.set.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, state: &CatalogState, key: &CacheKey) -> Lookup {
        match state.entries.get(key) {
            Some(entry) if entry.fetched_at.elapsed() < self.inner.ttl => {
                Lookup::Fresh(entry.set.clone())
            }
            Some(entry) => Lookup::Stale(entry.set.clone()),
            None => Lookup::Miss,
        }
    }

    async fn fetch_and_store(&self, key: CacheKey, ticket: u64) -> OptionsView {
        let result = self
            .inner
            .source
            .fetch(&key.context, &key.field, &key.locale)
            .await;

        let mut state = self.lock();
        let current = state.is_current(&key, ticket);
        match result {
            Ok(set) if current => {
                state.entries.insert(
                    key,
                    CacheEntry {
                        set: set.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                OptionsView::from_set(&set)
            }
            Ok(set) => {
                tracing::warn!(
                    context = %key.context,
                    field = %key.field,
                    locale = %key.locale,
                    "discarded superseded option fetch"
                );
                OptionsView {
                    superseded: true,
                    ..OptionsView::from_set(&set)
                }
            }
            Err(err) => {
                tracing::warn!(
                    context = %key.context,
                    field = %key.field,
                    locale = %key.locale,
                    error = %err,
                    "option catalog unavailable; using fallback"
                );
                let fallback = state
                    .entries
                    .get(&key)
                    .map(|entry| entry.set.clone())
                    .or_else(|| bundled_options(&key.context, &key.field, &key.locale));
                let view = fallback
                    .map(|set| OptionsView::from_set(&set))
                    .unwrap_or_else(OptionsView::empty);
                OptionsView {
                    error: Some(err.to_string()),
                    superseded: !current,
                    ..view
                }
            }
        }
    }

    fn spawn_refresh(&self, key: CacheKey) {
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let ticket = {
            let mut state = self.lock();
            if !state.refreshing.insert(key.clone()) {
                return;
            }
            state.issue_ticket(&key)
        };

        let client = self.clone();
        handle.spawn(async move {
            tracing::debug!(context = %key.context, field = %key.field, "refreshing stale options");
            client.fetch_and_store(key.clone(), ticket).await;
            client.lock().refreshing.remove(&key);
        });
    }

    fn lock(&self) -> MutexGuard<'_, CatalogState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
