use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::runtime::Handle;

use super::fallback::default_message;
use super::{CatalogError, Locale};

#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn fetch(&self, locale: &Locale) -> Result<BTreeMap<String, String>, CatalogError>;
}

#[async_trait]
impl<T: MessageSource + ?Sized> MessageSource for Arc<T> {
    async fn fetch(&self, locale: &Locale) -> Result<BTreeMap<String, String>, CatalogError> {
        (**self).fetch(locale).await
    }
}

#[derive(Debug)]
struct MessageState {
    active_locale: Locale,
    catalogs: HashMap<Locale, BTreeMap<String, String>>,
    ticket: u64,
    refreshing: HashSet<Locale>,
    /// Locales whose last fetch failed; misses stop refetching until an
    /// explicit `refresh`, a locale change or `clear`.
    failed: HashSet<Locale>,
}

struct Inner<S> {
    source: S,
    state: Mutex<MessageState>,
}

/// Resolves validation codes to display text, always synchronously.
pub struct MessageCatalogResolver<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for MessageCatalogResolver<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> MessageCatalogResolver<S>
where
    S: MessageSource + 'static,
{
    pub fn new(source: S, locale: Locale) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                state: Mutex::new(MessageState {
                    active_locale: locale,
                    catalogs: HashMap::new(),
                    ticket: 0,
                    refreshing: HashSet::new(),
                    failed: HashSet::new(),
                }),
            }),
        }
    }

    /// Catalog text, then the built-in English text, then the code itself.
    ///
    /// A miss on an unloaded locale starts a background refresh when a
    /// runtime is available, unless the last fetch for it failed.
    pub fn get_error_message(&self, code: &str, locale: &Locale) -> String {
        let needs_refresh = {
            let mut state = self.lock();
            if &state.active_locale != locale {
                state.active_locale = locale.clone();
                state.catalogs.clear();
                state.refreshing.clear();
                state.failed.clear();
            }
            if let Some(text) = state.catalogs.get(locale).and_then(|catalog| catalog.get(code)) {
                return text.clone();
            }
            let needs_refresh = !state.catalogs.contains_key(locale)
                && !state.refreshing.contains(locale)
                && !state.failed.contains(locale)
                && Handle::try_current().is_ok();
            if needs_refresh {
                state.refreshing.insert(locale.clone());
            }
            needs_refresh
        };

        if needs_refresh {
            self.spawn_refresh(locale);
        }

        default_message(code)
            .map(str::to_string)
            .unwrap_or_else(|| code.to_string())
    }

    /// Resolve several codes at once.
    pub fn messages_for<'a>(
        &self,
        codes: impl IntoIterator<Item = &'a str>,
        locale: &Locale,
    ) -> BTreeMap<String, String> {
        codes
            .into_iter()
            .map(|code| (code.to_string(), self.get_error_message(code, locale)))
            .collect()
    }

    /// Fetch the catalog for `locale`. Only the newest request may populate the cache.
    pub async fn refresh(&self, locale: &Locale) -> Result<usize, CatalogError> {
        let ticket = {
            let mut state = self.lock();
            if &state.active_locale != locale {
                state.active_locale = locale.clone();
                state.catalogs.clear();
                state.failed.clear();
            }
            state.refreshing.insert(locale.clone());
            state.ticket += 1;
            state.ticket
        };

        let result = self.inner.source.fetch(locale).await;

        let mut state = self.lock();
        state.refreshing.remove(locale);
        let current = state.ticket == ticket && &state.active_locale == locale;
        match result {
            Ok(catalog) if current => {
                let count = catalog.len();
                state.failed.remove(locale);
                state.catalogs.insert(locale.clone(), catalog);
                tracing::debug!(locale = %locale, count, "message catalog loaded");
                Ok(count)
            }
            Ok(_) => {
                tracing::warn!(locale = %locale, "discarded superseded message catalog");
                Ok(0)
            }
            Err(err) => {
                if current {
                    state.failed.insert(locale.clone());
                }
                tracing::warn!(
                    locale = %locale,
                    error = %err,
                    "message catalog unavailable; using defaults"
                );
                Err(err)
            }
        }
    }

    pub fn is_loaded(&self, locale: &Locale) -> bool {
        self.lock().catalogs.contains_key(locale)
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.catalogs.clear();
        state.refreshing.clear();
        state.failed.clear();
        state.ticket += 1;
    }

    fn spawn_refresh(&self, locale: &Locale) {
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let resolver = self.clone();
        let locale = locale.clone();
        handle.spawn(async move {
            // Failures are already logged; defaults keep serving.
            let _ = resolver.refresh(&locale).await;
        });
    }

    fn lock(&self) -> MutexGuard<'_, MessageState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
