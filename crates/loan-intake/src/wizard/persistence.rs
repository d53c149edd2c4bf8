use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use super::domain::{Application, ApplicationType};

const KEY_PREFIX: &str = "loan-intake";

/// Durable string store, addressed by namespaced keys.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, key: &str, value: String) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        (**self).put(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("could not encode application: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn raw(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        lock(&self.entries).insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

pub fn storage_key(application_type: ApplicationType) -> String {
    format!("{KEY_PREFIX}/{}", application_type.label())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStatus {
    Written,
    Scheduled,
    /// Kept in memory only; the port is degraded.
    Skipped,
    Failed,
}

/// Raised once when writes start failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceNotice {
    pub application_type: ApplicationType,
    pub message: String,
}

#[derive(Debug, Default)]
struct PortState {
    degraded: bool,
    notice_issued: bool,
    notice: Option<PersistenceNotice>,
    latest: HashMap<ApplicationType, Application>,
    generations: HashMap<ApplicationType, u64>,
}

struct Shared<S> {
    store: S,
    state: Mutex<PortState>,
}

impl<S: KeyValueStore> Shared<S> {
    fn write(&self, application: &Application) -> SaveStatus {
        let application_type = application.application_type;
        if lock(&self.state).degraded {
            return SaveStatus::Skipped;
        }

        let result = serde_json::to_string(application)
            .map_err(StoreError::from)
            .and_then(|encoded| self.store.put(&storage_key(application_type), encoded));

        match result {
            Ok(()) => SaveStatus::Written,
            Err(err) => {
                let mut state = lock(&self.state);
                state.degraded = true;
                if !state.notice_issued {
                    state.notice_issued = true;
                    state.notice = Some(PersistenceNotice {
                        application_type,
                        message: format!("progress is kept in memory only: {err}"),
                    });
                }
                tracing::warn!(
                    flow = %application_type,
                    error = %err,
                    "persistence degraded to memory"
                );
                SaveStatus::Failed
            }
        }
    }

    fn is_current(&self, application_type: ApplicationType, generation: u64) -> bool {
        lock(&self.state).generations.get(&application_type) == Some(&generation)
    }

    fn latest(&self, application_type: ApplicationType) -> Option<Application> {
        lock(&self.state).latest.get(&application_type).cloned()
    }
}

/// Saves and restores applications, one namespace per application type.
pub struct PersistencePort<S> {
    shared: Arc<Shared<S>>,
    debounce: Duration,
}

impl<S> Clone for PersistencePort<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            debounce: self.debounce,
        }
    }
}

impl<S> PersistencePort<S>
where
    S: KeyValueStore + 'static,
{
    pub fn new(store: S, debounce: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                state: Mutex::new(PortState::default()),
            }),
            debounce,
        }
    }

    pub fn store(&self) -> &S {
        &self.shared.store
    }

    pub fn is_degraded(&self) -> bool {
        lock(&self.shared.state).degraded
    }

    /// Write now. Never returns an error; failures degrade the port.
    pub fn save(&self, application: &Application) -> SaveStatus {
        self.remember(application);
        self.shared.write(application)
    }

    /// Debounced save. Falls back to an immediate write outside a runtime.
    pub fn schedule_save(&self, application: &Application) -> SaveStatus {
        let application_type = application.application_type;
        let generation = self.remember(application);

        if self.debounce.is_zero() {
            return self.shared.write(application);
        }

        match Handle::try_current() {
            Ok(handle) => {
                let shared = Arc::clone(&self.shared);
                let debounce = self.debounce;
                handle.spawn(async move {
                    tokio::time::sleep(debounce).await;
                    if !shared.is_current(application_type, generation) {
                        return;
                    }
                    if let Some(latest) = shared.latest(application_type) {
                        shared.write(&latest);
                    }
                });
                SaveStatus::Scheduled
            }
            Err(_) => self.shared.write(application),
        }
    }

    /// Restore a saved application. Undecodable records are treated as absent.
    pub fn load(&self, application_type: ApplicationType) -> Option<Application> {
        if let Some(latest) = self.shared.latest(application_type) {
            return Some(latest);
        }

        let key = storage_key(application_type);
        let raw = match self.shared.store.get(&key) {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(
                    flow = %application_type,
                    error = %err,
                    "could not read saved application"
                );
                return None;
            }
        };

        match serde_json::from_str::<Application>(&raw) {
            Ok(application) if application.application_type == application_type => {
                Some(application)
            }
            Ok(application) => {
                tracing::warn!(
                    key = %key,
                    found = %application.application_type,
                    "saved application belongs to another flow; ignoring"
                );
                None
            }
            Err(err) => {
                tracing::warn!(
                    key = %key,
                    error = %err,
                    "saved application is unreadable; ignoring"
                );
                None
            }
        }
    }

    /// The pending failure notice, handed out at most once.
    pub fn take_notice(&self) -> Option<PersistenceNotice> {
        lock(&self.shared.state).notice.take()
    }

    /// Leave degraded mode and flush every in-memory application.
    pub fn retry(&self) -> SaveStatus {
        let pending: Vec<Application> = {
            let mut state = lock(&self.shared.state);
            state.degraded = false;
            state.notice_issued = false;
            state.notice = None;
            state.latest.values().cloned().collect()
        };

        let mut status = SaveStatus::Written;
        for application in &pending {
            if self.shared.write(application) != SaveStatus::Written {
                status = SaveStatus::Failed;
                break;
            }
        }
        tracing::info!(flushed = pending.len(), ?status, "persistence retry");
        status
    }

    /// Forget an application, cancelling any pending debounced write.
    pub fn discard(&self, application_type: ApplicationType) {
        {
            let mut state = lock(&self.shared.state);
            state.latest.remove(&application_type);
            *state.generations.entry(application_type).or_insert(0) += 1;
        }
        if let Err(err) = self.shared.store.remove(&storage_key(application_type)) {
            tracing::warn!(
                flow = %application_type,
                error = %err,
                "could not remove saved application"
            );
        }
    }

    fn remember(&self, application: &Application) -> u64 {
        let mut state = lock(&self.shared.state);
        state
            .latest
            .insert(application.application_type, application.clone());
        let generation = state
            .generations
            .entry(application.application_type)
            .or_insert(0);
        *generation += 1;
        *generation
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
