//! Observable, disk-backed user preferences.
//!
//! The store is an explicit handle (cheap to clone) rather than a global:
//! each process, or each test, creates its own. Reads are synchronous
//! snapshots; every update notifies subscribers in-line and then writes the
//! full document back to disk without waiting for the result.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::Error;

pub const DEFAULT_TARGET_DURATION: Duration = Duration::from_secs(120);

const SETTINGS_DIR: &str = "gesture-session";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Flips to `true` once, after the persisted file has been consulted.
    pub loaded: bool,
    pub last_opened_directory: Option<PathBuf>,
    pub target_duration: Duration,
    pub muted: bool,
    pub skipped_version: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            loaded: false,
            last_opened_directory: None,
            target_duration: DEFAULT_TARGET_DURATION,
            muted: false,
            skipped_version: None,
        }
    }
}

/// A single-field update.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingUpdate {
    LastOpenedDirectory(Option<PathBuf>),
    TargetDuration(Duration),
    Muted(bool),
    SkippedVersion(Option<String>),
}

impl Settings {
    fn apply(&mut self, update: SettingUpdate) {
        match update {
            SettingUpdate::LastOpenedDirectory(dir) => self.last_opened_directory = dir,
            SettingUpdate::TargetDuration(target) => self.target_duration = target,
            SettingUpdate::Muted(muted) => self.muted = muted,
            SettingUpdate::SkippedVersion(version) => self.skipped_version = version,
        }
    }
}

/// `<config dir>/gesture-session/settings.json`
pub fn default_settings_path() -> Result<PathBuf, Error> {
    dirs::config_dir()
        .map(|dir| dir.join(SETTINGS_DIR).join(SETTINGS_FILE))
        .ok_or(Error::NoConfigDir)
}

type Callback = Arc<dyn Fn(&Settings) + Send + Sync>;

struct Inner {
    path: PathBuf,
    state: RwLock<Settings>,
    subscribers: Mutex<Vec<(u64, Callback)>>,
    next_subscriber: AtomicU64,
}

#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<Inner>,
}

/// Handle returned by [`SettingsStore::subscribe`].
#[must_use = "dropping the handle keeps the subscription; call `unsubscribe` to remove it"]
pub struct Subscription {
    id: u64,
    store: SettingsStore,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.store
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _)| *id != self.id);
    }
}

impl SettingsStore {
    /// A store holding defaults (`loaded == false`) backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.into(),
                state: RwLock::new(Settings::default()),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn get(&self) -> Settings {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reads the persisted file, falling back to defaults field by field,
    /// marks the store loaded and notifies subscribers.
    pub fn bootstrap(&self) {
        let persisted = match read_persisted(&self.inner.path) {
            Ok(Some(contents)) => parse_persisted(&contents),
            Ok(None) => {
                debug!(path = %self.inner.path.display(), "no persisted settings; using defaults");
                Settings::default()
            }
            Err(err) => {
                warn!("{err}; using defaults");
                Settings::default()
            }
        };
        let snapshot = {
            let mut guard = self
                .inner
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *guard = Settings {
                loaded: true,
                ..persisted
            };
            guard.clone()
        };
        info!(
            path = %self.inner.path.display(),
            directory = ?snapshot.last_opened_directory,
            target_secs = snapshot.target_duration.as_secs_f64(),
            muted = snapshot.muted,
            "settings loaded"
        );
        self.notify(&snapshot);
    }

    /// Merges one field, notifies subscribers, then persists in the background.
    pub fn set(&self, update: SettingUpdate) {
        debug!(?update, "setting changed");
        let snapshot = {
            let mut guard = self
                .inner
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            guard.apply(update);
            guard.clone()
        };
        self.notify(&snapshot);
        self.persist(snapshot);
    }

    /// Registers `callback`, invoked after every change with the new snapshot.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Settings) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        Subscription {
            id,
            store: self.clone(),
        }
    }

    fn notify(&self, snapshot: &Settings) {
        // Copy the list so callbacks may (un)subscribe without deadlocking.
        let callbacks: Vec<Callback> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(snapshot);
        }
    }

    fn persist(&self, snapshot: Settings) {
        let path = self.inner.path.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || report_write(&path, save(&path, &snapshot)));
            }
            Err(_) => report_write(&path, save(&path, &snapshot)),
        }
    }
}

fn report_write(path: &Path, result: Result<(), Error>) {
    match result {
        Ok(()) => debug!(path = %path.display(), "settings written"),
        Err(err) => warn!("{err}"),
    }
}

fn read_persisted(path: &Path) -> Result<Option<String>, Error> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(Error::SettingsRead {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn save(path: &Path, settings: &Settings) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        // Best effort; the write below reports the real failure.
        if let Err(err) = fs::create_dir_all(parent) {
            debug!(dir = %parent.display(), "create settings dir failed: {err}");
        }
    }
    let document = serde_json::to_string(&PersistedSettings::from(settings))?;
    fs::write(path, document).map_err(|source| Error::SettingsWrite {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSettings<'a> {
    last_opened_directory: Option<&'a Path>,
    #[serde(serialize_with = "serialize_seconds")]
    time: Duration,
    muted: bool,
    skip_version: Option<&'a str>,
}

impl<'a> From<&'a Settings> for PersistedSettings<'a> {
    fn from(settings: &'a Settings) -> Self {
        Self {
            last_opened_directory: settings.last_opened_directory.as_deref(),
            time: settings.target_duration,
            muted: settings.muted,
            skip_version: settings.skipped_version.as_deref(),
        }
    }
}

fn serialize_seconds<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    if value.subsec_nanos() == 0 {
        serializer.serialize_u64(value.as_secs())
    } else {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

/// Field-level defaulting: a bad field never invalidates its neighbours.
fn parse_persisted(contents: &str) -> Settings {
    let mut settings = Settings::default();
    let map = match serde_json::from_str::<Value>(contents) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(kind = json_kind(&other), "persisted settings is not an object; using defaults");
            return settings;
        }
        Err(err) => {
            warn!("persisted settings unparsable ({err}); using defaults");
            return settings;
        }
    };

    if let Some(dir) = field::<Option<PathBuf>>(&map, "lastOpenedDirectory") {
        settings.last_opened_directory = dir;
    }
    if let Some(secs) = field::<f64>(&map, "time") {
        match Duration::try_from_secs_f64(secs) {
            Ok(target) if !target.is_zero() => settings.target_duration = target,
            _ => warn!(value = secs, "invalid persisted time; using default"),
        }
    }
    if let Some(muted) = field::<bool>(&map, "muted") {
        settings.muted = muted;
    }
    if let Some(version) = field::<Option<String>>(&map, "skipVersion") {
        settings.skipped_version = version;
    }
    settings
}

fn field<T: DeserializeOwned>(map: &Map<String, Value>, key: &str) -> Option<T> {
    let value = map.get(key)?;
    match T::deserialize(value) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!(key, "ignoring invalid persisted setting: {err}");
            None
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
