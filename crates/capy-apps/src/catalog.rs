//! App Catalog implementation.
//!
//! The catalog owns every discovered application and its live instances.
//! Readers may hold snapshots at any time; all mutation goes through the
//! daemon's writer tasks, so within one mutating call the state is
//! observed consistently.

use crate::desktop_entry::{DesktopEntry, ParseOutcome};
use crate::error::AppsError;
use crate::paths;
use log::{debug, info, warn};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Instant, UNIX_EPOCH};

/// Bus path prefix all application objects hang off.
pub const BUS_PATH: &str = "/org/capyshell/AppManager1";

/// Events emitted when the catalog changes.
#[derive(Debug, Clone)]
pub enum CatalogEvent {
    Refresh,
}

/// Whether an instance attach actually happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    /// Unit path already known; duplicate UnitNew signals are skipped.
    Duplicate,
    UnknownApp,
}

/// One running unit attributed to an application.
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub instance_id: String,
    /// Opaque service-manager unit identity.
    pub unit_path: String,
    pub object_path: String,
    pub launch_time: Instant,
    /// False for instances started through the direct-spawn fallback.
    pub supervised: bool,
}

/// One discovered desktop entry.
#[derive(Debug, Clone)]
pub struct ApplicationRecord {
    pub app_id: String,
    pub source_path: PathBuf,
    pub entry: DesktopEntry,
    pub outcome: ParseOutcome,
    pub source_mtime_ns: u128,
    pub object_path: String,
    /// instance_id -> record; keys unique per application.
    pub instances: HashMap<String, InstanceRecord>,
}

#[derive(Default)]
struct CatalogState {
    records: HashMap<String, ApplicationRecord>,
    /// Insertion order of app ids, for stable List() replies.
    order: Vec<String>,
}

/// The main application catalog.
pub struct AppCatalog {
    state: RwLock<CatalogState>,
    /// Search directories, user data dir first.
    search_dirs: Vec<PathBuf>,
    event_tx: tokio::sync::broadcast::Sender<CatalogEvent>,
}

impl AppCatalog {
    /// Create an empty catalog over the given search directories.
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(16);
        Self {
            state: RwLock::new(CatalogState::default()),
            search_dirs,
            event_tx: tx,
        }
    }

    /// Catalog over the XDG application directories.
    pub fn from_env() -> Self {
        Self::new(paths::application_directories())
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Subscribe to catalog changes.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CatalogEvent> {
        self.event_tx.subscribe()
    }

    /// Scan every search directory and populate the catalog. Earlier
    /// directories shadow later ones for the same application id.
    pub fn scan(&self) {
        info!("Scanning application directories...");
        let mut added = 0usize;

        for dir in self.search_dirs.clone() {
            let Ok(read) = std::fs::read_dir(&dir) else {
                continue;
            };
            let mut files: Vec<PathBuf> = read
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("desktop"))
                .collect();
            files.sort();

            for path in files {
                match self.add(&path) {
                    Ok(_) => added += 1,
                    Err(AppsError::AlreadyPresent(_)) => {}
                    Err(AppsError::Invalid(reason)) => debug!("skipping: {reason}"),
                    Err(err) => warn!("skipping {}: {err}", path.display()),
                }
            }
        }

        info!("Catalog scan complete, {added} application(s).");
        let _ = self.event_tx.send(CatalogEvent::Refresh);
    }

    /// Application object paths in insertion-stable order.
    pub fn list(&self) -> Vec<String> {
        let state = self.state.read().unwrap();
        state
            .order
            .iter()
            .filter_map(|id| state.records.get(id))
            .map(|record| record.object_path.clone())
            .collect()
    }

    pub fn app_ids(&self) -> Vec<String> {
        self.state.read().unwrap().order.clone()
    }

    /// Object path for an application id.
    pub fn lookup(&self, app_id: &str) -> Option<String> {
        self.state
            .read()
            .unwrap()
            .records
            .get(app_id)
            .map(|record| record.object_path.clone())
    }

    /// Application id owning the given object path.
    pub fn lookup_by_object(&self, object_path: &str) -> Option<String> {
        let state = self.state.read().unwrap();
        state
            .records
            .values()
            .find(|record| record.object_path == object_path)
            .map(|record| record.app_id.clone())
    }

    /// Snapshot of a record.
    pub fn get(&self, app_id: &str) -> Option<ApplicationRecord> {
        self.state.read().unwrap().records.get(app_id).cloned()
    }

    /// Parse and insert a desktop file. Fails with `AlreadyPresent` when the
    /// derived application id collides with an existing record.
    pub fn add(&self, desktop_path: &Path) -> Result<String, AppsError> {
        let app_id = paths::app_id_for(&self.search_dirs, desktop_path)
            .ok_or_else(|| AppsError::Invalid(format!("not a desktop file: {}", desktop_path.display())))?;

        {
            let state = self.state.read().unwrap();
            if state.records.contains_key(&app_id) {
                return Err(AppsError::AlreadyPresent(app_id));
            }
        }

        let (entry, outcome) = DesktopEntry::parse(desktop_path)?;
        if !entry.is_application() {
            return Err(AppsError::Invalid(format!(
                "{} is not an application entry",
                desktop_path.display()
            )));
        }
        if entry.hidden() {
            return Err(AppsError::Invalid(format!(
                "{} is hidden",
                desktop_path.display()
            )));
        }

        let record = ApplicationRecord {
            object_path: object_path_for_app(&app_id),
            app_id: app_id.clone(),
            source_path: desktop_path.to_path_buf(),
            entry,
            outcome,
            source_mtime_ns: mtime_ns(desktop_path).unwrap_or_default(),
            instances: HashMap::new(),
        };

        let mut state = self.state.write().unwrap();
        // A writer may have raced us between the check and the parse.
        if state.records.contains_key(&app_id) {
            return Err(AppsError::AlreadyPresent(app_id));
        }
        state.order.push(app_id.clone());
        state.records.insert(app_id.clone(), record);
        Ok(app_id)
    }

    /// Drop a record and all of its instances. Idempotent.
    pub fn remove(&self, app_id: &str) {
        let mut state = self.state.write().unwrap();
        if state.records.remove(app_id).is_some() {
            state.order.retain(|id| id != app_id);
        }
    }

    /// Drop a record by its object path. Idempotent.
    pub fn remove_by_object(&self, object_path: &str) {
        if let Some(app_id) = self.lookup_by_object(object_path) {
            self.remove(&app_id);
        }
    }

    /// Re-resolve each application id against the search paths:
    /// found + present + changed mtime re-parses (keeping the old entry on
    /// hard parse failure), found + absent adds, not found removes.
    pub fn refresh(&self, app_ids: &[String]) {
        for app_id in app_ids {
            let found = paths::search_desktop_file_by_id(&self.search_dirs, app_id);

            let Some(path) = found else {
                self.remove(app_id);
                continue;
            };

            let present = {
                let state = self.state.read().unwrap();
                state.records.contains_key(app_id)
            };

            if !present {
                if let Err(err) = self.add(&path) {
                    warn!("refresh could not add {app_id}: {err}");
                }
                continue;
            }

            self.reparse_if_modified(app_id, &path);
        }

        let _ = self.event_tx.send(CatalogEvent::Refresh);
    }

    fn reparse_if_modified(&self, app_id: &str, path: &Path) {
        let mtime = mtime_ns(path).unwrap_or_default();
        {
            let state = self.state.read().unwrap();
            let Some(record) = state.records.get(app_id) else {
                return;
            };
            if record.source_mtime_ns == mtime {
                return;
            }
        }

        match DesktopEntry::parse(path) {
            Ok((entry, outcome)) => {
                let mut state = self.state.write().unwrap();
                if let Some(record) = state.records.get_mut(app_id) {
                    record.entry = entry;
                    record.outcome = outcome;
                    record.source_path = path.to_path_buf();
                    record.source_mtime_ns = mtime;
                }
            }
            Err(err) => {
                // Content would not change on a failed re-parse.
                warn!("re-parse of {} failed: {err}", path.display());
            }
        }
    }

    /// Attach an instance to an application. Duplicate unit paths are
    /// skipped so repeated UnitNew signals stay idempotent.
    pub fn attach_instance(
        &self,
        app_id: &str,
        instance_id: &str,
        unit_path: &str,
        supervised: bool,
    ) -> AttachOutcome {
        let mut state = self.state.write().unwrap();
        let Some(record) = state.records.get_mut(app_id) else {
            return AttachOutcome::UnknownApp;
        };

        if record
            .instances
            .values()
            .any(|instance| instance.unit_path == unit_path)
        {
            return AttachOutcome::Duplicate;
        }

        let object_path = instance_object_path(&record.object_path, instance_id);
        record.instances.insert(
            instance_id.to_string(),
            InstanceRecord {
                instance_id: instance_id.to_string(),
                unit_path: unit_path.to_string(),
                object_path,
                launch_time: Instant::now(),
                supervised,
            },
        );
        AttachOutcome::Attached
    }

    /// Remove the instance whose unit path matches. Returns its instance id.
    pub fn detach_instance(&self, app_id: &str, unit_path: &str) -> Option<String> {
        let mut state = self.state.write().unwrap();
        let record = state.records.get_mut(app_id)?;
        let instance_id = record
            .instances
            .values()
            .find(|instance| instance.unit_path == unit_path)
            .map(|instance| instance.instance_id.clone())?;
        record.instances.remove(&instance_id);
        Some(instance_id)
    }

    /// Snapshot of one instance.
    pub fn find_instance(&self, app_id: &str, instance_id: &str) -> Option<InstanceRecord> {
        self.state
            .read()
            .unwrap()
            .records
            .get(app_id)?
            .instances
            .get(instance_id)
            .cloned()
    }
}

/// Deterministic object path for an application id; stable across restarts.
pub fn object_path_for_app(app_id: &str) -> String {
    format!("{BUS_PATH}/{}", escape_path_element(app_id))
}

/// Object path of one instance under its application object.
pub fn instance_object_path(app_object_path: &str, instance_id: &str) -> String {
    format!("{app_object_path}/{}", escape_path_element(instance_id))
}

/// Object-path elements only allow `[A-Za-z0-9_]`; anything else is `_NN`.
fn escape_path_element(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{byte:02x}"));
        }
    }
    out
}

fn mtime_ns(path: &Path) -> Option<u128> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    modified
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_nanos())
}
