//! Autostart policy.
//!
//! The user autostart directory holds copies of desktop entries that the
//! session starts automatically. API mutations copy the file in (or
//! delete the copy) and rewrite the copy so `Hidden=false` plus the
//! bookkeeping keys are guaranteed. A directory watcher reconciles
//! external edits by set-difference against the last snapshot; the
//! `dbus_called` flag keeps API-originated changes from re-emitting.

use crate::error::LaunchdError;
use capy_apps::desktop_entry::{DesktopEntry, MAIN_GROUP};
use capy_apps::paths;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const DESKTOP_SUFFIX: &str = ".desktop";
const KEY_CREATED_BY: &str = "X-Deepin-CreatedBy";
const KEY_APP_ID: &str = "X-Deepin-AppID";

/// Autostart set changes, surfaced as the AutostartChanged signal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AutostartChange {
    Added(PathBuf),
    Removed(PathBuf),
}

struct AutostartState {
    /// Files currently present in the user autostart directory.
    snapshot: HashSet<PathBuf>,
    /// Original desktop path -> autostart copy. Partial: presence implies
    /// the copy exists.
    desktop_to_autostart: HashMap<PathBuf, PathBuf>,
    /// Set while an API mutation is in flight so the watcher does not
    /// re-emit it.
    dbus_called: bool,
}

pub struct AutostartManager {
    user_dir: PathBuf,
    system_dirs: Vec<PathBuf>,
    app_dirs: Vec<PathBuf>,
    /// Written into the `X-Deepin-CreatedBy` key of every copy.
    service_name: String,
    state: Mutex<AutostartState>,
    event_tx: tokio::sync::broadcast::Sender<AutostartChange>,
}

impl AutostartManager {
    pub fn new(
        user_dir: PathBuf,
        system_dirs: Vec<PathBuf>,
        app_dirs: Vec<PathBuf>,
        service_name: &str,
    ) -> Self {
        let snapshot = list_desktop_files(&user_dir);
        let mut desktop_to_autostart = HashMap::new();
        for copy in &snapshot {
            if let Some(original) = find_original(&app_dirs, copy) {
                desktop_to_autostart.insert(original, copy.clone());
            }
        }

        let (tx, _) = tokio::sync::broadcast::channel(16);
        Self {
            user_dir,
            system_dirs,
            app_dirs,
            service_name: service_name.to_string(),
            state: Mutex::new(AutostartState {
                snapshot,
                desktop_to_autostart,
                dbus_called: false,
            }),
            event_tx: tx,
        }
    }

    /// Manager over the XDG autostart and application directories.
    pub fn from_env(service_name: &str) -> Self {
        let mut autostart_dirs = paths::autostart_directories();
        let user_dir = autostart_dirs.remove(0);
        Self::new(
            user_dir,
            autostart_dirs,
            paths::application_directories(),
            service_name,
        )
    }

    pub fn user_dir(&self) -> &Path {
        &self.user_dir
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AutostartChange> {
        self.event_tx.subscribe()
    }

    /// Copy a desktop entry into the autostart directory.
    pub fn add(&self, desktop: &Path) -> Result<(), LaunchdError> {
        let file_name = validated_file_name(desktop)?;
        if !desktop.is_file() || !self.app_dirs.iter().any(|dir| desktop.starts_with(dir)) {
            return Err(LaunchdError::NotFound(format!(
                "{} under the application directories",
                desktop.display()
            )));
        }
        if self.is_autostart(desktop) {
            return Err(LaunchdError::AlreadyPresent(desktop.display().to_string()));
        }

        let copy = self.user_dir.join(file_name);
        let app_id = file_name
            .strip_suffix(DESKTOP_SUFFIX)
            .unwrap_or(file_name)
            .to_string();

        {
            let mut state = self.state.lock().unwrap();
            state.dbus_called = true;
        }

        fs::create_dir_all(&self.user_dir)?;
        fs::copy(desktop, &copy)?;
        rewrite_copy(&copy, &self.service_name, &app_id)?;

        let mut state = self.state.lock().unwrap();
        state.snapshot.insert(copy.clone());
        state
            .desktop_to_autostart
            .insert(desktop.to_path_buf(), copy);
        drop(state);

        let _ = self
            .event_tx
            .send(AutostartChange::Added(desktop.to_path_buf()));
        Ok(())
    }

    /// Delete the autostart copy of a desktop entry.
    pub fn remove(&self, desktop: &Path) -> Result<(), LaunchdError> {
        let file_name = validated_file_name(desktop)?;
        let copy = self.user_dir.join(file_name);
        if !copy.is_file() {
            return Err(LaunchdError::NotFound(format!(
                "{} in the autostart list",
                desktop.display()
            )));
        }

        {
            let mut state = self.state.lock().unwrap();
            state.dbus_called = true;
        }

        fs::remove_file(&copy).map_err(|err| match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                LaunchdError::PermissionDenied(copy.display().to_string())
            }
            _ => LaunchdError::Io(err),
        })?;

        let mut state = self.state.lock().unwrap();
        state.snapshot.remove(&copy);
        state.desktop_to_autostart.remove(desktop);
        drop(state);

        let _ = self
            .event_tx
            .send(AutostartChange::Removed(desktop.to_path_buf()));
        Ok(())
    }

    /// Whether a desktop entry currently autostarts: its copy exists,
    /// parses, and is not hidden.
    pub fn is_autostart(&self, desktop: &Path) -> bool {
        let Some(file_name) = desktop.file_name() else {
            return false;
        };

        std::iter::once(&self.user_dir)
            .chain(self.system_dirs.iter())
            .map(|dir| dir.join(file_name))
            .filter(|copy| copy.is_file())
            .any(|copy| match DesktopEntry::parse(&copy) {
                Ok((entry, _)) => !entry.hidden(),
                Err(_) => false,
            })
    }

    /// Entries that will start with the session: present, valid, not
    /// hidden, and shown on the current desktop. User copies shadow
    /// system ones of the same name.
    pub fn autostart_list(&self) -> Vec<PathBuf> {
        let desktops = paths::current_desktops();
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for dir in std::iter::once(&self.user_dir).chain(self.system_dirs.iter()) {
            for path in list_desktop_files(dir) {
                let Some(name) = path.file_name().map(|n| n.to_os_string()) else {
                    continue;
                };
                if !seen.insert(name) {
                    continue;
                }
                match DesktopEntry::parse(&path) {
                    Ok((entry, _)) if !entry.hidden() && entry.should_show_in(&desktops) => {
                        out.push(path);
                    }
                    Ok(_) => {}
                    Err(err) => debug!("skipping autostart entry {}: {err}", path.display()),
                }
            }
        }

        out
    }

    /// Reconcile the user directory against the last snapshot after a
    /// watcher event. API-originated changes only refresh the snapshot.
    pub fn reconcile(&self) {
        let current = list_desktop_files(&self.user_dir);
        let mut changes = Vec::new();

        {
            let mut state = self.state.lock().unwrap();

            if state.dbus_called {
                state.dbus_called = false;
                state.snapshot = current;
                return;
            }

            let removed: Vec<PathBuf> = state
                .snapshot
                .difference(&current)
                .cloned()
                .collect();
            let added: Vec<PathBuf> = current
                .difference(&state.snapshot)
                .cloned()
                .collect();

            for copy in removed {
                let original = state
                    .desktop_to_autostart
                    .iter()
                    .find(|(_, v)| **v == copy)
                    .map(|(k, _)| k.clone())
                    .or_else(|| find_original(&self.app_dirs, &copy));
                if let Some(original) = original {
                    state.desktop_to_autostart.remove(&original);
                    changes.push(AutostartChange::Removed(original));
                } else {
                    debug!("no original found for removed {}", copy.display());
                }
            }

            for copy in added {
                let app_id = copy
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if let Err(err) = rewrite_copy(&copy, &self.service_name, &app_id) {
                    warn!("could not rewrite {}: {err}", copy.display());
                }

                let original = find_original(&self.app_dirs, &copy).unwrap_or_else(|| copy.clone());
                state
                    .desktop_to_autostart
                    .insert(original.clone(), copy.clone());
                changes.push(AutostartChange::Added(original));
            }

            state.snapshot = current;
        }

        for change in changes {
            let _ = self.event_tx.send(change);
        }
    }
}

fn validated_file_name(desktop: &Path) -> Result<&str, LaunchdError> {
    desktop
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| name.ends_with(DESKTOP_SUFFIX))
        .ok_or_else(|| {
            LaunchdError::InvalidDesktop(format!("{} is not a desktop path", desktop.display()))
        })
}

fn list_desktop_files(dir: &Path) -> HashSet<PathBuf> {
    let Ok(read) = fs::read_dir(dir) else {
        return HashSet::new();
    };
    read.filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("desktop")
        })
        .collect()
}

/// Locate the installed entry an autostart copy came from, by file name.
fn find_original(app_dirs: &[PathBuf], copy: &Path) -> Option<PathBuf> {
    let file_name = copy.file_name()?;
    app_dirs
        .iter()
        .map(|dir| dir.join(file_name))
        .find(|candidate| candidate.is_file())
}

/// Guarantee `Hidden=false` and the bookkeeping keys in the main group of
/// an autostart copy.
fn rewrite_copy(path: &Path, service_name: &str, app_id: &str) -> Result<(), LaunchdError> {
    let content = fs::read_to_string(path)?;
    let rewritten = set_main_group_keys(
        &content,
        &[
            ("Hidden", "false"),
            (KEY_CREATED_BY, service_name),
            (KEY_APP_ID, app_id),
        ],
    );
    fs::write(path, rewritten)?;
    Ok(())
}

/// Set keys inside the `[Desktop Entry]` group of key-file text, replacing
/// existing lines and appending missing ones at the end of the group.
fn set_main_group_keys(content: &str, keys: &[(&str, &str)]) -> String {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let header = format!("[{MAIN_GROUP}]");

    let start = match lines.iter().position(|line| line.trim() == header) {
        Some(pos) => pos + 1,
        None => {
            // No main group at all; create one up front.
            lines.insert(0, header);
            1
        }
    };
    let end = lines[start..]
        .iter()
        .position(|line| line.trim().starts_with('['))
        .map(|offset| start + offset)
        .unwrap_or(lines.len());

    let mut insert_at = end;
    for (key, value) in keys {
        let existing = lines[start..end].iter().position(|line| {
            line.split_once('=')
                .is_some_and(|(k, _)| k.trim() == *key)
        });
        match existing {
            Some(offset) => lines[start + offset] = format!("{key}={value}"),
            None => {
                lines.insert(insert_at, format!("{key}={value}"));
                insert_at += 1;
            }
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
