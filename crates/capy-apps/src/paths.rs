//! Path helpers for XDG directories and desktop-file lookup.
//!
//! Search order follows the XDG base-directory convention: the user data
//! dir first, then each system data dir. Earlier directories shadow later
//! ones wherever an application id resolves in more than one.

use std::path::{Path, PathBuf};

pub fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_default())
}

/// `$<var>` when set and non-empty, else `$HOME/<fallback>`.
fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var_os(var)
        .map(PathBuf::from)
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| home_dir().join(fallback))
}

/// Colon-separated `$<var>` when set, else the given default list.
fn xdg_dir_list(var: &str, default: &str) -> Vec<PathBuf> {
    std::env::var(var)
        .unwrap_or_else(|_| default.to_string())
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Application search directories, user data dir first.
pub fn application_directories() -> Vec<PathBuf> {
    let mut dirs = vec![xdg_dir("XDG_DATA_HOME", ".local/share")];
    dirs.extend(xdg_dir_list("XDG_DATA_DIRS", "/usr/local/share:/usr/share"));
    dirs.into_iter().map(|dir| dir.join("applications")).collect()
}

/// Autostart directories; the first entry is the writable user directory.
pub fn autostart_directories() -> Vec<PathBuf> {
    let mut dirs = vec![user_autostart_directory()];
    dirs.extend(
        xdg_dir_list("XDG_CONFIG_DIRS", "/etc/xdg")
            .into_iter()
            .map(|dir| dir.join("autostart")),
    );
    dirs
}

/// The writable per-user autostart directory.
pub fn user_autostart_directory() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config").join("autostart")
}

/// Per-user config file of the daemon itself.
pub fn settings_path() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
        .join("capyshell")
        .join("launchd.json")
}

/// Desktops the session identifies as, from `$XDG_CURRENT_DESKTOP`.
pub fn current_desktops() -> Vec<String> {
    std::env::var("XDG_CURRENT_DESKTOP")
        .unwrap_or_default()
        .split(':')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Locate the desktop file for an application id in the given search
/// directories. First match wins. An id segment joined with `-` may stand
/// for a subdirectory, so dashes are retried as separators left to right
/// (`kde4-okular` also tries `kde4/okular`).
pub fn search_desktop_file_by_id(search_dirs: &[PathBuf], app_id: &str) -> Option<PathBuf> {
    for dir in search_dirs {
        let mut candidate = app_id.to_string();
        loop {
            let path = dir.join(format!("{candidate}.desktop"));
            if path.is_file() {
                return Some(path);
            }
            match candidate.find('-') {
                Some(pos) => candidate.replace_range(pos..pos + 1, "/"),
                None => break,
            }
        }
    }
    None
}

/// Derive an application id for a desktop file, matching it against the
/// search directories it may live under. Falls back to the bare file stem
/// for paths outside every search dir.
pub fn app_id_for(search_dirs: &[PathBuf], desktop_path: &Path) -> Option<String> {
    for dir in search_dirs {
        if let Some(id) = crate::app_id::app_id_from_path(dir, desktop_path) {
            return Some(id);
        }
    }
    let stem = desktop_path.file_name()?.to_str()?.strip_suffix(".desktop")?;
    Some(crate::app_id::unescape_app_id(stem))
}
