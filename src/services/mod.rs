//! Core services of the application manager.
//!
//! Each service owns one concern and runs its own background loop where
//! it needs one:
//!
//! - `launcher` - the launch pipeline onto transient systemd units
//! - `tracker` - unit lifecycle signals -> catalog instances
//! - `identifier` - pidfd -> (application, instance)
//! - `autostart` - the user autostart set and its reconciliation
//! - `watcher` - debounced directory watching
//! - `settings`, `meminfo`, `collaborators` - configuration and the
//!   launch-time collaborators

pub mod autostart;
pub mod collaborators;
pub mod identifier;
pub mod launcher;
pub mod meminfo;
pub mod settings;
pub mod tracker;
pub mod watcher;

use autostart::AutostartManager;
use capy_apps::{AppCatalog, DesktopEntry, paths};
use capy_systemd::SystemdClient;
use capy_systemd::manager::ServiceManager;
use collaborators::{BusDisplayScale, BusProxyConfig};
use identifier::Identifier;
use launcher::{LaunchOptions, Launcher};
use log::{debug, info, warn};
use meminfo::ProcMemoryGate;
use settings::Settings;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracker::InstanceTracker;
use watcher::DirWatcher;

const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Handles shared between the bus interface and the background loops.
#[derive(Clone)]
pub struct Services {
    pub catalog: Arc<AppCatalog>,
    pub launcher: Arc<Launcher>,
    pub autostart: Arc<AutostartManager>,
    pub identifier: Arc<Identifier>,
}

/// Build every service and start the background loops.
/// Call this once from main before serving the bus interface.
pub async fn start_all(connection: &zbus::Connection, service_name: &str) -> Services {
    info!("Starting services...");

    let settings = Arc::new(Settings::load(&paths::settings_path()));
    let catalog = Arc::new(AppCatalog::from_env());
    catalog.scan();

    let manager: Option<Arc<dyn ServiceManager>> =
        match SystemdClient::with_connection(connection).await {
            Ok(client) => Some(Arc::new(client)),
            Err(err) => {
                warn!("systemd user manager unavailable, launches will be unsupervised: {err}");
                None
            }
        };

    let launcher = Arc::new(Launcher::new(
        catalog.clone(),
        settings,
        manager.clone(),
        Arc::new(BusProxyConfig::new(connection.clone())),
        Arc::new(BusDisplayScale::new(connection.clone())),
        Arc::new(ProcMemoryGate),
    ));
    let autostart = Arc::new(AutostartManager::from_env(service_name));
    let identifier = Arc::new(Identifier::new());

    if let Some(manager) = manager {
        tokio::spawn(InstanceTracker::new(catalog.clone()).run(manager));
    }

    spawn_application_watcher(catalog.clone());
    spawn_autostart_watcher(autostart.clone());
    start_autostart_programs(catalog.clone(), launcher.clone(), autostart.clone());

    Services {
        catalog,
        launcher,
        autostart,
        identifier,
    }
}

/// Keep the catalog live over the application search paths.
fn spawn_application_watcher(catalog: Arc<AppCatalog>) {
    std::thread::spawn(move || {
        let dirs = catalog.search_dirs().to_vec();
        match DirWatcher::new(&dirs) {
            Ok(watcher) => {
                let refresh_catalog = catalog.clone();
                watcher.run(WATCH_DEBOUNCE, move |changed| {
                    let ids: Vec<String> = changed
                        .iter()
                        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("desktop"))
                        .filter_map(|p| paths::app_id_for(refresh_catalog.search_dirs(), p))
                        .collect();
                    if !ids.is_empty() {
                        refresh_catalog.refresh(&ids);
                    }
                });
            }
            Err(err) => warn!("application directory watcher disabled: {err}"),
        }
    });
}

/// Reconcile external edits of the user autostart directory.
fn spawn_autostart_watcher(autostart: Arc<AutostartManager>) {
    std::thread::spawn(move || {
        let user_dir = autostart.user_dir().to_path_buf();
        match DirWatcher::new(&[user_dir]) {
            Ok(watcher) => {
                watcher.run(WATCH_DEBOUNCE, move |_changed| {
                    autostart.reconcile();
                });
            }
            Err(err) => warn!("autostart watcher disabled: {err}"),
        }
    });
}

/// Launch the surviving autostart set once at session start.
fn start_autostart_programs(
    catalog: Arc<AppCatalog>,
    launcher: Arc<Launcher>,
    autostart: Arc<AutostartManager>,
) {
    tokio::spawn(async move {
        for path in autostart.autostart_list() {
            let Some(app_id) = autostart_app_id(&path) else {
                continue;
            };
            if catalog.lookup(&app_id).is_none() {
                debug!("autostart entry {} has no catalog counterpart", path.display());
                continue;
            }
            if let Err(err) = launcher
                .launch(&app_id, "", &[], &LaunchOptions::default())
                .await
            {
                warn!("autostart of {app_id} failed: {err}");
            }
        }
    });
}

/// Application id of an autostart copy: the bookkeeping key when the copy
/// was written by us, else the file stem.
fn autostart_app_id(path: &Path) -> Option<String> {
    if let Ok((entry, _)) = DesktopEntry::parse(path) {
        if let Some(id) = entry.main().get("X-Deepin-AppID") {
            return Some(id.to_string());
        }
    }
    path.file_stem().map(|stem| stem.to_string_lossy().into_owned())
}
