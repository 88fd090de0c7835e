//! The served bus interface.
//!
//! One object at `/org/capyshell/AppManager1` carries the whole API:
//! enumeration, launch, identification and autostart policy, plus the
//! `AutostartChanged` signal. Errors travel as their short kind string;
//! signals never carry errors.

use crate::error::LaunchdError;
use crate::services::Services;
use crate::services::autostart::{AutostartChange, AutostartManager};
use crate::services::identifier::Identifier;
use crate::services::launcher::LaunchOptions;
use capy_apps::catalog::BUS_PATH;
use log::warn;
use std::collections::HashMap;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::Arc;
use zbus::object_server::SignalEmitter;
use zbus::zvariant::{OwnedObjectPath, OwnedValue};

/// Well-known bus name of the daemon.
pub const SERVICE_NAME: &str = "org.capyshell.AppManager1";

pub struct AppManager1 {
    services: Services,
}

impl AppManager1 {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[zbus::interface(name = "org.capyshell.AppManager1")]
impl AppManager1 {
    /// Application object paths in insertion-stable order.
    async fn list(&self) -> Vec<OwnedObjectPath> {
        self.services
            .catalog
            .list()
            .into_iter()
            .filter_map(|path| OwnedObjectPath::try_from(path).ok())
            .collect()
    }

    /// Object path of one application; the root path when absent.
    async fn application(&self, app_id: String) -> OwnedObjectPath {
        self.services
            .catalog
            .lookup(&app_id)
            .and_then(|path| OwnedObjectPath::try_from(path).ok())
            .unwrap_or_else(root_path)
    }

    async fn launch(
        &self,
        app_id: String,
        action: String,
        fields: Vec<String>,
        options: HashMap<String, OwnedValue>,
    ) -> zbus::fdo::Result<OwnedObjectPath> {
        let options = parse_launch_options(&options);
        let path = self
            .services
            .launcher
            .launch(&app_id, &action, &fields, &options)
            .await?;
        OwnedObjectPath::try_from(path)
            .map_err(|err| LaunchdError::Internal(err.to_string()).into())
    }

    async fn update_application_info(&self, app_id_list: Vec<String>) {
        self.services.catalog.refresh(&app_id_list);
    }

    /// Resolve a pidfd to (app id, application object, instance object).
    async fn identify(
        &self,
        pidfd: zbus::zvariant::OwnedFd,
    ) -> zbus::fdo::Result<(String, OwnedObjectPath, OwnedObjectPath)> {
        let pid = Identifier::pid_from_pidfd(pidfd.as_raw_fd())?;
        let identity = self
            .services
            .identifier
            .identify(pid)
            .ok_or_else(|| LaunchdError::NotFound(format!("application of pid {pid}")))?;

        let app_object = self
            .services
            .catalog
            .lookup(&identity.app_id)
            .ok_or_else(|| LaunchdError::NotFound(identity.app_id.clone()))?;
        let instance_object = self
            .services
            .catalog
            .find_instance(&identity.app_id, &identity.instance_id)
            .map(|instance| instance.object_path);

        Ok((
            identity.app_id,
            OwnedObjectPath::try_from(app_object)
                .map_err(|err| LaunchdError::Internal(err.to_string()))?,
            instance_object
                .and_then(|path| OwnedObjectPath::try_from(path).ok())
                .unwrap_or_else(root_path),
        ))
    }

    async fn add_autostart(&self, path: String) -> bool {
        match self.services.autostart.add(Path::new(&path)) {
            Ok(()) => true,
            Err(err) => {
                warn!("AddAutostart {path}: {err}");
                false
            }
        }
    }

    async fn remove_autostart(&self, path: String) -> bool {
        match self.services.autostart.remove(Path::new(&path)) {
            Ok(()) => true,
            Err(err) => {
                warn!("RemoveAutostart {path}: {err}");
                false
            }
        }
    }

    async fn is_autostart(&self, path: String) -> bool {
        self.services.autostart.is_autostart(Path::new(&path))
    }

    async fn autostart_list(&self) -> Vec<String> {
        self.services
            .autostart
            .autostart_list()
            .into_iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect()
    }

    #[zbus(signal)]
    pub async fn autostart_changed(
        emitter: &SignalEmitter<'_>,
        kind: String,
        path: String,
    ) -> zbus::Result<()>;
}

/// Forward autostart events onto the bus as AutostartChanged signals.
pub fn spawn_autostart_signal_forwarder(
    connection: zbus::Connection,
    autostart: Arc<AutostartManager>,
) {
    tokio::spawn(async move {
        let mut events = autostart.subscribe();
        loop {
            let change = match events.recv().await {
                Ok(change) => change,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("autostart signal forwarder lagged, {skipped} event(s) lost");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };

            let iface = match connection
                .object_server()
                .interface::<_, AppManager1>(BUS_PATH)
                .await
            {
                Ok(iface) => iface,
                Err(err) => {
                    warn!("AutostartChanged not emitted: {err}");
                    continue;
                }
            };

            let (kind, path) = match change {
                AutostartChange::Added(path) => ("added", path),
                AutostartChange::Removed(path) => ("removed", path),
            };
            if let Err(err) = AppManager1::autostart_changed(
                iface.signal_emitter(),
                kind.to_string(),
                path.to_string_lossy().into_owned(),
            )
            .await
            {
                warn!("AutostartChanged not emitted: {err}");
            }
        }
    });
}

fn root_path() -> OwnedObjectPath {
    OwnedObjectPath::try_from("/").expect("root object path")
}

fn parse_launch_options(options: &HashMap<String, OwnedValue>) -> LaunchOptions {
    let mut out = LaunchOptions::default();

    if let Some(value) = options.get("path") {
        out.path = String::try_from(value.clone()).ok();
    }
    if let Some(value) = options.get("desktop-override-exec") {
        out.override_exec = String::try_from(value.clone()).ok();
    }
    if let Some(value) = options.get("env") {
        if let Ok(env) = Vec::<String>::try_from(value.clone()) {
            out.env = env;
        }
    }

    out
}
