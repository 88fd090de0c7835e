//! systemd user-manager client.
//!
//! Single D-Bus connection to org.freedesktop.systemd1. The daemon only
//! needs three things from it: starting transient units, stopping units,
//! and the UnitNew/UnitRemoved signal stream that drives instance
//! tracking. Everything is reached through the [`ServiceManager`] trait so
//! tests can inject a synthetic manager instead of the process-wide bus.

use crate::error::SystemdError;
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use log::info;
use std::path::PathBuf;
use std::time::Duration;
use zbus::Connection;
use zbus::zvariant::{OwnedObjectPath, Value};

/// Bounded wait for manager calls; expiry surfaces as a rejected launch.
const CALL_TIMEOUT: Duration = Duration::from_secs(25);

/// D-Bus proxy for the systemd manager interface
#[zbus::proxy(
    interface = "org.freedesktop.systemd1.Manager",
    default_service = "org.freedesktop.systemd1",
    default_path = "/org/freedesktop/systemd1"
)]
trait Systemd1Manager {
    fn start_transient_unit(
        &self,
        name: &str,
        mode: &str,
        properties: Vec<(String, Value<'_>)>,
        aux: Vec<(String, Vec<(String, Value<'_>)>)>,
    ) -> zbus::Result<OwnedObjectPath>;

    fn stop_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    /// Unit* signals are only emitted to subscribed peers.
    fn subscribe(&self) -> zbus::Result<()>;

    #[zbus(signal)]
    fn unit_new(&self, id: String, unit: OwnedObjectPath) -> zbus::Result<()>;

    #[zbus(signal)]
    fn unit_removed(&self, id: String, unit: OwnedObjectPath) -> zbus::Result<()>;
}

/// A unit lifecycle event as delivered by the manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitEvent {
    New { name: String, path: OwnedObjectPath },
    Removed { name: String, path: OwnedObjectPath },
}

/// Everything needed to submit one transient unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransientUnit {
    pub description: String,
    pub argv: Vec<String>,
    /// `KEY=value` pairs, already fully assembled and owned.
    pub environment: Vec<String>,
    pub working_directory: PathBuf,
}

/// The seam between the daemon and the host service manager.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn start_transient_unit(
        &self,
        name: &str,
        unit: &TransientUnit,
    ) -> Result<OwnedObjectPath, SystemdError>;

    async fn stop_unit(&self, name: &str) -> Result<OwnedObjectPath, SystemdError>;

    /// Merged stream of UnitNew/UnitRemoved signals, in delivery order.
    async fn unit_events(&self) -> Result<BoxStream<'static, UnitEvent>, SystemdError>;
}

/// Live client over the session bus.
pub struct SystemdClient {
    proxy: Systemd1ManagerProxy<'static>,
}

impl SystemdClient {
    /// Connect to the user manager and subscribe to unit signals.
    pub async fn connect() -> Result<Self, SystemdError> {
        let connection = Connection::session().await?;
        Self::with_connection(&connection).await
    }

    pub async fn with_connection(connection: &Connection) -> Result<Self, SystemdError> {
        let proxy = Systemd1ManagerProxy::new(connection).await?;
        proxy.subscribe().await?;
        info!("Connected to the systemd user manager");
        Ok(Self { proxy })
    }
}

#[async_trait]
impl ServiceManager for SystemdClient {
    async fn start_transient_unit(
        &self,
        name: &str,
        unit: &TransientUnit,
    ) -> Result<OwnedObjectPath, SystemdError> {
        let Some(program) = unit.argv.first() else {
            return Err(SystemdError::InvalidUnit("empty argv".into()));
        };

        // ExecStart is a(sasb): (binary, argv, ignore-failure).
        let exec_start = vec![(program.clone(), unit.argv.clone(), false)];
        let properties: Vec<(String, Value<'_>)> = vec![
            ("Description".to_string(), Value::new(unit.description.clone())),
            ("ExecStart".to_string(), Value::new(exec_start)),
            ("Environment".to_string(), Value::new(unit.environment.clone())),
            (
                "WorkingDirectory".to_string(),
                Value::new(unit.working_directory.to_string_lossy().into_owned()),
            ),
            (
                "CollectMode".to_string(),
                Value::new("inactive-or-failed".to_string()),
            ),
        ];

        let call = self.proxy.start_transient_unit(name, "replace", properties, Vec::new());
        match tokio::time::timeout(CALL_TIMEOUT, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SystemdError::Timeout),
        }
    }

    async fn stop_unit(&self, name: &str) -> Result<OwnedObjectPath, SystemdError> {
        let call = self.proxy.stop_unit(name, "replace");
        match tokio::time::timeout(CALL_TIMEOUT, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SystemdError::Timeout),
        }
    }

    async fn unit_events(&self) -> Result<BoxStream<'static, UnitEvent>, SystemdError> {
        let new = self
            .proxy
            .receive_unit_new()
            .await?
            .filter_map(|signal| async move {
                let args = signal.args().ok()?;
                Some(UnitEvent::New {
                    name: args.id().clone(),
                    path: args.unit().clone(),
                })
            });

        let removed = self
            .proxy
            .receive_unit_removed()
            .await?
            .filter_map(|signal| async move {
                let args = signal.args().ok()?;
                Some(UnitEvent::Removed {
                    name: args.id().clone(),
                    path: args.unit().clone(),
                })
            });

        Ok(stream::select(new, removed).boxed())
    }
}
