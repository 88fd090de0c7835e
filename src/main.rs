//! capy-launchd - application manager daemon for CapyShell.
//!
//! Discovers desktop entries, launches applications as transient systemd
//! user units, tracks their instances from unit lifecycle signals and
//! serves the org.capyshell.AppManager1 interface on the session bus.

mod dbus;
mod error;
mod services;

use dbus::{AppManager1, SERVICE_NAME};
use log::info;
use std::error::Error;
use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting capy-launchd...");

    let connection = zbus::Connection::session().await?;
    let services = services::start_all(&connection, SERVICE_NAME).await;

    connection
        .object_server()
        .at(capy_apps::catalog::BUS_PATH, AppManager1::new(services.clone()))
        .await?;
    connection.request_name(SERVICE_NAME).await?;
    dbus::spawn_autostart_signal_forwarder(connection.clone(), services.autostart.clone());

    info!("capy-launchd running as {SERVICE_NAME}");

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }

    info!("Shutting down");
    Ok(())
}
