//! Launch-time collaborators reached over the bus.
//!
//! The launcher needs two answers from the rest of the desktop: whether
//! the app proxy currently has configuration (which decides proxy-variable
//! stripping) and the display scale factor. Both sit behind traits so
//! tests can inject fixed answers.

use async_trait::async_trait;
use log::debug;
use zbus::Connection;

#[async_trait]
pub trait ProxyConfig: Send + Sync {
    /// Current proxy configuration message; empty means no proxy.
    async fn proxy_message(&self) -> String;
}

#[async_trait]
pub trait DisplayScale: Send + Sync {
    async fn scale_factor(&self) -> f64;
}

#[zbus::proxy(
    interface = "org.deepin.dde.AppProxy1",
    default_service = "org.deepin.dde.AppProxy1",
    default_path = "/org/deepin/dde/AppProxy1"
)]
trait AppProxy {
    fn get_proxy(&self) -> zbus::Result<String>;
}

#[zbus::proxy(
    interface = "org.deepin.dde.XSettings1",
    default_service = "org.deepin.dde.XSettings1",
    default_path = "/org/deepin/dde/XSettings1"
)]
trait XSettings {
    fn get_scale_factor(&self) -> zbus::Result<f64>;
}

/// Proxy-message collaborator over the session bus.
pub struct BusProxyConfig {
    connection: Connection,
}

impl BusProxyConfig {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl ProxyConfig for BusProxyConfig {
    async fn proxy_message(&self) -> String {
        let proxy = match AppProxyProxy::new(&self.connection).await {
            Ok(proxy) => proxy,
            Err(err) => {
                debug!("app proxy unavailable: {err}");
                return String::new();
            }
        };
        proxy.get_proxy().await.unwrap_or_default()
    }
}

/// Scale-factor collaborator over the session bus.
pub struct BusDisplayScale {
    connection: Connection,
}

impl BusDisplayScale {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl DisplayScale for BusDisplayScale {
    async fn scale_factor(&self) -> f64 {
        let proxy = match XSettingsProxy::new(&self.connection).await {
            Ok(proxy) => proxy,
            Err(err) => {
                debug!("xsettings unavailable: {err}");
                return 1.0;
            }
        };
        match proxy.get_scale_factor().await {
            Ok(scale) if scale > 0.0 => scale,
            _ => 1.0,
        }
    }
}
