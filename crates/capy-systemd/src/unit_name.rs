//! Unit-name codec.
//!
//! Launched applications run as transient units whose names embed the
//! application id and an instance id:
//!
//! - service style: `app-<launcher>-<escaped_app_id>@<instance_id>.service`
//! - scope style:   `app-<escaped_app_id>-<instance_id>.scope`
//!
//! The escaped id writes every byte outside `[A-Za-z0-9_]` as `\xNN`, so
//! `-` and `@` inside the raw id can never confuse the decoder.

use capy_apps::app_id::{escape_app_id, unescape_app_id};
use log::debug;

/// Launcher token carried in service-style unit names.
pub const LAUNCHER_TOKEN: &str = "capyshell";

/// Decoded (application id, instance id) pair. The instance id may be
/// empty for service units without an `@` part; callers generate one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitIdentity {
    pub app_id: String,
    pub instance_id: String,
}

/// Service-style unit name for a launch performed by this daemon.
pub fn encode_service(app_id: &str, instance_id: &str) -> String {
    format!(
        "app-{LAUNCHER_TOKEN}-{}@{instance_id}.service",
        escape_app_id(app_id)
    )
}

/// Scope-style unit name for an externally-forked process.
pub fn encode_scope(app_id: &str, instance_id: &str) -> String {
    format!("app-{}-{instance_id}.scope", escape_app_id(app_id))
}

/// Decode a unit name back into its identity. Foreign suffixes yield
/// `None` and the corresponding event must be ignored.
pub fn decode(unit_name: &str) -> Option<UnitIdentity> {
    if let Some(stem) = unit_name.strip_suffix(".service") {
        let (head, instance_id) = match stem.rsplit_once('@') {
            Some((head, instance)) => (head, instance.to_string()),
            None => (stem, String::new()),
        };
        // Drop the `app-<launcher>-` prefix if one exists.
        let escaped = head.rsplit('-').next().unwrap_or(head);
        return Some(UnitIdentity {
            app_id: unescape_app_id(escaped),
            instance_id,
        });
    }

    if let Some(stem) = unit_name.strip_suffix(".scope") {
        let mut segments: Vec<&str> = stem.split('-').collect();
        let instance_id = segments.pop()?.to_string();
        let escaped = segments.pop()?;
        return Some(UnitIdentity {
            app_id: unescape_app_id(escaped),
            instance_id,
        });
    }

    debug!("not a service or scope unit: {unit_name}, ignoring");
    None
}
