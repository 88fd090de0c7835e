//! Instance tracking.
//!
//! Consumes the service manager's UnitNew/UnitRemoved stream, decodes
//! unit names back into (application, instance) and keeps the catalog's
//! instance maps in step. Signals for foreign units are ignored; a
//! removal that outruns its own appearance is remembered for a short
//! grace interval so the late UnitNew does not resurrect a dead unit.

use capy_apps::{AppCatalog, AttachOutcome};
use capy_systemd::manager::{ServiceManager, UnitEvent};
use capy_systemd::unit_name;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How long a premature removal shadows its unit path.
const REMOVAL_GRACE: Duration = Duration::from_secs(5);

pub struct InstanceTracker {
    catalog: Arc<AppCatalog>,
    /// Unit paths removed before their UnitNew arrived.
    pending_removed: HashMap<String, Instant>,
}

impl InstanceTracker {
    pub fn new(catalog: Arc<AppCatalog>) -> Self {
        Self {
            catalog,
            pending_removed: HashMap::new(),
        }
    }

    /// Consume unit events until the stream ends.
    pub async fn run(mut self, manager: Arc<dyn ServiceManager>) {
        let mut events = match manager.unit_events().await {
            Ok(events) => events,
            Err(err) => {
                error!("could not subscribe to unit events: {err}");
                return;
            }
        };

        info!("Listening for unit lifecycle signals...");
        while let Some(event) = events.next().await {
            self.handle(event);
        }
        info!("Unit signal stream ended");
    }

    pub(crate) fn handle(&mut self, event: UnitEvent) {
        self.pending_removed
            .retain(|_, since| since.elapsed() < REMOVAL_GRACE);

        match event {
            UnitEvent::New { name, path } => self.on_unit_new(&name, path.as_str()),
            UnitEvent::Removed { name, path } => self.on_unit_removed(&name, path.as_str()),
        }
    }

    fn on_unit_new(&mut self, name: &str, path: &str) {
        let Some(identity) = unit_name::decode(name) else {
            return;
        };
        if identity.app_id.is_empty() {
            return;
        }

        if self.pending_removed.remove(path).is_some() {
            debug!("unit {name} was removed before it appeared, dropping");
            return;
        }

        let instance_id = if identity.instance_id.is_empty() {
            Uuid::new_v4().simple().to_string()
        } else {
            identity.instance_id
        };

        match self
            .catalog
            .attach_instance(&identity.app_id, &instance_id, path, true)
        {
            AttachOutcome::Attached => {
                debug!("instance {instance_id} of {} appeared at {path}", identity.app_id);
            }
            AttachOutcome::Duplicate => {
                debug!("duplicate UnitNew for {path}, skipping");
            }
            AttachOutcome::UnknownApp => {
                // Usually a race with an uninstall or daemon shutdown.
                warn!("couldn't find app {} in the catalog", identity.app_id);
            }
        }
    }

    fn on_unit_removed(&mut self, name: &str, path: &str) {
        let Some(identity) = unit_name::decode(name) else {
            return;
        };
        if identity.app_id.is_empty() {
            return;
        }

        if self.catalog.detach_instance(&identity.app_id, path).is_none() {
            self.pending_removed.insert(path.to_string(), Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use zbus::zvariant::OwnedObjectPath;

    fn catalog_with_editor() -> (TempDir, Arc<AppCatalog>) {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("org.example.Edit.desktop"),
            "[Desktop Entry]\nType=Application\nName=Editor\nExec=edit %U\n",
        )
        .unwrap();
        let catalog = Arc::new(AppCatalog::new(vec![dir.path().to_path_buf()]));
        catalog.scan();
        (dir, catalog)
    }

    fn new_event(name: &str, path: &str) -> UnitEvent {
        UnitEvent::New {
            name: name.to_string(),
            path: OwnedObjectPath::try_from(path).unwrap(),
        }
    }

    fn removed_event(name: &str, path: &str) -> UnitEvent {
        UnitEvent::Removed {
            name: name.to_string(),
            path: OwnedObjectPath::try_from(path).unwrap(),
        }
    }

    fn unit_path(tail: &str) -> String {
        format!("/org/freedesktop/systemd1/unit/{tail}")
    }

    #[test]
    fn unit_new_attaches_an_instance() {
        let (_dir, catalog) = catalog_with_editor();
        let mut tracker = InstanceTracker::new(catalog.clone());

        tracker.handle(new_event(
            "app-foo-org.example.Edit@u1.service",
            &unit_path("u1"),
        ));

        let instance = catalog.find_instance("org.example.Edit", "u1").unwrap();
        assert_eq!(instance.unit_path, unit_path("u1"));
        assert!(instance.supervised);
    }

    #[test]
    fn duplicate_unit_new_is_idempotent() {
        let (_dir, catalog) = catalog_with_editor();
        let mut tracker = InstanceTracker::new(catalog.clone());

        let event = new_event("app-capyshell-org\\x2eexample\\x2eEdit@u1.service", &unit_path("u1"));
        tracker.handle(event.clone());
        tracker.handle(event);

        let record = catalog.get("org.example.Edit").unwrap();
        assert_eq!(record.instances.len(), 1);
    }

    #[test]
    fn unit_removed_detaches_the_matching_instance() {
        let (_dir, catalog) = catalog_with_editor();
        let mut tracker = InstanceTracker::new(catalog.clone());

        tracker.handle(new_event(
            "app-capyshell-org\\x2eexample\\x2eEdit@u1.service",
            &unit_path("u1"),
        ));
        tracker.handle(removed_event(
            "app-capyshell-org\\x2eexample\\x2eEdit@u1.service",
            &unit_path("u1"),
        ));

        assert!(catalog.find_instance("org.example.Edit", "u1").is_none());
    }

    #[test]
    fn removal_before_appearance_is_buffered() {
        let (_dir, catalog) = catalog_with_editor();
        let mut tracker = InstanceTracker::new(catalog.clone());

        let name = "app-capyshell-org\\x2eexample\\x2eEdit@u1.service";
        tracker.handle(removed_event(name, &unit_path("u1")));
        tracker.handle(new_event(name, &unit_path("u1")));

        // The unit died before we saw it; nothing must linger.
        assert!(catalog.get("org.example.Edit").unwrap().instances.is_empty());
    }

    #[test]
    fn scope_units_are_tracked_too() {
        let (_dir, catalog) = catalog_with_editor();
        let mut tracker = InstanceTracker::new(catalog.clone());

        tracker.handle(new_event(
            "app-org\\x2eexample\\x2eEdit-deadbeef.scope",
            &unit_path("scope1"),
        ));

        assert!(catalog.find_instance("org.example.Edit", "deadbeef").is_some());
    }

    #[test]
    fn foreign_units_and_unknown_apps_are_ignored() {
        let (_dir, catalog) = catalog_with_editor();
        let mut tracker = InstanceTracker::new(catalog.clone());

        tracker.handle(new_event("dbus.socket", &unit_path("sock")));
        tracker.handle(new_event("app-capyshell-ghost@u9.service", &unit_path("u9")));

        assert!(catalog.get("org.example.Edit").unwrap().instances.is_empty());
    }

    #[test]
    fn missing_instance_id_is_generated() {
        let (_dir, catalog) = catalog_with_editor();
        let mut tracker = InstanceTracker::new(catalog.clone());

        tracker.handle(new_event(
            "app-capyshell-org\\x2eexample\\x2eEdit.service",
            &unit_path("anon"),
        ));

        let record = catalog.get("org.example.Edit").unwrap();
        let instance = record.instances.values().next().unwrap();
        assert_eq!(instance.instance_id.len(), 32);
    }
}
