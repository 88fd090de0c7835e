//! Debounced directory watching.
//!
//! One watcher instance runs on its own thread, draining notify events
//! and coalescing bursts before handing the changed paths to a callback.
//! Used for the application search paths (driving catalog refresh) and
//! the user autostart directory (driving reconciliation).

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, channel};
use std::time::Duration;

pub struct DirWatcher {
    _watcher: RecommendedWatcher,
    rx: Receiver<Result<Event, notify::Error>>,
}

impl DirWatcher {
    /// Watch the given directories (non-recursively); missing ones are
    /// skipped.
    pub fn new(watch_paths: &[PathBuf]) -> Result<Self, notify::Error> {
        let (tx, rx) = channel();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )?;

        for path in watch_paths {
            if path.exists() {
                watcher.watch(path, RecursiveMode::NonRecursive)?;
            }
        }

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Block on events forever, coalescing bursts within `debounce` and
    /// reporting each settled batch of changed paths.
    pub fn run<F: FnMut(Vec<PathBuf>)>(self, debounce: Duration, mut on_change: F) {
        loop {
            let Ok(first) = self.rx.recv() else {
                return;
            };

            let mut pending = HashSet::new();
            collect_paths(first, &mut pending);

            // Keep draining while events are still arriving.
            while let Ok(event) = self.rx.recv_timeout(debounce) {
                collect_paths(event, &mut pending);
            }

            if !pending.is_empty() {
                on_change(pending.into_iter().collect());
            }
        }
    }
}

fn collect_paths(event: Result<Event, notify::Error>, pending: &mut HashSet<PathBuf>) {
    let Ok(event) = event else {
        return;
    };
    if should_process_event(&event) {
        pending.extend(event.paths);
    }
}

fn should_process_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}
