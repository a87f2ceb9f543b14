//! Pure debouncer: timing and event deduplication only.
//!
//! Events arriving within the window for the same path coalesce; no
//! business logic, no global state access.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::actor::messages::ChangeKind;

/// Coalescing window per path. Editors fire bursts of events on save;
/// 50 ms swallows the burst without a perceptible delay.
pub(super) const DEBOUNCE_MS: u64 = 50;

pub(super) struct Debouncer {
    /// Path → ChangeKind (dedup is free via HashMap key uniqueness)
    changes: FxHashMap<PathBuf, ChangeKind>,
    last_event: Option<Instant>,
}

impl Debouncer {
    pub(super) fn new() -> Self {
        Self {
            changes: FxHashMap::default(),
            last_event: None,
        }
    }

    /// Add a notify event, applying dedup rules:
    /// - Removed + Created/Modified → the restore event wins
    /// - Modified + Removed → upgrade to Removed
    /// - Created + Removed → appeared then vanished, discard
    /// - otherwise first event wins
    pub(super) fn add_event(&mut self, event: &notify::Event) {
        use notify::EventKind;

        let kind = match event.kind {
            EventKind::Create(_) => ChangeKind::Created,
            EventKind::Remove(_) => ChangeKind::Removed,
            EventKind::Modify(modify) => {
                // Metadata-only changes (mtime/chmod noise) would cause
                // endless rebuild loops.
                if matches!(modify, notify::event::ModifyKind::Metadata(_)) {
                    return;
                }
                ChangeKind::Modified
            }
            _ => return,
        };

        for path in &event.paths {
            if is_temp_file(path) {
                continue;
            }
            self.record(path.clone(), kind);
        }
    }

    fn record(&mut self, path: PathBuf, kind: ChangeKind) {
        if let Some(&existing) = self.changes.get(&path) {
            match (existing, kind) {
                (ChangeKind::Removed, ChangeKind::Created | ChangeKind::Modified) => {
                    crate::debug!("watch"; "restore {}: {}", kind.label(), path.display());
                    self.changes.insert(path, kind);
                }
                (ChangeKind::Modified, ChangeKind::Removed) => {
                    crate::debug!("watch"; "upgrade modified->removed: {}", path.display());
                    self.changes.insert(path, ChangeKind::Removed);
                }
                (ChangeKind::Created, ChangeKind::Removed) => {
                    crate::debug!("watch"; "discard created+removed: {}", path.display());
                    self.changes.remove(&path);
                }
                _ => {}
            }
        } else {
            crate::debug!("watch"; "event {}: {}", kind.label(), path.display());
            self.changes.insert(path, kind);
        }
        self.last_event = Some(Instant::now());
    }

    /// Take coalesced events once the window has elapsed.
    pub(super) fn take_if_ready(&mut self) -> Option<Vec<(PathBuf, ChangeKind)>> {
        let last_event = self.last_event?;
        if last_event.elapsed() < Duration::from_millis(DEBOUNCE_MS) {
            return None;
        }
        self.last_event = None;
        let changes = std::mem::take(&mut self.changes);
        if changes.is_empty() {
            return None;
        }
        Some(changes.into_iter().collect())
    }

    /// Precise sleep until the window can next be ready.
    pub(super) fn sleep_duration(&self) -> Duration {
        match self.last_event {
            None => Duration::from_secs(86400),
            Some(last) => Duration::from_millis(DEBOUNCE_MS)
                .saturating_sub(last.elapsed())
                .max(Duration::from_millis(1)),
        }
    }

    #[cfg(test)]
    fn force_ready(&mut self) {
        self.last_event = Some(Instant::now() - Duration::from_millis(DEBOUNCE_MS + 1));
    }
}

/// Editor temp/backup artifacts never reach classification.
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn test_coalesces_same_path() {
        let mut d = Debouncer::new();
        d.record(path("/a/Main.elm"), ChangeKind::Modified);
        d.record(path("/a/Main.elm"), ChangeKind::Modified);
        d.force_ready();
        let events = d.take_if_ready().unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_not_ready_within_window() {
        let mut d = Debouncer::new();
        d.record(path("/a/Main.elm"), ChangeKind::Modified);
        assert!(d.take_if_ready().is_none());
    }

    #[test]
    fn test_modified_then_removed_upgrades() {
        let mut d = Debouncer::new();
        d.record(path("/a/Main.elm"), ChangeKind::Modified);
        d.record(path("/a/Main.elm"), ChangeKind::Removed);
        d.force_ready();
        let events = d.take_if_ready().unwrap();
        assert_eq!(events, [(path("/a/Main.elm"), ChangeKind::Removed)]);
    }

    #[test]
    fn test_created_then_removed_discards() {
        let mut d = Debouncer::new();
        d.record(path("/a/New.elm"), ChangeKind::Created);
        d.record(path("/a/New.elm"), ChangeKind::Removed);
        d.force_ready();
        assert!(d.take_if_ready().is_none());
    }

    #[test]
    fn test_removed_then_created_restores() {
        let mut d = Debouncer::new();
        d.record(path("/a/Main.elm"), ChangeKind::Removed);
        d.record(path("/a/Main.elm"), ChangeKind::Created);
        d.force_ready();
        let events = d.take_if_ready().unwrap();
        assert_eq!(events, [(path("/a/Main.elm"), ChangeKind::Created)]);
    }

    #[test]
    fn test_temp_files_filtered() {
        assert!(is_temp_file(Path::new("/a/.Main.elm.swp")));
        assert!(is_temp_file(Path::new("/a/Main.elm~")));
        assert!(is_temp_file(Path::new("/a/Main.elm.tmp")));
        assert!(!is_temp_file(Path::new("/a/Main.elm")));
    }

    #[test]
    fn test_sleep_duration_idle_is_long() {
        let d = Debouncer::new();
        assert!(d.sleep_duration() >= Duration::from_secs(3600));
    }
}
