//! File-integrity watcher.
//!
//! Subscribes to kernel filesystem notifications on each configured path
//! (file or directory). Regular files are digested into the baseline at
//! start-up; a modification event only fires when the digest actually
//! changed, which suppresses benign `touch`es. Directory entries report
//! create/remove of children with the child path. Unknown notification
//! kinds are ignored.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use notify::event::{AccessKind, AccessMode, EventKind, ModifyKind, RenameMode};
use notify::{RecursiveMode, Watcher as NotifyWatcher};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::config::FileIntegrityConfig;
use crate::event::{Event, EventType, Severity};

use super::Watcher;

struct WatchEntry {
    path: PathBuf,
    severity: Severity,
    is_dir: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Modified,
    Attrib,
    Deleted,
    Created,
    Removed,
}

impl Change {
    fn as_str(&self) -> &'static str {
        match self {
            Change::Modified => "modified",
            Change::Attrib => "attrib",
            Change::Deleted => "deleted",
            Change::Created => "created",
            Change::Removed => "removed",
        }
    }
}

pub struct IntegrityWatcher {
    bus: Arc<Bus>,
    config: FileIntegrityConfig,
    entries: Vec<WatchEntry>,
    /// path → SHA256 baseline for regular files
    hashes: HashMap<PathBuf, String>,
}

impl IntegrityWatcher {
    pub fn new(cfg: &FileIntegrityConfig, bus: Arc<Bus>) -> Self {
        IntegrityWatcher {
            bus,
            config: cfg.clone(),
            entries: Vec::new(),
            hashes: HashMap::new(),
        }
    }

    fn handle(&mut self, notification: notify::Event) {
        let paths = notification.paths.clone();
        for path in &paths {
            let Some(idx) = self.entry_for(path) else {
                continue;
            };
            let is_self = self.entries[idx].path == *path;
            let Some(change) = classify(&notification.kind, is_self) else {
                continue;
            };
            if let Some(event) = self.change_event(idx, path, change) {
                self.bus.publish(event);
            }
        }
    }

    /// The entry watching this path: an exact match, or the parent
    /// directory entry for children of a watched directory.
    fn entry_for(&self, path: &Path) -> Option<usize> {
        if let Some(idx) = self.entries.iter().position(|e| e.path == *path) {
            return Some(idx);
        }
        self.entries
            .iter()
            .position(|e| e.is_dir && path.parent() == Some(e.path.as_path()))
    }

    fn change_event(&mut self, idx: usize, target: &Path, change: Change) -> Option<Event> {
        let severity = self.entries[idx].severity;
        let watched = self.entries[idx].path.display().to_string();
        let shown = target.display();

        let event = match change {
            Change::Modified => {
                let (old, new) = modified_hashes(&mut self.hashes, target)?;
                let mut e = Event::new(
                    EventType::FileChanged,
                    severity,
                    "file_integrity",
                    change.as_str(),
                    format!("File modified: {shown}"),
                );
                e.details = format!("SHA256 {} → {}", &old[..12], &new[..12]);
                e.suggested = format!("Review the change: sudo cat {shown}");
                e
            }
            Change::Attrib => {
                let meta = std::fs::metadata(target).ok()?;
                let mut e = Event::new(
                    EventType::FileChanged,
                    severity,
                    "file_integrity",
                    change.as_str(),
                    format!("File permissions changed: {shown}"),
                );
                use std::os::unix::fs::PermissionsExt;
                e.details = format!("Mode: {:o}", meta.permissions().mode() & 0o7777);
                e.suggested = format!("Verify ownership: ls -la {shown}");
                e
            }
            Change::Deleted => {
                let mut e = Event::new(
                    EventType::FileChanged,
                    severity,
                    "file_integrity",
                    change.as_str(),
                    format!("Watched file deleted or moved: {shown}"),
                );
                e.suggested = "Investigate: sudo journalctl -n 50".to_string();
                e
            }
            Change::Created => {
                let mut e = Event::new(
                    EventType::FileChanged,
                    severity,
                    "file_integrity",
                    change.as_str(),
                    format!("File created in watched directory: {shown}"),
                );
                e.details = format!("In: {watched}");
                e.suggested = format!("Review: ls -la {shown}");
                e
            }
            Change::Removed => {
                let mut e = Event::new(
                    EventType::FileChanged,
                    severity,
                    "file_integrity",
                    change.as_str(),
                    format!("File removed from watched directory: {shown}"),
                );
                e.details = format!("From: {watched}");
                e
            }
        };
        Some(event)
    }
}

#[async_trait]
impl Watcher for IntegrityWatcher {
    fn name(&self) -> &'static str {
        "file_integrity"
    }

    async fn start(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut fswatcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                let _ = tx.send(res);
            })
            .context("initialising filesystem notifications")?;

        let paths = self.config.paths.clone();
        for wp in &paths {
            let path = PathBuf::from(&wp.path);
            let Ok(meta) = std::fs::metadata(&path) else {
                debug!("path not found, skipping: {}", wp.path);
                continue;
            };
            if let Err(err) = fswatcher.watch(&path, RecursiveMode::NonRecursive) {
                warn!("failed to watch {}: {err}", wp.path);
                continue;
            }

            let severity = if wp.severity == "critical" {
                Severity::Critical
            } else {
                Severity::Warning
            };
            if !meta.is_dir() {
                if let Some(hash) = hash_file(&path) {
                    self.hashes.insert(path.clone(), hash);
                }
            }
            self.entries.push(WatchEntry {
                path,
                severity,
                is_dir: meta.is_dir(),
            });
        }

        info!("file integrity monitoring active: {} watches", self.entries.len());

        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                received = rx.recv() => match received {
                    Some(Ok(notification)) => self.handle(notification),
                    Some(Err(err)) => warn!("filesystem notification error: {err}"),
                    None => return Ok(()),
                }
            }
        }
    }
}

/// Map a notification kind onto a change. `is_self` marks events on the
/// watched path itself rather than a directory child.
fn classify(kind: &EventKind, is_self: bool) -> Option<Change> {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write))
        | EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Any) => Some(Change::Modified),
        EventKind::Modify(ModifyKind::Metadata(_)) => Some(Change::Attrib),
        EventKind::Modify(ModifyKind::Name(mode)) => {
            if is_self {
                Some(Change::Deleted)
            } else {
                match mode {
                    RenameMode::From => Some(Change::Removed),
                    RenameMode::To => Some(Change::Created),
                    _ => None,
                }
            }
        }
        EventKind::Remove(_) => Some(if is_self { Change::Deleted } else { Change::Removed }),
        EventKind::Create(_) => Some(Change::Created),
        _ => None,
    }
}

/// Re-digest the target and compare against the stored baseline. Returns
/// (old, new) only when the content actually changed; the first sight of
/// a path just seeds its baseline.
fn modified_hashes(
    hashes: &mut HashMap<PathBuf, String>,
    target: &Path,
) -> Option<(String, String)> {
    let new = hash_file(target)?;
    let old = hashes.insert(target.to_path_buf(), new.clone());
    match old {
        Some(old) if old != new => Some((old, new)),
        _ => None,
    }
}

fn hash_file(path: &Path) -> Option<String> {
    let data = std::fs::read(path).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Some(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use tempfile::TempDir;

    #[test]
    fn classify_maps_notification_kinds() {
        let close_write = EventKind::Access(AccessKind::Close(AccessMode::Write));
        assert_eq!(classify(&close_write, true), Some(Change::Modified));

        let data = EventKind::Modify(ModifyKind::Data(DataChange::Content));
        assert_eq!(classify(&data, true), Some(Change::Modified));

        let meta = EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions));
        assert_eq!(classify(&meta, true), Some(Change::Attrib));

        let remove = EventKind::Remove(RemoveKind::File);
        assert_eq!(classify(&remove, true), Some(Change::Deleted));
        assert_eq!(classify(&remove, false), Some(Change::Removed));

        let create = EventKind::Create(CreateKind::File);
        assert_eq!(classify(&create, false), Some(Change::Created));

        let moved_out = EventKind::Modify(ModifyKind::Name(RenameMode::From));
        assert_eq!(classify(&moved_out, false), Some(Change::Removed));
        let moved_in = EventKind::Modify(ModifyKind::Name(RenameMode::To));
        assert_eq!(classify(&moved_in, false), Some(Change::Created));
        assert_eq!(classify(&moved_in, true), Some(Change::Deleted));

        // Unknown kinds are ignored.
        assert_eq!(classify(&EventKind::Other, true), None);
        assert_eq!(
            classify(&EventKind::Access(AccessKind::Read), true),
            None
        );
    }

    #[test]
    fn unchanged_digest_is_suppressed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("passwd");
        std::fs::write(&path, "root:x:0:0\n").unwrap();

        let mut hashes = HashMap::new();
        hashes.insert(path.clone(), hash_file(&path).unwrap());

        // A touch rewrites the same bytes: no change reported.
        std::fs::write(&path, "root:x:0:0\n").unwrap();
        assert!(modified_hashes(&mut hashes, &path).is_none());

        // A real edit reports old and new digests.
        std::fs::write(&path, "root:x:0:0\nevil:x:0:0\n").unwrap();
        let (old, new) = modified_hashes(&mut hashes, &path).unwrap();
        assert_ne!(old, new);
        assert_eq!(hashes.get(&path), Some(&new));
    }

    #[test]
    fn first_sight_seeds_baseline_silently() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fresh");
        std::fs::write(&path, "contents").unwrap();

        let mut hashes = HashMap::new();
        assert!(modified_hashes(&mut hashes, &path).is_none());
        assert!(hashes.contains_key(&path));
    }

    #[test]
    fn unreadable_file_keeps_baseline() {
        let mut hashes = HashMap::new();
        hashes.insert(PathBuf::from("/nonexistent/x"), "abc".to_string());
        assert!(modified_hashes(&mut hashes, Path::new("/nonexistent/x")).is_none());
        assert_eq!(hashes.get(Path::new("/nonexistent/x")).unwrap(), "abc");
    }

    #[test]
    fn entry_lookup_prefers_exact_match_then_parent_dir() {
        let bus = Arc::new(Bus::new());
        let mut w = IntegrityWatcher::new(&FileIntegrityConfig::default(), bus);
        w.entries.push(WatchEntry {
            path: PathBuf::from("/etc/passwd"),
            severity: Severity::Critical,
            is_dir: false,
        });
        w.entries.push(WatchEntry {
            path: PathBuf::from("/etc/cron.d"),
            severity: Severity::Warning,
            is_dir: true,
        });

        assert_eq!(w.entry_for(Path::new("/etc/passwd")), Some(0));
        assert_eq!(w.entry_for(Path::new("/etc/cron.d/backdoor")), Some(1));
        assert_eq!(w.entry_for(Path::new("/etc/hostname")), None);
        // Children of a watched plain file do not resolve.
        assert_eq!(w.entry_for(Path::new("/etc/passwd/child")), None);
    }

    #[test]
    fn modification_event_carries_configured_severity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sshd_config");
        std::fs::write(&path, "PermitRootLogin no\n").unwrap();

        let bus = Arc::new(Bus::new());
        let mut w = IntegrityWatcher::new(&FileIntegrityConfig::default(), bus);
        w.entries.push(WatchEntry {
            path: path.clone(),
            severity: Severity::Critical,
            is_dir: false,
        });
        w.hashes.insert(path.clone(), hash_file(&path).unwrap());

        std::fs::write(&path, "PermitRootLogin yes\n").unwrap();
        let event = w.change_event(0, &path, Change::Modified).unwrap();
        assert_eq!(event.kind, EventType::FileChanged);
        assert_eq!(event.severity, Severity::Critical);
        assert!(event.message.contains("File modified"));
        assert!(event.details.starts_with("SHA256 "));
        assert!(event.id.contains("modified"));
    }

    #[test]
    fn removed_event_names_parent_directory() {
        let bus = Arc::new(Bus::new());
        let mut w = IntegrityWatcher::new(&FileIntegrityConfig::default(), bus);
        w.entries.push(WatchEntry {
            path: PathBuf::from("/etc/cron.d"),
            severity: Severity::Warning,
            is_dir: true,
        });

        let event = w
            .change_event(0, Path::new("/etc/cron.d/job"), Change::Removed)
            .unwrap();
        assert!(event.message.contains("removed from watched directory"));
        assert!(event.details.contains("/etc/cron.d"));
        assert_eq!(event.severity, Severity::Warning);
    }
}
