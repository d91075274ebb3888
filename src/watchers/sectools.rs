//! Antivirus / rootkit-scanner log tail.
//!
//! Tails the ClamAV and rkhunter logs by byte offset, emitting a Critical
//! event per matching line. Offsets are seeded to the current file size on
//! start-up so historical findings are not replayed, and reset to zero when
//! a file shrinks (log rotation). A missing log file means the tool is not
//! installed and is silently skipped.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::config::SecurityToolsConfig;
use crate::event::{Event, EventType, Severity};

use super::Watcher;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

pub struct SectoolsWatcher {
    bus: Arc<Bus>,
    interval: Duration,
    clamav_log: PathBuf,
    rkhunter_log: PathBuf,
    /// log path → last read byte offset
    offsets: HashMap<PathBuf, u64>,
}

impl SectoolsWatcher {
    pub fn new(cfg: &SecurityToolsConfig, bus: Arc<Bus>) -> Self {
        SectoolsWatcher {
            bus,
            interval: crate::config::duration_or(&cfg.poll_interval, DEFAULT_INTERVAL),
            clamav_log: PathBuf::from(&cfg.clamav_log),
            rkhunter_log: PathBuf::from(&cfg.rkhunter_log),
            offsets: HashMap::new(),
        }
    }

    fn check(&mut self) {
        let clamav = self.clamav_log.clone();
        let rkhunter = self.rkhunter_log.clone();
        for event in self.scan_log(&clamav, EventType::MalwareFound, is_clamav_match) {
            self.bus.publish(event);
        }
        for event in self.scan_log(&rkhunter, EventType::RootkitWarning, is_rkhunter_match) {
            self.bus.publish(event);
        }
    }

    /// Read complete lines appended since the last check and return an
    /// event per matching line. The stored offset advances only past
    /// complete lines; a partial trailing line is left for the next tick.
    fn scan_log(
        &mut self,
        path: &Path,
        kind: EventType,
        matches: fn(&str) -> bool,
    ) -> Vec<Event> {
        let Ok(meta) = std::fs::metadata(path) else {
            return Vec::new(); // tool not installed
        };

        let mut offset = self.offsets.get(path).copied().unwrap_or(0);
        if meta.len() < offset {
            debug!("log rotation detected, rescanning from start: {}", path.display());
            offset = 0;
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(err) => {
                warn!("could not open log {}: {err}", path.display());
                return Vec::new();
            }
        };
        let mut reader = BufReader::new(file);
        if let Err(err) = reader.seek(SeekFrom::Start(offset)) {
            warn!("seek failed on {}: {err}", path.display());
            return Vec::new();
        }

        let mut events = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(n) => {
                    if !line.ends_with('\n') {
                        break; // incomplete line, pick it up next tick
                    }
                    offset += n as u64;
                    let text = line.trim_end();
                    if matches(text) {
                        info!("security tool match in {}: {}", path.display(), text);
                        let mut event =
                            Event::new(kind, Severity::Critical, "sectools", "", text.to_string());
                        event.details = format!("Log file: {}", path.display());
                        event.suggested = suggested_action(kind);
                        events.push(event);
                    }
                }
                Err(err) => {
                    warn!("read failed on {}: {err}", path.display());
                    break;
                }
            }
        }

        self.offsets.insert(path.to_path_buf(), offset);
        events
    }
}

#[async_trait]
impl Watcher for SectoolsWatcher {
    fn name(&self) -> &'static str {
        "sectools"
    }

    async fn start(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            "starting sectools watcher (interval {:?}, clamav {}, rkhunter {})",
            self.interval,
            self.clamav_log.display(),
            self.rkhunter_log.display()
        );

        // Historical entries are ignored: offsets start at end of file.
        for path in [self.clamav_log.clone(), self.rkhunter_log.clone()] {
            match std::fs::metadata(&path) {
                Ok(meta) => {
                    self.offsets.insert(path, meta.len());
                }
                Err(_) => debug!("log not found at startup (tool may not be installed): {}", path.display()),
            }
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => self.check(),
            }
        }
    }
}

/// Genuine ClamAV findings. Stat-error noise also contains "FOUND" wording
/// alongside "No such file" and is filtered out.
fn is_clamav_match(line: &str) -> bool {
    line.contains("FOUND") && !line.contains("No such file")
}

fn is_rkhunter_match(line: &str) -> bool {
    line.contains("Warning:")
}

fn suggested_action(kind: EventType) -> String {
    match kind {
        EventType::MalwareFound => {
            "Quarantine or remove the flagged file. Run: sudo clamscan -r --remove /path/to/file"
                .to_string()
        }
        EventType::RootkitWarning => {
            "Review the report: sudo rkhunter --report-warnings-only. Investigate flagged items."
                .to_string()
        }
        _ => String::new(),
    }
}
