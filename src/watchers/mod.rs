//! Watchers observe one slice of host state each and publish events on
//! transitions.
//!
//! Shared shape: snapshot the observable state silently at start-up (the
//! baseline), then on every tick snapshot again, diff against the baseline,
//! publish one event per transition and replace the baseline. A probe that
//! fails on a tick is skipped without touching the baseline.

pub mod bot;
pub mod docker;
pub mod firewall;
pub mod integrity;
pub mod network;
pub mod ports;
pub mod sectools;
pub mod system;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;

/// Contract implemented by every watcher. `start` blocks until the
/// shutdown signal fires and runs in its own task.
#[async_trait]
pub trait Watcher: Send {
    fn name(&self) -> &'static str;

    async fn start(&mut self, shutdown: watch::Receiver<bool>) -> Result<()>;

    /// Cleanup hook invoked after `start` returns.
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}
