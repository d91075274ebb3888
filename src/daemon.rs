//! Daemon orchestration.
//!
//! Wires the bus, store, deduplicator, watchers and notifiers together,
//! runs the two periodic tasks (daily summary, hourly cleanup) and handles
//! orderly shutdown. The single ingest sink persists every event first,
//! then lets the deduplicator gate the notifier fanout.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::bus::{Bus, Sink};
use crate::config::{self, Config};
use crate::dedup::Deduplicator;
use crate::event::Event;
use crate::notifiers::{self, Notifier};
use crate::probes;
use crate::store::Store;
use crate::watchers::{self, Watcher};

const STATE_DIR: &str = "/var/lib/hostguard";
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(15 * 60);
const PRUNE_AFTER_DAYS: i64 = 30;

pub struct Daemon {
    cfg: Config,
    bus: Arc<Bus>,
    store: Arc<Store>,
    dedup: Arc<Deduplicator>,
    notifiers: Arc<Vec<Arc<dyn Notifier>>>,
    watchers: Vec<Box<dyn Watcher>>,
}

impl Daemon {
    pub fn new(cfg: Config) -> Result<Self> {
        std::fs::create_dir_all(STATE_DIR).context("creating state directory")?;
        let store = Arc::new(Store::open(crate::store::DEFAULT_DB_PATH).context("opening store")?);

        let bus = Arc::new(Bus::new());
        let cooldown = config::duration_or(&cfg.ports.cooldown, DEFAULT_COOLDOWN);
        let dedup = Arc::new(Deduplicator::new(cooldown));

        let mut watcher_list: Vec<Box<dyn Watcher>> = Vec::new();
        if cfg.ports.enabled {
            watcher_list.push(Box::new(watchers::ports::PortWatcher::new(
                &cfg.ports,
                Arc::clone(&bus),
            )));
        }
        if cfg.firewall.enabled {
            watcher_list.push(Box::new(watchers::firewall::FirewallWatcher::new(
                &cfg.firewall,
                Arc::clone(&bus),
            )));
        }
        watcher_list.push(Box::new(watchers::system::SystemWatcher::new(
            &cfg.system,
            Arc::clone(&bus),
        )));
        if cfg.file_integrity.enabled {
            watcher_list.push(Box::new(watchers::integrity::IntegrityWatcher::new(
                &cfg.file_integrity,
                Arc::clone(&bus),
            )));
        }
        if cfg.notifications.telegram.enabled && cfg.notifications.telegram.interactive {
            watcher_list.push(Box::new(watchers::bot::BotWatcher::new(
                &cfg.notifications.telegram,
                Arc::clone(&store),
            )));
        }
        if cfg.security_tools.enabled {
            watcher_list.push(Box::new(watchers::sectools::SectoolsWatcher::new(
                &cfg.security_tools,
                Arc::clone(&bus),
            )));
        }
        if cfg.docker.enabled {
            watcher_list.push(Box::new(watchers::docker::DockerWatcher::new(
                &cfg.docker,
                Arc::clone(&bus),
            )));
        }
        if cfg.network.enabled {
            watcher_list.push(Box::new(watchers::network::NetworkWatcher::new(
                &cfg.network,
                Arc::clone(&bus),
            )));
        }

        let mut notifier_list: Vec<Arc<dyn Notifier>> = Vec::new();
        if cfg.notifications.telegram.enabled {
            notifier_list.push(Arc::new(notifiers::telegram::Telegram::new(
                &cfg.notifications.telegram,
            )));
        }
        if cfg.notifications.ntfy.enabled {
            notifier_list.push(Arc::new(notifiers::ntfy::Ntfy::new(&cfg.notifications.ntfy)));
        }
        if cfg.notifications.discord.enabled {
            notifier_list.push(Arc::new(notifiers::discord::Discord::new(
                &cfg.notifications.discord,
            )));
        }
        if cfg.notifications.webhook.enabled {
            notifier_list.push(Arc::new(notifiers::webhook::Webhook::new(
                &cfg.notifications.webhook,
            )));
        }

        Ok(Daemon {
            cfg,
            bus,
            store,
            dedup,
            notifiers: Arc::new(notifier_list),
            watchers: watcher_list,
        })
    }

    /// Start everything and block until SIGINT or SIGTERM.
    pub async fn run(mut self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.bus.subscribe(Arc::new(Ingest {
            store: Arc::clone(&self.store),
            dedup: Arc::clone(&self.dedup),
            notifiers: Arc::clone(&self.notifiers),
        }));

        let watcher_count = self.watchers.len();
        let mut tasks = Vec::new();
        for mut watcher in self.watchers.drain(..) {
            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                let name = watcher.name();
                info!("starting watcher: {name}");
                if let Err(err) = watcher.start(rx).await {
                    // A watcher that cannot start costs its coverage, not
                    // the whole process.
                    error!("watcher {name} failed: {err:#}");
                }
                if let Err(err) = watcher.stop() {
                    warn!("watcher {name} stop: {err:#}");
                }
            }));
        }

        tasks.push(tokio::spawn(run_daily_summary(
            self.cfg.alerts.daily_summary.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.notifiers),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(run_cleanup(
            Arc::clone(&self.dedup),
            Arc::clone(&self.store),
            shutdown_rx.clone(),
        )));

        let hostname = probes::hostname();
        info!(
            "hostguard started: host {hostname}, {watcher_count} watchers, {} notifiers",
            self.notifiers.len()
        );
        let banner = format!(
            "🛡️ <b>Hostguard started</b> on {hostname}\nVersion {} | {} watchers | {} notifiers",
            env!("CARGO_PKG_VERSION"),
            watcher_count,
            self.notifiers.len()
        );
        for notifier in self.notifiers.iter() {
            let _ = notifier.send_raw(&banner).await;
        }

        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }

        info!("shutting down...");
        let _ = shutdown_tx.send(true);
        for task in tasks {
            let _ = task.await;
        }

        info!("hostguard stopped");
        Ok(())
    }

    /// Send a test message through every configured notifier.
    pub async fn test_notifiers(&self) -> Result<()> {
        for notifier in self.notifiers.iter() {
            info!("testing notifier: {}", notifier.name());
            notifier
                .test()
                .await
                .with_context(|| notifier.name().to_string())?;
            info!("notifier OK: {}", notifier.name());
        }
        Ok(())
    }
}

/// The single bus sink: persist, gate, fan out. Persistence happens before
/// any notifier sees the event.
struct Ingest {
    store: Arc<Store>,
    dedup: Arc<Deduplicator>,
    notifiers: Arc<Vec<Arc<dyn Notifier>>>,
}

#[async_trait]
impl Sink for Ingest {
    async fn deliver(&self, event: Event) {
        if let Err(err) = self.store.save(&event) {
            error!("failed to save event: {err:#}");
        }

        if !self.dedup.should_alert(&event) {
            debug!("event deduplicated: {} {}", event.kind.as_str(), event.message);
            return;
        }

        for notifier in self.notifiers.iter() {
            if let Err(err) = notifier.send(&event).await {
                error!("notification failed ({}): {err:#}", notifier.name());
            }
        }
    }
}

/// Fire the summary when the wall clock reaches the configured HH:MM, then
/// sleep past the minute so it cannot double-send.
async fn run_daily_summary(
    target: String,
    store: Arc<Store>,
    sinks: Arc<Vec<Arc<dyn Notifier>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    if target.is_empty() {
        return;
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(Duration::from_secs(60)) => {}
        }

        let now = chrono::Local::now().format("%H:%M").to_string();
        if now != target {
            continue;
        }

        let health = probes::system_health();
        let last_alert = store.last_alert_time();
        let message = notifiers::format_daily_summary(&probes::hostname(), &health, &last_alert);
        for sink in sinks.iter() {
            let _ = sink.send_raw(&message).await;
        }

        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(Duration::from_secs(61)) => {}
        }
    }
}

async fn run_cleanup(
    dedup: Arc<Deduplicator>,
    store: Arc<Store>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(Duration::from_secs(3600)) => {}
        }

        dedup.cleanup();
        match store.prune(PRUNE_AFTER_DAYS) {
            Ok(pruned) if pruned > 0 => info!("pruned {pruned} old events"),
            Ok(_) => {}
            Err(err) => warn!("prune failed: {err:#}"),
        }
    }
}
