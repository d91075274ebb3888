//! Packet-filter watcher.
//!
//! Two kinds of checks per configured (table, chain) pair:
//! - expectation checks: the chain's default policy and a required rule
//!   pattern, both configured; violations are Critical.
//! - drift check: any change in the digest of the rule list since the
//!   baseline; drift is Warning and the baseline is replaced so an
//!   identical state does not re-fire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::bus::Bus;
use crate::config::FirewallConfig;
use crate::event::{Event, EventType, FirewallState, Severity};
use crate::probes;

use super::Watcher;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

struct ChainSpec {
    table: String,
    chain: String,
    expect_policy: String,
    expect_rule: Option<Regex>,
}

pub struct FirewallWatcher {
    bus: Arc<Bus>,
    chains: Vec<ChainSpec>,
    interval: Duration,
    /// chain name → rule digest
    baselines: HashMap<String, String>,
}

impl FirewallWatcher {
    pub fn new(cfg: &FirewallConfig, bus: Arc<Bus>) -> Self {
        let chains = cfg
            .chains
            .iter()
            .map(|c| ChainSpec {
                table: c.table.clone(),
                chain: c.chain.clone(),
                expect_policy: c.expect_policy.clone(),
                // Validated at config load; a pattern that fails here is
                // simply not enforced.
                expect_rule: if c.expect_rule.is_empty() {
                    None
                } else {
                    Regex::new(&c.expect_rule).ok()
                },
            })
            .collect();

        FirewallWatcher {
            bus,
            chains,
            interval: crate::config::duration_or(&cfg.check_interval, DEFAULT_INTERVAL),
            baselines: HashMap::new(),
        }
    }

    fn check(&mut self) {
        for spec in &self.chains {
            let Ok(rules) = probes::chain_rules(&spec.table, &spec.chain) else {
                continue;
            };
            let policy = probes::chain_policy(&spec.table, &spec.chain);

            for event in expectation_events(spec, &policy, &rules) {
                self.bus.publish(event);
            }
            if let Some(event) = drift_event(&mut self.baselines, spec, &rules) {
                self.bus.publish(event);
            }
        }
    }

    fn check_expectations_once(&self) {
        for spec in &self.chains {
            let Ok(rules) = probes::chain_rules(&spec.table, &spec.chain) else {
                continue;
            };
            let policy = probes::chain_policy(&spec.table, &spec.chain);
            for event in expectation_events(spec, &policy, &rules) {
                self.bus.publish(event);
            }
        }
    }
}

#[async_trait]
impl Watcher for FirewallWatcher {
    fn name(&self) -> &'static str {
        "firewall"
    }

    async fn start(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("starting firewall watcher (interval {:?})", self.interval);

        for spec in &self.chains {
            match probes::chain_rules(&spec.table, &spec.chain) {
                Ok(rules) => {
                    self.baselines.insert(spec.chain.clone(), hash_rules(&rules));
                }
                Err(err) => warn!("cannot read chain {}: {err:#}", spec.chain),
            }
        }

        // Expectations are absolute, so violations are reported right away
        // rather than waiting out the first interval.
        self.check_expectations_once();

        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => self.check(),
            }
        }
    }
}

fn expectation_events(spec: &ChainSpec, policy: &str, rules: &[String]) -> Vec<Event> {
    let mut events = Vec::new();

    if !spec.expect_policy.is_empty() && !policy.eq_ignore_ascii_case(&spec.expect_policy) {
        let mut event = Event::new(
            EventType::FirewallChanged,
            Severity::Critical,
            "firewall",
            &spec.chain,
            format!(
                "Firewall policy changed: {} is {} (expected {})",
                spec.chain, policy, spec.expect_policy
            ),
        );
        event.suggested = format!("Run: sudo iptables -P {} {}", spec.chain, spec.expect_policy);
        event.firewall = Some(FirewallState {
            chain: spec.chain.clone(),
            table: spec.table.clone(),
            policy: policy.to_string(),
            ..Default::default()
        });
        events.push(event);
    }

    if let Some(re) = &spec.expect_rule {
        if !rules.iter().any(|r| re.is_match(r)) {
            let mut event = Event::new(
                EventType::FirewallChanged,
                Severity::Critical,
                "firewall",
                &spec.chain,
                format!(
                    "Expected rule missing in {} chain (pattern: {})",
                    spec.chain, re
                ),
            );
            event.suggested = format!(
                "Inspect the chain: sudo iptables -t {} -L {} -n --line-numbers",
                spec.table, spec.chain
            );
            event.firewall = Some(FirewallState {
                chain: spec.chain.clone(),
                table: spec.table.clone(),
                has_drop_rule: false,
                ..Default::default()
            });
            events.push(event);
        }
    }

    events
}

/// Compare the rule digest against the stored baseline. A chain seen for
/// the first time seeds the baseline silently.
fn drift_event(
    baselines: &mut HashMap<String, String>,
    spec: &ChainSpec,
    rules: &[String],
) -> Option<Event> {
    let current = hash_rules(rules);
    match baselines.get(&spec.chain) {
        None => {
            baselines.insert(spec.chain.clone(), current);
            None
        }
        Some(baseline) if *baseline == current => None,
        Some(_) => {
            baselines.insert(spec.chain.clone(), current.clone());
            let mut event = Event::new(
                EventType::FirewallChanged,
                Severity::Warning,
                "firewall",
                &spec.chain,
                format!("Firewall rules changed in {} chain", spec.chain),
            );
            event.details =
                "Rules differ from the last accepted state. Restart the daemon to accept the current rules."
                    .to_string();
            event.firewall = Some(FirewallState {
                chain: spec.chain.clone(),
                table: spec.table.clone(),
                rule_hash: current,
                ..Default::default()
            });
            Some(event)
        }
    }
}

/// Stable 16-hex-char digest of a rule list.
fn hash_rules(rules: &[String]) -> String {
    let mut hasher = Sha256::new();
    for rule in rules {
        hasher.update(rule.as_bytes());
    }
    format!("{:x}", hasher.finalize())[..16].to_string()
}
