// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Circuit breakers for correction hosts.
//
// Correction is optional work: a host that keeps failing or hanging only
// costs jobs their stage timeout. After three consecutive failed requests a
// host's circuit opens and correction stages short-circuit to `Unavailable`,
// which falls back to uncorrected text. Once the cooldown passes, a single
// job is let through to test the host again.
//
// Every request goes through a `CorrectionAttempt`. An attempt dropped
// before it is settled (its stage timed out and the call was abandoned)
// counts as a failure.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const FAILURE_THRESHOLD: u32 = 3;

/// A test request that has not reported back by then is written off.
const PROBE_DEADLINE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Correction requests go out.
    Closed,
    /// The host is failing; requests are refused until the cooldown ends.
    Open,
    /// One job is testing the host; others are refused.
    HalfOpen,
}

/// Breaker state of one correction host.
#[derive(Debug, Clone)]
pub struct HostCircuit {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    pub probe_started: Option<Instant>,
    pub last_error: Option<String>,
}

impl Default for HostCircuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_started: None,
            last_error: None,
        }
    }
}

impl HostCircuit {
    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.probe_started = None;
    }

    fn cooldown_remaining(&self) -> Duration {
        let cooldown = cooldown_for(self.consecutive_failures);
        self.opened_at
            .map(|t| cooldown.saturating_sub(t.elapsed()))
            .unwrap_or(Duration::ZERO)
    }
}

/// Circuit breakers keyed by correction host, shared by every job.
#[derive(Debug, Default)]
pub struct CorrectionHealth {
    hosts: Mutex<HashMap<String, HostCircuit>>,
}

/// One correction request in flight. Settle it with [`succeeded`] or
/// [`failed`]; dropping it unsettled records a failure.
///
/// [`succeeded`]: CorrectionAttempt::succeeded
/// [`failed`]: CorrectionAttempt::failed
#[derive(Debug)]
pub struct CorrectionAttempt<'a> {
    health: &'a CorrectionHealth,
    host: String,
    settled: bool,
}

impl CorrectionAttempt<'_> {
    pub fn succeeded(mut self) {
        self.settled = true;
        self.health.record_success(&self.host);
    }

    pub fn failed(mut self, error: &str) {
        self.settled = true;
        self.health.record_failure(&self.host, error);
    }
}

impl Drop for CorrectionAttempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.health
                .record_failure(&self.host, "correction request abandoned before it answered");
        }
    }
}

impl CorrectionHealth {
    pub fn new() -> Self {
        Self::default()
    }

    fn hosts(&self) -> MutexGuard<'_, HashMap<String, HostCircuit>> {
        self.hosts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a request to `host`, or `None` while its circuit refuses work.
    pub fn begin(&self, host: &str) -> Option<CorrectionAttempt<'_>> {
        self.admit(host).then(|| CorrectionAttempt {
            health: self,
            host: host.to_string(),
            settled: false,
        })
    }

    fn admit(&self, host: &str) -> bool {
        let mut hosts = self.hosts();
        let circuit = hosts.entry(host.to_string()).or_default();

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let remaining = circuit.cooldown_remaining();
                if remaining.is_zero() {
                    info!(host, "cooldown over, letting one correction through");
                    circuit.state = CircuitState::HalfOpen;
                    circuit.probe_started = Some(Instant::now());
                    true
                } else {
                    debug!(host, remaining_ms = remaining.as_millis() as u64, "circuit open");
                    false
                }
            }
            CircuitState::HalfOpen => {
                let stale = circuit
                    .probe_started
                    .is_none_or(|t| t.elapsed() >= PROBE_DEADLINE);
                if stale {
                    warn!(host, "test request never reported back, letting another through");
                    circuit.probe_started = Some(Instant::now());
                }
                stale
            }
        }
    }

    fn record_success(&self, host: &str) {
        let mut hosts = self.hosts();
        let circuit = hosts.entry(host.to_string()).or_default();
        if circuit.state != CircuitState::Closed {
            info!(host, "correction host answering again, closing circuit");
        }
        *circuit = HostCircuit::default();
    }

    fn record_failure(&self, host: &str, error: &str) {
        let mut hosts = self.hosts();
        let circuit = hosts.entry(host.to_string()).or_default();
        circuit.consecutive_failures += 1;
        circuit.last_error = Some(error.to_string());

        match circuit.state {
            CircuitState::HalfOpen => {
                warn!(host, error, "correction host still failing, reopening circuit");
                circuit.open();
            }
            CircuitState::Closed if circuit.consecutive_failures >= FAILURE_THRESHOLD => {
                warn!(host, failures = circuit.consecutive_failures, error, "opening circuit");
                circuit.open();
            }
            _ => debug!(host, failures = circuit.consecutive_failures, error, "correction failed"),
        }
    }

    pub fn state(&self, host: &str) -> CircuitState {
        self.hosts()
            .get(host)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn circuit(&self, host: &str) -> Option<HostCircuit> {
        self.hosts().get(host).cloned()
    }

    /// State of every host seen so far, sorted by host.
    pub fn snapshot(&self) -> Vec<(String, CircuitState)> {
        let mut states: Vec<_> = self
            .hosts()
            .iter()
            .map(|(host, circuit)| (host.clone(), circuit.state))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Why requests to `host` are being refused, if they are.
    pub fn status_message(&self, host: &str) -> Option<String> {
        let hosts = self.hosts();
        let circuit = hosts.get(host)?;
        match circuit.state {
            CircuitState::Closed => None,
            CircuitState::Open => Some(format!(
                "correction service at {host} is failing ({} consecutive failures); next attempt in {}s",
                circuit.consecutive_failures,
                circuit.cooldown_remaining().as_secs()
            )),
            CircuitState::HalfOpen => Some(format!("correction service at {host} is being retested")),
        }
    }
}

/// 30 s, then 2 min from 5 failures and 5 min from 10.
fn cooldown_for(failures: u32) -> Duration {
    match failures {
        0..=4 => Duration::from_secs(30),
        5..=9 => Duration::from_secs(120),
        _ => Duration::from_secs(300),
    }
}
