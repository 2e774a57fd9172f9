use crate::error::ApiFailure;
use std::collections::BTreeSet;

/// Severity of one failed submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth retrying in place (network trouble, rate limit, unknown code).
    Transient,
    /// The item itself was rejected; skip it and keep going.
    FatalItem,
    /// The whole run is compromised (session invalid, abuse block); abort.
    FatalRun,
}

/// Maps remote failures onto `FailureClass` from configurable code tables.
/// The tables are policy, not mechanism: remote anti-automation signals
/// drift over time, so deployments can override them in config.
#[derive(Debug, Clone)]
pub struct Classifier {
    fatal_run: BTreeSet<i64>,
    fatal_item: BTreeSet<i64>,
    rate_limit: BTreeSet<i64>,
}

impl Classifier {
    pub fn from_tables(fatal_run: &[i64], fatal_item: &[i64], rate_limit: &[i64]) -> Self {
        Self {
            fatal_run: fatal_run.iter().copied().collect(),
            fatal_item: fatal_item.iter().copied().collect(),
            rate_limit: rate_limit.iter().copied().collect(),
        }
    }

    /// Unlisted codes and transport failures classify as `Transient`; the
    /// dispatcher's bounded retry count keeps that from looping forever.
    pub fn classify(&self, failure: &ApiFailure) -> FailureClass {
        match failure.code() {
            None => FailureClass::Transient,
            Some(code) => {
                if self.fatal_run.contains(&code) {
                    FailureClass::FatalRun
                } else if self.fatal_item.contains(&code) {
                    FailureClass::FatalItem
                } else {
                    FailureClass::Transient
                }
            }
        }
    }

    /// Rate-limit codes are transient but earn an extra backoff before the
    /// retry, matching the remote's cool-down expectation.
    pub fn is_rate_limited(&self, failure: &ApiFailure) -> bool {
        failure.code().is_some_and(|c| self.rate_limit.contains(&c))
    }
}

/// Consecutive-failure counter behind the circuit-breaker trip. Lives in
/// per-run state, never in a process-wide global, so concurrent runs
/// against different targets stay independent.
#[derive(Debug, Default)]
pub struct TripCounter {
    consecutive: u32,
}

impl TripCounter {
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive += 1;
        self.consecutive
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn tripped(&self, threshold: u32) -> bool {
        self.consecutive >= threshold
    }
}
