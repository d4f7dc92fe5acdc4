//! statistics.rs
//! Per-queue action execution statistics.
//!
//! Workers register every action result; counters are atomics inside a
//! `DashMap` entry per action so concurrent workers do not contend on a
//! single lock. Response times keep the most recent `MAX_POINTS` samples.

use std::{
    collections::VecDeque,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use parking_lot::Mutex;

pub const MAX_POINTS: usize = 1_000;

#[derive(Debug, Default)]
struct ActionCounters {
    passed: AtomicU64,
    failed: AtomicU64,
    response_ms: Mutex<VecDeque<u64>>,
}

/// Appends a value, evicting the oldest when at capacity.
#[inline]
pub fn push_capped(buf: &mut VecDeque<u64>, val: u64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

pub fn calculate_stats(data: &VecDeque<u64>) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }
    let count = data.len();
    let min = data.iter().map(|&x| x as f64).fold(f64::INFINITY, f64::min);
    let max = data.iter().map(|&x| x as f64).fold(f64::NEG_INFINITY, f64::max);
    let mean = data.iter().map(|&x| x as f64).sum::<f64>() / count as f64;
    Some(Stats { min, max, mean, count })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionSummary {
    pub action: String,
    pub passed: u64,
    pub failed: u64,
    pub response: Option<Stats>,
}

#[derive(Debug, Default)]
pub struct ExecutionStatistics {
    actions: DashMap<String, ActionCounters>,
}

impl ExecutionStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_result(&self, action: &str, passed: bool, response_ms: Option<u64>) {
        let entry = self.actions.entry(action.to_string()).or_default();
        if passed {
            entry.passed.fetch_add(1, Ordering::Relaxed);
        } else {
            entry.failed.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(ms) = response_ms {
            push_capped(&mut entry.response_ms.lock(), ms);
        }
    }

    pub fn totals(&self) -> (u64, u64) {
        self.actions.iter().fold((0, 0), |(p, f), entry| {
            (
                p + entry.passed.load(Ordering::Relaxed),
                f + entry.failed.load(Ordering::Relaxed),
            )
        })
    }

    /// Percentage of passed action executions; 100 when nothing ran.
    pub fn pass_rate(&self) -> f64 {
        let (passed, failed) = self.totals();
        let total = passed + failed;
        if total == 0 {
            100.0
        } else {
            passed as f64 * 100.0 / total as f64
        }
    }

    pub fn is_passed(&self, required_percent: f32) -> bool {
        self.pass_rate() >= f64::from(required_percent)
    }

    /// One summary per action, sorted by name.
    pub fn summaries(&self) -> Vec<ActionSummary> {
        let mut out: Vec<ActionSummary> = self
            .actions
            .iter()
            .map(|entry| ActionSummary {
                action: entry.key().clone(),
                passed: entry.passed.load(Ordering::Relaxed),
                failed: entry.failed.load(Ordering::Relaxed),
                response: calculate_stats(&entry.response_ms.lock()),
            })
            .collect();
        out.sort_by(|a, b| a.action.cmp(&b.action));
        out
    }
}

impl fmt::Display for ExecutionStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<24} {:>8} {:>8} {:>10} {:>10} {:>10}", "action", "passed", "failed", "min ms", "mean ms", "max ms")?;
        for s in self.summaries() {
            match &s.response {
                Some(r) => writeln!(
                    f,
                    "{:<24} {:>8} {:>8} {:>10.0} {:>10.1} {:>10.0}",
                    s.action, s.passed, s.failed, r.min, r.mean, r.max
                )?,
                None => writeln!(
                    f,
                    "{:<24} {:>8} {:>8} {:>10} {:>10} {:>10}",
                    s.action, s.passed, s.failed, "-", "-", "-"
                )?,
            }
        }
        write!(f, "pass rate: {:.1}%", self.pass_rate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_rate_and_threshold() {
        let stats = ExecutionStatistics::new();
        assert_eq!(stats.pass_rate(), 100.0);
        stats.register_result("login", true, Some(10));
        stats.register_result("login", true, Some(30));
        stats.register_result("login", true, Some(20));
        stats.register_result("logout", false, None);
        assert_eq!(stats.totals(), (3, 1));
        assert_eq!(stats.pass_rate(), 75.0);
        assert!(stats.is_passed(75.0));
        assert!(!stats.is_passed(80.0));
    }

    #[test]
    fn test_summaries_sorted_with_response_stats() {
        let stats = ExecutionStatistics::new();
        stats.register_result("b", true, Some(4));
        stats.register_result("a", true, Some(2));
        stats.register_result("a", true, Some(6));
        let summaries = stats.summaries();
        assert_eq!(summaries[0].action, "a");
        let response = summaries[0].response.clone().unwrap();
        assert_eq!((response.min, response.max, response.mean), (2.0, 6.0, 4.0));
        assert!(stats.to_string().contains("pass rate: 100.0%"));
    }

    #[test]
    fn test_push_capped_evicts_oldest() {
        let mut buf = VecDeque::new();
        for i in 0..(MAX_POINTS as u64 + 5) {
            push_capped(&mut buf, i);
        }
        assert_eq!(buf.len(), MAX_POINTS);
        assert_eq!(buf.front(), Some(&5));
    }
}
