//! Per-batch and per-register fault bookkeeping

use crate::config::PollingConfig;
use crate::error::LambdaError;
use crate::logging::get_logger;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug)]
pub struct FaultTracker {
    batch_failures: HashMap<(u16, u16), u32>,
    sticky_batches: HashSet<(u16, u16)>,
    register_timeouts: HashMap<u16, u32>,
    register_failures: HashMap<u16, u32>,
    static_individual: BTreeSet<u16>,
    dynamic_individual: BTreeSet<u16>,
    batch_threshold: u32,
    timeout_threshold: u32,
    failure_threshold: u32,
    logger: crate::logging::StructuredLogger,
}

impl FaultTracker {
    pub fn new(config: &PollingConfig) -> Self {
        Self {
            batch_failures: HashMap::new(),
            sticky_batches: HashSet::new(),
            register_timeouts: HashMap::new(),
            register_failures: HashMap::new(),
            static_individual: config.individual_read_registers.iter().copied().collect(),
            dynamic_individual: BTreeSet::new(),
            batch_threshold: config.batch_failure_threshold.max(1),
            timeout_threshold: config.register_timeout_threshold.max(1),
            failure_threshold: config.register_failure_threshold.max(1),
            logger: get_logger("polling"),
        }
    }

    pub fn is_sticky(&self, key: (u16, u16)) -> bool {
        self.sticky_batches.contains(&key)
    }

    pub fn needs_individual(&self, address: u16) -> bool {
        self.static_individual.contains(&address) || self.dynamic_individual.contains(&address)
    }

    pub fn batch_failures(&self, key: (u16, u16)) -> u32 {
        self.batch_failures.get(&key).copied().unwrap_or(0)
    }

    pub fn individual_set(&self) -> BTreeSet<u16> {
        self.static_individual
            .union(&self.dynamic_individual)
            .copied()
            .collect()
    }

    pub fn sticky_batches(&self) -> Vec<(u16, u16)> {
        let mut v: Vec<_> = self.sticky_batches.iter().copied().collect();
        v.sort();
        v
    }

    /// Returns true when this failure made the batch sticky-individual
    pub fn record_batch_failure(&mut self, key: (u16, u16), err: &LambdaError) -> bool {
        let count = self.batch_failures.entry(key).or_insert(0);
        *count += 1;
        if *count >= self.batch_threshold && self.sticky_batches.insert(key) {
            self.logger.warn(&format!(
                "Batch read of {} registers at {} failed {} times ({}); switching to individual reads",
                key.1, key.0, count, err
            ));
            return true;
        }
        false
    }

    pub fn record_batch_success(&mut self, key: (u16, u16)) {
        self.batch_failures.remove(&key);
        self.sticky_batches.remove(&key);
    }

    pub fn record_register_success(&mut self, address: u16) {
        self.register_timeouts.remove(&address);
        self.register_failures.remove(&address);
    }

    /// Returns true when this failure promoted the register to individual reads
    pub fn record_register_failure(&mut self, address: u16, err: &LambdaError) -> bool {
        let failures = {
            let f = self.register_failures.entry(address).or_insert(0);
            *f += 1;
            *f
        };
        let timeouts = if err.is_timeout() {
            let t = self.register_timeouts.entry(address).or_insert(0);
            *t += 1;
            *t
        } else {
            self.register_timeouts.get(&address).copied().unwrap_or(0)
        };

        let over = timeouts >= self.timeout_threshold || failures >= self.failure_threshold;
        if over && !self.needs_individual(address) {
            self.dynamic_individual.insert(address);
            self.logger.warn(&format!(
                "Register {} added to individual reads after {} timeout(s), {} failure(s)",
                address, timeouts, failures
            ));
            return true;
        }
        false
    }
}
