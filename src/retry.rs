//! Robust read helper: retry with exponential backoff and jitter,
//! per-register timeouts and the optional circuit breaker.

use crate::circuit_breaker::{BreakerStatus, CircuitBreaker};
use crate::config::{ModbusConfig, RetryConfig};
use crate::error::{LambdaError, Result};
use crate::logging::get_logger;
use crate::modbus::ModbusTransport;
use rand::Rng;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per call
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Relative jitter, e.g. 0.2 for ±20 %
    pub jitter: f64,
    pub min_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            base_delay: Duration::from_secs_f64(config.base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs_f64(config.max_delay_secs.max(0.0)),
            jitter: config.jitter.clamp(0.0, 0.99),
            min_delay: Duration::from_secs_f64(config.min_delay_secs.max(0.0)),
        }
    }

    /// Delay before retry number `attempt` (0-based) for a given jitter
    /// sample in `[-jitter, jitter]`
    pub fn backoff(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let exp = 2f64.powi(attempt.min(30) as i32);
        let capped = (self.base_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        let jittered = capped * (1.0 + jitter_sample.clamp(-self.jitter, self.jitter));
        Duration::from_secs_f64(jittered.max(self.min_delay.as_secs_f64()))
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let sample = if self.jitter > 0.0 {
            rand::rng().random_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        self.backoff(attempt, sample)
    }
}

/// Default timeout plus per-address overrides
#[derive(Debug)]
pub struct TimeoutTable {
    default: Duration,
    overrides: BTreeMap<u16, Duration>,
    logged: HashSet<(u16, u128)>,
    logger: crate::logging::StructuredLogger,
}

impl TimeoutTable {
    pub fn new(default: Duration, overrides_ms: &BTreeMap<u16, u64>) -> Self {
        Self {
            default,
            overrides: overrides_ms
                .iter()
                .map(|(a, ms)| (*a, Duration::from_millis(*ms)))
                .collect(),
            logged: HashSet::new(),
            logger: get_logger("retry"),
        }
    }

    pub fn from_config(config: &ModbusConfig) -> Self {
        Self::new(config.timeout(), &config.register_timeouts_ms)
    }

    /// Timeout for a request starting at `address`
    pub fn timeout_for(&mut self, address: u16) -> Duration {
        match self.overrides.get(&address) {
            Some(t) => {
                if self.logged.insert((address, t.as_millis())) {
                    self.logger.debug(&format!(
                        "Using timeout override of {} ms for register {}",
                        t.as_millis(),
                        address
                    ));
                }
                *t
            }
            None => self.default,
        }
    }
}

/// Wraps transport calls with retries, timeouts and the circuit breaker
#[derive(Debug)]
pub struct RobustReader {
    policy: RetryPolicy,
    timeouts: TimeoutTable,
    breaker: Option<CircuitBreaker>,
    stopping: Arc<AtomicBool>,
    logger: crate::logging::StructuredLogger,
}

impl RobustReader {
    pub fn new(
        policy: RetryPolicy,
        timeouts: TimeoutTable,
        breaker: Option<CircuitBreaker>,
        stopping: Arc<AtomicBool>,
    ) -> Self {
        Self {
            policy,
            timeouts,
            breaker,
            stopping,
            logger: get_logger("retry"),
        }
    }

    pub fn from_config(config: &ModbusConfig, stopping: Arc<AtomicBool>) -> Self {
        Self::new(
            RetryPolicy::from_config(&config.retry),
            TimeoutTable::from_config(config),
            CircuitBreaker::from_config(&config.circuit_breaker),
            stopping,
        )
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Relaxed)
    }

    pub fn breaker_status(&self) -> Option<BreakerStatus> {
        self.breaker.as_ref().map(|b| b.status())
    }

    /// Timeout applied to requests starting at `address`
    pub fn timeout_for(&mut self, address: u16) -> Duration {
        self.timeouts.timeout_for(address)
    }

    pub fn reset_breaker(&mut self) {
        if let Some(b) = self.breaker.as_mut() {
            b.reset();
        }
    }

    fn admit(&mut self) -> Result<()> {
        if self.is_stopping() {
            return Err(LambdaError::Shutdown);
        }
        if let Some(b) = self.breaker.as_mut()
            && !b.can_execute()
        {
            return Err(LambdaError::circuit_open("Modbus calls suspended"));
        }
        Ok(())
    }

    fn settle<T>(&mut self, outcome: &Result<T>) {
        if let Some(b) = self.breaker.as_mut() {
            match outcome {
                Ok(_) => b.record_success(),
                Err(e) => b.record_failure(e),
            }
        }
    }

    /// Read `count` holding registers with the retry policy applied.
    /// Exception responses are returned at once; timeouts and connection
    /// errors are retried, reconnecting first when the socket dropped.
    pub async fn read(
        &mut self,
        transport: &mut dyn ModbusTransport,
        slave_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        self.admit()?;
        let deadline = self.timeouts.timeout_for(address);
        let mut attempt = 0;
        let outcome = loop {
            let result = transport
                .read_holding_registers(slave_id, address, count, deadline)
                .await;
            let err = match result {
                Ok(words) => break Ok(words),
                Err(e) if !e.is_transport() => break Err(e),
                Err(e) => e,
            };
            attempt += 1;
            if attempt >= self.policy.max_retries || self.is_stopping() {
                break Err(err);
            }
            let delay = self.policy.delay_for(attempt - 1);
            self.logger.debug(&format!(
                "Read of {} register(s) at {} failed (attempt {}/{}): {}; retrying in {:.1}s",
                count,
                address,
                attempt,
                self.policy.max_retries,
                err,
                delay.as_secs_f64()
            ));
            tokio::time::sleep(delay).await;
            if self.is_stopping() {
                break Err(LambdaError::Shutdown);
            }
            if !transport.is_connected()
                && let Err(e) = transport.connect().await
            {
                break Err(e);
            }
        };
        self.settle(&outcome);
        outcome
    }

    /// Single-attempt write guarded by the breaker
    pub async fn write(
        &mut self,
        transport: &mut dyn ModbusTransport,
        slave_id: u8,
        address: u16,
        values: &[u16],
    ) -> Result<()> {
        self.admit()?;
        if !transport.is_connected() {
            transport.connect().await?;
        }
        let deadline = self.timeouts.timeout_for(address);
        let outcome = transport
            .write_multiple_registers(slave_id, address, values, deadline)
            .await;
        self.settle(&outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::{SimFault, SimulatedTransport};

    fn reader(max_retries: u32) -> RobustReader {
        let policy = RetryPolicy {
            max_retries,
            ..RetryPolicy::default()
        };
        let mut overrides = BTreeMap::new();
        overrides.insert(0, 2000);
        RobustReader::new(
            policy,
            TimeoutTable::new(Duration::from_secs(3), &overrides),
            Some(CircuitBreaker::new(5, Duration::from_secs(30))),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn test_backoff_schedule() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(0, 0.0), Duration::from_secs(5));
        assert_eq!(p.backoff(1, 0.0), Duration::from_secs(10));
        assert_eq!(p.backoff(2, 0.0), Duration::from_secs(20));
        assert_eq!(p.backoff(3, 0.0), Duration::from_secs(30));
        assert_eq!(p.backoff(9, 0.0), Duration::from_secs(30));
        assert!((p.backoff(0, 0.2).as_secs_f64() - 6.0).abs() < 1e-6);
        // Samples beyond the configured jitter are clamped
        assert!((p.backoff(0, -0.5).as_secs_f64() - 4.0).abs() < 1e-6);
        for attempt in 0..5 {
            let d = p.delay_for(attempt).as_secs_f64();
            assert!((1.0..=36.01).contains(&d));
        }
    }

    #[test]
    fn test_backoff_floor() {
        let p = RetryPolicy {
            base_delay: Duration::from_millis(100),
            ..RetryPolicy::default()
        };
        assert_eq!(p.backoff(0, 0.0), Duration::from_secs(1));
    }

    #[test]
    fn test_timeout_overrides() {
        let mut overrides = BTreeMap::new();
        overrides.insert(0, 2000);
        let mut table = TimeoutTable::new(Duration::from_secs(3), &overrides);
        assert_eq!(table.timeout_for(0), Duration::from_secs(2));
        assert_eq!(table.timeout_for(0), Duration::from_secs(2));
        assert_eq!(table.timeout_for(1000), Duration::from_secs(3));
        assert_eq!(table.logged.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_retried() {
        let mut sim = SimulatedTransport::new();
        sim.set_register(1003, 1);
        sim.inject(SimFault::Timeout { address: 1003 });
        sim.connect().await.unwrap();
        let mut r = reader(3);
        let err = r.read(&mut sim, 1, 1003, 1).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(sim.reads().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exceptions_are_not_retried() {
        let mut sim = SimulatedTransport::new();
        sim.inject(SimFault::Exception {
            start: 1050,
            count: 5,
            times: None,
        });
        sim.connect().await.unwrap();
        let mut r = reader(3);
        assert!(r.read(&mut sim, 1, 1050, 5).await.unwrap_err().is_protocol());
        assert_eq!(sim.reads().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_dropped_connection() {
        let mut sim = SimulatedTransport::new();
        sim.set_register(1004, 3512);
        sim.inject(SimFault::DropConnection { times: 1 });
        sim.connect().await.unwrap();
        let mut r = reader(3);
        assert_eq!(r.read(&mut sim, 1, 1004, 1).await.unwrap(), vec![3512]);
        assert!(sim.is_connected());
    }

    #[tokio::test]
    async fn test_stopping_short_circuits() {
        let mut sim = SimulatedTransport::new();
        sim.connect().await.unwrap();
        let mut r = reader(3);
        r.stopping.store(true, Ordering::Relaxed);
        assert!(matches!(
            r.read(&mut sim, 1, 0, 1).await,
            Err(LambdaError::Shutdown)
        ));
        assert!(sim.reads().is_empty());
    }
}
