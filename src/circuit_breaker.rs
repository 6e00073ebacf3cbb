//! Circuit breaker guarding the Modbus transport
//!
//! A dropped connection opens the breaker immediately; timeouts and other
//! transport failures count toward `failure_threshold`. Exception responses
//! prove the device is answering and leave the breaker untouched. After
//! `recovery_timeout` one probe is let through (half-open); its outcome
//! closes or re-opens the breaker.

use crate::config::CircuitBreakerConfig;
use crate::error::LambdaError;
use crate::logging::get_logger;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Snapshot of the breaker for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub state: BreakerState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub last_error: Option<String>,
    pub open_for_secs: Option<f64>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<Instant>,
    last_error: Option<String>,
    logger: crate::logging::StructuredLogger,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            state: BreakerState::Closed,
            failure_count: 0,
            opened_at: None,
            last_error: None,
            logger: get_logger("circuit_breaker"),
        }
    }

    /// Build from config; `None` when the breaker is disabled
    pub fn from_config(config: &CircuitBreakerConfig) -> Option<Self> {
        config.enabled.then(|| {
            Self::new(
                config.failure_threshold,
                Duration::from_secs(config.recovery_timeout_secs),
            )
        })
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Whether a call may go out now
    pub fn can_execute(&mut self) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = self.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.recovery_timeout {
                    self.state = BreakerState::HalfOpen;
                    self.logger
                        .info("Circuit breaker half-open, attempting connection again");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed {
            self.logger
                .info("Connection restored, circuit breaker closed");
        }
        self.state = BreakerState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self, err: &LambdaError) {
        if err.is_protocol() || matches!(err, LambdaError::Shutdown) {
            return;
        }
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_error = Some(err.to_string());

        let should_open = self.state == BreakerState::HalfOpen
            || err.is_connection()
            || self.failure_count >= self.failure_threshold;
        if should_open {
            if self.state != BreakerState::Open {
                self.logger.warn(&format!(
                    "Circuit breaker opened after {} failure(s): {}",
                    self.failure_count, err
                ));
            }
            self.state = BreakerState::Open;
            self.opened_at = Some(Instant::now());
        }
    }

    pub fn status(&self) -> BreakerStatus {
        BreakerStatus {
            state: self.state,
            failure_count: self.failure_count,
            failure_threshold: self.failure_threshold,
            recovery_timeout_secs: self.recovery_timeout.as_secs(),
            last_error: self.last_error.clone(),
            open_for_secs: self
                .opened_at
                .filter(|_| self.state != BreakerState::Closed)
                .map(|t| t.elapsed().as_secs_f64()),
        }
    }

    /// Manually close the breaker
    pub fn reset(&mut self) {
        self.state = BreakerState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
        self.last_error = None;
        self.logger.info("Circuit breaker manually reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_count_toward_threshold() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(30));
        for _ in 0..2 {
            cb.record_failure(&LambdaError::timeout("t"));
            assert!(cb.can_execute());
        }
        cb.record_failure(&LambdaError::timeout("t"));
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_error_opens_immediately_and_recovers() {
        let mut cb = CircuitBreaker::new(5, Duration::from_secs(30));
        cb.record_failure(&LambdaError::connection("reset"));
        assert!(!cb.can_execute());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.can_execute());
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        // A failing probe re-opens
        cb.record_failure(&LambdaError::timeout("t"));
        assert_eq!(cb.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.can_execute());
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.status().failure_count, 0);
    }

    #[test]
    fn test_exceptions_do_not_trip() {
        let mut cb = CircuitBreaker::new(1, Duration::from_secs(30));
        cb.record_failure(&LambdaError::protocol(1050, "illegal address"));
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_disabled_config() {
        let mut config = CircuitBreakerConfig::default();
        assert!(CircuitBreaker::from_config(&config).is_some());
        config.enabled = false;
        assert!(CircuitBreaker::from_config(&config).is_none());
    }
}
