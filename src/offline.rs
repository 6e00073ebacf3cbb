//! Last-known data while the heat pump is unreachable

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OfflineStatus {
    pub offline: bool,
    pub offline_secs: Option<f64>,
    pub max_offline_secs: f64,
    pub has_data: bool,
}

/// Serves the last good data for at most `max_offline` after the first
/// failure, then reports the integration as unavailable
#[derive(Debug)]
pub struct OfflineManager<T> {
    last_data: Option<T>,
    offline_since: Option<Instant>,
    max_offline: Duration,
}

impl<T: Clone> OfflineManager<T> {
    pub fn new(max_offline: Duration) -> Self {
        Self {
            last_data: None,
            offline_since: None,
            max_offline,
        }
    }

    /// Store fresh data and leave the offline state
    pub fn update(&mut self, data: T) {
        self.last_data = Some(data);
        self.offline_since = None;
    }

    /// Last data while inside the offline window; starts the window on the
    /// first call after a success
    pub fn offline_data(&mut self) -> Option<T> {
        let since = *self.offline_since.get_or_insert_with(Instant::now);
        if since.elapsed() > self.max_offline {
            return None;
        }
        self.last_data.clone()
    }

    pub fn is_offline(&self) -> bool {
        self.offline_since.is_some()
    }

    /// Whether the window has elapsed
    pub fn is_expired(&self) -> bool {
        self.offline_since
            .is_some_and(|since| since.elapsed() > self.max_offline)
    }

    pub fn offline_duration(&self) -> Option<Duration> {
        self.offline_since.map(|since| since.elapsed())
    }

    pub fn status(&self) -> OfflineStatus {
        OfflineStatus {
            offline: self.is_offline(),
            offline_secs: self.offline_duration().map(|d| d.as_secs_f64()),
            max_offline_secs: self.max_offline.as_secs_f64(),
            has_data: self.last_data.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_window_expires() {
        let mut m = OfflineManager::new(Duration::from_secs(300));
        assert_eq!(m.offline_data(), None::<u32>);
        m.update(7u32);
        assert!(!m.is_offline());

        assert_eq!(m.offline_data(), Some(7));
        assert!(m.is_offline());
        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(m.offline_data(), Some(7));
        assert!(!m.is_expired());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(m.offline_data(), None);
        assert!(m.is_expired());

        m.update(8);
        assert!(!m.status().offline);
        assert!(m.status().has_data);
    }
}
