//! Wall-clock aligned period resets
//!
//! Every reset falls on a full local hour, so the scheduler sleeps until the
//! next top of the hour and emits the scopes due at that instant.

use crate::derived::Period;
use crate::error::{LambdaError, Result};
use crate::logging::{StructuredLogger, get_logger};
use chrono::{DateTime, Datelike, Local, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Timelike, Utc};
use tokio::sync::mpsc;

/// Time zone the reset boundaries are computed in
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleZone {
    Local,
    Named(chrono_tz::Tz),
}

impl ScheduleZone {
    /// `local` or an IANA name
    pub fn parse(name: &str) -> Result<Self> {
        if name.eq_ignore_ascii_case("local") {
            return Ok(ScheduleZone::Local);
        }
        name.parse::<chrono_tz::Tz>()
            .map(ScheduleZone::Named)
            .map_err(|e| LambdaError::validation("timezone".to_string(), format!("{}: {}", name, e)))
    }

    pub fn local_time(&self, at: DateTime<Utc>) -> NaiveDateTime {
        match self {
            ScheduleZone::Local => at.with_timezone(&Local).naive_local(),
            ScheduleZone::Named(tz) => at.with_timezone(tz).naive_local(),
        }
    }

    /// Next full local hour strictly after `now`, as UTC instant and local time
    pub fn next_boundary(&self, now: DateTime<Utc>) -> (DateTime<Utc>, NaiveDateTime) {
        match self {
            ScheduleZone::Local => next_in(&Local, now),
            ScheduleZone::Named(tz) => next_in(tz, now),
        }
    }
}

fn next_in<Tz: TimeZone>(tz: &Tz, now: DateTime<Utc>) -> (DateTime<Utc>, NaiveDateTime) {
    let local = now.with_timezone(tz).naive_local();
    let hour_start = NaiveTime::from_hms_opt(local.hour(), 0, 0).unwrap_or_default();
    let mut candidate = local.date().and_time(hour_start) + TimeDelta::hours(1);
    // Skip hours that do not exist locally (DST gap)
    for _ in 0..3 {
        if let Some(at) = tz.from_local_datetime(&candidate).earliest() {
            return (at.with_timezone(&Utc), candidate);
        }
        candidate += TimeDelta::hours(1);
    }
    let fallback = now + TimeDelta::hours(1);
    (fallback, fallback.naive_utc())
}

/// Scopes due at local time `at`, in firing order
pub fn due_scopes(at: NaiveDateTime) -> Vec<Period> {
    let mut scopes = Vec::new();
    if at.minute() != 0 || at.second() != 0 {
        return scopes;
    }
    if at.hour() == 0 {
        scopes.push(Period::Yesterday);
        scopes.push(Period::Daily);
        if at.day() == 1 {
            scopes.push(Period::Monthly);
            if at.month() == 1 {
                scopes.push(Period::Yearly);
            }
        }
    }
    if at.hour() % 4 == 0 {
        scopes.push(Period::FourHours);
    }
    if at.hour() % 2 == 0 {
        scopes.push(Period::TwoHours);
    }
    scopes.push(Period::Hourly);
    scopes
}

/// Sends due scopes into the coordinator until the receiver goes away
pub struct Scheduler {
    zone: ScheduleZone,
    tx: mpsc::UnboundedSender<Period>,
    logger: StructuredLogger,
}

impl Scheduler {
    pub fn new(zone: ScheduleZone, tx: mpsc::UnboundedSender<Period>, site_id: &str) -> Self {
        Self {
            zone,
            tx,
            logger: get_logger("scheduler").for_site(site_id),
        }
    }

    pub async fn run(self) {
        let mut last_fired: Option<DateTime<Utc>> = None;
        loop {
            let now = Utc::now();
            let reference = last_fired.map_or(now, |l| l.max(now));
            let (at, local) = self.zone.next_boundary(reference);
            let wait = (at - Utc::now()).to_std().unwrap_or_default();
            self.logger
                .trace(&format!("Next period boundary at {} (in {:?})", local, wait));
            tokio::time::sleep(wait).await;
            last_fired = Some(at);

            for scope in due_scopes(local) {
                self.logger.debug(&format!("Period boundary {}: {}", local, scope));
                if self.tx.send(scope).is_err() {
                    self.logger.debug("Coordinator gone, scheduler stopping");
                    return;
                }
            }
        }
    }
}
