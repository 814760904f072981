//! Daily low-stock and stale-mission sweep.
//!
//! Runs once at start-up, then once per day at a configured local time.
//! The two checks are independent: a failure in one never prevents the other,
//! and both failures are reported together.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime, TimeDelta, TimeZone, Utc};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{DEFAULT_DAILY_CHECK_HOUR, TransmuteConfig};
use crate::error::TransmuteError;
use crate::repository::{AuditRepository, MaterialRepository, MissionRepository, Repositories};
use crate::state_machine::{AuditAction, AuditRecord, EntityKind};

/// Mission statuses that never go stale.
pub const CLOSED_MISSION_STATUSES: &[&str] = &["COMPLETED", "CANCELLED"];

const ONE_DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Parse `HH:MM`, falling back to the default time of day when malformed.
pub fn parse_check_time(raw: &str) -> NaiveTime {
    match NaiveTime::parse_from_str(raw.trim(), "%H:%M") {
        Ok(time) => time,
        Err(err) => {
            warn!(value = raw, error = %err, "unparseable daily_check_hour, using {DEFAULT_DAILY_CHECK_HOUR}");
            NaiveTime::from_hms_opt(2, 0, 0).unwrap_or(NaiveTime::MIN)
        }
    }
}

/// First instant strictly after `now` whose wall-clock time is `at`.
///
/// Days where `at` does not exist (a DST gap) are skipped.
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();
    (0..=2)
        .filter_map(|offset| today.checked_add_signed(TimeDelta::days(offset)))
        .filter_map(|day| tz.from_local_datetime(&day.and_time(at)).earliest())
        .find(|candidate| candidate > now)
        .unwrap_or_else(|| now.clone() + TimeDelta::days(1))
}

/// Which of the two independent checks failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepCheck {
    LowStock,
    StaleMissions,
}

impl fmt::Display for SweepCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepCheck::LowStock => write!(f, "material stock"),
            SweepCheck::StaleMissions => write!(f, "missions"),
        }
    }
}

#[derive(Debug)]
pub struct CheckFailure {
    pub check: SweepCheck,
    pub errors: Vec<TransmuteError>,
}

/// Every failure of one sweep.
#[derive(Debug)]
pub struct SweepError {
    pub failures: Vec<CheckFailure>,
}

impl fmt::Display for SweepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for failure in &self.failures {
            for err in &failure.errors {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{}: {err}", failure.check)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl std::error::Error for SweepError {}

/// Alerts raised by one successful sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub material_alerts: usize,
    pub mission_alerts: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct SweepSettings {
    pub check_at: NaiveTime,
    pub low_stock_threshold: f64,
    pub stale_days: i64,
}

impl SweepSettings {
    pub fn from_config(config: &TransmuteConfig) -> Self {
        Self {
            check_at: parse_check_time(&config.daily_check_hour),
            low_stock_threshold: config.low_stock_threshold(),
            stale_days: config.stale_days(),
        }
    }
}

pub struct DailySweep {
    materials: Arc<dyn MaterialRepository>,
    missions: Arc<dyn MissionRepository>,
    audits: Arc<dyn AuditRepository>,
    settings: SweepSettings,
}

impl DailySweep {
    pub fn new(repos: &Repositories, settings: SweepSettings) -> Self {
        Self {
            materials: Arc::clone(&repos.materials),
            missions: Arc::clone(&repos.missions),
            audits: Arc::clone(&repos.audits),
            settings,
        }
    }

    pub fn settings(&self) -> SweepSettings {
        self.settings
    }

    /// Run both checks once.
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, SweepError> {
        let mut report = SweepReport::default();
        let mut failures = Vec::new();

        match self.check_low_stock() {
            Ok(alerts) => report.material_alerts = alerts,
            Err(errors) => failures.push(CheckFailure {
                check: SweepCheck::LowStock,
                errors,
            }),
        }
        match self.check_stale_missions(now) {
            Ok(alerts) => report.mission_alerts = alerts,
            Err(errors) => failures.push(CheckFailure {
                check: SweepCheck::StaleMissions,
                errors,
            }),
        }

        if failures.is_empty() {
            info!(
                material_alerts = report.material_alerts,
                mission_alerts = report.mission_alerts,
                "daily checks completed"
            );
            Ok(report)
        } else {
            Err(SweepError { failures })
        }
    }

    /// One `DAILY_MATERIAL_ALERT` per material at or below the threshold.
    pub fn check_low_stock(&self) -> Result<usize, Vec<TransmuteError>> {
        let threshold = self.settings.low_stock_threshold;
        let materials = self
            .materials
            .find_low_stock(threshold)
            .map_err(|err| vec![err.into()])?;
        if materials.is_empty() {
            info!(threshold, "daily check: no low-stock materials");
            return Ok(0);
        }

        let mut errors = Vec::new();
        for material in &materials {
            let description = format!(
                "Material {} (#{}) with stock {:.2} at or below threshold {:.2}",
                material.name, material.id, material.stock, threshold
            );
            warn!("{description}");
            let record = AuditRecord::new(
                AuditAction::DailyMaterialAlert,
                EntityKind::Material,
                material.id,
                description,
            );
            if let Err(err) = self.audits.append(record) {
                errors.push(err.into());
            }
        }
        if errors.is_empty() {
            Ok(materials.len())
        } else {
            Err(errors)
        }
    }

    /// One `DAILY_MISSION_ALERT` per open mission idle for `stale_days` or more.
    pub fn check_stale_missions(&self, now: DateTime<Utc>) -> Result<usize, Vec<TransmuteError>> {
        let stale_days = self.settings.stale_days;
        let cutoff = TimeDelta::try_days(stale_days)
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or_else(|| vec![TransmuteError::StaleWindowOutOfRange(stale_days)])?;
        let missions = self
            .missions
            .find_stale(cutoff, CLOSED_MISSION_STATUSES)
            .map_err(|err| vec![err.into()])?;
        if missions.is_empty() {
            info!(stale_days, "daily check: no stale missions");
            return Ok(0);
        }

        let mut errors = Vec::new();
        for mission in &missions {
            let description = format!(
                "Mission {} (#{}) open since {} (status {}, assigned to {})",
                mission.title,
                mission.id,
                mission.last_activity().to_rfc3339(),
                mission.status,
                mission.assignee.as_deref().unwrap_or("unassigned"),
            );
            warn!("{description}");
            let record = AuditRecord::new(
                AuditAction::DailyMissionAlert,
                EntityKind::Mission,
                mission.id,
                description,
            );
            if let Err(err) = self.audits.append(record) {
                errors.push(err.into());
            }
        }
        if errors.is_empty() {
            Ok(missions.len())
        } else {
            Err(errors)
        }
    }

    fn sweep_now(&self) {
        if let Err(err) = self.run_once(Utc::now()) {
            warn!(error = %err, "daily checks failed");
        }
    }

    /// Run the sweep immediately, then daily at the configured local time,
    /// until the returned handle is stopped.
    pub fn spawn(self: Arc<Self>, runtime: &Handle) -> SweepHandle {
        let (stop, mut stopped) = watch::channel(false);
        let task = runtime.spawn(async move {
            info!(at = %self.settings.check_at, "starting daily checks");
            self.sweep_now();
            loop {
                let now = Local::now();
                let next = next_run_after(&now, self.settings.check_at);
                let wait = (next - now).to_std().unwrap_or(ONE_DAY);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => self.sweep_now(),
                    _ = stopped.changed() => break,
                }
            }
            info!("daily checks stopped");
        });
        SweepHandle { stop, task }
    }
}

pub struct SweepHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Stop the loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "daily sweep task ended abnormally");
        }
    }
}
