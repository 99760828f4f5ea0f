//! Maintenance windows

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// A recurring window, in UTC, during which assets may be patched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    /// Days the window opens on ("mon", "tuesday", ...). Every day when empty.
    #[serde(default)]
    pub days: Vec<String>,

    /// Opening time, "HH:MM"
    pub start: String,

    /// Closing time, "HH:MM". Earlier than `start` for windows crossing midnight.
    pub end: String,
}

impl MaintenanceWindow {
    fn parse_time(value: &str) -> Result<NaiveTime, String> {
        NaiveTime::parse_from_str(value, "%H:%M")
            .map_err(|e| format!("Invalid time {:?}: {}", value, e))
    }

    fn parse_days(&self) -> Result<Vec<Weekday>, String> {
        self.days
            .iter()
            .map(|d| {
                d.parse::<Weekday>()
                    .map_err(|_| format!("Invalid weekday: {}", d))
            })
            .collect()
    }

    /// Check the window definition
    pub fn validate(&self) -> Result<(), String> {
        Self::parse_time(&self.start)?;
        Self::parse_time(&self.end)?;
        self.parse_days()?;
        Ok(())
    }

    /// Whether `now` falls inside the window
    pub fn contains(&self, now: DateTime<Utc>) -> Result<bool, String> {
        let start = Self::parse_time(&self.start)?;
        let end = Self::parse_time(&self.end)?;
        let days = self.parse_days()?;
        let opens_on = |day: Weekday| days.is_empty() || days.contains(&day);

        let time = now.time();
        let today = now.weekday();
        let yesterday = (now - Duration::days(1)).weekday();

        let inside = if start <= end {
            opens_on(today) && time >= start && time < end
        } else {
            (opens_on(today) && time >= start) || (opens_on(yesterday) && time < end)
        };
        Ok(inside)
    }
}

/// Whether `now` is inside any window. No windows means no restriction.
pub fn within_any(windows: &[MaintenanceWindow], now: DateTime<Utc>) -> Result<bool, String> {
    if windows.is_empty() {
        return Ok(true);
    }
    for window in windows {
        if window.contains(now)? {
            return Ok(true);
        }
    }
    Ok(false)
}
