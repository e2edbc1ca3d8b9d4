//! Temporal types for trip and assignment windows.
//!
//! Trips and vehicle assignments both live in a half-open window: they start
//! at a known instant and either are still running (open-ended) or ended at a
//! known instant. `TimeRange` carries that window and the active/ended
//! queries the coordinator and stores need.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A range of time (half-open interval: [from, to)).
///
/// Used for trip windows (started/ended) and assignment windows
/// (assigned from/to). Windows open through [`TimeRange::starting_at`] or
/// [`TimeRange::from_now`] and close through [`TimeRange::close_now`].
///
/// # Examples
///
/// ```
/// use driveguard::TimeRange;
/// use chrono::Utc;
///
/// // A trip that just started and has not ended
/// let window = TimeRange::from_now();
/// assert!(window.is_open_ended());
/// assert!(window.contains(Utc::now()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start of the range (inclusive).
    pub from: DateTime<Utc>,

    /// End of the range (exclusive). None means still open.
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Creates an open-ended time range starting at the given time.
    #[must_use]
    pub const fn starting_at(from: DateTime<Utc>) -> Self {
        Self { from, to: None }
    }

    /// Creates an open-ended time range starting now.
    #[must_use]
    pub fn from_now() -> Self {
        Self {
            from: Utc::now(),
            to: None,
        }
    }

    pub const fn is_open_ended(&self) -> bool {
        self.to.is_none()
    }

    pub fn has_ended(&self) -> bool {
        match self.to {
            Some(to) => to <= Utc::now(),
            None => false,
        }
    }

    /// True while the window covers the current instant. An open assignment
    /// and an in-progress trip are both active.
    pub fn is_active(&self) -> bool {
        self.contains(Utc::now())
    }

    /// Check if a timestamp falls within this range [from, to).
    #[must_use]
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.from && self.to.map_or(true, |to| time < to)
    }

    /// Closes an open-ended range at the current time.
    /// Ensures the end never precedes the start by clamping to max(now, from).
    pub fn close_now(&mut self) {
        if self.to.is_none() {
            let now = Utc::now();
            let end = std::cmp::max(now, self.from);
            self.to = Some(end);
        }
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::from_now()
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to {
            Some(to) => write!(f, "[{} → {})", self.from, to),
            None => write!(f, "[{} → ∞)", self.from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn closed(from: DateTime<Utc>, to: DateTime<Utc>) -> TimeRange {
        TimeRange { from, to: Some(to) }
    }

    #[test]
    fn open_window_is_active() {
        let window = TimeRange::from_now();
        assert!(window.is_open_ended());
        assert!(window.is_active());
        assert!(!window.has_ended());
    }

    #[test]
    fn starting_at_keeps_the_start() {
        let started = Utc::now() - Duration::minutes(10);
        let window = TimeRange::starting_at(started);
        assert!(window.is_open_ended());
        assert_eq!(window.from, started);
        assert!(window.is_active());
    }

    #[test]
    fn contains_is_inclusive_start_exclusive_end() {
        let started = Utc::now() - Duration::hours(2);
        let ended = started + Duration::hours(1);
        let window = closed(started, ended);

        assert!(window.contains(started));
        assert!(window.contains(started + Duration::minutes(30)));
        assert!(!window.contains(ended));
        assert!(!window.contains(started - Duration::seconds(1)));
    }

    #[test]
    fn open_window_contains_any_later_instant() {
        let started = Utc::now() - Duration::hours(1);
        let window = TimeRange::starting_at(started);

        assert!(window.contains(started));
        assert!(window.contains(Utc::now()));
        assert!(window.contains(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn finished_window_has_ended_and_is_not_active() {
        let started = Utc::now() - Duration::hours(2);
        let window = closed(started, started + Duration::hours(1));

        assert!(window.has_ended());
        assert!(!window.is_active());
    }

    #[test]
    fn close_now_ends_an_open_window_once() {
        let mut window = TimeRange::starting_at(Utc::now() - Duration::minutes(5));
        window.close_now();

        let Some(first_end) = window.to else {
            panic!("close_now must set an end");
        };
        // A second close keeps the original end.
        window.close_now();
        assert_eq!(window.to, Some(first_end));
        assert!(!window.is_open_ended());
    }

    #[test]
    fn close_now_clamps_to_a_future_start() {
        let future = Utc::now() + Duration::hours(1);
        let mut window = TimeRange::starting_at(future);

        window.close_now();
        let Some(to) = window.to else {
            panic!("close_now must set an end");
        };
        assert!(to >= window.from);
    }

    #[test]
    fn display_marks_open_windows() {
        let window = TimeRange::from_now();
        let display = format!("{window}");
        assert!(display.contains("→"));
        assert!(display.contains("∞"));
    }

    #[test]
    fn window_survives_serialization() {
        let mut window = TimeRange::from_now();
        window.close_now();
        let json = serde_json::to_string(&window).unwrap();
        let decoded: TimeRange = serde_json::from_str(&json).unwrap();
        assert_eq!(window, decoded);
    }
}
