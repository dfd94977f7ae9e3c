use crate::record::Sighting;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The relevance window options offered on the map.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum TimeWindow {
    #[default]
    #[serde(rename = "all")]
    #[value(name = "all")]
    All,
    #[serde(rename = "30m")]
    #[value(name = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    #[value(name = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    #[value(name = "2h")]
    TwoHours,
}

impl TimeWindow {
    pub const OPTIONS: [TimeWindow; 4] = [
        TimeWindow::All,
        TimeWindow::ThirtyMinutes,
        TimeWindow::OneHour,
        TimeWindow::TwoHours,
    ];

    /// `None` means no cutoff.
    pub fn cutoff(&self) -> Option<Duration> {
        match self {
            TimeWindow::All => None,
            TimeWindow::ThirtyMinutes => Some(Duration::minutes(30)),
            TimeWindow::OneHour => Some(Duration::hours(1)),
            TimeWindow::TwoHours => Some(Duration::hours(2)),
        }
    }

    pub fn admits(&self, now: DateTime<Utc>, created_at: DateTime<Utc>) -> bool {
        match self.cutoff() {
            None => true,
            Some(window) => now - created_at < window,
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeWindow::All => "all",
            TimeWindow::ThirtyMinutes => "30m",
            TimeWindow::OneHour => "1h",
            TimeWindow::TwoHours => "2h",
        };
        f.write_str(s)
    }
}

/// Keeps the sightings younger than `window` at `now`, preserving input order.
pub fn filter(all: &[Sighting], now: DateTime<Utc>, window: TimeWindow) -> Vec<&Sighting> {
    all.iter()
        .filter(|s| window.admits(now, s.created_at))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sighting_aged;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        "2026-03-01T18:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_thirty_minute_window_keeps_only_recent() {
        let all = vec![
            sighting_aged("fresh", now(), 2),
            sighting_aged("older", now(), 45),
            sighting_aged("oldest", now(), 90),
        ];
        let kept = filter(&all, now(), TimeWindow::ThirtyMinutes);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id.0, "fresh");
    }

    #[test]
    fn test_all_is_identity() {
        let all: Vec<_> = (0..10)
            .map(|i| sighting_aged(&format!("s{i}"), now(), i * 37))
            .collect();
        let kept = filter(&all, now(), TimeWindow::All);
        assert_eq!(kept.len(), all.len());
        for (a, b) in kept.iter().zip(all.iter()) {
            assert_eq!(*a, b);
        }
    }

    #[test]
    fn test_boundary_is_exclusive() {
        for window in [TimeWindow::ThirtyMinutes, TimeWindow::OneHour, TimeWindow::TwoHours] {
            let limit = window.cutoff().unwrap().num_minutes();
            let all = vec![
                sighting_aged("inside", now(), limit - 1),
                sighting_aged("edge", now(), limit),
            ];
            let kept = filter(&all, now(), window);
            assert_eq!(kept.len(), 1, "window {window}");
            assert_eq!(kept[0].id.0, "inside");
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn prop_membership_matches_age_rule(
            ages in proptest::collection::vec(-600_i64..10_000, 0..60),
            pick in 0_usize..4,
        ) {
            let window = TimeWindow::OPTIONS[pick];
            let all: Vec<Sighting> = ages
                .iter()
                .enumerate()
                .map(|(i, secs)| Sighting {
                    created_at: now() - Duration::seconds(*secs),
                    ..sighting_aged(&format!("s{i}"), now(), 0)
                })
                .collect();
            let kept = filter(&all, now(), window);

            let expected: Vec<&Sighting> = all
                .iter()
                .filter(|s| window.cutoff().is_none_or(|w| now() - s.created_at < w))
                .collect();
            prop_assert_eq!(kept, expected);
        }
    }

    #[test]
    fn test_serde_names() {
        let w: TimeWindow = serde_json::from_str("\"1h\"").unwrap();
        assert_eq!(w, TimeWindow::OneHour);
        assert_eq!(TimeWindow::ThirtyMinutes.to_string(), "30m");
    }
}
