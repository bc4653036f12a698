use chrono::{DateTime, Duration, Utc};

use crate::accounting::{UserTimeRecord, day_key, month_prefix};

/// Aggregation window for a voice-time report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Day,
    Week,
    Month,
    AllTime,
}

impl Timeframe {
    /// Parses the slash-command choice values.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "alltime" => Some(Self::AllTime),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Day => "Today",
            Self::Week => "This Week",
            Self::Month => "This Month",
            Self::AllTime => "All Time",
        }
    }
}

/// Seconds accumulated by `record` inside `timeframe`, as of `reference`.
///
/// `AllTime` reads the stored total; it is never recomputed from the
/// history buckets.
pub fn timeframe_seconds(
    record: &UserTimeRecord,
    timeframe: Timeframe,
    reference: DateTime<Utc>,
) -> u64 {
    match timeframe {
        Timeframe::Day => bucket(record, &day_key(reference)),
        Timeframe::Week => (0..7)
            .map(|i| bucket(record, &day_key(reference - Duration::days(i))))
            .sum(),
        Timeframe::Month => {
            let prefix = month_prefix(reference);
            record
                .history
                .iter()
                .filter(|(day, _)| day.starts_with(&prefix))
                .map(|(_, seconds)| seconds)
                .sum()
        }
        Timeframe::AllTime => record.total_seconds,
    }
}

/// The 7 most recent calendar days with their accumulated seconds,
/// reference day first.
pub fn week_breakdown(record: &UserTimeRecord, reference: DateTime<Utc>) -> Vec<(String, u64)> {
    (0..7)
        .map(|i| {
            let day = day_key(reference - Duration::days(i));
            let seconds = bucket(record, &day);
            (day, seconds)
        })
        .collect()
}

fn bucket(record: &UserTimeRecord, day: &str) -> u64 {
    record.history.get(day).copied().unwrap_or(0)
}
