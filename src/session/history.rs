//! Grouping saved conversations for the history view

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};

use crate::domain::ConversationSummary;

/// Relative age bucket of a saved conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HistoryBucket {
    Today,
    Yesterday,
    Previous7Days,
    Older,
}

impl std::fmt::Display for HistoryBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryBucket::Today => write!(f, "Heute"),
            HistoryBucket::Yesterday => write!(f, "Gestern"),
            HistoryBucket::Previous7Days => write!(f, "Letzte 7 Tage"),
            HistoryBucket::Older => write!(f, "Älter"),
        }
    }
}

fn bucket_for(day: NaiveDate, today: NaiveDate) -> HistoryBucket {
    let age = today.signed_duration_since(day);
    if age <= Duration::zero() {
        HistoryBucket::Today
    } else if age == Duration::days(1) {
        HistoryBucket::Yesterday
    } else if age <= Duration::days(7) {
        HistoryBucket::Previous7Days
    } else {
        HistoryBucket::Older
    }
}

/// Bucket summaries by calendar day in local time, newest first
///
/// Empty buckets are left out; bucket order is Today, Yesterday, Previous 7
/// days, Older.
pub fn group_history(
    summaries: Vec<ConversationSummary>,
    now: DateTime<Utc>,
) -> Vec<(HistoryBucket, Vec<ConversationSummary>)> {
    group_history_in(summaries, now, |ts| ts.with_timezone(&Local).date_naive())
}

fn group_history_in(
    mut summaries: Vec<ConversationSummary>,
    now: DateTime<Utc>,
    day_of: impl Fn(DateTime<Utc>) -> NaiveDate,
) -> Vec<(HistoryBucket, Vec<ConversationSummary>)> {
    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    let today = day_of(now);

    let mut groups: Vec<(HistoryBucket, Vec<ConversationSummary>)> = Vec::new();
    for summary in summaries {
        let bucket = bucket_for(day_of(summary.updated_at), today);
        match groups.last_mut() {
            Some((last, items)) if *last == bucket => items.push(summary),
            _ => groups.push((bucket, vec![summary])),
        }
    }
    groups
}
