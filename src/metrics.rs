//! Derived per-video signals computed after discovery.
//!
//! Everything here is pure: no I/O, no shared state, and no failure modes.
//! Missing or zero denominators are floored so the functions are total.

use crate::metadata::{DerivedSignals, VideoRecord};

/// Uppercase share of a title above which it counts as clickbait.
pub const CLICKBAIT_UPPERCASE_RATIO: f64 = 0.5;

/// Returns `(title_length, is_clickbait)`.
///
/// A title is flagged when it contains `!` or `?`, or when more than half of
/// its characters are uppercase. Length is measured in characters, not bytes.
pub fn title_signals(title: &str) -> (usize, bool) {
    let length = title.chars().count();
    if title.contains('!') || title.contains('?') {
        return (length, true);
    }
    if length == 0 {
        return (0, false);
    }
    let uppercase = title.chars().filter(|c| c.is_uppercase()).count();
    let ratio = uppercase as f64 / length as f64;
    (length, ratio > CLICKBAIT_UPPERCASE_RATIO)
}

pub fn view_subscriber_ratio(views: u64, subscribers: u64) -> f64 {
    views as f64 / subscribers.max(1) as f64
}

/// How far a video sits above or below its channel's per-video average, on a
/// log10 scale. Zero means "exactly average"; +1 means ten times the average.
pub fn log_baseline_deviation(views: u64, channel_total_views: u64, channel_video_count: u64) -> f64 {
    let average = channel_total_views as f64 / channel_video_count.max(1) as f64;
    (views as f64 + 1.0).log10() - (average + 1.0).log10()
}

pub fn derive_signals(record: &VideoRecord) -> DerivedSignals {
    let (title_length, is_clickbait) = title_signals(&record.title);
    DerivedSignals {
        viral_ratio: log_baseline_deviation(
            record.views,
            record.channel_total_views,
            record.channel_video_count,
        ),
        views_per_subscriber: view_subscriber_ratio(record.views, record.channel_subscribers),
        title_length,
        is_clickbait,
    }
}

/// Fills the derived fields of `record` in place.
pub fn enrich(record: &mut VideoRecord) {
    record.derived = derive_signals(record);
}
