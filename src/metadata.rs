//! Video records and the staging metadata file.
//!
//! `VideoRecord` is the unit of collection: discovery builds it from the API
//! payloads, the metric calculator fills in `derived`, and the staging writer
//! turns it into one CSV row. The column order below is the on-disk contract
//! with the rotation workflow and every downstream consumer of the dataset, so
//! new columns may only ever be appended at the end.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Stable column order of `metadata.csv`.
pub const CSV_COLUMNS: [&str; 25] = [
    "video_id",
    "title",
    "category_id",
    "category_name",
    "published_at",
    "captured_at",
    "views",
    "likes",
    "comments",
    "channel_id",
    "channel_subscribers",
    "channel_total_views",
    "channel_video_count",
    "tags",
    "description_len",
    "duration_seconds",
    "definition",
    "language",
    "video_url",
    "thumbnail_url",
    "viral_ratio",
    "views_per_subscriber",
    "title_length",
    "is_clickbait",
    "batch_version",
];

/// Placeholder stored when the platform reports no language for a video.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Definition {
    #[default]
    Standard,
    High,
}

impl Definition {
    /// Maps the platform's `sd`/`hd` marker. Anything unrecognised is standard.
    pub fn from_api(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("hd") => Definition::High,
            _ => Definition::Standard,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Definition::Standard => "standard",
            Definition::High => "high",
        }
    }
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signals computed from the record itself, never read from the API.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DerivedSignals {
    pub viral_ratio: f64,
    pub views_per_subscriber: f64,
    pub title_length: usize,
    pub is_clickbait: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub title: String,
    pub category_id: String,
    pub category_name: String,
    pub published_at: DateTime<Utc>,
    pub captured_at: DateTime<Utc>,
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
    pub channel_id: String,
    pub channel_subscribers: u64,
    pub channel_total_views: u64,
    pub channel_video_count: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub description_len: usize,
    pub duration_seconds: u64,
    pub definition: Definition,
    pub language: String,
    pub video_url: String,
    pub thumbnail_url: String,
    #[serde(default)]
    pub derived: DerivedSignals,
}

impl VideoRecord {
    /// Renders the record as CSV fields in `CSV_COLUMNS` order.
    fn csv_fields(&self, batch_version: &str) -> Result<Vec<String>> {
        let tags = serde_json::to_string(&self.tags).context("serializing tags")?;
        Ok(vec![
            self.video_id.clone(),
            self.title.clone(),
            self.category_id.clone(),
            self.category_name.clone(),
            format_timestamp(&self.published_at),
            format_timestamp(&self.captured_at),
            self.views.to_string(),
            self.likes.to_string(),
            self.comments.to_string(),
            self.channel_id.clone(),
            self.channel_subscribers.to_string(),
            self.channel_total_views.to_string(),
            self.channel_video_count.to_string(),
            tags,
            self.description_len.to_string(),
            self.duration_seconds.to_string(),
            self.definition.to_string(),
            self.language.clone(),
            self.video_url.clone(),
            self.thumbnail_url.clone(),
            self.derived.viral_ratio.to_string(),
            self.derived.views_per_subscriber.to_string(),
            self.derived.title_length.to_string(),
            u8::from(self.derived.is_clickbait).to_string(),
            batch_version.to_owned(),
        ])
    }
}

/// Canonical watch URL for a video id.
pub fn video_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Quotes a field when it contains a delimiter or quote. Line breaks become
/// spaces so every record stays on exactly one line; the staged sample count
/// is a plain line count.
fn escape_field(field: &str) -> String {
    let field = field.replace(['\r', '\n'], " ");
    if field.contains([',', '"']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field
    }
}

fn csv_line<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = fields
        .iter()
        .map(|f| escape_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// Appends one row per record to the staging metadata file, writing the
/// header first when the file is missing or empty. Rows keep input order.
///
/// Returns the number of rows written. Errors propagate: a failed staging
/// write invalidates the run.
pub fn append_records(path: &Path, records: &[VideoRecord], batch_version: &str) -> Result<usize> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating staging directory {}", parent.display()))?;
    }

    // A truncated file needs its header back as much as a missing one.
    let write_header = match std::fs::metadata(path) {
        Ok(meta) => meta.len() == 0,
        Err(err) if err.kind() == ErrorKind::NotFound => true,
        Err(err) => {
            return Err(err).with_context(|| format!("inspecting metadata file {}", path.display()));
        }
    };
    let mut buffer = String::new();
    if write_header {
        buffer.push_str(&csv_line(&CSV_COLUMNS));
    }
    for record in records {
        buffer.push_str(&csv_line(&record.csv_fields(batch_version)?));
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening metadata file {}", path.display()))?;
    file.write_all(buffer.as_bytes())
        .with_context(|| format!("appending to {}", path.display()))?;
    file.flush()
        .with_context(|| format!("flushing {}", path.display()))?;

    Ok(records.len())
}

#[cfg(test)]
pub(crate) fn sample_record(video_id: &str) -> VideoRecord {
    use chrono::TimeZone;

    VideoRecord {
        video_id: video_id.to_owned(),
        title: format!("Video {video_id}"),
        category_id: "20".into(),
        category_name: "Gaming".into(),
        published_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        captured_at: Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap(),
        views: 1_000,
        likes: 100,
        comments: 10,
        channel_id: "chan1".into(),
        channel_subscribers: 50_000,
        channel_total_views: 1_000_000,
        channel_video_count: 100,
        tags: vec!["games".into()],
        description_len: 42,
        duration_seconds: 600,
        definition: Definition::High,
        language: "en".into(),
        video_url: video_url(video_id),
        thumbnail_url: format!("https://i.ytimg.com/vi/{video_id}/hqdefault.jpg"),
        derived: DerivedSignals::default(),
    }
}
