//! Video discovery across category/region pairs.
//!
//! For every pair we run one (paged) search bounded to the publish window,
//! fetch full details for the returned ids and the owning channels' statistics
//! in batched lookups, then filter and enrich. A failing pair never aborts the
//! pass: it shows up in `DiscoveryReport::failed_pairs` and contributes zero
//! records. Videos that do not meet the thresholds are reported as skipped,
//! not as errors.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::metadata::{Definition, UNKNOWN_LANGUAGE, VideoRecord, video_url};
use crate::metrics;
use crate::youtube::{
    ApiChannel, ApiError, ApiVideo, SearchQuery, VideoApi, category_name, parse_count,
    parse_iso8601_duration,
};

/// Upper bound of the platform's "short" bucket, in seconds.
pub const SHORT_MAX_SECONDS: u64 = 4 * 60;
/// Upper bound of the platform's "medium" bucket, in seconds.
pub const MEDIUM_MAX_SECONDS: u64 = 20 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurationBucket {
    #[default]
    Any,
    /// Under four minutes.
    Short,
    /// Four to twenty minutes.
    Medium,
    /// Over twenty minutes.
    Long,
}

impl DurationBucket {
    pub fn matches(self, seconds: u64) -> bool {
        match self {
            DurationBucket::Any => true,
            DurationBucket::Short => seconds < SHORT_MAX_SECONDS,
            DurationBucket::Medium => (SHORT_MAX_SECONDS..=MEDIUM_MAX_SECONDS).contains(&seconds),
            DurationBucket::Long => seconds > MEDIUM_MAX_SECONDS,
        }
    }

    /// Value understood by the search endpoint's `videoDuration` parameter.
    pub fn as_api_param(self) -> &'static str {
        match self {
            DurationBucket::Any => "any",
            DurationBucket::Short => "short",
            DurationBucket::Medium => "medium",
            DurationBucket::Long => "long",
        }
    }
}

impl fmt::Display for DurationBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_api_param())
    }
}

impl FromStr for DurationBucket {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(DurationBucket::Any),
            "short" => Ok(DurationBucket::Short),
            "medium" => Ok(DurationBucket::Medium),
            "long" => Ok(DurationBucket::Long),
            other => bail!("unknown duration bucket: {other}"),
        }
    }
}

/// Everything one discovery pass needs. `regions` is queried as given; any
/// random narrowing happens before the request is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub days_ago: u32,
    pub videos_per_category: usize,
    pub categories: BTreeSet<String>,
    pub regions: Vec<String>,
    pub min_subscribers: u64,
    pub min_views: u64,
    pub min_duration_seconds: u64,
    pub duration_bucket: DurationBucket,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    DurationBucket { seconds: u64, bucket: DurationBucket },
    TooShort { seconds: u64, min: u64 },
    TooFewViews { views: u64, min: u64 },
    TooFewSubscribers { subscribers: u64, min: u64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::DurationBucket { seconds, bucket } => {
                write!(f, "{seconds}s is outside the {bucket} bucket")
            }
            SkipReason::TooShort { seconds, min } => write!(f, "{seconds}s is shorter than {min}s"),
            SkipReason::TooFewViews { views, min } => write!(f, "{views} views < {min}"),
            SkipReason::TooFewSubscribers { subscribers, min } => {
                write!(f, "{subscribers} subscribers < {min}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedVideo {
    pub video_id: String,
    pub reason: SkipReason,
}

#[derive(Debug)]
pub struct PairFailure {
    pub category_id: String,
    pub region_code: String,
    pub cause: ApiError,
}

/// Outcome of one discovery pass.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Filtered, enriched, deduplicated records in first-seen order.
    pub records: Vec<VideoRecord>,
    pub skipped: Vec<SkippedVideo>,
    pub failed_pairs: Vec<PairFailure>,
    pub pairs_queried: usize,
}

impl DiscoveryReport {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Applies the thresholds in order, stopping at the first miss.
pub fn check_filters(record: &VideoRecord, request: &DiscoveryRequest) -> Result<(), SkipReason> {
    let seconds = record.duration_seconds;
    if !request.duration_bucket.matches(seconds) {
        return Err(SkipReason::DurationBucket {
            seconds,
            bucket: request.duration_bucket,
        });
    }
    if seconds < request.min_duration_seconds {
        return Err(SkipReason::TooShort {
            seconds,
            min: request.min_duration_seconds,
        });
    }
    if record.views < request.min_views {
        return Err(SkipReason::TooFewViews {
            views: record.views,
            min: request.min_views,
        });
    }
    if record.channel_subscribers < request.min_subscribers {
        return Err(SkipReason::TooFewSubscribers {
            subscribers: record.channel_subscribers,
            min: request.min_subscribers,
        });
    }
    Ok(())
}

/// Builds a record from the detail payload and (optionally) its channel.
/// Missing counters become `0`; a missing channel leaves channel stats at `0`.
pub fn build_record(
    video: &ApiVideo,
    channel: Option<&ApiChannel>,
    captured_at: DateTime<Utc>,
) -> VideoRecord {
    let snippet = &video.snippet;
    let category_id = snippet.category_id.clone().unwrap_or_default();
    let channel_stats = channel.map(|c| &c.statistics);

    let mut record = VideoRecord {
        video_id: video.id.clone(),
        title: snippet.title.clone(),
        category_name: category_name(&category_id).to_owned(),
        category_id,
        published_at: snippet.published_at.unwrap_or(captured_at),
        captured_at,
        views: parse_count(video.statistics.view_count.as_deref()),
        likes: parse_count(video.statistics.like_count.as_deref()),
        comments: parse_count(video.statistics.comment_count.as_deref()),
        channel_id: snippet.channel_id.clone(),
        channel_subscribers: parse_count(
            channel_stats.and_then(|s| s.subscriber_count.as_deref()),
        ),
        channel_total_views: parse_count(channel_stats.and_then(|s| s.view_count.as_deref())),
        channel_video_count: parse_count(channel_stats.and_then(|s| s.video_count.as_deref())),
        tags: snippet.tags.clone(),
        description_len: snippet.description.chars().count(),
        duration_seconds: video
            .content_details
            .duration
            .as_deref()
            .map(parse_iso8601_duration)
            .unwrap_or(0),
        definition: Definition::from_api(video.content_details.definition.as_deref()),
        language: snippet.language().unwrap_or(UNKNOWN_LANGUAGE).to_owned(),
        video_url: video_url(&video.id),
        thumbnail_url: snippet.best_thumbnail().unwrap_or_default().to_owned(),
        derived: Default::default(),
    };
    metrics::enrich(&mut record);
    record
}

/// Start of the publish window. Windows reaching past the earliest
/// representable instant are clamped to it.
pub fn window_start(now: DateTime<Utc>, days_ago: u32) -> DateTime<Utc> {
    TimeDelta::try_days(i64::from(days_ago))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Discovery service bound to one API collaborator.
pub struct Discovery<A> {
    api: A,
}

impl<A: VideoApi> Discovery<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn discover(&self, request: &DiscoveryRequest) -> DiscoveryReport {
        self.discover_at(request, Utc::now())
    }

    /// Same as `discover` with an explicit clock, used for the publish window
    /// and as every record's `captured_at`.
    pub fn discover_at(&self, request: &DiscoveryRequest, now: DateTime<Utc>) -> DiscoveryReport {
        let published_after = window_start(now, request.days_ago);
        let mut report = DiscoveryReport::default();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for category in &request.categories {
            for region in &request.regions {
                report.pairs_queried += 1;
                let query = SearchQuery {
                    category_id: category.clone(),
                    region_code: region.clone(),
                    published_after,
                    published_before: now,
                    max_results: request.videos_per_category,
                    video_duration: request.duration_bucket.as_api_param(),
                };

                let videos = match self.discover_pair(&query, now) {
                    Ok(videos) => videos,
                    Err(cause) => {
                        warn!(category = %category, region = %region, error = %cause, "query failed; skipping pair");
                        report.failed_pairs.push(PairFailure {
                            category_id: category.clone(),
                            region_code: region.clone(),
                            cause,
                        });
                        continue;
                    }
                };

                let mut kept = 0usize;
                for record in videos {
                    if let Err(reason) = check_filters(&record, request) {
                        debug!(video_id = %record.video_id, %reason, "video filtered out");
                        report.skipped.push(SkippedVideo {
                            video_id: record.video_id,
                            reason,
                        });
                        continue;
                    }
                    kept += 1;
                    // Last seen wins, but the record keeps its first position.
                    match positions.get(&record.video_id) {
                        Some(&index) => report.records[index] = record,
                        None => {
                            positions.insert(record.video_id.clone(), report.records.len());
                            report.records.push(record);
                        }
                    }
                }
                debug!(category = %category, region = %region, kept, "pair complete");
            }
        }

        info!(
            pairs = report.pairs_queried,
            failed = report.failed_pairs.len(),
            skipped = report.skipped.len(),
            records = report.records.len(),
            "discovery finished"
        );
        report
    }

    /// Search plus detail and channel lookups for one pair. Any API error
    /// fails the whole pair.
    fn discover_pair(
        &self,
        query: &SearchQuery,
        captured_at: DateTime<Utc>,
    ) -> Result<Vec<VideoRecord>, ApiError> {
        let ids = self.api.search(query)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let videos = self.api.videos(&ids)?;
        let mut channel_ids: Vec<String> = Vec::new();
        for video in &videos {
            let channel_id = &video.snippet.channel_id;
            if !channel_id.is_empty() && !channel_ids.contains(channel_id) {
                channel_ids.push(channel_id.clone());
            }
        }
        let channels: HashMap<String, ApiChannel> = if channel_ids.is_empty() {
            HashMap::new()
        } else {
            self.api
                .channels(&channel_ids)?
                .into_iter()
                .map(|channel| (channel.id.clone(), channel))
                .collect()
        };

        Ok(videos
            .iter()
            .map(|video| build_record(video, channels.get(&video.snippet.channel_id), captured_at))
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory `VideoApi` used by discovery and driver tests.

    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};

    use crate::youtube::{
        ApiChannel, ApiError, ApiVideo, ChannelStatistics, ContentDetails, SearchQuery,
        Thumbnail, VideoApi, VideoSnippet, VideoStatistics,
    };

    #[derive(Default)]
    pub struct FakeApi {
        /// (category, region) -> ids returned by search.
        pub search_results: HashMap<(String, String), Vec<String>>,
        pub failing_pairs: HashSet<(String, String)>,
        pub videos: HashMap<String, ApiVideo>,
        pub channels: HashMap<String, ApiChannel>,
        pub fail_channels: bool,
        pub searches: RefCell<Vec<SearchQuery>>,
        pub channel_lookups: RefCell<usize>,
    }

    impl FakeApi {
        pub fn with_search(mut self, category: &str, region: &str, ids: &[&str]) -> Self {
            self.search_results.insert(
                (category.into(), region.into()),
                ids.iter().map(|id| (*id).to_owned()).collect(),
            );
            self
        }

        pub fn with_failing_pair(mut self, category: &str, region: &str) -> Self {
            self.failing_pairs.insert((category.into(), region.into()));
            self
        }

        pub fn with_video(mut self, video: ApiVideo) -> Self {
            self.videos.insert(video.id.clone(), video);
            self
        }

        pub fn with_channel(mut self, id: &str, subscribers: u64, views: u64, count: u64) -> Self {
            self.channels.insert(
                id.into(),
                ApiChannel {
                    id: id.into(),
                    statistics: ChannelStatistics {
                        subscriber_count: Some(subscribers.to_string()),
                        view_count: Some(views.to_string()),
                        video_count: Some(count.to_string()),
                    },
                },
            );
            self
        }
    }

    pub fn video(id: &str, channel: &str, views: u64, duration: &str) -> ApiVideo {
        ApiVideo {
            id: id.into(),
            snippet: VideoSnippet {
                title: format!("Title {id}"),
                description: "desc".into(),
                published_at: None,
                channel_id: channel.into(),
                category_id: Some("20".into()),
                tags: vec!["tag".into()],
                default_language: None,
                default_audio_language: Some("en".into()),
                thumbnails: [(
                    "high".to_owned(),
                    Thumbnail {
                        url: format!("http://thumbs.test/{id}.jpg"),
                    },
                )]
                .into_iter()
                .collect(),
            },
            statistics: VideoStatistics {
                view_count: Some(views.to_string()),
                like_count: Some("1".into()),
                comment_count: None,
            },
            content_details: ContentDetails {
                duration: Some(duration.into()),
                definition: Some("hd".into()),
            },
        }
    }

    impl VideoApi for FakeApi {
        fn search(&self, query: &SearchQuery) -> Result<Vec<String>, ApiError> {
            self.searches.borrow_mut().push(query.clone());
            let key = (query.category_id.clone(), query.region_code.clone());
            if self.failing_pairs.contains(&key) {
                return Err(ApiError::Status {
                    endpoint: "search",
                    code: 403,
                });
            }
            let mut ids = self.search_results.get(&key).cloned().unwrap_or_default();
            ids.truncate(query.max_results);
            Ok(ids)
        }

        fn videos(&self, ids: &[String]) -> Result<Vec<ApiVideo>, ApiError> {
            Ok(ids.iter().filter_map(|id| self.videos.get(id).cloned()).collect())
        }

        fn channels(&self, ids: &[String]) -> Result<Vec<ApiChannel>, ApiError> {
            *self.channel_lookups.borrow_mut() += 1;
            if self.fail_channels {
                return Err(ApiError::Transport {
                    endpoint: "channels",
                    message: "connection reset".into(),
                });
            }
            Ok(ids.iter().filter_map(|id| self.channels.get(id).cloned()).collect())
        }
    }
}
