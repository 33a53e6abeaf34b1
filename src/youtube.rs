//! Thin blocking client for the YouTube Data API v3.
//!
//! Only three endpoints are used: `search` (candidate ids per category and
//! region), `videos` (snippet, statistics, content details) and `channels`
//! (statistics). The `VideoApi` trait is the seam discovery depends on, so the
//! pipeline can be driven by an in-memory fake in tests.
//!
//! The API encodes every counter as a decimal string and omits fields it does
//! not want to disclose (e.g. hidden like counts). The wire structs keep those
//! as `Option<String>`; `parse_count` turns them into integers with a `0`
//! default so a malformed counter never fails a record.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
/// Maximum page size and id-list length the API accepts per request.
pub const MAX_PAGE_SIZE: usize = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Standard video categories with their display names.
pub const CATEGORIES: &[(&str, &str)] = &[
    ("1", "Film & Animation"),
    ("2", "Autos & Vehicles"),
    ("10", "Music"),
    ("15", "Pets & Animals"),
    ("17", "Sports"),
    ("19", "Travel & Events"),
    ("20", "Gaming"),
    ("22", "People & Blogs"),
    ("23", "Comedy"),
    ("24", "Entertainment"),
    ("25", "News & Politics"),
    ("26", "Howto & Style"),
    ("27", "Education"),
    ("28", "Science & Technology"),
];

/// Region presets accepted wherever a region code is.
pub const REGION_PRESETS: &[(&str, &[&str])] = &[("US_EU", &["US", "GB", "DE", "FR", "ES", "IT", "NL"])];

pub fn category_name(category_id: &str) -> &'static str {
    CATEGORIES
        .iter()
        .find(|(id, _)| *id == category_id)
        .map(|(_, name)| *name)
        .unwrap_or("Unknown")
}

pub fn default_category_ids() -> Vec<String> {
    CATEGORIES.iter().map(|(id, _)| (*id).to_owned()).collect()
}

/// Expands presets into concrete region codes, uppercasing and dropping
/// duplicates while keeping first-seen order.
pub fn expand_regions<S: AsRef<str>>(regions: &[S]) -> Vec<String> {
    let mut expanded: Vec<String> = Vec::new();
    for region in regions {
        let code = region.as_ref().trim().to_ascii_uppercase();
        if code.is_empty() {
            continue;
        }
        let codes: Vec<String> = match REGION_PRESETS.iter().find(|(name, _)| *name == code) {
            Some((_, members)) => members.iter().map(|m| (*m).to_owned()).collect(),
            None => vec![code],
        };
        for code in codes {
            if !expanded.contains(&code) {
                expanded.push(code);
            }
        }
    }
    expanded
}

/// Parses an API counter, defaulting to `0` when absent or malformed.
pub fn parse_count(value: Option<&str>) -> u64 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}

/// Parses ISO-8601 durations of the form `P[nD]T[nH][nM][nS]` into seconds.
/// Anything unparseable (including live streams' `P0D`) yields `0`.
pub fn parse_iso8601_duration(value: &str) -> u64 {
    let Some(rest) = value.strip_prefix('P') else {
        return 0;
    };
    let mut total: u64 = 0;
    let mut number: u64 = 0;
    let mut in_time = false;
    let mut have_digits = false;
    for ch in rest.chars() {
        if let Some(digit) = ch.to_digit(10) {
            number = number.saturating_mul(10).saturating_add(u64::from(digit));
            have_digits = true;
            continue;
        }
        let unit = match (ch, in_time) {
            ('T', false) => {
                in_time = true;
                continue;
            }
            ('W', false) => 7 * 86_400,
            ('D', false) => 86_400,
            ('H', true) => 3_600,
            ('M', true) => 60,
            ('S', true) => 1,
            _ => return 0,
        };
        if !have_digits {
            return 0;
        }
        total = total.saturating_add(number.saturating_mul(unit));
        number = 0;
        have_digits = false;
    }
    if have_digits {
        return 0;
    }
    total
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{endpoint} request returned HTTP {code}")]
    Status { endpoint: &'static str, code: u16 },
    #[error("{endpoint} request failed: {message}")]
    Transport {
        endpoint: &'static str,
        message: String,
    },
    #[error("{endpoint} response could not be decoded: {message}")]
    Decode {
        endpoint: &'static str,
        message: String,
    },
}

/// Parameters of one search call (one category/region pair).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub category_id: String,
    pub region_code: String,
    pub published_after: DateTime<Utc>,
    pub published_before: DateTime<Utc>,
    pub max_results: usize,
    /// Value for the API's `videoDuration` parameter (`any`, `short`, ...).
    pub video_duration: &'static str,
}

/// The three lookups discovery needs from the platform.
pub trait VideoApi {
    /// Returns up to `query.max_results` video ids, following pagination.
    fn search(&self, query: &SearchQuery) -> Result<Vec<String>, ApiError>;
    /// Detail lookup. Ids the API no longer knows about are simply missing.
    fn videos(&self, ids: &[String]) -> Result<Vec<ApiVideo>, ApiError>;
    fn channels(&self, ids: &[String]) -> Result<Vec<ApiChannel>, ApiError>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiVideo {
    pub id: String,
    #[serde(default)]
    pub snippet: VideoSnippet,
    #[serde(default)]
    pub statistics: VideoStatistics,
    #[serde(default, rename = "contentDetails")]
    pub content_details: ContentDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub channel_id: String,
    pub category_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub default_language: Option<String>,
    pub default_audio_language: Option<String>,
    #[serde(default)]
    pub thumbnails: HashMap<String, Thumbnail>,
}

impl VideoSnippet {
    /// Best available thumbnail URL, largest first.
    pub fn best_thumbnail(&self) -> Option<&str> {
        ["maxres", "standard", "high", "medium", "default"]
            .iter()
            .find_map(|key| self.thumbnails.get(*key))
            .map(|thumb| thumb.url.as_str())
    }

    pub fn language(&self) -> Option<&str> {
        self.default_audio_language
            .as_deref()
            .or(self.default_language.as_deref())
            .filter(|lang| !lang.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Thumbnail {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatistics {
    pub view_count: Option<String>,
    pub like_count: Option<String>,
    pub comment_count: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentDetails {
    pub duration: Option<String>,
    pub definition: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiChannel {
    pub id: String,
    #[serde(default)]
    pub statistics: ChannelStatistics,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatistics {
    pub subscriber_count: Option<String>,
    pub view_count: Option<String>,
    pub video_count: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct SearchItem {
    id: SearchItemId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Blocking client backed by a shared `ureq` agent.
#[derive(Clone)]
pub struct YouTubeClient {
    agent: ureq::Agent,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for YouTubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YouTubeClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl YouTubeClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_API_BASE)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            agent,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &'static str,
        params: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let mut request = self.agent.get(&url).query("key", &self.api_key);
        for (name, value) in params {
            request = request.query(name, value);
        }
        let response = request.call().map_err(|err| match err {
            ureq::Error::Status(code, _) => ApiError::Status { endpoint, code },
            ureq::Error::Transport(transport) => ApiError::Transport {
                endpoint,
                message: transport.to_string(),
            },
        })?;
        response.into_json::<T>().map_err(|err| ApiError::Decode {
            endpoint,
            message: err.to_string(),
        })
    }

    /// Runs `endpoint` once per chunk of at most `MAX_PAGE_SIZE` ids.
    fn list_by_ids<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &'static str,
        part: &str,
        ids: &[String],
    ) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        for chunk in ids.chunks(MAX_PAGE_SIZE) {
            let joined = chunk.join(",");
            let page: ListResponse<T> =
                self.get_json(endpoint, &[("part", part), ("id", joined.as_str())])?;
            items.extend(page.items);
        }
        Ok(items)
    }
}

impl VideoApi for YouTubeClient {
    fn search(&self, query: &SearchQuery) -> Result<Vec<String>, ApiError> {
        let published_after = query
            .published_after
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let published_before = query
            .published_before
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        while ids.len() < query.max_results {
            let page_size = (query.max_results - ids.len()).min(MAX_PAGE_SIZE).to_string();
            let mut params = vec![
                ("part", "id"),
                ("type", "video"),
                ("order", "viewCount"),
                ("videoCategoryId", query.category_id.as_str()),
                ("regionCode", query.region_code.as_str()),
                ("publishedAfter", published_after.as_str()),
                ("publishedBefore", published_before.as_str()),
                ("videoDuration", query.video_duration),
                ("maxResults", page_size.as_str()),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            let page: SearchResponse = self.get_json("search", &params)?;
            let before = ids.len();
            ids.extend(page.items.into_iter().filter_map(|item| item.id.video_id));
            debug!(
                category = %query.category_id,
                region = %query.region_code,
                page_results = ids.len() - before,
                "search page fetched"
            );

            match page.next_page_token {
                Some(token) if ids.len() > before => page_token = Some(token),
                _ => break,
            }
        }

        ids.truncate(query.max_results);
        Ok(ids)
    }

    fn videos(&self, ids: &[String]) -> Result<Vec<ApiVideo>, ApiError> {
        self.list_by_ids("videos", "snippet,statistics,contentDetails", ids)
    }

    fn channels(&self, ids: &[String]) -> Result<Vec<ApiChannel>, ApiError> {
        self.list_by_ids("channels", "statistics", ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::mpsc::{self, Receiver};
    use std::thread;

    /// Answers one connection per canned `(status, body)` pair, in order, and
    /// reports each request line back to the test.
    fn serve(responses: Vec<(u16, String)>) -> (String, Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for (code, body) in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                loop {
                    let mut header = String::new();
                    if reader.read_line(&mut header).unwrap() == 0 || header == "\r\n" {
                        break;
                    }
                }
                tx.send(request_line.trim_end().to_owned()).unwrap();
                let response = format!(
                    "HTTP/1.1 {code} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).unwrap();
            }
        });
        (format!("http://{addr}"), rx)
    }

    fn search_page(ids: &[&str], next: Option<&str>) -> (u16, String) {
        let items: Vec<String> = ids
            .iter()
            .map(|id| format!(r#"{{"id": {{"videoId": "{id}"}}}}"#))
            .collect();
        let token = next.map(|t| format!(r#", "nextPageToken": "{t}""#)).unwrap_or_default();
        (200, format!(r#"{{"items": [{}]{token}}}"#, items.join(",")))
    }

    fn query(max_results: usize) -> SearchQuery {
        let now = Utc::now();
        SearchQuery {
            category_id: "20".into(),
            region_code: "US".into(),
            published_after: now - chrono::TimeDelta::days(7),
            published_before: now,
            max_results,
            video_duration: "medium",
        }
    }

    #[test]
    fn search_follows_page_tokens_and_truncates() -> Result<(), ApiError> {
        let (base, requests) = serve(vec![
            search_page(&["a", "b"], Some("p2")),
            search_page(&["c", "d"], Some("p3")),
        ]);
        let client = YouTubeClient::with_base_url("k", base);

        let ids = client.search(&query(3))?;

        assert_eq!(ids, vec!["a", "b", "c"]);
        let lines: Vec<String> = requests.try_iter().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("GET /search?"));
        assert!(lines[0].contains("maxResults=3"));
        assert!(lines[0].contains("videoCategoryId=20"));
        assert!(lines[0].contains("regionCode=US"));
        assert!(!lines[0].contains("pageToken"));
        assert!(lines[1].contains("pageToken=p2"));
        assert!(lines[1].contains("maxResults=1"));
        Ok(())
    }

    #[test]
    fn search_stops_on_an_empty_page() -> Result<(), ApiError> {
        let (base, requests) = serve(vec![
            search_page(&["a"], Some("p2")),
            search_page(&[], Some("p3")),
        ]);
        let client = YouTubeClient::with_base_url("k", base);

        assert_eq!(client.search(&query(5))?, vec!["a"]);
        assert_eq!(requests.try_iter().count(), 2);
        Ok(())
    }

    #[test]
    fn id_lookups_are_chunked_by_fifty() -> Result<(), ApiError> {
        let channel = |id: &str| -> (u16, String) {
            (
                200,
                format!(r#"{{"items": [{{"id": "{id}", "statistics": {{"subscriberCount": "7"}}}}]}}"#),
            )
        };
        let (base, requests) = serve(vec![channel("first"), channel("second")]);
        let client = YouTubeClient::with_base_url("k", base);
        let ids: Vec<String> = (0..51).map(|n| format!("v{n}")).collect();

        let channels = client.channels(&ids)?;

        let got: Vec<&str> = channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(got, vec!["first", "second"]);
        let lines: Vec<String> = requests.try_iter().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("GET /channels?"));
        assert!(lines[0].contains("v49"));
        assert!(!lines[0].contains("v50"));
        assert!(lines[1].contains("id=v50 "));
        Ok(())
    }

    #[test]
    fn http_status_and_bad_bodies_map_to_errors() {
        let (base, _requests) = serve(vec![
            (403, r#"{"error": {"code": 403}}"#.to_owned()),
            (200, "not json".to_owned()),
        ]);
        let client = YouTubeClient::with_base_url("k", base);

        let err = client.search(&query(5)).unwrap_err();
        assert!(matches!(err, ApiError::Status { endpoint: "search", code: 403 }));
        let err = client.videos(&["a".to_owned()]).unwrap_err();
        assert!(matches!(err, ApiError::Decode { endpoint: "videos", .. }));
    }

    #[test]
    fn counters_default_to_zero() {
        assert_eq!(parse_count(Some("1234")), 1234);
        assert_eq!(parse_count(Some("")), 0);
        assert_eq!(parse_count(Some("12k")), 0);
        assert_eq!(parse_count(Some("-5")), 0);
        assert_eq!(parse_count(None), 0);
    }

    #[test]
    fn durations_parse_to_seconds() {
        assert_eq!(parse_iso8601_duration("PT45S"), 45);
        assert_eq!(parse_iso8601_duration("PT4M13S"), 253);
        assert_eq!(parse_iso8601_duration("PT1H2M3S"), 3_723);
        assert_eq!(parse_iso8601_duration("P1DT1S"), 86_401);
        assert_eq!(parse_iso8601_duration("PT10M"), 600);
    }

    #[test]
    fn malformed_durations_are_zero() {
        assert_eq!(parse_iso8601_duration("P0D"), 0);
        assert_eq!(parse_iso8601_duration(""), 0);
        assert_eq!(parse_iso8601_duration("4:13"), 0);
        assert_eq!(parse_iso8601_duration("PT5"), 0);
        assert_eq!(parse_iso8601_duration("PTM"), 0);
    }

    #[test]
    fn presets_expand_and_dedupe() {
        let regions = expand_regions(&["us", "US_EU", " de "]);
        assert_eq!(regions, vec!["US", "GB", "DE", "FR", "ES", "IT", "NL"]);
        assert!(expand_regions::<&str>(&[]).is_empty());
    }

    #[test]
    fn category_names_fall_back_to_unknown() {
        assert_eq!(category_name("20"), "Gaming");
        assert_eq!(category_name("999"), "Unknown");
        assert_eq!(default_category_ids().len(), CATEGORIES.len());
    }

    #[test]
    fn video_payload_decodes_with_missing_fields() {
        let raw = r#"{
            "id": "video1",
            "snippet": {
                "title": "Test Video 1",
                "categoryId": "10",
                "publishedAt": "2024-01-01T00:00:00Z",
                "thumbnails": {
                    "default": {"url": "http://example.com/small.jpg"},
                    "high": {"url": "http://example.com/thumb1.jpg"}
                },
                "channelId": "channel1",
                "description": "Test description"
            },
            "statistics": {"viewCount": "1000", "likeCount": "100"}
        }"#;
        let video: ApiVideo = serde_json::from_str(raw).unwrap();
        assert_eq!(video.snippet.best_thumbnail(), Some("http://example.com/thumb1.jpg"));
        assert_eq!(parse_count(video.statistics.view_count.as_deref()), 1000);
        assert_eq!(parse_count(video.statistics.comment_count.as_deref()), 0);
        assert!(video.content_details.duration.is_none());
        assert!(video.snippet.language().is_none());
    }

    #[test]
    fn channel_list_decodes() {
        let raw = r#"{"items": [{"id": "channel1", "statistics": {"subscriberCount": "50000"}}]}"#;
        let page: ListResponse<ApiChannel> = serde_json::from_str(raw).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(parse_count(page.items[0].statistics.subscriber_count.as_deref()), 50_000);
    }

    #[test]
    fn search_page_skips_items_without_video_id() {
        let raw = r#"{
            "items": [{"id": {"videoId": "a"}}, {"id": {"channelId": "c"}}],
            "nextPageToken": "CAUQAA"
        }"#;
        let page: SearchResponse = serde_json::from_str(raw).unwrap();
        let ids: Vec<String> = page.items.into_iter().filter_map(|i| i.id.video_id).collect();
        assert_eq!(ids, vec!["a"]);
        assert_eq!(page.next_page_token.as_deref(), Some("CAUQAA"));
    }
}
