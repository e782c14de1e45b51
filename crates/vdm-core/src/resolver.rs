//! Resolver interface for turning job identifiers into downloadable streams.
//!
//! The core downloader only depends on this trait; the scraping frontend (or
//! a CLI with explicit URLs) supplies the implementation.

use async_trait::async_trait;
use std::collections::HashMap;

/// One candidate stream for a piece of media.
#[derive(Debug, Clone)]
pub struct StreamSource {
    /// Quality label, e.g. "1080p". Unknown labels sort last.
    pub quality: String,
    pub url: String,
}

/// Display metadata plus candidate streams for one job.
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    pub title: String,
    pub subtitle: Option<String>,
    pub cover_url: Option<String>,
    pub stream_urls: Vec<StreamSource>,
}

/// Trait implemented by metadata providers (scraper, static catalogue, tests).
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn resolve(&self, job_id: &str) -> anyhow::Result<MediaInfo>;
}

/// Sort key for quality labels; lower is preferred.
fn quality_rank(quality: &str) -> u32 {
    match quality.to_ascii_lowercase().as_str() {
        "1080p" => 1,
        "720p" => 2,
        "480p" => 3,
        "360p" => 4,
        "240p" => 5,
        _ => 999,
    }
}

/// Picks the highest-quality stream. Ties keep the earliest candidate.
pub fn best_stream(streams: &[StreamSource]) -> Option<&StreamSource> {
    streams.iter().min_by_key(|s| quality_rank(&s.quality))
}

/// In-memory provider backed by explicit entries. Used by the CLI and tests.
#[derive(Default)]
pub struct StaticProvider {
    entries: HashMap<String, MediaInfo>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job_id: impl Into<String>, info: MediaInfo) {
        self.entries.insert(job_id.into(), info);
    }
}

#[async_trait]
impl MetadataProvider for StaticProvider {
    async fn resolve(&self, job_id: &str) -> anyhow::Result<MediaInfo> {
        self.entries
            .get(job_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown job id: {job_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(quality: &str, url: &str) -> StreamSource {
        StreamSource {
            quality: quality.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn best_stream_prefers_1080p() {
        let streams = vec![src("480p", "a"), src("1080p", "b"), src("720p", "c")];
        assert_eq!(best_stream(&streams).unwrap().url, "b");
    }

    #[test]
    fn unknown_quality_sorts_last() {
        let streams = vec![src("raw", "a"), src("240p", "b")];
        assert_eq!(best_stream(&streams).unwrap().url, "b");
    }

    #[test]
    fn quality_compare_is_case_insensitive() {
        let streams = vec![src("720P", "a"), src("480p", "b")];
        assert_eq!(best_stream(&streams).unwrap().url, "a");
    }

    #[test]
    fn empty_streams_yield_none() {
        assert!(best_stream(&[]).is_none());
    }

    #[tokio::test]
    async fn static_provider_roundtrip() {
        let mut provider = StaticProvider::new();
        provider.insert(
            "ep-1",
            MediaInfo {
                title: "Episode 1".to_string(),
                stream_urls: vec![src("1080p", "http://example.com/ep1")],
                ..Default::default()
            },
        );
        let info = provider.resolve("ep-1").await.unwrap();
        assert_eq!(info.title, "Episode 1");
        assert!(provider.resolve("ep-2").await.is_err());
    }
}
