//! Source resolution
//!
//! Turns an item's locator and media type into a [`ResolvedSource`] that a
//! renderer can open. Caching and HTTP transport live outside the crate.

use crate::media::{Item, MediaMetadata, MediaType};
use crate::utils::error::{PlayerError, Result};
use log::debug;
use std::collections::BTreeMap;
use std::path::Path;

/// How the renderer should treat the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Progressive,
    Dash,
    Hls,
    SmoothStreaming,
}

impl From<MediaType> for SourceKind {
    fn from(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Default => SourceKind::Progressive,
            MediaType::Dash => SourceKind::Dash,
            MediaType::Hls => SourceKind::Hls,
            MediaType::SmoothStreaming => SourceKind::SmoothStreaming,
        }
    }
}

/// A stream ready to hand to a renderer
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSource {
    pub uri: String,
    pub kind: SourceKind,
    /// Transport headers, user agent folded in
    pub headers: BTreeMap<String, String>,
    pub resource_id: Option<u32>,
    pub metadata: MediaMetadata,
}

/// Capability that maps items to playable streams
pub trait SourceResolver: Send + Sync {
    fn resolve(&self, item: &Item) -> Result<ResolvedSource>;
}

/// Resolver for the locator schemes the core understands natively
#[derive(Debug, Clone, Default)]
pub struct DefaultResolver {
    /// Reject `file:` locators whose path does not exist
    check_local_files: bool,
}

impl DefaultResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail resolution early for missing local files
    pub fn with_local_file_check(mut self, enabled: bool) -> Self {
        self.check_local_files = enabled;
        self
    }
}

impl SourceResolver for DefaultResolver {
    fn resolve(&self, item: &Item) -> Result<ResolvedSource> {
        let locator = item.locator();
        let scheme = item
            .scheme()
            .ok_or_else(|| PlayerError::source_unavailable(locator, "missing scheme"))?;

        match scheme.as_str() {
            "http" | "https" | "content" | "asset" => {}
            "file" => {
                if self.check_local_files {
                    let path = locator.trim_start_matches("file://");
                    if !Path::new(path).exists() {
                        return Err(PlayerError::source_unavailable(locator, "file not found"));
                    }
                }
            }
            "rawresource" => {
                if item.resource_id().is_none() {
                    return Err(PlayerError::source_unavailable(locator, "raw resource without a resource id"));
                }
            }
            other => {
                return Err(PlayerError::source_unavailable(
                    locator,
                    format!("unsupported scheme '{}'", other),
                ));
            }
        }

        let mut headers = item.headers().clone();
        if let Some(user_agent) = item.user_agent() {
            headers.insert("User-Agent".to_string(), user_agent.to_string());
        }

        let source = ResolvedSource {
            uri: locator.to_string(),
            kind: item.media_type().into(),
            headers,
            resource_id: item.resource_id(),
            metadata: item.metadata().clone(),
        };
        debug!("Resolved {} as {:?}", source.uri, source.kind);
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_streaming_kinds() {
        let item = Item::builder("https://cdn.example.com/a.mpd")
            .media_type(MediaType::Dash)
            .user_agent("trackdeck/0.1")
            .build()
            .unwrap();
        let source = DefaultResolver::new().resolve(&item).unwrap();
        assert_eq!(source.kind, SourceKind::Dash);
        assert_eq!(source.headers.get("User-Agent").map(String::as_str), Some("trackdeck/0.1"));
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        let item = Item::builder("ftp://example.com/a.mp3").build().unwrap();
        let err = DefaultResolver::new().resolve(&item).unwrap_err();
        assert!(matches!(err, PlayerError::SourceUnavailable { .. }));
    }

    #[test]
    fn test_local_file_check() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.wav");
        std::fs::write(&present, b"RIFF").unwrap();

        let resolver = DefaultResolver::new().with_local_file_check(true);
        let ok = Item::builder(format!("file://{}", present.display())).build().unwrap();
        assert!(resolver.resolve(&ok).is_ok());

        let missing = Item::builder(format!("file://{}", dir.path().join("b.wav").display()))
            .build()
            .unwrap();
        assert!(resolver.resolve(&missing).is_err());
        assert!(DefaultResolver::new().resolve(&missing).is_ok());
    }

    #[test]
    fn test_raw_resource_needs_id() {
        let without = Item::builder("rawresource:///song").build().unwrap();
        assert!(DefaultResolver::new().resolve(&without).is_err());

        let with = Item::builder("rawresource:///song").resource_id(7).build().unwrap();
        assert_eq!(DefaultResolver::new().resolve(&with).unwrap().resource_id, Some(7));
    }
}
