//! Media item model for trackdeck
//!
//! This module defines the immutable `Item` placed in the queue, its display
//! metadata, and the source-resolution seam that turns an item into
//! something a renderer can open.

mod resolver;

pub use resolver::{DefaultResolver, ResolvedSource, SourceKind, SourceResolver};

use crate::utils::error::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Source-handling strategy for an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Plain progressive download or local file
    #[default]
    Default,
    /// MPEG-DASH manifest
    Dash,
    /// HLS playlist
    Hls,
    /// Smooth Streaming manifest
    SmoothStreaming,
}

/// Display metadata of an item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Artwork reference (URL or URI)
    pub artwork: Option<String>,
    /// Declared duration, when the source knows it up front
    #[serde(with = "optional_millis")]
    pub duration: Option<Duration>,
}

/// One timed metadata entry read from the stream (ID3, ICY, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    /// Format-specific key, such as `TIT2` or `StreamTitle`
    pub key: String,
    pub value: String,
}

/// An immutable description of one playable unit
///
/// Items are cheap to clone and never mutated after construction; replacing
/// an item means putting a new one at the same queue index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    locator: String,
    media_id: String,
    media_type: MediaType,
    headers: BTreeMap<String, String>,
    user_agent: Option<String>,
    resource_id: Option<u32>,
    metadata: MediaMetadata,
}

impl Item {
    /// Start building an item for `locator`
    pub fn builder(locator: impl Into<String>) -> ItemBuilder {
        ItemBuilder::new(locator)
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Stable identifier used for deduplication
    pub fn media_id(&self) -> &str {
        &self.media_id
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn resource_id(&self) -> Option<u32> {
        self.resource_id
    }

    pub fn metadata(&self) -> &MediaMetadata {
        &self.metadata
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.title.as_deref()
    }

    /// Copy of this item with different display metadata
    pub fn with_metadata(&self, metadata: MediaMetadata) -> Item {
        Item {
            metadata,
            ..self.clone()
        }
    }

    /// URI scheme of the locator, lowercased
    pub fn scheme(&self) -> Option<String> {
        scheme_of(&self.locator)
    }
}

/// Builder for [`Item`]
#[derive(Debug, Clone)]
pub struct ItemBuilder {
    locator: String,
    media_id: Option<String>,
    media_type: MediaType,
    headers: BTreeMap<String, String>,
    user_agent: Option<String>,
    resource_id: Option<u32>,
    metadata: MediaMetadata,
}

impl ItemBuilder {
    fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            media_id: None,
            media_type: MediaType::Default,
            headers: BTreeMap::new(),
            user_agent: None,
            resource_id: None,
            metadata: MediaMetadata::default(),
        }
    }

    pub fn media_id(mut self, id: impl Into<String>) -> Self {
        self.media_id = Some(id.into());
        self
    }

    pub fn media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = media_type;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn resource_id(mut self, id: u32) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.metadata.title = Some(title.into());
        self
    }

    pub fn artist(mut self, artist: impl Into<String>) -> Self {
        self.metadata.artist = Some(artist.into());
        self
    }

    pub fn album(mut self, album: impl Into<String>) -> Self {
        self.metadata.album = Some(album.into());
        self
    }

    pub fn artwork(mut self, artwork: impl Into<String>) -> Self {
        self.metadata.artwork = Some(artwork.into());
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.metadata.duration = Some(duration);
        self
    }

    pub fn metadata(mut self, metadata: MediaMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Validate and build the item
    pub fn build(self) -> Result<Item> {
        let locator = self.locator.trim().to_string();
        if locator.is_empty() {
            return Err(PlayerError::InvalidItem("locator is empty".to_string()));
        }
        if scheme_of(&locator).is_none() {
            return Err(PlayerError::InvalidItem(format!("locator '{}' has no scheme", locator)));
        }
        if let Some(name) = self.headers.keys().find(|name| name.trim().is_empty()) {
            return Err(PlayerError::InvalidItem(format!("empty header name '{}'", name)));
        }

        let media_id = match self.media_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => uuid::Uuid::new_v4().to_string(),
        };

        Ok(Item {
            locator,
            media_id,
            media_type: self.media_type,
            headers: self.headers,
            user_agent: self.user_agent,
            resource_id: self.resource_id,
            metadata: self.metadata,
        })
    }
}

/// Wire form of an item as sent by bridge layers
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ItemSpec {
    pub url: String,
    pub media_id: Option<String>,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub headers: BTreeMap<String, String>,
    pub user_agent: Option<String>,
    pub resource_id: Option<u32>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub artwork: Option<String>,
    /// Duration in seconds
    pub duration: Option<f64>,
}

impl TryFrom<ItemSpec> for Item {
    type Error = PlayerError;

    fn try_from(spec: ItemSpec) -> Result<Item> {
        let mut builder = Item::builder(spec.url).media_type(spec.media_type);
        if let Some(id) = spec.media_id {
            builder = builder.media_id(id);
        }
        for (name, value) in spec.headers {
            builder = builder.header(name, value);
        }
        if let Some(user_agent) = spec.user_agent {
            builder = builder.user_agent(user_agent);
        }
        if let Some(id) = spec.resource_id {
            builder = builder.resource_id(id);
        }
        let duration = match spec.duration {
            Some(secs) if secs < 0.0 => {
                return Err(PlayerError::InvalidItem(format!("invalid duration {}", secs)));
            }
            Some(secs) => Some(
                Duration::try_from_secs_f64(secs)
                    .map_err(|_| PlayerError::InvalidItem(format!("invalid duration {}", secs)))?,
            ),
            None => None,
        };
        builder
            .metadata(MediaMetadata {
                title: spec.title,
                artist: spec.artist,
                album: spec.album,
                artwork: spec.artwork,
                duration,
            })
            .build()
    }
}

fn scheme_of(locator: &str) -> Option<String> {
    let (scheme, _) = locator.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        Some(scheme.to_ascii_lowercase())
    } else {
        None
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
