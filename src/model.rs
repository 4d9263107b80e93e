//! Core data model.
//!
//! An item is something a presentation target wants annotated. It has an
//! identity (the item key), a remote entity description, and an enrichment
//! record that grows as pipeline stages complete.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Opaque stable identifier of one enrichable entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKey(pub String);

impl ItemKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ItemKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Handle for one presentation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(pub Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

// ---------------------------------------------------------------------------
// Entity (as reported by the media server)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Movie,
    Episode,
    Series,
    Season,
    MusicAlbum,
    Audio,
    Book,
    Other,
}

impl ItemKind {
    /// Map a media server type name ("Series", "MusicAlbum", ...) to a kind.
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "Movie" => Self::Movie,
            "Episode" => Self::Episode,
            "Series" => Self::Series,
            "Season" => Self::Season,
            "MusicAlbum" => Self::MusicAlbum,
            "Audio" => Self::Audio,
            "Book" => Self::Book,
            _ => Self::Other,
        }
    }

    /// Which member kind represents this container, if any.
    pub fn member_kind(self) -> Option<ItemKind> {
        match self {
            Self::Series | Self::Season => Some(Self::Episode),
            Self::MusicAlbum => Some(Self::Audio),
            _ => None,
        }
    }
}

/// External catalogue identifiers embedded in an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIds {
    pub tmdb: Option<String>,
    pub tvdb: Option<String>,
    pub imdb: Option<String>,
}

/// Which catalogue an external identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalSource {
    Tmdb,
    Tvdb,
    Imdb,
}

impl std::fmt::Display for ExternalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExternalSource::Tmdb => "tmdb",
            ExternalSource::Tvdb => "tvdb",
            ExternalSource::Imdb => "imdb",
        };
        write!(f, "{s}")
    }
}

impl ProviderIds {
    pub fn get(&self, source: ExternalSource) -> Option<&str> {
        let id = match source {
            ExternalSource::Tmdb => self.tmdb.as_deref(),
            ExternalSource::Tvdb => self.tvdb.as_deref(),
            ExternalSource::Imdb => self.imdb.as_deref(),
        };
        id.map(str::trim).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Video,
    Audio,
    Other,
}

/// One elementary stream of a media source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaStream {
    pub kind: StreamKind,
    pub codec: Option<String>,
    pub title: Option<String>,
    pub height: Option<u32>,
    pub channels: Option<u32>,
    pub channel_layout: Option<String>,
    pub profile: Option<String>,
    pub video_range: Option<String>,
    pub hdr_format: Option<String>,
    pub dv_profile: Option<String>,
    pub dv_bl_compat_id: Option<String>,
}

impl MediaStream {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            codec: None,
            title: None,
            height: None,
            channels: None,
            channel_layout: None,
            profile: None,
            video_range: None,
            hdr_format: None,
            dv_profile: None,
            dv_bl_compat_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaSource {
    pub container: Option<String>,
    pub path: Option<String>,
    pub audio_codec: Option<String>,
    pub streams: Vec<MediaStream>,
}

impl MediaSource {
    pub fn video(&self) -> Option<&MediaStream> {
        self.streams.iter().find(|s| s.kind == StreamKind::Video)
    }

    pub fn audio(&self) -> impl Iterator<Item = &MediaStream> {
        self.streams.iter().filter(|s| s.kind == StreamKind::Audio)
    }
}

/// An entity as returned by the entity source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub key: ItemKey,
    pub kind: ItemKind,
    pub name: Option<String>,
    pub community_rating: Option<f64>,
    pub critic_rating: Option<f64>,
    pub child_count: Option<u32>,
    pub index_number: Option<u32>,
    pub series_key: Option<ItemKey>,
    pub parent_key: Option<ItemKey>,
    pub provider_ids: ProviderIds,
    pub container: Option<String>,
    pub path: Option<String>,
    pub media_sources: Vec<MediaSource>,
}

impl Entity {
    pub fn new(key: impl Into<ItemKey>, kind: ItemKind) -> Self {
        Self {
            key: key.into(),
            kind,
            name: None,
            community_rating: None,
            critic_rating: None,
            child_count: None,
            index_number: None,
            series_key: None,
            parent_key: None,
            provider_ids: ProviderIds::default(),
            container: None,
            path: None,
            media_sources: Vec::new(),
        }
    }

    pub fn primary_source(&self) -> Option<&MediaSource> {
        self.media_sources.first()
    }

    /// Community rating, falling back to the critic rating.
    pub fn rating(&self) -> Option<f64> {
        self.community_rating.or(self.critic_rating)
    }

    /// The series a season belongs to (falls back to the parent).
    pub fn owning_series(&self) -> Option<&ItemKey> {
        self.series_key.as_ref().or(self.parent_key.as_ref())
    }
}

// ---------------------------------------------------------------------------
// Enrichment record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioKind {
    Atmos,
    Dd51,
    Stereo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioLabel {
    pub text: String,
    pub kind: AudioKind,
}

/// Name of one enrichment field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Quality,
    Audio,
    MusicFormat,
    BookFormat,
    Rating,
    SeasonCurrent,
    SeasonPlanned,
    SeriesEnded,
}

/// A concrete value for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Quality(Vec<String>),
    Audio(AudioLabel),
    MusicFormat(String),
    BookFormat(String),
    Rating(f64),
    SeasonCurrent(u32),
    SeasonPlanned(u32),
    SeriesEnded(bool),
}

impl FieldValue {
    pub fn field(&self) -> Field {
        match self {
            FieldValue::Quality(_) => Field::Quality,
            FieldValue::Audio(_) => Field::Audio,
            FieldValue::MusicFormat(_) => Field::MusicFormat,
            FieldValue::BookFormat(_) => Field::BookFormat,
            FieldValue::Rating(_) => Field::Rating,
            FieldValue::SeasonCurrent(_) => Field::SeasonCurrent,
            FieldValue::SeasonPlanned(_) => Field::SeasonPlanned,
            FieldValue::SeriesEnded(_) => Field::SeriesEnded,
        }
    }
}

/// One change a refinement stage wants applied to a record.
///
/// `Clear` deletes the field: an authoritative "unknown" removes whatever
/// was shown rather than leaving a placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldPatch {
    Set(FieldValue),
    Clear(Field),
}

impl FieldPatch {
    pub fn field(&self) -> Field {
        match self {
            FieldPatch::Set(value) => value.field(),
            FieldPatch::Clear(field) => *field,
        }
    }
}

/// Accumulated optional-field result for one key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season_current: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season_planned: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_ended: Option<bool>,
}

impl EnrichmentRecord {
    /// Names of the fields currently present.
    pub fn fields(&self) -> Vec<Field> {
        let mut out = Vec::new();
        if self.quality.is_some() {
            out.push(Field::Quality);
        }
        if self.audio.is_some() {
            out.push(Field::Audio);
        }
        if self.music_format.is_some() {
            out.push(Field::MusicFormat);
        }
        if self.book_format.is_some() {
            out.push(Field::BookFormat);
        }
        if self.rating.is_some() {
            out.push(Field::Rating);
        }
        if self.season_current.is_some() {
            out.push(Field::SeasonCurrent);
        }
        if self.season_planned.is_some() {
            out.push(Field::SeasonPlanned);
        }
        if self.series_ended.is_some() {
            out.push(Field::SeriesEnded);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// Apply a patch. Returns true if the record changed.
    pub fn apply(&mut self, patch: &FieldPatch) -> bool {
        let before = self.clone();
        match patch {
            FieldPatch::Set(value) => self.set(value.clone()),
            FieldPatch::Clear(field) => self.clear(*field),
        }
        *self != before
    }

    fn set(&mut self, value: FieldValue) {
        match value {
            FieldValue::Quality(v) => self.quality = Some(v),
            FieldValue::Audio(v) => self.audio = Some(v),
            FieldValue::MusicFormat(v) => self.music_format = Some(v),
            FieldValue::BookFormat(v) => self.book_format = Some(v),
            FieldValue::Rating(v) => self.rating = Some(v),
            FieldValue::SeasonCurrent(v) => self.season_current = Some(v),
            FieldValue::SeasonPlanned(v) => self.season_planned = Some(v),
            FieldValue::SeriesEnded(v) => self.series_ended = Some(v),
        }
    }

    fn clear(&mut self, field: Field) {
        match field {
            Field::Quality => self.quality = None,
            Field::Audio => self.audio = None,
            Field::MusicFormat => self.music_format = None,
            Field::BookFormat => self.book_format = None,
            Field::Rating => self.rating = None,
            Field::SeasonCurrent => self.season_current = None,
            Field::SeasonPlanned => self.season_planned = None,
            Field::SeriesEnded => self.series_ended = None,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline state
// ---------------------------------------------------------------------------

/// Lifecycle state of one key's enrichment pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Not cached, not running.
    Idle,
    /// Popped from the queue, primary fetch running.
    InFlight,
    /// Primary record cached and delivered.
    PartiallyDelivered,
    /// Refinement stages running.
    Refining,
    /// No further work pending. Terminal.
    Settled,
}

impl PipelineState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, to),
            (Idle, InFlight)
                | (InFlight, PartiallyDelivered)
                | (InFlight, Idle)              // aborted before any remote call
                | (PartiallyDelivered, Refining)
                | (PartiallyDelivered, Settled) // nothing to refine
                | (Refining, Settled)
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Settled)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineState::Idle => "idle",
            PipelineState::InFlight => "in_flight",
            PipelineState::PartiallyDelivered => "partially_delivered",
            PipelineState::Refining => "refining",
            PipelineState::Settled => "settled",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Relevance and delivery
// ---------------------------------------------------------------------------

/// How soon a relevant item should be admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Immediate,
    Delayed(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    /// Create presentation state for this key.
    First,
    /// Patch presentation state already shown.
    Update,
}

/// What a presentation sink receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub key: ItemKey,
    pub kind: DeliveryKind,
    /// Full current record, never a diff.
    pub record: EnrichmentRecord,
    /// Fields touched by this delivery. For `First` this is every present field.
    pub changed: Vec<Field>,
}
