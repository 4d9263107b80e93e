//! Entity source: the primary media server.
//!
//! [`EntitySource`] is what the pipeline needs from the server: who is
//! logged in, an item's full description, a container's representative
//! member and a season's episode count. [`MediaServerClient`] implements it
//! against a Jellyfin-compatible REST API. Calls are single-shot; the
//! pipeline puts its own timeout around each one.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{
    Entity, ItemKey, ItemKind, MediaSource, MediaStream, ProviderIds, StreamKind,
};

#[async_trait]
pub trait EntitySource: Send + Sync {
    /// The active session's user, if any.
    fn current_user(&self) -> Option<String>;

    async fn get_entity(&self, user: &str, key: &ItemKey) -> Result<Option<Entity>>;

    /// First member of `container` of the given kind: episodes ordered by
    /// premiere date, tracks by index number.
    async fn representative_member(
        &self,
        user: &str,
        container: &ItemKey,
        kind: ItemKind,
    ) -> Result<Option<ItemKey>>;

    /// Number of direct episode children.
    async fn child_count(&self, user: &str, key: &ItemKey) -> Result<Option<u32>>;
}

pub struct MediaServerClient {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
    user_id: Option<String>,
}

impl MediaServerClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: SecretString,
        user_id: Option<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            user_id,
        }
    }

    fn url(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}{path}", self.base_url))
            .map_err(|e| Error::Config(format!("bad media server url: {e}")))
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>> {
        debug!(url = %url, "media server request");
        let response = self
            .http
            .get(url)
            .header("X-Emby-Token", self.token.expose_secret())
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.error_for_status()?.json::<T>().await?;
        Ok(Some(body))
    }

    async fn query_items(&self, user: &str, params: &[(&str, &str)]) -> Result<Option<ItemsPage>> {
        let mut url = self.url("/Items")?;
        url.query_pairs_mut()
            .extend_pairs(params)
            .append_pair("userId", user);
        self.get(url).await
    }
}

#[async_trait]
impl EntitySource for MediaServerClient {
    fn current_user(&self) -> Option<String> {
        self.user_id.clone()
    }

    async fn get_entity(&self, user: &str, key: &ItemKey) -> Result<Option<Entity>> {
        let url = self.url(&format!("/Users/{user}/Items/{key}"))?;
        let item: Option<WireItem> = self.get(url).await?;
        Ok(item.map(Entity::from))
    }

    async fn representative_member(
        &self,
        user: &str,
        container: &ItemKey,
        kind: ItemKind,
    ) -> Result<Option<ItemKey>> {
        let (type_name, sort_by) = match kind {
            ItemKind::Episode => ("Episode", "PremiereDate"),
            ItemKind::Audio => ("Audio", "IndexNumber"),
            _ => return Ok(None),
        };
        let page = self
            .query_items(
                user,
                &[
                    ("ParentId", container.as_str()),
                    ("IncludeItemTypes", type_name),
                    ("Recursive", "true"),
                    ("SortBy", sort_by),
                    ("SortOrder", "Ascending"),
                    ("Limit", "1"),
                ],
            )
            .await?;
        Ok(page
            .and_then(|p| p.items.into_iter().next())
            .map(|item| ItemKey::new(item.id)))
    }

    async fn child_count(&self, user: &str, key: &ItemKey) -> Result<Option<u32>> {
        let page = self
            .query_items(
                user,
                &[
                    ("ParentId", key.as_str()),
                    ("IncludeItemTypes", "Episode"),
                    ("Recursive", "false"),
                    ("Limit", "1"),
                ],
            )
            .await?;
        Ok(page.and_then(|p| p.total_record_count))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsPage {
    #[serde(default)]
    items: Vec<WireItem>,
    total_record_count: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct WireItem {
    id: String,
    #[serde(rename = "Type")]
    kind: Option<String>,
    name: Option<String>,
    community_rating: Option<f64>,
    critic_rating: Option<f64>,
    child_count: Option<u32>,
    index_number: Option<u32>,
    series_id: Option<String>,
    parent_id: Option<String>,
    provider_ids: WireProviderIds,
    container: Option<String>,
    path: Option<String>,
    media_sources: Vec<WireMediaSource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireProviderIds {
    #[serde(alias = "TMDb", alias = "tmdb")]
    #[serde(rename = "Tmdb")]
    tmdb: Option<String>,
    #[serde(rename = "Tvdb")]
    tvdb: Option<String>,
    #[serde(rename = "Imdb")]
    imdb: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct WireMediaSource {
    container: Option<String>,
    path: Option<String>,
    audio_codec: Option<String>,
    media_streams: Vec<WireStream>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct WireStream {
    #[serde(rename = "Type")]
    kind: Option<String>,
    codec: Option<String>,
    display_title: Option<String>,
    title: Option<String>,
    height: Option<u32>,
    channels: Option<u32>,
    channel_layout: Option<String>,
    profile: Option<String>,
    video_range: Option<String>,
    video_range_type: Option<String>,
    #[serde(alias = "HdrFormat")]
    #[serde(rename = "HDRFormat")]
    hdr_format: Option<String>,
    #[serde(alias = "DVProfile", alias = "dvProfile")]
    dv_profile: Option<serde_json::Value>,
    #[serde(alias = "DVBlSignalCompatibilityId", alias = "dvBlSignalCompatibilityId")]
    dv_bl_signal_compatibility_id: Option<serde_json::Value>,
}

/// Numbers and strings both show up for DV fields depending on server version.
fn scalar_to_string(value: Option<serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl From<WireStream> for MediaStream {
    fn from(s: WireStream) -> Self {
        let kind = match s.kind.as_deref() {
            Some("Video") => StreamKind::Video,
            Some("Audio") => StreamKind::Audio,
            _ => StreamKind::Other,
        };
        MediaStream {
            kind,
            codec: s.codec,
            title: s.display_title.or(s.title),
            height: s.height,
            channels: s.channels,
            channel_layout: s.channel_layout,
            profile: s.profile,
            video_range: s.video_range.or(s.video_range_type),
            hdr_format: s.hdr_format,
            dv_profile: scalar_to_string(s.dv_profile),
            dv_bl_compat_id: scalar_to_string(s.dv_bl_signal_compatibility_id),
        }
    }
}

impl From<WireMediaSource> for MediaSource {
    fn from(m: WireMediaSource) -> Self {
        MediaSource {
            container: m.container,
            path: m.path,
            audio_codec: m.audio_codec,
            streams: m.media_streams.into_iter().map(MediaStream::from).collect(),
        }
    }
}

impl From<WireItem> for Entity {
    fn from(item: WireItem) -> Self {
        Entity {
            key: ItemKey::new(item.id),
            kind: item
                .kind
                .as_deref()
                .map(ItemKind::from_type_name)
                .unwrap_or(ItemKind::Other),
            name: item.name,
            community_rating: item.community_rating,
            critic_rating: item.critic_rating,
            child_count: item.child_count,
            index_number: item.index_number,
            series_key: item.series_id.map(ItemKey::new),
            parent_key: item.parent_id.map(ItemKey::new),
            provider_ids: ProviderIds {
                tmdb: item.provider_ids.tmdb,
                tvdb: item.provider_ids.tvdb,
                imdb: item.provider_ids.imdb,
            },
            container: item.container,
            path: item.path,
            media_sources: item
                .media_sources
                .into_iter()
                .map(MediaSource::from)
                .collect(),
        }
    }
}
