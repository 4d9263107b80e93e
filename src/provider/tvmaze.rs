//! TVMaze client, the keyless fallback for planned season sizes.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::EpisodeGuide;
use crate::error::{Error, Result};
use crate::model::ExternalSource;

pub const TVMAZE_BASE_URL: &str = "https://api.tvmaze.com";

pub struct TvMazeClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ShowRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Season {
    number: u32,
    episode_order: Option<u32>,
}

impl TvMazeClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_url(http, TVMAZE_BASE_URL)
    }

    pub fn with_base_url(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>> {
        debug!(url = %url, "TVMaze request");
        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.error_for_status()?.json::<T>().await?;
        Ok(Some(body))
    }

    fn url(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}{path}", self.base_url))
            .map_err(|e| Error::Config(format!("bad TVMaze url: {e}")))
    }
}

fn lookup_param(source: ExternalSource) -> Option<&'static str> {
    match source {
        ExternalSource::Tvdb => Some("thetvdb"),
        ExternalSource::Imdb => Some("imdb"),
        ExternalSource::Tmdb => None,
    }
}

fn episode_order(seasons: &[Season], season: u32) -> Option<u32> {
    seasons
        .iter()
        .find(|s| s.number == season)
        .and_then(|s| s.episode_order)
}

#[async_trait]
impl EpisodeGuide for TvMazeClient {
    async fn lookup_show(&self, source: ExternalSource, id: &str) -> Result<Option<u64>> {
        let Some(param) = lookup_param(source) else {
            return Ok(None);
        };
        let mut url = self.url("/lookup/shows")?;
        url.query_pairs_mut().append_pair(param, id);
        let show: Option<ShowRef> = self.get(url).await?;
        Ok(show.map(|s| s.id))
    }

    async fn season_episode_order(&self, show: u64, season: u32) -> Result<Option<u32>> {
        let url = self.url(&format!("/shows/{show}/seasons"))?;
        let seasons: Option<Vec<Season>> = self.get(url).await?;
        Ok(seasons.and_then(|s| episode_order(&s, season)))
    }
}
