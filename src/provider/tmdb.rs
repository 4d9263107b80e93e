//! TMDb client.
//!
//! Implements [`ShowDirectory`] over the v3 REST API. A 404 is a definite
//! miss; any other non-success status is a failure.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{SeasonSummary, ShowDetails, ShowDirectory};
use crate::config::secrets::redact_url;
use crate::error::{Error, Result};
use crate::model::ExternalSource;

pub const TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";

pub struct TmdbClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    language: Option<String>,
}

impl TmdbClient {
    pub fn new(http: reqwest::Client, api_key: SecretString, language: Option<String>) -> Self {
        Self::with_base_url(http, TMDB_BASE_URL, api_key, language)
    }

    pub fn with_base_url(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: SecretString,
        language: Option<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            language,
        }
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{path}", self.base_url))
            .map_err(|e| Error::Config(format!("bad TMDb url: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api_key", self.api_key.expose_secret());
            if let Some(language) = &self.language {
                query.append_pair("language", language);
            }
            for (k, v) in params {
                query.append_pair(k, v);
            }
        }
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>> {
        debug!(url = %redact_url(&url), "TMDb request");
        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.error_for_status()?.json::<T>().await?;
        Ok(Some(body))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    tv_results: Vec<FindResult>,
}

#[derive(Debug, Deserialize)]
struct FindResult {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct TvResponse {
    status: Option<String>,
    seasons: Option<Vec<TvSeason>>,
}

#[derive(Debug, Deserialize)]
struct TvSeason {
    season_number: u32,
    episode_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SeasonResponse {
    episodes: Option<Vec<serde_json::Value>>,
}

impl From<TvResponse> for ShowDetails {
    fn from(tv: TvResponse) -> Self {
        ShowDetails {
            status: tv.status.filter(|s| !s.trim().is_empty()),
            seasons: tv.seasons.map(|seasons| {
                seasons
                    .into_iter()
                    .map(|s| SeasonSummary {
                        number: s.season_number,
                        episode_count: s.episode_count,
                    })
                    .collect()
            }),
        }
    }
}

fn external_source_param(source: ExternalSource) -> Option<&'static str> {
    match source {
        ExternalSource::Tvdb => Some("tvdb_id"),
        ExternalSource::Imdb => Some("imdb_id"),
        ExternalSource::Tmdb => None,
    }
}

#[async_trait]
impl ShowDirectory for TmdbClient {
    async fn find_show(&self, source: ExternalSource, id: &str) -> Result<Option<u64>> {
        let Some(param) = external_source_param(source) else {
            return Ok(id.parse().ok());
        };
        let url = self.url(&format!("/find/{id}"), &[("external_source", param)])?;
        let found: Option<FindResponse> = self.get(url).await?;
        Ok(found.and_then(|f| f.tv_results.first().map(|r| r.id)))
    }

    async fn show_details(&self, show: u64) -> Result<Option<ShowDetails>> {
        let url = self.url(&format!("/tv/{show}"), &[])?;
        let tv: Option<TvResponse> = self.get(url).await?;
        Ok(tv.map(ShowDetails::from))
    }

    async fn season_episode_count(&self, show: u64, season: u32) -> Result<Option<u32>> {
        let url = self.url(&format!("/tv/{show}/season/{season}"), &[])?;
        let body: Option<SeasonResponse> = self.get(url).await?;
        Ok(body
            .and_then(|s| s.episodes)
            .map(|episodes| episodes.len() as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tv_snapshot_keeps_status_and_season_sizes() {
        let tv: TvResponse = serde_json::from_str(
            r#"{
                "id": 1396,
                "name": "Breaking Bad",
                "status": "Ended",
                "seasons": [
                    {"season_number": 0, "episode_count": 9},
                    {"season_number": 1, "episode_count": 7},
                    {"season_number": 2, "episode_count": null}
                ]
            }"#,
        )
        .unwrap();
        let details = ShowDetails::from(tv);
        assert_eq!(details.status.as_deref(), Some("Ended"));
        assert_eq!(details.season_episode_count(1), Some(7));
        assert_eq!(details.season_episode_count(2), None);
        assert_eq!(details.season_episode_count(5), None);
    }

    #[test]
    fn blank_status_is_unknown() {
        let tv: TvResponse = serde_json::from_str(r#"{"status": " "}"#).unwrap();
        assert_eq!(ShowDetails::from(tv).status, None);
    }

    #[test]
    fn find_response_without_tv_results() {
        let found: FindResponse =
            serde_json::from_str(r#"{"movie_results": [{"id": 5}]}"#).unwrap();
        assert!(found.tv_results.is_empty());
    }

    #[test]
    fn url_carries_key_language_and_params() {
        let client = TmdbClient::with_base_url(
            reqwest::Client::new(),
            "http://localhost:9/3/",
            SecretString::from("k3y".to_string()),
            Some("de-DE".to_string()),
        );
        let url = client
            .url("/find/81189", &[("external_source", "tvdb_id")])
            .unwrap();
        assert_eq!(url.path(), "/3/find/81189");
        let query = url.query().unwrap();
        assert!(query.contains("api_key=k3y"));
        assert!(query.contains("language=de-DE"));
        assert!(query.contains("external_source=tvdb_id"));
    }
}
