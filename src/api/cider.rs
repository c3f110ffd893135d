use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::json;

use crate::api::local_client;
use crate::config::EndpointsConfig;
use crate::player::PlayerState;

pub const CIDER_APP: &str = "Cider";

/// Cider v3 RPC 接口
pub struct CiderApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct NowPlayingResponse {
    info: Option<NowPlayingInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NowPlayingInfo {
    pub name: Option<String>,
    pub artist_name: Option<String>,
    pub album_name: Option<String>,
    /// 秒
    pub current_playback_time: f64,
    pub duration_in_millis: u64,
    pub is_playing: Option<bool>,
    pub artwork: Option<Artwork>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Artwork {
    pub width: u32,
    pub height: u32,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IsPlayingResponse {
    #[serde(default, alias = "is_playing")]
    is_playing: bool,
}

/// Apple Music 的封面地址带有 `{w}x{h}` 占位符
fn artwork_url(artwork: &Artwork) -> Option<String> {
    let url = artwork.url.as_deref()?;
    let (w, h) = match (artwork.width, artwork.height) {
        (0, _) | (_, 0) => (600, 600),
        size => size,
    };
    Some(
        url.replace("{w}", &w.to_string())
            .replace("{h}", &h.to_string()),
    )
}

impl NowPlayingInfo {
    pub fn into_state(self) -> PlayerState {
        let position =
            Duration::try_from_secs_f64(self.current_playback_time.max(0.0)).unwrap_or_default();
        let artwork = self.artwork.unwrap_or_default();

        let mut state = PlayerState {
            title: self.name,
            artists: self
                .artist_name
                .filter(|a| !a.is_empty())
                .into_iter()
                .collect(),
            album: self.album_name.filter(|a| !a.is_empty()),
            position,
            duration: Duration::from_millis(self.duration_in_millis),
            playing: self.is_playing.unwrap_or(!position.is_zero()),
            source_app: Some(CIDER_APP.to_string()),
            artwork_url: artwork_url(&artwork),
            artwork_width: artwork.width,
            artwork_height: artwork.height,
        };
        state.clamp_position();
        state
    }
}

impl CiderApi {
    pub fn new(endpoints: &EndpointsConfig) -> Self {
        Self {
            client: local_client(endpoints.cider_timeout_ms),
            base_url: endpoints.cider_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Cider 是否在运行
    pub async fn active(&self) -> bool {
        match self.client.get(self.endpoint("active")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    pub async fn is_playing(&self) -> Result<bool> {
        let resp = self.client.get(self.endpoint("is-playing")).send().await?;
        if !resp.status().is_success() {
            return Ok(false);
        }
        Ok(resp.json::<IsPlayingResponse>().await?.is_playing)
    }

    pub async fn now_playing(&self) -> Result<Option<NowPlayingInfo>> {
        let resp = self.client.get(self.endpoint("now-playing")).send().await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        Ok(resp.json::<NowPlayingResponse>().await?.info)
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<()> {
        let resp = self
            .client
            .post(self.endpoint(path))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("Cider {} 失败: HTTP {}", path, resp.status()));
        }
        Ok(())
    }

    pub async fn play(&self) -> Result<()> {
        self.post("play", json!({})).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.post("pause", json!({})).await
    }

    pub async fn toggle(&self) -> Result<()> {
        self.post("playpause", json!({})).await
    }

    pub async fn next(&self) -> Result<()> {
        self.post("next", json!({})).await
    }

    pub async fn previous(&self) -> Result<()> {
        self.post("previous", json!({})).await
    }

    /// 跳转到指定秒数（Cider 只接受整数秒）
    pub async fn seek(&self, position: Duration) -> Result<()> {
        self.post("seek", json!({ "position": position.as_secs() }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_playing_into_state() {
        let body = r#"{
            "status": "ok",
            "info": {
                "name": "Anti-Hero",
                "artistName": "Taylor Swift",
                "albumName": "Midnights",
                "currentPlaybackTime": 61.25,
                "durationInMillis": 200690,
                "isPlaying": true,
                "artwork": {"width": 3000, "height": 3000, "url": "https://x/{w}x{h}bb.jpg"},
                "genreNames": ["Pop"]
            }
        }"#;

        let info = serde_json::from_str::<NowPlayingResponse>(body)
            .unwrap()
            .info
            .unwrap();
        let state = info.into_state();

        assert_eq!(state.title.as_deref(), Some("Anti-Hero"));
        assert_eq!(state.artists, vec!["Taylor Swift"]);
        assert_eq!(state.album.as_deref(), Some("Midnights"));
        assert_eq!(state.position, Duration::from_millis(61_250));
        assert_eq!(state.duration, Duration::from_millis(200_690));
        assert!(state.playing);
        assert_eq!(state.source_app.as_deref(), Some("Cider"));
        assert_eq!(state.artwork_url.as_deref(), Some("https://x/3000x3000bb.jpg"));
    }

    #[test]
    fn test_missing_is_playing_falls_back_to_position() {
        let info = NowPlayingInfo {
            name: Some("x".to_string()),
            current_playback_time: 3.0,
            ..Default::default()
        };
        assert!(info.into_state().playing);

        let info = NowPlayingInfo::default();
        let state = info.into_state();
        assert!(!state.playing);
        assert!(state.artists.is_empty());
    }

    #[test]
    fn test_out_of_range_playback_time() {
        let info = NowPlayingInfo {
            name: Some("x".to_string()),
            current_playback_time: 1e300,
            duration_in_millis: 1000,
            ..Default::default()
        };
        assert_eq!(info.into_state().position, Duration::ZERO);
    }

    #[test]
    fn test_endpoint() {
        let api = CiderApi::new(&EndpointsConfig::default());
        assert_eq!(
            api.endpoint("now-playing"),
            "http://localhost:10767/api/v1/playback/now-playing"
        );
    }
}
