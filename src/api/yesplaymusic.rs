use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::api::local_client;
use crate::backend::session::is_yesplaymusic;
use crate::config::EndpointsConfig;
use crate::lyrics::EmbeddedLyricsSource;
use crate::player::PlayerState;

/// YesPlayMusic 的本地接口：`/player` 提供当前曲目和进度，`/lyric?id=` 提供歌词
pub struct YesPlayMusicApi {
    client: reqwest::Client,
    player_url: String,
    lyric_url: String,
}

/// `/player` 响应中的当前曲目
#[derive(Debug, Clone, PartialEq)]
pub struct YesPlayMusicTrack {
    pub id: Option<i64>,
    pub state: PlayerState,
}

impl YesPlayMusicApi {
    pub fn new(endpoints: &EndpointsConfig) -> Self {
        Self {
            client: local_client(endpoints.yesplaymusic_timeout_ms),
            player_url: endpoints.yesplaymusic_player_url.clone(),
            lyric_url: endpoints.yesplaymusic_lyric_url.clone(),
        }
    }

    /// 当前曲目，YesPlayMusic 未运行或没有曲目时返回 `None`
    pub async fn current_track(&self) -> Result<Option<YesPlayMusicTrack>> {
        let resp = self.client.get(&self.player_url).send().await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let data: Value = resp.json().await?;
        Ok(parse_player(&data))
    }

    pub async fn state(&self) -> Option<PlayerState> {
        match self.current_track().await {
            Ok(track) => track.map(|t| t.state),
            Err(e) => {
                debug!("YesPlayMusic 状态不可用: {}", e);
                None
            }
        }
    }

    /// 指定曲目的原始 LRC 歌词
    pub async fn lyrics(&self, id: i64) -> Result<Option<String>> {
        let resp = self
            .client
            .get(&self.lyric_url)
            .query(&[("id", id)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("YesPlayMusic 歌词请求失败: HTTP {}", resp.status()));
        }

        let data: Value = resp.json().await?;
        Ok(data
            .pointer("/lrc/lyric")
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
            .map(str::to_string))
    }
}

/// 解析 `/player` 响应
fn parse_player(data: &Value) -> Option<YesPlayMusicTrack> {
    let track = data.get("currentTrack").filter(|t| t.is_object())?;

    let artists = track["ar"]
        .as_array()
        .map(|ar| {
            ar.iter()
                .filter_map(|a| a["name"].as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let progress_secs = data["progress"].as_f64().unwrap_or(0.0).max(0.0);

    let mut state = PlayerState {
        title: track["name"].as_str().map(str::to_string),
        artists,
        album: track.pointer("/al/name").and_then(Value::as_str).map(str::to_string),
        position: Duration::try_from_secs_f64(progress_secs).unwrap_or_default(),
        duration: Duration::from_millis(track["dt"].as_u64().unwrap_or(0)),
        playing: true,
        source_app: Some("YesPlayMusic".to_string()),
        artwork_url: track
            .pointer("/al/picUrl")
            .and_then(Value::as_str)
            .map(str::to_string),
        ..Default::default()
    };
    state.clamp_position();

    Some(YesPlayMusicTrack {
        id: track["id"].as_i64(),
        state,
    })
}

#[async_trait]
impl EmbeddedLyricsSource for YesPlayMusicApi {
    fn name(&self) -> &str {
        "yesplaymusic"
    }

    fn handles(&self, source_app: &str) -> bool {
        is_yesplaymusic(source_app)
    }

    async fn fetch_current(&self) -> Result<Option<String>> {
        let Some(id) = self.current_track().await?.and_then(|t| t.id) else {
            return Ok(None);
        };
        self.lyrics(id).await
    }
}
