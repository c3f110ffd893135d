pub mod cursor;
mod manager;
pub mod providers;
pub(crate) mod service;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Serialize, Serializer};

use crate::config::Config;
use crate::player::PlayerState;
use crate::utils::normalize_key;

pub use cursor::{CursorUpdate, LyricsCursor};
pub use manager::{LyricsManager, LyricsSnapshot, LyricsStatus};
pub use service::{EmbeddedLyricsSource, LyricsService};

fn as_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

/// 逐字歌词中的单个音节
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricsToken {
    #[serde(rename = "startMs", serialize_with = "as_millis")]
    pub start_time: Duration,
    #[serde(rename = "durationMs", serialize_with = "as_millis")]
    pub duration: Duration,
    pub text: String,
}

/// 表示单行歌词
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricsLine {
    #[serde(rename = "timestampMs", serialize_with = "as_millis")]
    pub timestamp: Duration,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<Vec<LyricsToken>>,
}

impl LyricsLine {
    pub fn new(timestamp: Duration, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            text: text.into(),
            tokens: None,
        }
    }
}

/// 解析后的歌词，按时间升序
pub type Lyrics = Arc<Vec<LyricsLine>>;

/// 歌词缓存的身份键：来源 + 归一化标题 + 归一化主艺术家
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// 标题或主艺术家为空时没有身份键
    pub fn from_state(state: &PlayerState) -> Option<Self> {
        let title = normalize_key(state.title.as_deref().unwrap_or_default());
        let artist = normalize_key(state.primary_artist().unwrap_or_default());
        if title.is_empty() || artist.is_empty() {
            return None;
        }

        let source = state.source_app.as_deref().unwrap_or_default();
        Some(Self(format!("{}|{}|{}", source, title, artist)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 歌词搜索请求
#[derive(Debug, Clone)]
pub struct TrackQuery {
    pub title: String,
    pub artists: Vec<String>,
    pub album: String,
    /// 零表示未知
    pub duration_ms: u64,
}

impl TrackQuery {
    pub fn from_state(state: &PlayerState) -> Self {
        Self {
            title: state.title.clone().unwrap_or_default(),
            artists: state.artists.clone(),
            album: state.album.clone().unwrap_or_default(),
            duration_ms: state.duration.as_millis() as u64,
        }
    }

    pub fn primary_artist(&self) -> &str {
        self.artists.first().map(String::as_str).unwrap_or_default()
    }

    /// 搜索关键词：标题 + 艺术家
    pub fn keyword(&self) -> String {
        if self.artists.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.artists.join(" "))
        }
    }
}

/// 搜索命中的歌曲
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// 提供者内部的歌曲标识（ID / MID / 文件路径）
    pub id: String,
    pub title: String,
    pub artist: String,
    pub score: f64,
}

/// 提供者返回的原始歌词
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawLyrics {
    /// `[mm:ss.xx]文本`
    Lrc(String),
    /// 逐字歌词 `[start,dur](start,dur,0)字`
    Syllable(String),
}

/// 歌词提供者接口
#[async_trait]
pub trait LyricsProvider: Send + Sync {
    /// 获取提供者名称
    fn name(&self) -> &str;

    /// 搜索最匹配的歌曲，没有足够可信的结果时返回 `None`
    async fn search(&self, query: &TrackQuery) -> Result<Option<SearchHit>>;

    /// 获取命中歌曲的原始歌词
    async fn fetch(&self, hit: &SearchHit, karaoke: bool) -> Result<Option<RawLyrics>>;
}

/// 设置歌词管理器
pub fn setup_lyrics_manager(config: &Config) -> LyricsManager {
    let providers = providers::get_enabled_providers(config);
    let embedded = providers::embedded_sources(config);
    let service =
        LyricsService::new(providers, embedded).with_media_filter(config.media_type.clone());
    LyricsManager::new(Arc::new(service), config.display.karaoke)
}
