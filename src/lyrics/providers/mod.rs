mod local;
mod netease;
mod qqmusic;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::yesplaymusic::YesPlayMusicApi;
use crate::config::Config;
use crate::lyrics::{EmbeddedLyricsSource, LyricsProvider, SearchHit, TrackQuery};
use crate::utils::string_similarity;

pub use local::LocalProvider;
pub use netease::NeteaseProvider;
pub use qqmusic::QQMusicProvider;

/// 低于该评分的搜索结果不可信（满分 4.0：标题×2 + 艺术家 + 专辑）
const MIN_MATCH_SCORE: f64 = 1.5;
/// 时长相差在该范围内视为同一版本
const DURATION_TOLERANCE_MS: u64 = 5000;

/// 搜索结果中的一首候选歌曲
#[derive(Debug, Clone, Default)]
pub(crate) struct Candidate {
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: String,
    pub duration_ms: u64,
}

impl Candidate {
    /// 标题×2 + 最相近的艺术家 + 专辑
    fn score(&self, query: &TrackQuery) -> f64 {
        let title_score = string_similarity(&query.title, &self.title);

        let artist_score = self
            .artists
            .iter()
            .flat_map(|a| query.artists.iter().map(move |q| string_similarity(q, a)))
            .fold(0.0, f64::max);

        let album_score = string_similarity(&query.album, &self.album);

        title_score * 2.0 + artist_score + album_score
    }
}

/// 在候选歌曲中找到最匹配的一首
///
/// 时长相近（5 秒内）的候选优先，其次取评分最高者；评分不足时返回 `None`。
pub(crate) fn rank_candidates(
    provider: &str,
    query: &TrackQuery,
    candidates: &[Candidate],
) -> Option<SearchHit> {
    let mut best: Option<(&Candidate, f64)> = None;
    let mut best_duration_match: Option<(&Candidate, f64)> = None;

    for (i, candidate) in candidates.iter().enumerate() {
        let score = candidate.score(query);
        debug!(
            "{} 搜索结果 #{}: ID: {}, 标题: '{}', 艺术家: '{}', 专辑: '{}', 时长: {}ms, 评分: {:.2}",
            provider,
            i + 1,
            candidate.id,
            candidate.title,
            candidate.artists.join(", "),
            candidate.album,
            candidate.duration_ms,
            score
        );

        if score < MIN_MATCH_SCORE || candidate.id.is_empty() {
            continue;
        }

        if query.duration_ms > 0
            && candidate.duration_ms > 0
            && candidate.duration_ms.abs_diff(query.duration_ms) < DURATION_TOLERANCE_MS
            && best_duration_match.map_or(true, |(_, s)| score > s)
        {
            best_duration_match = Some((candidate, score));
        }

        if best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }

    let (candidate, score) = best_duration_match.or(best)?;
    info!(
        "{} 最佳匹配: {} - {} (ID: {}, 评分: {:.2})",
        provider,
        candidate.title,
        candidate.artists.join(", "),
        candidate.id,
        score
    );

    Some(SearchHit {
        id: candidate.id.clone(),
        title: candidate.title.clone(),
        artist: candidate.artists.first().cloned().unwrap_or_default(),
        score,
    })
}

/// 获取所有启用的歌词提供者，顺序即回退顺序
pub fn get_enabled_providers(config: &Config) -> Vec<Arc<dyn LyricsProvider>> {
    let mut providers: Vec<Arc<dyn LyricsProvider>> = Vec::new();

    debug!("加载启用的歌词提供者，配置的源: {:?}", config.lyrics_sources);

    for source in &config.lyrics_sources {
        match source.as_str() {
            "qqmusic" | "qq" => {
                info!("启用QQ音乐歌词源");
                providers.push(Arc::new(QQMusicProvider::new()));
            }
            "netease" => {
                info!("启用网易云音乐歌词源");
                providers.push(Arc::new(NeteaseProvider::new()));
            }
            "local" => match &config.sources.local {
                Some(local_config) => {
                    info!("启用本地歌词源，歌词目录: {}", local_config.lyrics_path);
                    providers.push(Arc::new(LocalProvider::new(local_config)));
                }
                None => warn!("已启用本地歌词源，但未找到相关配置"),
            },
            _ => warn!("未知的歌词源: {}", source),
        }
    }

    info!("成功加载 {} 个歌词提供者", providers.len());
    for (i, provider) in providers.iter().enumerate() {
        debug!("歌词提供者 #{}: {}", i + 1, provider.name());
    }

    providers
}

/// 自带歌词的播放器
pub fn embedded_sources(config: &Config) -> Vec<Arc<dyn EmbeddedLyricsSource>> {
    if !config.sources.yesplaymusic {
        return Vec::new();
    }
    let source: Arc<dyn EmbeddedLyricsSource> = Arc::new(YesPlayMusicApi::new(&config.endpoints));
    vec![source]
}
