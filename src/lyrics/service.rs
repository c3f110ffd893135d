use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::lyrics::{Lyrics, LyricsProvider, RawLyrics, TrackQuery};
use crate::player::{guess_media_type, MediaType, MediaTypeThresholds, PlayerState};
use crate::utils::{LrcParser, YrcParser};

/// 自带歌词的播放器（例如 YesPlayMusic），命中时跳过外部搜索
#[async_trait]
pub trait EmbeddedLyricsSource: Send + Sync {
    fn name(&self) -> &str;

    /// 该来源是否负责这个播放器
    fn handles(&self, source_app: &str) -> bool;

    /// 当前曲目的原始 LRC 歌词
    async fn fetch_current(&self) -> Result<Option<String>>;
}

/// 歌词服务：按固定顺序尝试各个来源，任何错误都视为"没有歌词"
pub struct LyricsService {
    providers: Vec<Arc<dyn LyricsProvider>>,
    embedded: Vec<Arc<dyn EmbeddedLyricsSource>>,
    media_filter: Option<MediaTypeThresholds>,
}

impl LyricsService {
    pub fn new(
        providers: Vec<Arc<dyn LyricsProvider>>,
        embedded: Vec<Arc<dyn EmbeddedLyricsSource>>,
    ) -> Self {
        Self {
            providers,
            embedded,
            media_filter: None,
        }
    }

    /// 看起来是视频或播客的曲目不再向外部提供者搜索
    pub fn with_media_filter(mut self, thresholds: MediaTypeThresholds) -> Self {
        self.media_filter = Some(thresholds);
        self
    }

    /// 为播放状态解析歌词
    pub async fn resolve(&self, state: &PlayerState, karaoke: bool) -> Option<Lyrics> {
        let source_app = state.source_app.as_deref().unwrap_or_default();

        for source in &self.embedded {
            if !source.handles(source_app) {
                continue;
            }
            match source.fetch_current().await {
                Ok(Some(raw)) => {
                    if let Some(lyrics) = parse_raw(RawLyrics::Lrc(raw)) {
                        info!("使用 {} 自带歌词, 共{}行", source.name(), lyrics.len());
                        return Some(lyrics);
                    }
                }
                Ok(None) => debug!("{} 没有提供歌词", source.name()),
                Err(e) => warn!("{} 获取歌词失败: {}", source.name(), e),
            }
        }

        if let Some(thresholds) = &self.media_filter {
            let media_type = guess_media_type(state, thresholds);
            if matches!(media_type, MediaType::Video | MediaType::Podcast) {
                debug!("跳过歌词搜索, 媒体类型: {:?}", media_type);
                return None;
            }
        }

        let query = TrackQuery::from_state(state);
        for provider in &self.providers {
            debug!("尝试从 {} 获取歌词", provider.name());
            match self.try_provider(provider.as_ref(), &query, karaoke).await {
                Ok(Some(lyrics)) => {
                    info!(
                        "成功获取歌词: {} - {}, 来源: {}, 共{}行",
                        query.title,
                        query.primary_artist(),
                        provider.name(),
                        lyrics.len()
                    );
                    return Some(lyrics);
                }
                Ok(None) => debug!("{} 未找到歌词，尝试下一个提供者", provider.name()),
                Err(e) => warn!("{} 获取歌词失败: {}", provider.name(), e),
            }
        }

        info!("未找到歌词: {} - {}", query.title, query.primary_artist());
        None
    }

    async fn try_provider(
        &self,
        provider: &dyn LyricsProvider,
        query: &TrackQuery,
        karaoke: bool,
    ) -> Result<Option<Lyrics>> {
        let Some(hit) = provider.search(query).await? else {
            return Ok(None);
        };
        debug!(
            "{} 命中: {} - {} (ID: {}, 评分: {:.2})",
            provider.name(),
            hit.title,
            hit.artist,
            hit.id,
            hit.score
        );

        let Some(raw) = provider.fetch(&hit, karaoke).await? else {
            return Ok(None);
        };
        Ok(parse_raw(raw))
    }
}

/// 解析原始歌词，解析结果为空时视为没有歌词
fn parse_raw(raw: RawLyrics) -> Option<Lyrics> {
    let lines = match raw {
        RawLyrics::Lrc(text) => LrcParser::parse(&text).0,
        RawLyrics::Syllable(text) => YrcParser::parse(&text),
    };

    if lines.is_empty() {
        None
    } else {
        Some(Arc::new(lines))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::lyrics::SearchHit;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 测试用提供者：记录调用次数，返回预设结果
    pub(crate) struct FakeProvider {
        pub name: &'static str,
        pub lyrics: Option<RawLyrics>,
        pub fail_search: bool,
        pub searches: AtomicUsize,
    }

    impl FakeProvider {
        pub(crate) fn new(name: &'static str, lyrics: Option<RawLyrics>) -> Self {
            Self {
                name,
                lyrics,
                fail_search: false,
                searches: AtomicUsize::new(0),
            }
        }

        pub(crate) fn failing(name: &'static str) -> Self {
            Self {
                fail_search: true,
                ..Self::new(name, None)
            }
        }

        pub(crate) fn searches(&self) -> usize {
            self.searches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LyricsProvider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn search(&self, query: &TrackQuery) -> Result<Option<SearchHit>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            if self.fail_search {
                return Err(anyhow!("network down"));
            }
            Ok(self.lyrics.as_ref().map(|_| SearchHit {
                id: "1".to_string(),
                title: query.title.clone(),
                artist: query.primary_artist().to_string(),
                score: 1.0,
            }))
        }

        async fn fetch(&self, _hit: &SearchHit, _karaoke: bool) -> Result<Option<RawLyrics>> {
            Ok(self.lyrics.clone())
        }
    }

    struct FakeEmbedded;

    #[async_trait]
    impl EmbeddedLyricsSource for FakeEmbedded {
        fn name(&self) -> &str {
            "embedded"
        }

        fn handles(&self, source_app: &str) -> bool {
            source_app.starts_with("YesPlayMusic")
        }

        async fn fetch_current(&self) -> Result<Option<String>> {
            Ok(Some("[00:01.00]自带歌词".to_string()))
        }
    }

    fn state(source: &str) -> PlayerState {
        PlayerState {
            title: Some("Song".to_string()),
            artists: vec!["Artist".to_string()],
            source_app: Some(source.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_falls_back_in_order() {
        let primary = Arc::new(FakeProvider::failing("primary"));
        let secondary = Arc::new(FakeProvider::new(
            "secondary",
            Some(RawLyrics::Lrc("[00:01.00]第二个来源".to_string())),
        ));
        let service = LyricsService::new(
            vec![
                primary.clone() as Arc<dyn LyricsProvider>,
                secondary.clone() as Arc<dyn LyricsProvider>,
            ],
            vec![],
        );

        let lyrics = service.resolve(&state("Spotify"), false).await.unwrap();
        assert_eq!(lyrics[0].text, "第二个来源");
        assert_eq!(primary.searches(), 1);
        assert_eq!(secondary.searches(), 1);
    }

    #[tokio::test]
    async fn test_embedded_source_skips_search() {
        let provider = Arc::new(FakeProvider::new(
            "remote",
            Some(RawLyrics::Lrc("[00:01.00]远程".to_string())),
        ));
        let service = LyricsService::new(
            vec![provider.clone() as Arc<dyn LyricsProvider>],
            vec![Arc::new(FakeEmbedded) as Arc<dyn EmbeddedLyricsSource>],
        );

        let lyrics = service.resolve(&state("YesPlayMusic"), false).await.unwrap();
        assert_eq!(lyrics[0].text, "自带歌词");
        assert_eq!(provider.searches(), 0);

        let lyrics = service.resolve(&state("Spotify"), false).await.unwrap();
        assert_eq!(lyrics[0].text, "远程");
    }

    #[tokio::test]
    async fn test_unparseable_payload_is_a_miss() {
        let provider = Arc::new(FakeProvider::new(
            "garbage",
            Some(RawLyrics::Lrc("no timestamps here".to_string())),
        ));
        let service = LyricsService::new(vec![provider as Arc<dyn LyricsProvider>], vec![]);
        assert!(service.resolve(&state("Spotify"), false).await.is_none());
    }

    #[tokio::test]
    async fn test_media_filter_skips_video() {
        let provider = Arc::new(FakeProvider::new(
            "remote",
            Some(RawLyrics::Lrc("[00:01.00]歌词".to_string())),
        ));
        let service = LyricsService::new(vec![provider.clone() as Arc<dyn LyricsProvider>], vec![])
            .with_media_filter(MediaTypeThresholds::default());

        let video = PlayerState {
            title: Some("Trailer".to_string()),
            duration: Duration::from_millis(500),
            artwork_width: 1920,
            artwork_height: 1080,
            source_app: Some("Chrome".to_string()),
            ..Default::default()
        };
        assert!(service.resolve(&video, false).await.is_none());
        assert_eq!(provider.searches(), 0);

        let song = PlayerState {
            album: Some("Album".to_string()),
            duration: Duration::from_secs(200),
            ..state("Spotify")
        };
        assert!(service.resolve(&song, false).await.is_some());
        assert_eq!(provider.searches(), 1);
    }

    #[tokio::test]
    async fn test_syllable_payload() {
        let provider = Arc::new(FakeProvider::new(
            "karaoke",
            Some(RawLyrics::Syllable("[1000,500](1000,250,0)逐(1250,250,0)字".to_string())),
        ));
        let service = LyricsService::new(vec![provider as Arc<dyn LyricsProvider>], vec![]);
        let lyrics = service.resolve(&state("Spotify"), true).await.unwrap();
        assert_eq!(lyrics[0].text, "逐字");
        assert_eq!(lyrics[0].tokens.as_ref().map(Vec::len), Some(2));
    }
}
