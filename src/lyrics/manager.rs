use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::lyrics::{IdentityKey, Lyrics, LyricsService};
use crate::player::PlayerState;

/// 当前曲目的歌词状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum LyricsStatus {
    /// 没有可识别的曲目
    #[default]
    Idle,
    Searching,
    Ready,
    NotFound,
}

/// 一致的歌词快照，读者拿到的是拷贝
#[derive(Debug, Clone, Default)]
pub struct LyricsSnapshot {
    pub key: Option<IdentityKey>,
    pub status: LyricsStatus,
    pub lines: Option<Lyrics>,
}

#[derive(Default)]
struct Inner {
    /// 包括未找到的结果（`None`）
    cache: HashMap<IdentityKey, Option<Lyrics>>,
    in_flight: HashSet<IdentityKey>,
    current: LyricsSnapshot,
}

/// 歌词管理器
///
/// 按身份键缓存歌词，每个键同一时间最多只有一个查询在进行。
#[derive(Clone)]
pub struct LyricsManager {
    service: Arc<LyricsService>,
    karaoke: bool,
    inner: Arc<Mutex<Inner>>,
}

impl LyricsManager {
    /// 创建新的歌词管理器
    pub fn new(service: Arc<LyricsService>, karaoke: bool) -> Self {
        Self {
            service,
            karaoke,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 播放状态变化时调用
    ///
    /// 身份键不变时什么也不做；缓存未命中时在后台查询，返回该查询任务。
    pub fn update(&self, state: &PlayerState) -> Option<JoinHandle<()>> {
        let key = IdentityKey::from_state(state);

        let mut inner = self.lock();
        if inner.current.key == key {
            return None;
        }

        let Some(key) = key else {
            debug!("曲目缺少标题或艺术家，清空歌词");
            inner.current = LyricsSnapshot::default();
            return None;
        };

        if let Some(cached) = inner.cache.get(&key).cloned() {
            debug!("歌词缓存命中: {}", key);
            inner.current = LyricsSnapshot {
                status: if cached.is_some() {
                    LyricsStatus::Ready
                } else {
                    LyricsStatus::NotFound
                },
                key: Some(key),
                lines: cached,
            };
            return None;
        }

        inner.current = LyricsSnapshot {
            key: Some(key.clone()),
            status: LyricsStatus::Searching,
            lines: None,
        };

        if !inner.in_flight.insert(key.clone()) {
            debug!("歌词查询已在进行: {}", key);
            return None;
        }
        drop(inner);

        info!(
            "查找歌词: {} - {}",
            state.title.as_deref().unwrap_or_default(),
            state.artists_text()
        );

        let manager = self.clone();
        let state = state.clone();
        Some(tokio::spawn(async move {
            let lyrics = manager.service.resolve(&state, manager.karaoke).await;
            manager.finish(key, lyrics);
        }))
    }

    fn finish(&self, key: IdentityKey, lyrics: Option<Lyrics>) {
        let mut inner = self.lock();
        inner.in_flight.remove(&key);
        inner.cache.insert(key.clone(), lyrics.clone());

        // 查询期间曲目已经切换，只缓存结果
        if inner.current.key.as_ref() != Some(&key) {
            debug!("歌词查询完成但曲目已切换: {}", key);
            return;
        }

        inner.current.status = if lyrics.is_some() {
            LyricsStatus::Ready
        } else {
            LyricsStatus::NotFound
        };
        inner.current.lines = lyrics;
    }

    /// 没有任何播放源时清空当前歌词（缓存保留）
    pub fn clear(&self) {
        self.lock().current = LyricsSnapshot::default();
    }

    pub fn snapshot(&self) -> LyricsSnapshot {
        self.lock().current.clone()
    }

    /// 当前歌词
    pub fn current(&self) -> Option<Lyrics> {
        self.lock().current.lines.clone()
    }

    pub fn status(&self) -> LyricsStatus {
        self.lock().current.status
    }
}
