use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::cider::CiderApi;
use crate::backend::{Backend, StateHub, StateReceiver};
use crate::config::Config;
use crate::player::{PlayerState, StateEquality};

/// Cider v3 播放源，轮询 `now-playing`
pub struct CiderBackend {
    api: Arc<CiderApi>,
    hub: Arc<StateHub>,
    poll_interval: Duration,
    started: AtomicBool,
}

impl CiderBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            api: Arc::new(CiderApi::new(&config.endpoints)),
            hub: Arc::new(StateHub::new(StateEquality::Metadata)),
            poll_interval: config.timing.poll_interval(),
            started: AtomicBool::new(false),
        }
    }

    async fn poll_once(api: &CiderApi, hub: &StateHub) {
        match api.now_playing().await {
            Ok(Some(info)) => {
                if hub.publish(info.into_state()) {
                    debug!("Cider 状态更新");
                }
            }
            Ok(None) => {
                hub.clear();
            }
            Err(e) => {
                // 连接被拒绝或超时：Cider 没有运行
                if hub.clear() {
                    info!("Cider 不再可用: {}", e);
                }
            }
        }
    }
}

#[async_trait]
impl Backend for CiderBackend {
    fn name(&self) -> &str {
        "Cider"
    }

    async fn start(&self, token: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let api = Arc::clone(&self.api);
        let hub = Arc::clone(&self.hub);
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => Self::poll_once(&api, &hub).await,
                }
            }
            debug!("Cider 轮询结束");
        });
    }

    fn current_state(&self) -> Option<PlayerState> {
        self.hub.current()
    }

    fn subscribe(&self) -> StateReceiver {
        self.hub.subscribe()
    }

    async fn play(&self) {
        if let Err(e) = self.api.play().await {
            warn!("Cider 播放失败: {}", e);
        }
    }

    async fn pause(&self) {
        if let Err(e) = self.api.pause().await {
            warn!("Cider 暂停失败: {}", e);
        }
    }

    async fn toggle(&self) {
        if let Err(e) = self.api.toggle().await {
            warn!("Cider 切换播放状态失败: {}", e);
        }
    }

    async fn next(&self) {
        if let Err(e) = self.api.next().await {
            warn!("Cider 下一首失败: {}", e);
        }
    }

    async fn previous(&self) {
        if let Err(e) = self.api.previous().await {
            warn!("Cider 上一首失败: {}", e);
        }
    }

    async fn seek(&self, position: Duration) {
        if let Err(e) = self.api.seek(position).await {
            warn!("Cider 跳转失败: {}", e);
        }
    }

    /// 先确认 Cider 在运行，再询问是否在播放
    async fn probe(&self) -> bool {
        if !self.api.active().await {
            return false;
        }
        self.api.is_playing().await.unwrap_or(false)
    }
}
