pub mod cider;
pub mod dynamic;
mod hub;
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub mod media_control;
#[cfg(target_os = "linux")]
pub mod mpris;
pub mod predictor;
pub mod session;
#[cfg(windows)]
pub mod smtc;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::player::PlayerState;

pub use dynamic::DynamicBackend;
pub use hub::StateHub;

/// 订阅者收到的状态，`None` 表示播放源不再报告任何曲目
pub type StateReceiver = mpsc::UnboundedReceiver<Option<PlayerState>>;

/// 播放源接口
///
/// 所有方法都不会把错误传给调用者：播放源不可用时表现为"没有状态"，
/// 控制命令在播放源不可用时什么也不做。
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// 开始监听，在后台任务中运行直到 `token` 被取消
    async fn start(&self, token: CancellationToken);

    /// 最近一次的状态快照
    fn current_state(&self) -> Option<PlayerState>;

    /// 注册订阅者，只会在状态发生实质变化时收到通知
    fn subscribe(&self) -> StateReceiver;

    async fn play(&self);
    async fn pause(&self);
    async fn toggle(&self);
    async fn next(&self);
    async fn previous(&self);
    async fn seek(&self, position: Duration);

    /// 快速判断该播放源此刻是否在播放
    async fn probe(&self) -> bool {
        self.current_state().is_some_and(|s| s.playing)
    }
}

/// 按当前平台创建后端，顺序即优先级
pub fn platform_backends(config: &Config) -> Vec<Arc<dyn Backend>> {
    let mut backends: Vec<Arc<dyn Backend>> = Vec::new();

    if config.sources.cider {
        backends.push(Arc::new(cider::CiderBackend::new(config)));
    }

    #[cfg(windows)]
    backends.push(Arc::new(smtc::SmtcBackend::new(config)));

    #[cfg(target_os = "linux")]
    backends.push(Arc::new(mpris::MprisBackend::new(config)));

    #[cfg(target_os = "macos")]
    backends.push(Arc::new(media_control::MediaControlBackend::new(config)));

    backends
}
