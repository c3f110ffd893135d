use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{self, Backend, DynamicBackend};
use crate::config::Config;
use crate::display::{DisplayManager, DisplayMode};
use crate::lyrics::{self, LyricsManager};
use crate::server::{web, ControlCommand, ControlServer};

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Mode {
    /// 多行歌词窗口
    #[default]
    Default,
    /// 只输出当前行（状态栏）
    Line,
    /// 不输出歌词，只提供控制与 HTTP 接口
    Server,
}

/// 等待后端出现第一个状态的次数与间隔
const READY_POLLS: usize = 20;
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct App {
    config: Arc<Config>,
    backend: Arc<dyn Backend>,
    lyrics: LyricsManager,
}

impl App {
    /// 按配置创建当前平台的后端组合
    pub fn new(config: Arc<Config>) -> Self {
        let children = backend::platform_backends(&config);
        debug!(
            "播放源: {:?}",
            children.iter().map(|b| b.name().to_string()).collect::<Vec<_>>()
        );
        let backend: Arc<dyn Backend> =
            Arc::new(DynamicBackend::new(children, config.timing.arbiter_interval()));
        Self::with_backend(config, backend)
    }

    pub fn with_backend(config: Arc<Config>, backend: Arc<dyn Backend>) -> Self {
        let lyrics = lyrics::setup_lyrics_manager(&config);
        Self {
            config,
            backend,
            lyrics,
        }
    }

    /// 运行直到 `token` 被取消
    pub async fn run(&self, mode: Mode, token: CancellationToken) -> Result<()> {
        self.backend.start(token.child_token()).await;

        let mut tasks = Vec::new();
        if self.config.server.control_enabled {
            tasks.push(self.spawn_control_server(token.clone()).await?);
        }
        if self.config.server.web_enabled || mode == Mode::Server {
            tasks.push(self.spawn_web_server(token.clone()).await?);
        }

        let result = match mode {
            Mode::Default => self.run_display(DisplayMode::Multi, token.clone()).await,
            Mode::Line => self.run_display(DisplayMode::Line, token.clone()).await,
            Mode::Server => {
                self.follow_lyrics(token.clone()).await;
                Ok(())
            }
        };

        token.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                error!("后台任务异常: {}", e);
            }
        }
        result
    }

    /// 执行一次控制命令：先等待后端报告状态（最多约 2 秒）
    pub async fn control(&self, command: ControlCommand) -> Result<()> {
        let token = CancellationToken::new();
        self.backend.start(token.child_token()).await;

        if !self.wait_ready().await {
            warn!("没有检测到播放器状态，仍然尝试发送命令");
        }
        info!("执行控制命令: {}", command);
        command.execute(self.backend.as_ref()).await;

        token.cancel();
        Ok(())
    }

    async fn wait_ready(&self) -> bool {
        for _ in 0..READY_POLLS {
            if self.backend.current_state().is_some() {
                return true;
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
        false
    }

    async fn run_display(&self, mode: DisplayMode, token: CancellationToken) -> Result<()> {
        let mut display = DisplayManager::new(
            Arc::clone(&self.backend),
            self.lyrics.clone(),
            mode,
            &self.config.display,
        );
        display.run(token).await
    }

    /// 没有显示时仍然跟随曲目变化查询歌词，供 HTTP 接口使用
    async fn follow_lyrics(&self, token: CancellationToken) {
        let mut events = self.backend.subscribe();
        if let Some(state) = self.backend.current_state() {
            self.lyrics.update(&state);
        }
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => match event {
                    Some(Some(state)) => {
                        self.lyrics.update(&state);
                    }
                    Some(None) => self.lyrics.clear(),
                    None => break,
                },
            }
        }
    }

    async fn spawn_control_server(&self, token: CancellationToken) -> Result<JoinHandle<()>> {
        let addr = SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            self.config.server.control_port,
        );
        let server = ControlServer::bind(addr, Arc::clone(&self.backend)).await?;
        Ok(tokio::spawn(async move {
            if let Err(e) = server.run(token).await {
                error!("控制服务器退出: {}", e);
            }
        }))
    }

    async fn spawn_web_server(&self, token: CancellationToken) -> Result<JoinHandle<()>> {
        let ip: IpAddr = self
            .config
            .server
            .web_host
            .parse()
            .with_context(|| format!("无效的 HTTP 监听地址: {}", self.config.server.web_host))?;
        let listener = web::bind(SocketAddr::new(ip, self.config.server.web_port)).await?;
        let router = web::router(Arc::clone(&self.backend), self.lyrics.clone());
        Ok(tokio::spawn(async move {
            if let Err(e) = web::serve(listener, router, token).await {
                error!("HTTP 服务退出: {}", e);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dynamic::tests::{state, FakeBackend};

    fn config() -> Arc<Config> {
        let mut config = Config::default();
        config.lyrics_sources.clear();
        config.sources.yesplaymusic = false;
        config.sources.local = None;
        Arc::new(config)
    }

    #[tokio::test]
    async fn test_control_waits_for_state_then_executes() {
        let fake = FakeBackend::new("fake");
        let app = App::with_backend(config(), fake.clone());

        let publisher = fake.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            publisher.hub.publish(state("song", true));
        });

        app.control(ControlCommand::Next).await.unwrap();
        assert_eq!(fake.commands(), vec!["next"]);
        assert!(fake.current_state().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_gives_up_waiting() {
        let fake = FakeBackend::new("fake");
        let app = App::with_backend(config(), fake.clone());

        app.control(ControlCommand::Pause).await.unwrap();
        assert_eq!(fake.commands(), vec!["pause"]);
    }

    #[tokio::test]
    async fn test_server_mode_follows_lyrics_until_cancelled() {
        let fake = FakeBackend::new("fake");
        let mut config = (*config()).clone();
        config.server.control_enabled = false;
        config.server.web_port = 0;
        config.server.web_host = "127.0.0.1".to_string();
        let app = App::with_backend(Arc::new(config), fake.clone());

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        app.run(Mode::Server, token).await.unwrap();
    }
}
