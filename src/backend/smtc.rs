use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use windows::Foundation::{IAsyncOperation, TimeSpan};
use windows::Media::Control::{
    GlobalSystemMediaTransportControlsSession as Session,
    GlobalSystemMediaTransportControlsSessionManager as SessionManager,
    GlobalSystemMediaTransportControlsSessionPlaybackStatus as PlaybackStatus,
};

use crate::api::yesplaymusic::YesPlayMusicApi;
use crate::backend::predictor::SessionTimeline;
use crate::backend::session::{apply_yesplaymusic_override, is_yesplaymusic, pick_session, SessionInfo};
use crate::backend::{Backend, StateHub, StateReceiver};
use crate::config::Config;
use crate::player::{PlayerState, StateEquality};
use crate::utils::string::parse_combined_artist;

/// 100 纳秒为单位
fn ticks(span: TimeSpan) -> Duration {
    Duration::from_nanos(span.Duration.max(0) as u64 * 100)
}

fn sessions(manager: &SessionManager) -> Result<Vec<(Session, SessionInfo)>> {
    let list = manager.GetSessions()?;
    let mut out = Vec::new();
    for i in 0..list.Size()? {
        let session = list.GetAt(i)?;
        let Ok(app) = session.SourceAppUserModelId() else {
            continue;
        };
        let playing = session
            .GetPlaybackInfo()
            .and_then(|info| info.PlaybackStatus())
            .is_ok_and(|status| status == PlaybackStatus::Playing);
        out.push((
            session,
            SessionInfo {
                app: app.to_string_lossy(),
                playing,
            },
        ));
    }
    Ok(out)
}

fn read_state(session: &Session, info: &SessionInfo) -> Result<PlayerState> {
    let props = session.TryGetMediaPropertiesAsync()?.get()?;
    let timeline = session.GetTimelineProperties()?;

    let title = props.Title()?.to_string_lossy();
    let title = (!title.trim().is_empty()).then_some(title);
    let album = props.AlbumTitle()?.to_string_lossy();
    let (artists, album) = parse_combined_artist(
        &props.Artist()?.to_string_lossy(),
        Some(&album),
        title.as_deref(),
    );

    let start = ticks(timeline.StartTime()?);
    let end = ticks(timeline.EndTime()?);

    let mut state = PlayerState {
        title,
        artists,
        album,
        position: ticks(timeline.Position()?),
        duration: end.saturating_sub(start),
        playing: info.playing,
        source_app: Some(info.app.clone()),
        ..Default::default()
    };
    state.clamp_position();
    Ok(state)
}

struct SmtcShared {
    config: Config,
    hub: StateHub,
    timeline: Mutex<SessionTimeline>,
    active_app: Mutex<Option<String>>,
    yesplaymusic: Option<YesPlayMusicApi>,
}

impl SmtcShared {
    fn timeline(&self) -> MutexGuard<'_, SessionTimeline> {
        self.timeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active_app(&self) -> Option<String> {
        self.active_app
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_active_app(&self, app: Option<String>) {
        let mut active = self.active_app.lock().unwrap_or_else(PoisonError::into_inner);
        if *active != app {
            match &app {
                Some(app) => info!("SMTC 活跃会话: {}", app),
                None => debug!("没有可用的 SMTC 会话"),
            }
            *active = app;
        }
    }

    fn vanish(&self) {
        self.set_active_app(None);
        self.timeline().reset();
        self.hub.clear();
    }

    /// 在轮询线程上运行
    fn poll_once(&self, manager: &SessionManager, runtime: &Handle) -> Result<()> {
        let sessions = sessions(manager)?;
        let infos: Vec<SessionInfo> = sessions.iter().map(|(_, info)| info.clone()).collect();
        let current = self.active_app();
        let Some(index) = pick_session(&infos, current.as_deref(), |app| self.config.is_excluded(app)) else {
            self.vanish();
            return Ok(());
        };

        let (session, info) = &sessions[index];
        let mut state = read_state(session, info)?;
        self.set_active_app(Some(info.app.clone()));

        let previous = self.hub.current();
        if previous.as_ref().map(|p| (&p.title, &p.source_app)) != Some((&state.title, &state.source_app)) {
            self.timeline().reset();
        }

        let now = Instant::now();
        let ypm_state = match self.yesplaymusic.as_ref() {
            Some(api) if is_yesplaymusic(&info.app) => runtime.block_on(api.state()),
            _ => None,
        };

        let position = match ypm_state {
            Some(ypm) => {
                state = apply_yesplaymusic_override(state, &ypm);
                self.timeline()
                    .update_from_override(state.position, state.playing, state.duration, now)
            }
            None => self
                .timeline()
                .update(state.position, state.playing, state.duration, now),
        };

        self.hub.publish(state.with_position(position));
        Ok(())
    }

    /// 在两次系统更新之间推进位置
    fn tick(&self) {
        let Some(state) = self.hub.current().filter(|s| s.playing) else {
            return;
        };
        let predicted = self
            .timeline()
            .tick(state.position, Instant::now(), state.duration);
        if let Some(position) = predicted {
            self.hub.publish_position(position);
        }
    }
}

/// Windows 播放源：通过 SMTC 跟随系统媒体会话
pub struct SmtcBackend {
    shared: Arc<SmtcShared>,
    poll_interval: Duration,
    started: AtomicBool,
}

impl SmtcBackend {
    pub fn new(config: &Config) -> Self {
        let yesplaymusic = config
            .sources
            .yesplaymusic
            .then(|| YesPlayMusicApi::new(&config.endpoints));
        Self {
            shared: Arc::new(SmtcShared {
                config: config.clone(),
                hub: StateHub::new(StateEquality::Timeline),
                timeline: Mutex::new(SessionTimeline::new(config.timing.predictor())),
                active_app: Mutex::new(None),
                yesplaymusic,
            }),
            poll_interval: config.timing.poll_interval(),
            started: AtomicBool::new(false),
        }
    }

    /// 对当前会话执行控制命令
    async fn control<F>(&self, action: &'static str, f: F)
    where
        F: FnOnce(&Session) -> windows::core::Result<IAsyncOperation<bool>> + Send + 'static,
    {
        let Some(app) = self.shared.active_app() else {
            return;
        };

        let result = tokio::task::spawn_blocking(move || -> Result<bool> {
            let manager = SessionManager::RequestAsync()?.get()?;
            let (session, _) = sessions(&manager)?
                .into_iter()
                .find(|(_, info)| info.app == app)
                .ok_or_else(|| anyhow!("会话已关闭: {}", app))?;
            Ok(f(&session)?.get()?)
        })
        .await;

        match result {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => warn!("SMTC {} 被拒绝", action),
            Ok(Err(e)) => warn!("SMTC {} 失败: {}", action, e),
            Err(e) => error!("SMTC {} 任务异常: {}", action, e),
        }
    }
}

#[async_trait]
impl Backend for SmtcBackend {
    fn name(&self) -> &str {
        "SMTC"
    }

    async fn start(&self, token: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let poll_interval = self.poll_interval;
        let runtime = Handle::current();
        let poll_token = token.clone();

        // WinRT 的会话管理器在专用线程上阻塞调用
        let spawned = thread::Builder::new()
            .name("smtc-poll".to_string())
            .spawn(move || {
                let manager = match SessionManager::RequestAsync().and_then(|op| op.get()) {
                    Ok(manager) => manager,
                    Err(e) => {
                        error!("无法获取 SMTC 会话管理器: {}", e);
                        return;
                    }
                };

                while !poll_token.is_cancelled() {
                    if let Err(e) = shared.poll_once(&manager, &runtime) {
                        debug!("SMTC 轮询失败: {}", e);
                        shared.vanish();
                    }
                    thread::sleep(poll_interval);
                }
                debug!("SMTC 轮询结束");
            });
        if let Err(e) = spawned {
            error!("无法启动 SMTC 线程: {}", e);
            return;
        }

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => shared.tick(),
                }
            }
        });
    }

    fn current_state(&self) -> Option<PlayerState> {
        self.shared.hub.current()
    }

    fn subscribe(&self) -> StateReceiver {
        self.shared.hub.subscribe()
    }

    async fn play(&self) {
        self.control("播放", |s| s.TryPlayAsync()).await;
    }

    async fn pause(&self) {
        self.control("暂停", |s| s.TryPauseAsync()).await;
    }

    async fn toggle(&self) {
        self.control("切换播放状态", |s| s.TryTogglePlayPauseAsync())
            .await;
    }

    async fn next(&self) {
        self.control("下一首", |s| s.TrySkipNextAsync()).await;
    }

    async fn previous(&self) {
        self.control("上一首", |s| s.TrySkipPreviousAsync()).await;
    }

    async fn seek(&self, position: Duration) {
        let ticks = i64::try_from(position.as_nanos() / 100).unwrap_or(i64::MAX);
        self.control("跳转", move |s| s.TryChangePlaybackPositionAsync(ticks))
            .await;
    }
}
