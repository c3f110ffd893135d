use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backend::Backend;
use crate::config::DisplayConfig;
use crate::display::renderer::{self, Frame};
use crate::lyrics::cursor::{active_token, window, CursorUpdate};
use crate::lyrics::{IdentityKey, LyricsCursor, LyricsManager, LyricsSnapshot, LyricsStatus};
use crate::player::PlayerState;

/// 输出模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    /// 清屏重绘的多行窗口
    #[default]
    Multi,
    /// 只输出当前行
    Line,
}

/// 一次渲染需要输出的内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Frame(Frame),
    Line(String),
}

/// 决定什么时候输出什么，不直接接触终端
pub struct FrameState {
    mode: DisplayMode,
    offset_ms: i64,
    karaoke: bool,
    cursor: LyricsCursor,
    shown_key: Option<IdentityKey>,
    shown_status: LyricsStatus,
    shown_token: Option<usize>,
}

impl FrameState {
    pub fn new(mode: DisplayMode, config: &DisplayConfig) -> Self {
        Self {
            mode,
            offset_ms: config.lyric_offset_ms,
            karaoke: config.karaoke,
            cursor: LyricsCursor::new(config.window_lines.max(1)),
            shown_key: None,
            shown_status: LyricsStatus::Idle,
            shown_token: None,
        }
    }

    /// 根据当前状态和歌词计算输出，没有变化时返回 `None`
    pub fn render(&mut self, state: Option<&PlayerState>, snapshot: &LyricsSnapshot) -> Option<Output> {
        let header_changed =
            self.shown_key != snapshot.key || self.shown_status != snapshot.status;
        if header_changed {
            self.shown_key = snapshot.key.clone();
            self.shown_status = snapshot.status;
            self.shown_token = None;
            self.cursor.reset();
        }

        let lines = snapshot.lines.as_deref().filter(|l| !l.is_empty());
        let (Some(state), Some(lines)) = (state, lines) else {
            return (header_changed && self.mode == DisplayMode::Multi).then(|| {
                Output::Frame(Frame {
                    header: renderer::header(state, snapshot.status),
                    lyrics: Vec::new(),
                })
            });
        };

        let position = renderer::apply_offset(state.position, self.offset_ms);
        let update = match self.cursor.advance(snapshot.key.as_ref(), lines, position) {
            Some(update) => {
                self.shown_token = None;
                update
            }
            None => {
                let index = self.cursor.last_index()?;
                let token = self.karaoke.then(|| active_token(&lines[index], position)).flatten();
                // 逐字模式下当前音节变化也要重绘
                if token.is_none() || token == self.shown_token {
                    return None;
                }
                CursorUpdate {
                    index: Some(index),
                    window: window(lines.len(), index, self.cursor.window_size()),
                }
            }
        };

        let active = update.index.map(|i| &lines[i]);
        if self.karaoke {
            self.shown_token = active.and_then(|line| active_token(line, position));
        }

        Some(match self.mode {
            // 第一行之前输出空行，清掉状态栏里上一行
            DisplayMode::Line => Output::Line(active.map(|l| l.text.clone()).unwrap_or_default()),
            DisplayMode::Multi => Output::Frame(Frame {
                header: renderer::header(Some(state), snapshot.status),
                lyrics: renderer::lyrics_window(
                    lines,
                    &update,
                    self.karaoke.then_some(position),
                ),
            }),
        })
    }
}

/// 显示管理器：订阅后端状态、驱动歌词查询，并定时输出当前歌词
pub struct DisplayManager {
    backend: Arc<dyn Backend>,
    lyrics: LyricsManager,
    frames: FrameState,
    render_interval: Duration,
}

impl DisplayManager {
    pub fn new(
        backend: Arc<dyn Backend>,
        lyrics: LyricsManager,
        mode: DisplayMode,
        config: &DisplayConfig,
    ) -> Self {
        Self {
            backend,
            lyrics,
            frames: FrameState::new(mode, config),
            render_interval: Duration::from_millis(config.render_interval_ms.max(10)),
        }
    }

    fn output(&self, output: Output) -> Result<()> {
        let mut stdout = io::stdout().lock();
        match output {
            Output::Frame(frame) => renderer::draw_frame(&mut stdout, &frame),
            Output::Line(text) => renderer::draw_line(&mut stdout, &text),
        }
    }

    fn render(&mut self) -> Result<()> {
        let state = self.backend.current_state();
        let snapshot = self.lyrics.snapshot();
        if let Some(output) = self.frames.render(state.as_ref(), &snapshot) {
            self.output(output)?;
        }
        Ok(())
    }

    /// 运行直到 `token` 被取消
    pub async fn run(&mut self, token: CancellationToken) -> Result<()> {
        let mut events = self.backend.subscribe();
        if let Some(state) = self.backend.current_state() {
            self.lyrics.update(&state);
        }

        let mut ticker = tokio::time::interval(self.render_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => match event {
                    Some(Some(state)) => {
                        self.lyrics.update(&state);
                    }
                    Some(None) => {
                        debug!("播放源消失");
                        self.lyrics.clear();
                    }
                    None => break,
                },
                _ = ticker.tick() => self.render()?,
            }
        }
        Ok(())
    }
}
