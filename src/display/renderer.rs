use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use crossterm::cursor::MoveTo;
use crossterm::style::Stylize;
use crossterm::terminal::{Clear, ClearType};
use crossterm::{queue, style::Print};

use crate::lyrics::cursor::{active_token, CursorUpdate};
use crate::lyrics::{LyricsLine, LyricsStatus};
use crate::player::PlayerState;

/// 当前行的前缀
pub const ACTIVE_MARKER: &str = ">> ";
const INACTIVE_MARKER: &str = "   ";

/// 一帧完整的多行输出
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub header: Vec<String>,
    pub lyrics: Vec<String>,
}

/// 标题行："艺术家 - 标题"
pub fn track_line(state: &PlayerState) -> String {
    format!(
        "{} - {}",
        state.artists_text(),
        state.title.as_deref().unwrap_or("Unknown Title")
    )
}

/// 歌词状态提示
pub fn status_line(status: LyricsStatus) -> &'static str {
    match status {
        LyricsStatus::Searching => "Searching lyrics...",
        LyricsStatus::NotFound => "(No lyrics found)",
        LyricsStatus::Idle | LyricsStatus::Ready => "",
    }
}

/// 头部三行
pub fn header(state: Option<&PlayerState>, status: LyricsStatus) -> Vec<String> {
    match state {
        Some(state) => vec![
            "Now Playing:".to_string(),
            track_line(state),
            status_line(status).to_string(),
        ],
        None => vec!["Waiting for player...".to_string()],
    }
}

/// 应用歌词偏移，结果不会小于零
pub fn apply_offset(position: Duration, offset_ms: i64) -> Duration {
    let offset = Duration::from_millis(offset_ms.unsigned_abs());
    if offset_ms >= 0 {
        position + offset
    } else {
        position.saturating_sub(offset)
    }
}

/// 逐字高亮：已唱过的音节加粗
fn karaoke_text(line: &LyricsLine, position: Duration) -> String {
    let (Some(tokens), Some(active)) = (line.tokens.as_ref(), active_token(line, position)) else {
        return line.text.clone();
    };

    tokens
        .iter()
        .enumerate()
        .map(|(i, token)| {
            if i <= active {
                token.text.as_str().bold().to_string()
            } else {
                token.text.clone()
            }
        })
        .collect()
}

/// 渲染歌词窗口，`karaoke` 为 `Some(position)` 时高亮当前行已唱过的音节
pub fn lyrics_window(lines: &[LyricsLine], update: &CursorUpdate, karaoke: Option<Duration>) -> Vec<String> {
    lines[update.window.clone()]
        .iter()
        .zip(update.window.clone())
        .map(|(line, i)| {
            if update.index == Some(i) {
                let text = match karaoke {
                    Some(position) => karaoke_text(line, position),
                    None => line.text.clone(),
                };
                format!("{}{}", ACTIVE_MARKER, text)
            } else {
                format!("{}{}", INACTIVE_MARKER, line.text)
            }
        })
        .collect()
}

/// 清屏后整帧重绘
pub fn draw_frame<W: Write>(out: &mut W, frame: &Frame) -> Result<()> {
    queue!(out, Clear(ClearType::All), MoveTo(0, 0))?;
    for line in &frame.header {
        queue!(out, Print(line), Print("\n"))?;
    }
    if !frame.lyrics.is_empty() {
        queue!(out, Print("\n"))?;
        for line in &frame.lyrics {
            queue!(out, Print(line), Print("\n"))?;
        }
    }
    out.flush()?;
    Ok(())
}

/// 单行模式：每次输出一行，供状态栏读取
pub fn draw_line<W: Write>(out: &mut W, text: &str) -> Result<()> {
    writeln!(out, "{}", text)?;
    out.flush()?;
    Ok(())
}
