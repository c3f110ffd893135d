use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::backend::Backend;

/// 播放控制命令：`play`、`pause`、`toggle`、`next`、`prev`、`seek <秒>`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlCommand {
    Play,
    Pause,
    Toggle,
    Next,
    Prev,
    Seek(Duration),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseCommandError {
    #[error("空命令")]
    Empty,
    #[error("未知命令: {0}")]
    Unknown(String),
    #[error("无效的跳转位置: {0}")]
    InvalidSeek(String),
}

/// 秒数转换为播放位置，负数按零处理；非有限值或超出 `Duration` 范围时返回 `None`
pub fn seconds_to_position(seconds: f64) -> Option<Duration> {
    if !seconds.is_finite() {
        return None;
    }
    Duration::try_from_secs_f64(seconds.max(0.0)).ok()
}

impl ControlCommand {
    /// 由命令名和可选的秒数构造（命令行参数使用）
    pub fn from_parts(name: &str, seconds: Option<f64>) -> Result<Self, ParseCommandError> {
        match (name.trim().to_lowercase().as_str(), seconds) {
            ("", _) => Err(ParseCommandError::Empty),
            ("seek", Some(s)) => seconds_to_position(s)
                .map(ControlCommand::Seek)
                .ok_or_else(|| ParseCommandError::InvalidSeek(s.to_string())),
            ("seek", None) => Err(ParseCommandError::InvalidSeek(String::new())),
            (other, _) => other.parse(),
        }
    }

    /// 在后端上执行
    pub async fn execute(self, backend: &dyn Backend) {
        match self {
            ControlCommand::Play => backend.play().await,
            ControlCommand::Pause => backend.pause().await,
            ControlCommand::Toggle => backend.toggle().await,
            ControlCommand::Next => backend.next().await,
            ControlCommand::Prev => backend.previous().await,
            ControlCommand::Seek(position) => backend.seek(position).await,
        }
    }
}

impl FromStr for ControlCommand {
    type Err = ParseCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let Some(name) = parts.next() else {
            return Err(ParseCommandError::Empty);
        };

        let command = match name.to_lowercase().as_str() {
            "play" => ControlCommand::Play,
            "pause" => ControlCommand::Pause,
            "toggle" => ControlCommand::Toggle,
            "next" => ControlCommand::Next,
            "prev" => ControlCommand::Prev,
            "seek" => {
                let arg = parts.next().unwrap_or_default();
                let position = arg
                    .parse::<f64>()
                    .ok()
                    .and_then(seconds_to_position)
                    .ok_or_else(|| ParseCommandError::InvalidSeek(arg.to_string()))?;
                ControlCommand::Seek(position)
            }
            other => return Err(ParseCommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::Play => write!(f, "play"),
            ControlCommand::Pause => write!(f, "pause"),
            ControlCommand::Toggle => write!(f, "toggle"),
            ControlCommand::Next => write!(f, "next"),
            ControlCommand::Prev => write!(f, "prev"),
            ControlCommand::Seek(position) => write!(f, "seek {}", position.as_secs_f64()),
        }
    }
}
