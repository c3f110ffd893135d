use std::ops::Range;
use std::time::Duration;

use crate::lyrics::{IdentityKey, LyricsLine};

/// 多行显示的默认窗口大小
pub const DEFAULT_WINDOW_LINES: usize = 6;

/// 找到最后一行 `timestamp <= position` 的索引，位置在第一行之前时返回 `None`
pub fn floor_index(lines: &[LyricsLine], position: Duration) -> Option<usize> {
    lines
        .partition_point(|line| line.timestamp <= position)
        .checked_sub(1)
}

/// 以当前行为中心的固定大小窗口，超出边界时整体平移
pub fn window(len: usize, index: usize, size: usize) -> Range<usize> {
    if len == 0 || size == 0 {
        return 0..0;
    }

    let size = size.min(len);
    let start = index.saturating_sub(size / 2);
    let end = (start + size).min(len);
    end - size..end
}

/// 逐字歌词中当前音节的索引
pub fn active_token(line: &LyricsLine, position: Duration) -> Option<usize> {
    line.tokens
        .as_ref()?
        .partition_point(|token| token.start_time <= position)
        .checked_sub(1)
}

/// 当前行变化时产生的更新，`index` 为 `None` 表示位置在第一行之前
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorUpdate {
    pub index: Option<usize>,
    pub window: Range<usize>,
}

/// 歌词游标：把预测位置映射到当前行，只在行变化时产生更新
#[derive(Debug)]
pub struct LyricsCursor {
    window_size: usize,
    key: Option<IdentityKey>,
    /// 上次通知的行；外层 `None` 表示重置后还没有通知过
    signalled: Option<Option<usize>>,
}

impl Default for LyricsCursor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_LINES)
    }
}

impl LyricsCursor {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            key: None,
            signalled: None,
        }
    }

    /// 忘记上次的行，下一次 `advance` 一定产生更新
    pub fn reset(&mut self) {
        self.signalled = None;
    }

    pub fn last_index(&self) -> Option<usize> {
        self.signalled.flatten()
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// 根据当前位置推进游标
    ///
    /// 身份键变化会先重置游标；行没有变化时返回 `None`。
    /// 向后跳转（拖动进度条）同样会产生更新，跳到第一行之前时更新的 `index` 为 `None`。
    pub fn advance(
        &mut self,
        key: Option<&IdentityKey>,
        lines: &[LyricsLine],
        position: Duration,
    ) -> Option<CursorUpdate> {
        if self.key.as_ref() != key {
            self.key = key.cloned();
            self.reset();
        }

        let index = floor_index(lines, position);
        if self.signalled == Some(index) {
            return None;
        }

        self.signalled = Some(index);
        Some(CursorUpdate {
            index,
            window: window(lines.len(), index.unwrap_or(0), self.window_size),
        })
    }
}
