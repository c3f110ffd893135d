use std::time::Duration;

use serde::{Serialize, Serializer};

/// 统一的播放状态快照，与具体播放源无关
///
/// 发布给订阅者之后不再修改，需要调整时先 `clone()` 再改。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub title: Option<String>,
    /// 艺术家列表，第一个为主艺术家
    pub artists: Vec<String>,
    pub album: Option<String>,
    #[serde(rename = "positionMs", serialize_with = "as_millis")]
    pub position: Duration,
    /// 零表示未知
    #[serde(rename = "durationMs", serialize_with = "as_millis")]
    pub duration: Duration,
    pub playing: bool,
    pub source_app: Option<String>,
    pub artwork_url: Option<String>,
    pub artwork_width: u32,
    pub artwork_height: u32,
}

fn as_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

impl PlayerState {
    /// 主艺术家
    pub fn primary_artist(&self) -> Option<&str> {
        self.artists.first().map(String::as_str)
    }

    /// 用于显示的艺术家文本
    pub fn artists_text(&self) -> String {
        if self.artists.is_empty() {
            "Unknown Artist".to_string()
        } else {
            self.artists.join(", ")
        }
    }

    /// 将位置限制在 `[0, duration]` 内（时长未知时不限制）
    pub fn clamp_position(&mut self) {
        if !self.duration.is_zero() && self.position > self.duration {
            self.position = self.duration;
        }
    }

    /// 返回位置被替换后的副本
    pub fn with_position(&self, position: Duration) -> Self {
        let mut next = self.clone();
        next.position = position;
        next.clamp_position();
        next
    }
}

/// 判断两个状态是否"相同"（相同则不需要重新发布）的规则
///
/// 不同播放源比较的字段并不一致：SMTC 与 media-control 比较播放位置、不比较专辑；
/// MPRIS 与 Cider 比较专辑、不比较位置（它们的位置由轮询单独发布）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEquality {
    /// 标题、艺术家、位置、时长、播放状态、来源
    Timeline,
    /// 标题、艺术家、专辑、时长、播放状态、来源
    Metadata,
}

impl StateEquality {
    pub fn same(self, a: &PlayerState, b: &PlayerState) -> bool {
        let common = a.title == b.title
            && a.artists == b.artists
            && a.duration == b.duration
            && a.playing == b.playing
            && a.source_app == b.source_app;

        match self {
            StateEquality::Timeline => common && a.position == b.position,
            StateEquality::Metadata => common && a.album == b.album,
        }
    }
}
