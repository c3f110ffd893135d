//! 系统级播放源（SMTC / MPRIS）共用的会话选择逻辑

use crate::player::PlayerState;

/// 参与选择的会话
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub app: String,
    pub playing: bool,
}

/// 选择要跟随的会话
///
/// 正在播放的会话优先；否则保持当前会话；再否则取第一个。
/// 被排除的应用（有专用后端的播放器、黑名单）永远不会被选中。
pub fn pick_session(
    sessions: &[SessionInfo],
    current: Option<&str>,
    is_excluded: impl Fn(&str) -> bool,
) -> Option<usize> {
    let is_excluded = &is_excluded;
    let eligible = move || {
        sessions
            .iter()
            .enumerate()
            .filter(move |(_, s)| !is_excluded(&s.app))
    };

    if let Some((i, _)) = eligible().find(|(_, s)| s.playing) {
        return Some(i);
    }

    if let Some(current) = current {
        if let Some((i, _)) = eligible().find(|(_, s)| s.app == current) {
            return Some(i);
        }
    }

    eligible().next().map(|(i, _)| i)
}

/// YesPlayMusic 的会话：它报告的位置和时长比系统接口准确
pub fn is_yesplaymusic(app: &str) -> bool {
    app.to_lowercase().contains("yesplaymusic")
}

/// 用 YesPlayMusic 自己的状态修正系统报告的状态
///
/// 标题不一致时（YesPlayMusic 跳过了歌曲而系统还没更新）整体采用 YesPlayMusic 的状态；
/// 无论如何都采用它的位置、时长和封面。
pub fn apply_yesplaymusic_override(state: PlayerState, ypm: &PlayerState) -> PlayerState {
    let mut merged = if ypm.title != state.title {
        PlayerState {
            source_app: state.source_app.clone(),
            playing: state.playing,
            ..ypm.clone()
        }
    } else {
        state
    };

    merged.position = ypm.position;
    merged.duration = ypm.duration;
    merged.artwork_url = ypm.artwork_url.clone();
    merged.clamp_position();
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session(app: &str, playing: bool) -> SessionInfo {
        SessionInfo {
            app: app.to_string(),
            playing,
        }
    }

    fn excluded(app: &str) -> bool {
        app.starts_with("Cider")
    }

    #[test]
    fn test_playing_session_wins() {
        let sessions = vec![session("Spotify", false), session("foobar", true)];
        assert_eq!(pick_session(&sessions, Some("Spotify"), excluded), Some(1));
    }

    #[test]
    fn test_excluded_apps_are_skipped() {
        let sessions = vec![session("Cider.exe", true), session("Spotify", false)];
        assert_eq!(pick_session(&sessions, None, excluded), Some(1));

        let only_cider = vec![session("Cider.exe", true)];
        assert_eq!(pick_session(&only_cider, None, excluded), None);
    }

    #[test]
    fn test_keeps_current_when_nothing_plays() {
        let sessions = vec![session("a", false), session("b", false)];
        assert_eq!(pick_session(&sessions, Some("b"), excluded), Some(1));
        assert_eq!(pick_session(&sessions, Some("gone"), excluded), Some(0));
        assert_eq!(pick_session(&[], None, excluded), None);
    }

    #[test]
    fn test_yesplaymusic_override() {
        let system = PlayerState {
            title: Some("Song".to_string()),
            artists: vec!["Artist".to_string()],
            position: Duration::from_secs(3),
            playing: true,
            source_app: Some("YesPlayMusic.exe".to_string()),
            ..Default::default()
        };
        let ypm = PlayerState {
            title: Some("Song".to_string()),
            artists: vec!["Artist".to_string()],
            position: Duration::from_secs(42),
            duration: Duration::from_secs(200),
            artwork_url: Some("http://img".to_string()),
            source_app: Some("YesPlayMusic".to_string()),
            ..Default::default()
        };

        let merged = apply_yesplaymusic_override(system.clone(), &ypm);
        assert_eq!(merged.position, Duration::from_secs(42));
        assert_eq!(merged.duration, Duration::from_secs(200));
        assert_eq!(merged.artwork_url.as_deref(), Some("http://img"));
        assert_eq!(merged.source_app.as_deref(), Some("YesPlayMusic.exe"));

        let skipped = PlayerState {
            title: Some("Next Song".to_string()),
            ..ypm
        };
        let merged = apply_yesplaymusic_override(system, &skipped);
        assert_eq!(merged.title.as_deref(), Some("Next Song"));
        assert!(merged.playing);
    }

    #[test]
    fn test_is_yesplaymusic() {
        assert!(is_yesplaymusic("YesPlayMusic.exe"));
        assert!(is_yesplaymusic("org.mpris.MediaPlayer2.yesplaymusic"));
        assert!(!is_yesplaymusic("Spotify"));
    }
}
