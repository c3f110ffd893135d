use serde::{Deserialize, Serialize};

use crate::player::PlayerState;

/// 粗略的媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MediaType {
    Music,
    Video,
    Podcast,
    Unknown,
}

/// 媒体类型猜测的评分阈值（经验值，可通过配置调整）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaTypeThresholds {
    pub artist_bonus: i32,
    pub no_artist_penalty: i32,
    pub album_bonus: i32,
    /// 不超过该秒数视为广告或提示音
    pub tiny_duration_secs: f64,
    pub tiny_duration_penalty: i32,
    pub song_min_minutes: f64,
    pub song_max_minutes: f64,
    pub song_duration_bonus: i32,
    pub long_duration_minutes: f64,
    pub long_duration_penalty: i32,
    pub square_aspect_min: f64,
    pub square_aspect_max: f64,
    pub square_artwork_bonus: i32,
    pub widescreen_aspect: f64,
    pub widescreen_penalty: i32,
    pub music_score: i32,
    pub video_score: i32,
    pub podcast_minutes: f64,
}

impl Default for MediaTypeThresholds {
    fn default() -> Self {
        Self {
            artist_bonus: 3,
            no_artist_penalty: 2,
            album_bonus: 2,
            tiny_duration_secs: 1.0,
            tiny_duration_penalty: 3,
            song_min_minutes: 2.0,
            song_max_minutes: 7.0,
            song_duration_bonus: 3,
            long_duration_minutes: 30.0,
            long_duration_penalty: 1,
            square_aspect_min: 0.9,
            square_aspect_max: 1.1,
            square_artwork_bonus: 3,
            widescreen_aspect: 1.3,
            widescreen_penalty: 3,
            music_score: 4,
            video_score: -3,
            podcast_minutes: 25.0,
        }
    }
}

/// 根据元数据猜测媒体类型
pub fn guess_media_type(state: &PlayerState, t: &MediaTypeThresholds) -> MediaType {
    let mut score = 0;

    if state.artists.iter().any(|a| !a.trim().is_empty()) {
        score += t.artist_bonus;
    } else {
        score -= t.no_artist_penalty;
    }

    if state.album.as_deref().is_some_and(|a| !a.trim().is_empty()) {
        score += t.album_bonus;
    }

    let secs = state.duration.as_secs_f64();
    let minutes = secs / 60.0;
    if secs <= t.tiny_duration_secs {
        score -= t.tiny_duration_penalty;
    } else if minutes >= t.song_min_minutes && minutes <= t.song_max_minutes {
        score += t.song_duration_bonus;
    } else if minutes >= t.long_duration_minutes {
        score -= t.long_duration_penalty;
    }

    if state.artwork_width > 0 && state.artwork_height > 0 {
        let aspect = state.artwork_width as f64 / state.artwork_height as f64;
        if aspect > t.square_aspect_min && aspect < t.square_aspect_max {
            score += t.square_artwork_bonus;
        } else if aspect > t.widescreen_aspect {
            score -= t.widescreen_penalty;
        }
    }

    if score >= t.music_score {
        MediaType::Music
    } else if score <= t.video_score {
        MediaType::Video
    } else if minutes >= t.podcast_minutes {
        MediaType::Podcast
    } else {
        MediaType::Unknown
    }
}
