use std::sync::OnceLock;

use regex::Regex;

fn punctuation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\p{L}\p{N}\s]").expect("valid regex"))
}

/// 净化字符串，移除特殊字符，用于歌曲匹配
pub fn sanitize_string(input: &str) -> String {
    let result = punctuation_regex().replace_all(input, "").to_string();
    result.trim().to_lowercase()
}

/// 比较两个字符串的相似度（0.0 - 1.0）
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let a_clean = sanitize_string(a);
    let b_clean = sanitize_string(b);

    if a_clean.is_empty() || b_clean.is_empty() {
        return 0.0;
    }

    strsim::normalized_levenshtein(&a_clean, &b_clean)
}

/// 身份键使用的归一化：去首尾空白并转小写
pub fn normalize_key(input: &str) -> String {
    input.trim().to_lowercase()
}

/// 将艺术家描述拆分为列表
///
/// YesPlayMusic 使用 `,` 分隔，Apple Music 使用 `&` 分隔。
pub fn split_artists(desc: &str) -> Vec<String> {
    let separator = if desc.contains(',') {
        ','
    } else if desc.contains('&') {
        '&'
    } else {
        let single = desc.trim();
        return if single.is_empty() {
            Vec::new()
        } else {
            vec![single.to_string()]
        };
    };

    desc.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// 解析 Apple Music 的 "艺术家 — 专辑( - Single)" 组合字段
///
/// 返回 (艺术家列表, 推断出的专辑)。只有在播放器没有提供专辑时才使用推断结果；
/// 单曲（带 " - " 后缀）以及与标题相同的专辑名会被丢弃。
pub fn parse_combined_artist(
    artist: &str,
    album: Option<&str>,
    title: Option<&str>,
) -> (Vec<String>, Option<String>) {
    let provided_album = album
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string);

    let Some((artists_part, album_part)) = artist.split_once(" — ") else {
        return (split_artists(artist), provided_album);
    };

    let artists = split_artists(artists_part);
    if provided_album.is_some() {
        return (artists, provided_album);
    }

    let candidate = album_part.trim();
    if candidate.contains(" - ") {
        return (artists, None);
    }

    let same_as_title = title.is_some_and(|t| t.trim().eq_ignore_ascii_case(candidate));
    if candidate.is_empty() || same_as_title {
        (artists, None)
    } else {
        (artists, Some(candidate.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_similarity() {
        // 完全一致的字符串
        assert_eq!(string_similarity("hello world", "hello world"), 1.0);

        // 完全不一致的字符串
        assert!(string_similarity("hello", "world") < 0.5);

        // 部分一致的字符串
        assert!(string_similarity("hello world", "hello") > 0.4);

        // 特殊字符被忽略
        assert_eq!(string_similarity("hello world!", "hello world"), 1.0);

        // 大小写不敏感
        assert_eq!(string_similarity("Hello World", "hello world"), 1.0);

        assert_eq!(string_similarity("", "hello"), 0.0);
    }

    #[test]
    fn test_sanitize_string() {
        assert_eq!(sanitize_string("Hello, World!"), "hello world");
        assert_eq!(sanitize_string("  Test-123  "), "test123");
        assert_eq!(sanitize_string(""), "");
    }

    #[test]
    fn test_split_artists() {
        assert_eq!(split_artists("A, B,C"), vec!["A", "B", "C"]);
        assert_eq!(split_artists("Simon & Garfunkel"), vec!["Simon", "Garfunkel"]);
        assert_eq!(split_artists(" 周杰伦 "), vec!["周杰伦"]);
        assert!(split_artists("   ").is_empty());
    }

    #[test]
    fn test_parse_combined_artist() {
        let (artists, album) =
            parse_combined_artist("Taylor Swift & Ed Sheeran — Red", None, Some("Everything Has Changed"));
        assert_eq!(artists, vec!["Taylor Swift", "Ed Sheeran"]);
        assert_eq!(album.as_deref(), Some("Red"));

        // 单曲
        let (_, album) = parse_combined_artist("Artist — Song - Single", None, Some("Song"));
        assert_eq!(album, None);

        // 专辑与标题相同
        let (_, album) = parse_combined_artist("Artist — Song", Some(""), Some("song"));
        assert_eq!(album, None);

        // 播放器提供的专辑优先
        let (_, album) = parse_combined_artist("Artist — Guess", Some("Real"), None);
        assert_eq!(album.as_deref(), Some("Real"));

        let (artists, album) = parse_combined_artist("Plain Artist", None, None);
        assert_eq!(artists, vec!["Plain Artist"]);
        assert_eq!(album, None);
    }
}
