use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::lyrics::{LyricsLine, LyricsToken};
use crate::utils::lrc::decode_entities;

fn line_regex() -> &'static Regex {
    // [开始毫秒,持续毫秒]
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[(\d+),(\d+)](.*)$").expect("valid regex"))
}

fn token_regex() -> &'static Regex {
    // (开始毫秒,持续毫秒,0)文本
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((\d+),(\d+),\d+\)([^(]*)").expect("valid regex"))
}

/// 逐字歌词（网易云 YRC）解析器
///
/// 行格式：`[12340,3200](12340,400,0)逐(12740,300,0)字`
pub struct YrcParser;

impl YrcParser {
    pub fn parse(content: &str) -> Vec<LyricsLine> {
        let mut lines = Vec::new();

        for raw in content.lines() {
            let raw = raw.trim();
            // JSON 格式的元数据行直接跳过
            let Some(cap) = line_regex().captures(raw) else {
                continue;
            };

            let start = cap[1].parse::<u64>().unwrap_or(0);
            let body = &cap[3];

            let tokens: Vec<LyricsToken> = token_regex()
                .captures_iter(body)
                .filter_map(|t| {
                    let text = decode_entities(&t[3]);
                    if text.is_empty() {
                        return None;
                    }
                    Some(LyricsToken {
                        start_time: Duration::from_millis(t[1].parse().unwrap_or(0)),
                        duration: Duration::from_millis(t[2].parse().unwrap_or(0)),
                        text,
                    })
                })
                .collect();

            let text: String = tokens.iter().map(|t| t.text.as_str()).collect();
            if text.trim().is_empty() {
                continue;
            }

            lines.push(LyricsLine {
                timestamp: Duration::from_millis(start),
                text: text.trim().to_string(),
                tokens: Some(tokens),
            });
        }

        lines.sort_by_key(|l| l.timestamp);
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yrc_line() {
        let content = r#"{"t":0,"c":[{"tx":"作词: "}]}
[1000,1500](1000,500,0)Hel(1500,500,0)lo (2000,500,0)world
[3000,800](3000,800,0)&amp;"#;
        let lines = YrcParser::parse(content);
        assert_eq!(lines.len(), 2);

        assert_eq!(lines[0].timestamp, Duration::from_millis(1000));
        assert_eq!(lines[0].text, "Hello world");
        let tokens = lines[0].tokens.as_ref().unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[1].start_time, Duration::from_millis(1500));
        assert_eq!(tokens[1].duration, Duration::from_millis(500));
        assert_eq!(tokens[1].text, "lo ");

        assert_eq!(lines[1].text, "&");
    }

    #[test]
    fn test_skips_lines_without_tokens() {
        let lines = YrcParser::parse("[1000,1500]\n[2000,100](2000,100,0)   ");
        assert!(lines.is_empty());
    }
}
