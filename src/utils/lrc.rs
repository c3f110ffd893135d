use std::sync::OnceLock;
use std::time::Duration;

use tracing::debug;
use regex::Regex;

use crate::lyrics::LyricsLine;

fn time_regex() -> &'static Regex {
    // 匹配时间标签: [mm:ss.xx] / [mm:ss:xx] / [mm:ss]
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d{1,3}):(\d{1,2})(?:[.:](\d{1,3}))?]").expect("valid regex"))
}

fn meta_regex() -> &'static Regex {
    // 匹配元数据: [ar:艺术家]
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[([a-zA-Z#]+):(.*?)]$").expect("valid regex"))
}

fn entity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"&(?:#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z][a-zA-Z0-9]*);").expect("valid regex")
    })
}

/// 解码歌词文本中的 HTML 实体（如 `&apos;`、`&amp;`）
///
/// 逐个实体解码，无法识别的实体原样保留。
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    entity_regex()
        .replace_all(text, |caps: &regex::Captures| match &caps[0] {
            // HTML4 实体表里没有 &apos;
            "&apos;" => "'".to_string(),
            entity => htmlescape::decode_html(entity).unwrap_or_else(|_| entity.to_string()),
        })
        .into_owned()
}

/// 毫秒字段补齐：1 位是百分之十秒，2 位是百分之一秒
fn fraction_to_millis(fraction: &str) -> u64 {
    let value = fraction.parse::<u64>().unwrap_or(0);
    match fraction.len() {
        1 => value * 100,
        2 => value * 10,
        _ => value,
    }
}

/// LRC歌词解析器，用于解析常见的LRC格式歌词
pub struct LrcParser;

impl LrcParser {
    /// 解析LRC格式的歌词
    ///
    /// 返回按时间升序排列的歌词行与元数据。没有时间标签或文本为空的行被丢弃，
    /// 一行多个时间标签会展开成多行。
    pub fn parse(content: &str) -> (Vec<LyricsLine>, Vec<(String, String)>) {
        let mut lines = Vec::new();
        let mut metadata = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            // 检查是否为元数据
            if let Some(cap) = meta_regex().captures(line) {
                metadata.push((cap[1].to_string(), cap[2].trim().to_string()));
                continue;
            }

            // 时间标签必须连续出现在行首
            let mut timestamps = Vec::new();
            let mut text_start = 0;
            for cap in time_regex().captures_iter(line) {
                let Some(whole) = cap.get(0) else { continue };
                if whole.start() != text_start {
                    break;
                }

                let mins = cap[1].parse::<u64>().unwrap_or(0);
                let secs = cap[2].parse::<u64>().unwrap_or(0);
                let millis = cap.get(3).map_or(0, |m| fraction_to_millis(m.as_str()));
                timestamps.push(Duration::from_millis(mins * 60_000 + secs * 1000 + millis));
                text_start = whole.end();
            }

            if timestamps.is_empty() {
                continue;
            }

            let text = decode_entities(line[text_start..].trim());
            if text.trim().is_empty() {
                debug!("LRC解析: 跳过空行 '{}'", line);
                continue;
            }

            for timestamp in timestamps {
                lines.push(LyricsLine::new(timestamp, text.clone()));
            }
        }

        // 按时间排序（稳定排序，保持同一时间戳的原始顺序）
        lines.sort_by_key(|l| l.timestamp);

        (lines, metadata)
    }
}
