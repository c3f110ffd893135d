use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{REFERER, USER_AGENT};
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::lyrics::providers::{rank_candidates, Candidate};
use crate::lyrics::{LyricsProvider, RawLyrics, SearchHit, TrackQuery};

const REQWEST_TIMEOUT: u64 = 10;
const SEARCH_URL: &str = "https://u.y.qq.com/cgi-bin/musicu.fcg";
const LYRIC_URL: &str = "https://i.y.qq.com/lyric/fcgi-bin/fcg_query_lyric_new.fcg";

/// QQ音乐歌词提供者
pub struct QQMusicProvider {
    client: reqwest::Client,
}

impl QQMusicProvider {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQWEST_TIMEOUT))
            .build()
            .unwrap_or_default();

        Self { client }
    }

    async fn search_songs(&self, keyword: &str) -> Result<Value> {
        debug!("QQ音乐搜索关键词: '{}'", keyword);

        let body = json!({
          "comm": {
            "ct": 19,
            "cv": "1845",
            "v": "1003006",
            "os_ver": "12",
            "phonetype": "0",
            "devicelevel": "31",
            "tmeAppID": "qqmusiclight",
            "nettype": "NETWORK_WIFI"
          },
          "req": {
            "module": "music.search.SearchCgiService",
            "method": "DoSearchForQQMusicLite",
            "param": {
              "query": keyword,
              "search_type": 0,
              "num_per_page": 20,
              "page_num": 0,
              "nqc_flag": 0,
              "grp": 0
            }
          }
        });

        let resp = self
            .client
            .post(SEARCH_URL)
            .json(&body)
            .header(
                USER_AGENT,
                "Mozilla/5.0 (compatible; MSIE 9.0; Windows NT 6.1; WOW64; Trident/5.0)",
            )
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            error!("QQ音乐搜索请求失败: HTTP {}", status);
            return Err(anyhow!("QQ音乐搜索请求失败: HTTP {}", status));
        }

        Ok(resp.json().await?)
    }
}

impl Default for QQMusicProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// 搜索结果 `/req/data/body/item_song` 中的歌曲
fn parse_candidates(data: &Value) -> Result<Vec<Candidate>> {
    let songs = data
        .pointer("/req/data/body/item_song")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("QQ音乐搜索结果缺少 item_song"))?;

    Ok(songs
        .iter()
        .map(|song| Candidate {
            id: song["mid"].as_str().unwrap_or_default().to_string(),
            title: song["songname"]
                .as_str()
                .or_else(|| song["name"].as_str())
                .unwrap_or_default()
                .to_string(),
            artists: song["singer"]
                .as_array()
                .map(|singers| {
                    singers
                        .iter()
                        .filter_map(|s| s["name"].as_str())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            album: song["albumname"]
                .as_str()
                .or_else(|| song.pointer("/album/name").and_then(Value::as_str))
                .unwrap_or_default()
                .to_string(),
            duration_ms: song["interval"].as_u64().unwrap_or(0) * 1000,
        })
        .collect())
}

#[async_trait]
impl LyricsProvider for QQMusicProvider {
    fn name(&self) -> &str {
        "qqmusic"
    }

    async fn search(&self, query: &TrackQuery) -> Result<Option<SearchHit>> {
        if query.title.trim().is_empty() {
            return Ok(None);
        }

        let data = self.search_songs(&query.keyword()).await?;
        let candidates = parse_candidates(&data)?;
        Ok(rank_candidates(self.name(), query, &candidates))
    }

    async fn fetch(&self, hit: &SearchHit, _karaoke: bool) -> Result<Option<RawLyrics>> {
        let params = [
            ("songmid", hit.id.as_str()),
            ("g_tk", "5381"),
            ("format", "json"),
            ("inCharset", "utf8"),
            ("outCharset", "utf-8"),
            ("nobase64", "1"),
        ];

        debug!("获取QQ音乐歌词, MID: {}", hit.id);

        let resp = self
            .client
            .get(LYRIC_URL)
            .query(&params)
            .header(REFERER, "https://y.qq.com")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("QQ音乐歌词请求失败: HTTP {}", status));
        }

        let data: Value = resp.json().await?;
        Ok(data["lyric"]
            .as_str()
            .filter(|text| !text.trim().is_empty())
            .map(|text| RawLyrics::Lrc(text.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_candidates() {
        let data = json!({
            "req": {"data": {"body": {"item_song": [
                {
                    "mid": "003OUlho2HcRHC",
                    "songname": "晴天",
                    "singer": [{"name": "周杰伦"}],
                    "albumname": "叶惠美",
                    "interval": 269
                },
                {"mid": "", "name": "fallback", "album": {"name": "专辑"}}
            ]}}}
        });

        let candidates = parse_candidates(&data).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].id, "003OUlho2HcRHC");
        assert_eq!(candidates[0].artists, vec!["周杰伦"]);
        assert_eq!(candidates[0].duration_ms, 269_000);
        assert_eq!(candidates[1].title, "fallback");
        assert_eq!(candidates[1].album, "专辑");
    }

    #[test]
    fn test_parse_candidates_rejects_unexpected_shape() {
        assert!(parse_candidates(&json!({"code": 500})).is_err());
    }
}
