use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use openssl::rsa::{Padding, Rsa};
use openssl::symm::{encrypt, Cipher};
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::lyrics::providers::{rank_candidates, Candidate};
use crate::lyrics::{LyricsProvider, RawLyrics, SearchHit, TrackQuery};

const REQWEST_TIMEOUT: u64 = 10;
const SEARCH_URL: &str = "https://music.163.com/weapi/cloudsearch/pc";
const LYRIC_URL: &str = "https://music.163.com/weapi/song/lyric";
const BASE62_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const WEAPI_PRESET_KEY: &[u8] = b"0CoJUm6Qyw8W8jud";
const WEAPI_IV: &[u8] = b"0102030405060708";
const WEAPI_PUBKEY: &[u8] = b"-----BEGIN PUBLIC KEY-----\nMIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQDgtQn2JZ34ZC28NWYpAUd98iZ37BUrX/aKzmFbt7clFSs6sXqHauqKWqdtLkF2KexO40H1YTX8z2lSgBBOAxLsvaklV8k4cBFK9snQXE9/DDaFt6Rr7iVZMldczhC0JNgTz+SHXT6CBHuX3e9SdB1Ua44oncaTWz7OBGLbCiK45wIDAQAB\n-----END PUBLIC KEY-----";
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 11_1_0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/88.0.4324.87 Safari/537.36";

// 16 位 base62 随机密钥
fn random_secret() -> [u8; 16] {
    let mut rng = rand::rng();
    std::array::from_fn(|_| BASE62_CHARSET[rng.random_range(0..BASE62_CHARSET.len())])
}

fn aes_128_cbc_b64(data: &[u8], key: &[u8], iv: &[u8]) -> Result<String> {
    let encrypted = encrypt(Cipher::aes_128_cbc(), key, Some(iv), data)?;
    Ok(general_purpose::STANDARD.encode(encrypted))
}

/// 无填充 RSA，输入左侧补零到 128 字节
fn rsa_encrypt_secret(secret: &[u8]) -> Result<[u8; 128]> {
    let rsa = Rsa::public_key_from_pem(WEAPI_PUBKEY)?;
    let mut padded = vec![0u8; 128 - secret.len()];
    padded.extend_from_slice(secret);

    let mut out = [0u8; 128];
    rsa.public_encrypt(&padded, &mut out, Padding::NONE)?;
    Ok(out)
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WeApiForm {
    params: String,
    enc_sec_key: String,
}

fn weapi_encrypt(data: &Value) -> Result<WeApiForm> {
    let mut secret = random_secret();
    let payload = data.to_string();

    let params = aes_128_cbc_b64(
        aes_128_cbc_b64(payload.as_bytes(), WEAPI_PRESET_KEY, WEAPI_IV)?.as_bytes(),
        &secret,
        WEAPI_IV,
    )?;

    secret.reverse();
    let enc_sec_key = hex::encode(rsa_encrypt_secret(&secret)?);

    Ok(WeApiForm {
        params,
        enc_sec_key,
    })
}

/// 网易云音乐歌词提供者，开启逐字模式时优先使用 YRC 歌词
pub struct NeteaseProvider {
    client: reqwest::Client,
}

impl NeteaseProvider {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQWEST_TIMEOUT))
            .build()
            .unwrap_or_default();

        Self { client }
    }

    async fn post_weapi(&self, url: &str, data: Value) -> Result<Value> {
        let form = weapi_encrypt(&data)?;

        let resp = self
            .client
            .post(url)
            .header("Referer", "https://music.163.com/")
            .header("User-Agent", USER_AGENT)
            .form(&form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            error!("网易云音乐请求失败: {} HTTP {}", url, status);
            return Err(anyhow!("网易云音乐请求失败: HTTP {}", status));
        }

        Ok(resp.json().await?)
    }
}

impl Default for NeteaseProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// 搜索结果 `/result/songs` 中的歌曲
fn parse_candidates(data: &Value) -> Vec<Candidate> {
    let Some(songs) = data.pointer("/result/songs").and_then(Value::as_array) else {
        // 没有结果时网易云直接省略 songs 字段
        return Vec::new();
    };

    songs
        .iter()
        .map(|song| Candidate {
            id: song["id"].as_u64().map(|id| id.to_string()).unwrap_or_default(),
            title: song["name"].as_str().unwrap_or_default().to_string(),
            artists: song["ar"]
                .as_array()
                .map(|ar| {
                    ar.iter()
                        .filter_map(|a| a["name"].as_str())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            album: song
                .pointer("/al/name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            duration_ms: song["dt"].as_u64().unwrap_or(0),
        })
        .collect()
}

/// 从歌词接口响应中挑选歌词，逐字歌词优先
fn pick_lyrics(data: &Value, karaoke: bool) -> Option<RawLyrics> {
    let non_empty = |pointer: &str| {
        data.pointer(pointer)
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
            .map(str::to_string)
    };

    if karaoke {
        if let Some(yrc) = non_empty("/yrc/lyric") {
            return Some(RawLyrics::Syllable(yrc));
        }
        debug!("网易云音乐没有逐字歌词，使用普通歌词");
    }

    non_empty("/lrc/lyric").map(RawLyrics::Lrc)
}

#[async_trait]
impl LyricsProvider for NeteaseProvider {
    fn name(&self) -> &str {
        "netease"
    }

    async fn search(&self, query: &TrackQuery) -> Result<Option<SearchHit>> {
        if query.title.trim().is_empty() {
            return Ok(None);
        }

        let keyword = query.keyword();
        debug!("网易云音乐搜索关键词: '{}'", keyword);

        let data = self
            .post_weapi(
                SEARCH_URL,
                json!({
                    "s": keyword,
                    "type": 1,
                    "offset": 0,
                    "total": true,
                    "limit": 20
                }),
            )
            .await?;

        Ok(rank_candidates(self.name(), query, &parse_candidates(&data)))
    }

    async fn fetch(&self, hit: &SearchHit, karaoke: bool) -> Result<Option<RawLyrics>> {
        debug!("获取网易云音乐歌词, ID: {}", hit.id);

        let mut request = json!({
            "id": hit.id,
            "lv": -1,
            "kv": -1,
            "tv": -1,
            "os": "osx",
        });
        if karaoke {
            request["yv"] = json!(-1);
        }

        let data = self.post_weapi(LYRIC_URL, request).await?;
        Ok(pick_lyrics(&data, karaoke))
    }
}
