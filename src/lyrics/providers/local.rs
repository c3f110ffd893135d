use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::LocalConfig;
use crate::lyrics::{LyricsProvider, RawLyrics, SearchHit, TrackQuery};
use crate::utils::string_similarity;

/// 文件名模糊匹配的最低相似度
const MIN_FILENAME_SIMILARITY: f64 = 0.6;

/// 本地歌词文件提供者
pub struct LocalProvider {
    lyrics_path: PathBuf,
}

impl LocalProvider {
    pub fn new(config: &LocalConfig) -> Self {
        Self {
            lyrics_path: expand_home(&config.lyrics_path),
        }
    }

    /// 在歌词目录中查找匹配的LRC文件
    fn find_matching_lrc(&self, query: &TrackQuery) -> Result<Option<(PathBuf, f64)>> {
        if !self.lyrics_path.is_dir() {
            warn!("歌词目录不存在或不是目录: {:?}", self.lyrics_path);
            return Ok(None);
        }

        let possible_names = possible_filenames(query);
        debug!("在 {:?} 中查找歌词文件: {:?}", self.lyrics_path, possible_names);

        let mut candidates = Vec::new();
        for entry in fs::read_dir(&self.lyrics_path)? {
            let path = entry?.path();
            if !path.is_file() || !path.extension().is_some_and(|ext| ext == "lrc") {
                continue;
            }

            let Some(filename) = path.file_name().map(|f| f.to_string_lossy().to_lowercase()) else {
                continue;
            };
            if possible_names.iter().any(|name| *name == filename) {
                debug!("找到精确匹配的歌词文件: {:?}", path);
                return Ok(Some((path, 1.0)));
            }
            candidates.push(path);
        }

        let search = query.keyword().to_lowercase();
        let best = candidates
            .into_iter()
            .filter_map(|path| {
                let stem = path.file_stem()?.to_string_lossy().to_lowercase();
                let score = string_similarity(&stem, &search);
                (score > MIN_FILENAME_SIMILARITY).then_some((path, score))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((path, score)) = &best {
            debug!("找到模糊匹配的歌词文件: {:?}, 评分: {:.2}", path, score);
        }
        Ok(best)
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(path),
    }
}

/// 可能的歌词文件名（小写）
fn possible_filenames(query: &TrackQuery) -> Vec<String> {
    let title = &query.title;
    let mut artists = vec![query.primary_artist().to_string()];
    if query.artists.len() > 1 {
        artists.push(query.artists.join(", "));
    }

    let mut names = Vec::new();
    for artist in artists.iter().filter(|a| !a.is_empty()) {
        names.push(format!("{} - {}.lrc", artist, title));
        names.push(format!("{} - {}.lrc", title, artist));
    }
    names.push(format!("{}.lrc", title));

    names.into_iter().map(|n| n.to_lowercase()).collect()
}

#[async_trait]
impl LyricsProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn search(&self, query: &TrackQuery) -> Result<Option<SearchHit>> {
        if query.title.trim().is_empty() {
            return Ok(None);
        }

        Ok(self.find_matching_lrc(query)?.map(|(path, score)| SearchHit {
            id: path.to_string_lossy().into_owned(),
            title: query.title.clone(),
            artist: query.primary_artist().to_string(),
            score,
        }))
    }

    async fn fetch(&self, hit: &SearchHit, _karaoke: bool) -> Result<Option<RawLyrics>> {
        let content = fs::read_to_string(Path::new(&hit.id))?;
        Ok(Some(RawLyrics::Lrc(content)))
    }
}
