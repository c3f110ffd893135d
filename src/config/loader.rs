use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::backend::predictor::PredictorConfig;
use crate::player::MediaTypeThresholds;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// 启用的歌词源列表，顺序即回退顺序
    pub lyrics_sources: Vec<String>,

    /// 系统级播放源（SMTC / MPRIS）忽略的应用，它们有自己的专用后端
    pub excluded_apps: Vec<String>,

    /// 播放器黑名单（基于关键字）
    pub player_blacklist: HashSet<String>,

    /// 歌词显示设置
    pub display: DisplayConfig,

    /// 轮询与位置预测的时间参数
    pub timing: TimingConfig,

    /// 播放源与歌词源开关
    pub sources: SourcesConfig,

    /// 本地播放器 API 地址
    pub endpoints: EndpointsConfig,

    /// 控制服务器
    pub server: ServerConfig,

    /// 媒体类型猜测阈值
    pub media_type: MediaTypeThresholds,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    /// 多行模式显示的歌词行数
    pub window_lines: usize,

    /// 歌词时间偏移（毫秒），正数表示提前显示
    pub lyric_offset_ms: i64,

    /// 渲染循环间隔（毫秒）
    pub render_interval_ms: u64,

    /// 是否启用逐字歌词
    pub karaoke: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TimingConfig {
    /// 各播放源的轮询间隔（毫秒）
    pub poll_interval_ms: u64,

    /// 重新选择活跃后端的间隔（毫秒）
    pub arbiter_interval_ms: u64,

    /// 观测位置偏离预测超过该值视为跳转（毫秒）
    pub seek_threshold_ms: u64,

    /// 外部位置覆盖的最小偏差（毫秒）
    pub override_threshold_ms: u64,

    /// 预测位置与上次发布位置之差在该范围内才发布（毫秒）
    pub tick_envelope_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SourcesConfig {
    /// 是否启用 Cider 后端
    pub cider: bool,

    /// 是否使用 YesPlayMusic 的位置与歌词
    pub yesplaymusic: bool,

    /// 本地歌词文件配置
    pub local: Option<LocalConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LocalConfig {
    /// 本地歌词目录路径
    pub lyrics_path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EndpointsConfig {
    pub cider_base_url: String,
    pub cider_timeout_ms: u64,
    pub yesplaymusic_player_url: String,
    pub yesplaymusic_lyric_url: String,
    pub yesplaymusic_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP 控制端口
    pub control_enabled: bool,
    pub control_port: u16,

    /// HTTP 接口（server 模式下总是启动）
    pub web_enabled: bool,
    pub web_host: String,
    pub web_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            lyrics_sources: vec![
                "qqmusic".to_string(),
                "netease".to_string(),
                "local".to_string(),
            ],
            excluded_apps: vec!["Cider".to_string()],
            player_blacklist: ["firefox", "mozilla", "chromium", "chrome", "kdeconnect"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            display: DisplayConfig::default(),
            timing: TimingConfig::default(),
            sources: SourcesConfig::default(),
            endpoints: EndpointsConfig::default(),
            server: ServerConfig::default(),
            media_type: MediaTypeThresholds::default(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            window_lines: 6,
            lyric_offset_ms: 0,
            render_interval_ms: 50,
            karaoke: false,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            arbiter_interval_ms: 1000,
            seek_threshold_ms: 500,
            override_threshold_ms: 1500,
            tick_envelope_ms: 500,
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        let default_lyrics_path = Config::config_dir()
            .map(|p| p.join("lyrics"))
            .unwrap_or_else(|| PathBuf::from("lyrics"));

        Self {
            cider: true,
            yesplaymusic: true,
            local: Some(LocalConfig {
                lyrics_path: default_lyrics_path.to_string_lossy().to_string(),
            }),
        }
    }
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            cider_base_url: "http://localhost:10767/api/v1/playback".to_string(),
            cider_timeout_ms: 200,
            yesplaymusic_player_url: "http://127.0.0.1:27232/player".to_string(),
            yesplaymusic_lyric_url: "http://127.0.0.1:10754/lyric".to_string(),
            yesplaymusic_timeout_ms: 500,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            control_enabled: true,
            control_port: 32651,
            web_enabled: false,
            web_host: "0.0.0.0".to_string(),
            web_port: 27270,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn arbiter_interval(&self) -> Duration {
        Duration::from_millis(self.arbiter_interval_ms.max(10))
    }

    pub fn predictor(&self) -> PredictorConfig {
        PredictorConfig {
            seek_threshold: Duration::from_millis(self.seek_threshold_ms),
            override_threshold: Duration::from_millis(self.override_threshold_ms),
            tick_envelope: Duration::from_millis(self.tick_envelope_ms),
        }
    }
}

impl Config {
    /// `<配置目录>/omni-lyrics-rs`
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(env!("CARGO_PKG_NAME")))
    }

    /// 默认配置文件路径
    pub fn default_path() -> PathBuf {
        Self::config_dir()
            .map(|p| p.join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(format!("{}-config.toml", env!("CARGO_PKG_NAME"))))
    }

    /// 加载配置，支持从指定路径或默认路径加载
    ///
    /// 文件不存在时写入默认配置；解析失败时记录错误并使用默认配置。
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = path.unwrap_or_else(Self::default_path);
        debug!("尝试从 {:?} 加载配置文件", config_path);

        if !config_path.exists() {
            debug!("配置文件 {:?} 不存在，将创建默认配置", config_path);
            let default_config = Config::default();
            default_config.save(&config_path)?;
            info!("已创建默认配置文件: {:?}", config_path);
            return Ok(default_config);
        }

        let content = fs::read_to_string(&config_path)?;
        Ok(Self::parse(&content).unwrap_or_else(|e| {
            error!("解析配置文件 {:?} 失败: {}", config_path, e);
            warn!("由于解析错误，将加载默认配置");
            Config::default()
        }))
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// 应用是否被播放器黑名单或专用后端排除
    pub fn is_excluded(&self, app: &str) -> bool {
        let lower = app.to_lowercase();
        self.excluded_apps
            .iter()
            .any(|prefix| lower.starts_with(&prefix.to_lowercase()))
            || self
                .player_blacklist
                .iter()
                .any(|keyword| lower.contains(&keyword.to_lowercase()))
    }
}
