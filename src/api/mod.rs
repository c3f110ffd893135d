//! 本地播放器的 HTTP 接口客户端

pub mod cider;
pub mod yesplaymusic;

use std::time::Duration;

/// 访问本机服务用的短超时客户端，超时即视为服务未运行
pub(crate) fn local_client(timeout_ms: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .no_proxy()
        .build()
        .unwrap_or_default()
}
