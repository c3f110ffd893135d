use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zbus::proxy::CacheProperties;
use zbus::zvariant::{ObjectPath, OwnedValue, Value};
use zbus::Connection;

use crate::api::yesplaymusic::YesPlayMusicApi;
use crate::backend::session::{apply_yesplaymusic_override, is_yesplaymusic, pick_session, SessionInfo};
use crate::backend::{Backend, StateHub, StateReceiver};
use crate::config::Config;
use crate::player::{PlayerState, StateEquality};

const BUS_PREFIX: &str = "org.mpris.MediaPlayer2.";
const NO_TRACK: &str = "/org/mpris/MediaPlayer2/TrackList/NoTrack";

#[zbus::proxy(
    interface = "org.mpris.MediaPlayer2.Player",
    default_path = "/org/mpris/MediaPlayer2"
)]
trait Player {
    fn play(&self) -> zbus::Result<()>;
    fn pause(&self) -> zbus::Result<()>;
    fn play_pause(&self) -> zbus::Result<()>;
    fn next(&self) -> zbus::Result<()>;
    fn previous(&self) -> zbus::Result<()>;
    fn set_position(&self, track_id: &ObjectPath<'_>, position: i64) -> zbus::Result<()>;

    #[zbus(property)]
    fn playback_status(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn metadata(&self) -> zbus::Result<HashMap<String, OwnedValue>>;

    #[zbus(property)]
    fn position(&self) -> zbus::Result<i64>;
}

/// 从 `Metadata` 属性解析出的曲目信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TrackMetadata {
    track_id: Option<String>,
    title: Option<String>,
    artists: Vec<String>,
    album: Option<String>,
    length: Duration,
    art_url: Option<String>,
}

fn value_str(value: &Value<'_>) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.to_string()),
        Value::ObjectPath(p) => Some(p.to_string()),
        Value::Value(inner) => value_str(inner),
        _ => None,
    }
}

fn value_strings(value: &Value<'_>) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(value_str).collect(),
        Value::Value(inner) => value_strings(inner),
        other => value_str(other).into_iter().collect(),
    }
}

fn value_i64(value: &Value<'_>) -> Option<i64> {
    match value {
        Value::I64(v) => Some(*v),
        Value::U64(v) => i64::try_from(*v).ok(),
        Value::I32(v) => Some(i64::from(*v)),
        Value::U32(v) => Some(i64::from(*v)),
        Value::F64(v) => Some(*v as i64),
        Value::Value(inner) => value_i64(inner),
        _ => None,
    }
}

fn micros(value: i64) -> Duration {
    Duration::from_micros(value.max(0) as u64)
}

fn parse_metadata(metadata: &HashMap<String, OwnedValue>) -> TrackMetadata {
    let get = |key: &str| metadata.get(key).map(|v| &**v);
    let non_empty = |s: String| (!s.trim().is_empty()).then_some(s);

    TrackMetadata {
        track_id: get("mpris:trackid").and_then(value_str),
        title: get("xesam:title").and_then(value_str).and_then(non_empty),
        artists: get("xesam:artist")
            .map(value_strings)
            .unwrap_or_default()
            .into_iter()
            .filter(|a| !a.trim().is_empty())
            .collect(),
        album: get("xesam:album").and_then(value_str).and_then(non_empty),
        length: get("mpris:length").and_then(value_i64).map(micros).unwrap_or_default(),
        art_url: get("mpris:artUrl").and_then(value_str).and_then(non_empty),
    }
}

/// 用于黑名单与排除判断的播放器名称（去掉总线前缀）
fn short_name(bus_name: &str) -> &str {
    bus_name.strip_prefix(BUS_PREFIX).unwrap_or(bus_name)
}

fn into_state(bus_name: &str, meta: &TrackMetadata, position: Duration, playing: bool) -> PlayerState {
    let mut state = PlayerState {
        title: meta.title.clone(),
        artists: meta.artists.clone(),
        album: meta.album.clone(),
        position,
        duration: meta.length,
        playing,
        source_app: Some(bus_name.to_string()),
        artwork_url: meta.art_url.clone(),
        ..Default::default()
    };
    state.clamp_position();
    state
}

#[derive(Debug, Clone)]
struct ActivePlayer {
    bus_name: String,
    track_id: Option<String>,
}

struct MprisShared {
    config: Config,
    hub: StateHub,
    connection: Mutex<Option<Connection>>,
    active: Mutex<Option<ActivePlayer>>,
    yesplaymusic: Option<YesPlayMusicApi>,
}

impl MprisShared {
    fn active(&self) -> Option<ActivePlayer> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_active(&self, player: Option<ActivePlayer>) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let old = active.as_ref().map(|p| p.bus_name.clone());
        let new = player.as_ref().map(|p| p.bus_name.clone());
        if old != new {
            match &new {
                Some(name) => info!("MPRIS 活跃播放器: {}", name),
                None => debug!("没有可用的 MPRIS 播放器"),
            }
        }
        *active = player;
    }

    fn connection(&self) -> Option<Connection> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn proxy(conn: &Connection, bus_name: &str) -> Result<PlayerProxy<'static>> {
        let proxy = PlayerProxy::builder(conn)
            .destination(bus_name.to_string())?
            .cache_properties(CacheProperties::No)
            .build()
            .await?;
        Ok(proxy)
    }

    async fn list_players(conn: &Connection) -> Result<Vec<String>> {
        let dbus = zbus::fdo::DBusProxy::new(conn).await?;
        let names = dbus.list_names().await?;
        Ok(names
            .into_iter()
            .map(|n| n.to_string())
            .filter(|n| n.starts_with(BUS_PREFIX))
            .collect())
    }

    async fn poll_once(&self, conn: &Connection) -> Result<()> {
        let mut sessions = Vec::new();
        for bus_name in Self::list_players(conn).await? {
            let Ok(proxy) = Self::proxy(conn, &bus_name).await else {
                continue;
            };
            // 没有 PlaybackStatus 的播放器视为不可用
            let Ok(status) = proxy.playback_status().await else {
                continue;
            };
            sessions.push(SessionInfo {
                app: bus_name,
                playing: status == "Playing",
            });
        }

        let current = self.active().map(|p| p.bus_name);
        let chosen = pick_session(&sessions, current.as_deref(), |app| {
            self.config.is_excluded(short_name(app))
        });

        let Some(session) = chosen.map(|i| &sessions[i]) else {
            self.set_active(None);
            self.hub.clear();
            return Ok(());
        };

        let proxy = Self::proxy(conn, &session.app).await?;
        let meta = parse_metadata(&proxy.metadata().await?);
        let position = proxy.position().await.map(micros).unwrap_or_default();

        self.set_active(Some(ActivePlayer {
            bus_name: session.app.clone(),
            track_id: meta.track_id.clone(),
        }));

        let mut state = into_state(&session.app, &meta, position, session.playing);
        if is_yesplaymusic(&session.app) {
            if let Some(ypm) = self.yesplaymusic.as_ref() {
                if let Some(ypm_state) = ypm.state().await {
                    state = apply_yesplaymusic_override(state, &ypm_state);
                }
            }
        }

        let previous = self.hub.current().map(|s| s.position);
        let playing = state.playing;
        let position = state.position;
        if !self.hub.publish(state.clone()) && playing && previous != Some(position) {
            // 元数据没变，但播放中的位置前进了
            self.hub.forward(Some(state));
        }
        Ok(())
    }

    async fn with_player<F, Fut>(&self, action: &str, f: F)
    where
        F: FnOnce(PlayerProxy<'static>, ActivePlayer) -> Fut,
        Fut: std::future::Future<Output = zbus::Result<()>>,
    {
        let (Some(conn), Some(active)) = (self.connection(), self.active()) else {
            return;
        };
        let result = match Self::proxy(&conn, &active.bus_name).await {
            Ok(proxy) => f(proxy, active.clone()).await.map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("MPRIS {} 失败 ({}): {}", action, active.bus_name, e);
        }
    }
}

/// Linux 播放源：通过 D-Bus 上的 MPRIS 接口跟随一个播放器
pub struct MprisBackend {
    shared: Arc<MprisShared>,
    poll_interval: Duration,
    started: AtomicBool,
}

impl MprisBackend {
    pub fn new(config: &Config) -> Self {
        let yesplaymusic = config
            .sources
            .yesplaymusic
            .then(|| YesPlayMusicApi::new(&config.endpoints));
        Self {
            shared: Arc::new(MprisShared {
                config: config.clone(),
                hub: StateHub::new(StateEquality::Metadata),
                connection: Mutex::new(None),
                active: Mutex::new(None),
                yesplaymusic,
            }),
            poll_interval: config.timing.poll_interval(),
            started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Backend for MprisBackend {
    fn name(&self) -> &str {
        "MPRIS"
    }

    async fn start(&self, token: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let conn = match Connection::session().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("无法连接到 D-Bus 会话总线: {}", e);
                return;
            }
        };
        *self
            .shared
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(conn.clone());

        let shared = Arc::clone(&self.shared);
        let poll_interval = self.poll_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = shared.poll_once(&conn).await {
                            debug!("MPRIS 轮询失败: {}", e);
                            shared.set_active(None);
                            shared.hub.clear();
                        }
                    }
                }
            }
            debug!("MPRIS 轮询结束");
        });
    }

    fn current_state(&self) -> Option<PlayerState> {
        self.shared.hub.current()
    }

    fn subscribe(&self) -> StateReceiver {
        self.shared.hub.subscribe()
    }

    async fn play(&self) {
        self.shared
            .with_player("播放", |p, _| async move { p.play().await })
            .await;
    }

    async fn pause(&self) {
        self.shared
            .with_player("暂停", |p, _| async move { p.pause().await })
            .await;
    }

    async fn toggle(&self) {
        self.shared
            .with_player("切换播放状态", |p, _| async move { p.play_pause().await })
            .await;
    }

    async fn next(&self) {
        self.shared
            .with_player("下一首", |p, _| async move { p.next().await })
            .await;
    }

    async fn previous(&self) {
        self.shared
            .with_player("上一首", |p, _| async move { p.previous().await })
            .await;
    }

    async fn seek(&self, position: Duration) {
        let micros = i64::try_from(position.as_micros()).unwrap_or(i64::MAX);
        self.shared
            .with_player("跳转", move |p, active| async move {
                let track_id = active.track_id.as_deref().unwrap_or(NO_TRACK);
                let path = ObjectPath::try_from(track_id)?;
                p.set_position(&path, micros).await
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(value: Value<'_>) -> OwnedValue {
        value.try_into().unwrap()
    }

    fn metadata() -> HashMap<String, OwnedValue> {
        let mut map = HashMap::new();
        map.insert(
            "mpris:trackid".to_string(),
            owned(Value::from(ObjectPath::try_from("/org/mpris/MediaPlayer2/Track/7").unwrap())),
        );
        map.insert("xesam:title".to_string(), owned(Value::from("晴天")));
        map.insert(
            "xesam:artist".to_string(),
            owned(Value::from(vec!["周杰伦", ""])),
        );
        map.insert("xesam:album".to_string(), owned(Value::from("叶惠美")));
        map.insert("mpris:length".to_string(), owned(Value::from(269_000_000i64)));
        map.insert(
            "mpris:artUrl".to_string(),
            owned(Value::from("file:///tmp/cover.jpg")),
        );
        map
    }

    #[test]
    fn test_parse_metadata() {
        let meta = parse_metadata(&metadata());
        assert_eq!(meta.track_id.as_deref(), Some("/org/mpris/MediaPlayer2/Track/7"));
        assert_eq!(meta.title.as_deref(), Some("晴天"));
        assert_eq!(meta.artists, vec!["周杰伦"]);
        assert_eq!(meta.album.as_deref(), Some("叶惠美"));
        assert_eq!(meta.length, Duration::from_secs(269));
        assert_eq!(meta.art_url.as_deref(), Some("file:///tmp/cover.jpg"));
    }

    #[test]
    fn test_parse_metadata_tolerates_odd_types() {
        let mut map = HashMap::new();
        // 有的播放器把艺术家写成单个字符串，把时长写成 u64
        map.insert("xesam:artist".to_string(), owned(Value::from("Solo")));
        map.insert("mpris:length".to_string(), owned(Value::from(5_000_000u64)));
        map.insert("xesam:title".to_string(), owned(Value::from("  ")));

        let meta = parse_metadata(&map);
        assert_eq!(meta.artists, vec!["Solo"]);
        assert_eq!(meta.length, Duration::from_secs(5));
        assert!(meta.title.is_none());
        assert!(meta.track_id.is_none());
    }

    #[test]
    fn test_into_state_uses_bus_name_as_source() {
        let meta = parse_metadata(&metadata());
        let bus = "org.mpris.MediaPlayer2.spotify";
        let state = into_state(bus, &meta, Duration::from_secs(999), true);

        assert_eq!(state.source_app.as_deref(), Some(bus));
        assert_eq!(state.position, Duration::from_secs(269));
        assert!(state.playing);
        assert_eq!(short_name(bus), "spotify");
        assert_eq!(short_name("other"), "other");
    }

    #[test]
    fn test_blacklisted_players_are_skipped() {
        let config = Config::default();
        let sessions = vec![
            SessionInfo {
                app: "org.mpris.MediaPlayer2.firefox.instance_1_5".to_string(),
                playing: true,
            },
            SessionInfo {
                app: "org.mpris.MediaPlayer2.mpv".to_string(),
                playing: false,
            },
        ];
        let chosen = pick_session(&sessions, None, |app| config.is_excluded(short_name(app)));
        assert_eq!(chosen, Some(1));
    }
}
