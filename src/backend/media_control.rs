use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::backend::predictor::PositionPredictor;
use crate::backend::{Backend, StateHub, StateReceiver};
use crate::config::Config;
use crate::player::{PlayerState, StateEquality};

const PROGRAM: &str = "media-control";

/// 流进程退出后重启的等待时间，连续失败时加倍
const RESTART_DELAY_MIN: Duration = Duration::from_secs(1);
const RESTART_DELAY_MAX: Duration = Duration::from_secs(30);

/// 流中最近一次的计时基准，缺失的字段沿用它
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct StreamBaseline {
    elapsed_micros: i64,
    timestamp_micros: i64,
    playing: bool,
}

/// 一行 `stream` 输出的处理结果
#[derive(Debug, Clone, PartialEq)]
enum StreamUpdate {
    /// 空 payload：没有正在播放的媒体
    Cleared,
    State(PlayerState),
}

fn now_epoch_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}

fn micros(value: i64) -> Duration {
    Duration::from_micros(value.max(0) as u64)
}

/// 把一行 JSON 合并到上一次的状态上
///
/// `media-control` 只发送变化的字段，缺失的字段沿用之前的值。
/// 无法解析或没有 `payload` 的行返回 `None`。
fn merge_payload(
    line: &str,
    previous: Option<&PlayerState>,
    baseline: &mut StreamBaseline,
    now_micros: i64,
) -> Option<StreamUpdate> {
    let doc: Value = serde_json::from_str(line).ok()?;
    let payload = doc.get("payload")?.as_object()?;

    if payload.is_empty() {
        return Some(StreamUpdate::Cleared);
    }

    let text = |key: &str, fallback: Option<&str>| -> Option<String> {
        let value = match payload.get(key) {
            Some(v) => v.as_str(),
            None => fallback,
        };
        value.filter(|s| !s.is_empty()).map(str::to_string)
    };

    let title = text("title", previous.and_then(|p| p.title.as_deref()));
    let artist = text("artist", previous.and_then(|p| p.primary_artist()));
    let album = text("album", previous.and_then(|p| p.album.as_deref()));
    let source_app = text("bundleIdentifier", previous.and_then(|p| p.source_app.as_deref()));

    let duration = payload
        .get("durationMicros")
        .and_then(Value::as_i64)
        .map(micros)
        .or_else(|| previous.map(|p| p.duration))
        .unwrap_or_default();

    if let Some(elapsed) = payload.get("elapsedTimeMicros").and_then(Value::as_i64) {
        baseline.elapsed_micros = elapsed;
    }
    if let Some(timestamp) = payload.get("timestampEpochMicros").and_then(Value::as_i64) {
        baseline.timestamp_micros = timestamp;
    }
    if let Some(playing) = payload.get("playing").and_then(Value::as_bool) {
        baseline.playing = playing;
    }

    // 报告的位置是 timestamp 时刻的位置，播放中需要补上到现在经过的时间
    let position_micros = if baseline.playing {
        baseline
            .elapsed_micros
            .saturating_add(now_micros.saturating_sub(baseline.timestamp_micros).max(0))
    } else {
        baseline.elapsed_micros
    };

    let mut state = PlayerState {
        title,
        artists: artist.into_iter().collect(),
        album,
        position: micros(position_micros),
        duration,
        playing: baseline.playing,
        source_app,
        ..Default::default()
    };
    state.clamp_position();
    Some(StreamUpdate::State(state))
}

struct StreamShared {
    hub: StateHub,
    predictor: Mutex<PositionPredictor>,
}

impl StreamShared {
    fn handle_line(&self, line: &str, baseline: &mut StreamBaseline) {
        let previous = self.hub.current();
        match merge_payload(line, previous.as_ref(), baseline, now_epoch_micros()) {
            Some(StreamUpdate::Cleared) => {
                self.predictor
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .reset();
                self.hub.clear();
            }
            Some(StreamUpdate::State(state)) => {
                self.predictor
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .resync(state.position, state.playing, Instant::now());
                self.hub.publish(state);
            }
            None => trace!("忽略无法解析的 media-control 输出: {}", line),
        }
    }

    /// 在两次流更新之间推进播放位置
    fn tick(&self, now: Instant) {
        let Some(state) = self.hub.current().filter(|s| s.playing) else {
            return;
        };
        let predicted = self
            .predictor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tick(state.position, now, state.duration);
        if let Some(position) = predicted {
            self.hub.publish_position(position);
        }
    }

    /// 流中断：清空状态，等重启后重新建立基准
    fn reset(&self) {
        self.predictor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        self.hub.clear();
    }

    /// 读取一个流直到结束或取消，返回处理过的行数
    async fn read_stream<R>(&self, reader: R, token: &CancellationToken) -> usize
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut baseline = StreamBaseline::default();
        let mut handled = 0;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => {
                        self.handle_line(&line, &mut baseline);
                        handled += 1;
                    }
                    Ok(None) => {
                        warn!("{} 输出已结束", PROGRAM);
                        break;
                    }
                    Err(e) => {
                        warn!("读取 {} 输出失败: {}", PROGRAM, e);
                        break;
                    }
                },
            }
        }
        handled
    }
}

fn open_stream() -> io::Result<(Option<Child>, BufReader<ChildStdout>)> {
    let mut child = Command::new(PROGRAM)
        .args(["stream", "--micros"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("没有标准输出"))?;
    Ok((Some(child), BufReader::new(stdout)))
}

/// 保持流进程运行：进程不存在或退出后清空状态，等待一段时间再重启
async fn supervise<F, R>(shared: Arc<StreamShared>, token: CancellationToken, mut open: F)
where
    F: FnMut() -> io::Result<(Option<Child>, R)>,
    R: AsyncBufRead + Unpin,
{
    let mut delay = RESTART_DELAY_MIN;
    loop {
        match open() {
            Ok((child, reader)) => {
                if shared.read_stream(reader, &token).await > 0 {
                    delay = RESTART_DELAY_MIN;
                }
                // kill_on_drop 结束子进程
                drop(child);
            }
            Err(e) => warn!("无法启动 {}: {}", PROGRAM, e),
        }
        shared.reset();

        debug!("{:?} 后重新启动 {}", delay, PROGRAM);
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(RESTART_DELAY_MAX);
    }
    debug!("media-control 流结束");
}

/// macOS 播放源：读取 `media-control stream --micros` 的输出
pub struct MediaControlBackend {
    shared: Arc<StreamShared>,
    tick_interval: Duration,
    started: AtomicBool,
}

impl MediaControlBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            shared: Arc::new(StreamShared {
                hub: StateHub::new(StateEquality::Timeline),
                predictor: Mutex::new(PositionPredictor::new(config.timing.predictor())),
            }),
            tick_interval: config.timing.poll_interval(),
            started: AtomicBool::new(false),
        }
    }

    async fn run(&self, args: &[&str]) {
        match Command::new(PROGRAM)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) if status.success() => {}
            Ok(status) => warn!("{} {} 退出: {}", PROGRAM, args.join(" "), status),
            Err(e) => warn!("无法执行 {}: {}", PROGRAM, e),
        }
    }
}

#[async_trait]
impl Backend for MediaControlBackend {
    fn name(&self) -> &str {
        "media-control"
    }

    async fn start(&self, token: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        tokio::spawn(supervise(Arc::clone(&self.shared), token.clone(), open_stream));

        let shared = Arc::clone(&self.shared);
        let tick_interval = self.tick_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => shared.tick(Instant::now()),
                }
            }
        });
    }

    fn current_state(&self) -> Option<PlayerState> {
        self.shared.hub.current()
    }

    fn subscribe(&self) -> StateReceiver {
        self.shared.hub.subscribe()
    }

    async fn play(&self) {
        self.run(&["play"]).await;
    }

    async fn pause(&self) {
        self.run(&["pause"]).await;
    }

    async fn toggle(&self) {
        self.run(&["toggle-play-pause"]).await;
    }

    async fn next(&self) {
        self.run(&["next-track"]).await;
    }

    async fn previous(&self) {
        self.run(&["previous-track"]).await;
    }

    async fn seek(&self, position: Duration) {
        let secs = position.as_secs_f64().to_string();
        self.run(&["seek", &secs]).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_010_000_000;

    fn state_of(update: Option<StreamUpdate>) -> PlayerState {
        match update {
            Some(StreamUpdate::State(state)) => state,
            other => panic!("unexpected update: {:?}", other),
        }
    }

    #[test]
    fn test_full_payload_extrapolates_position() {
        let mut baseline = StreamBaseline::default();
        let line = r#"{"type":"data","diff":false,"payload":{
            "title":"Blinding Lights","artist":"The Weeknd","album":"After Hours",
            "durationMicros":200000000,"elapsedTimeMicros":30000000,
            "timestampEpochMicros":1700000008000000,"playing":true,
            "bundleIdentifier":"com.apple.Music"}}"#;

        let state = state_of(merge_payload(line, None, &mut baseline, NOW));
        assert_eq!(state.title.as_deref(), Some("Blinding Lights"));
        assert_eq!(state.artists, vec!["The Weeknd"]);
        assert_eq!(state.source_app.as_deref(), Some("com.apple.Music"));
        assert_eq!(state.duration, Duration::from_secs(200));
        // 30 秒 + 2 秒的传输间隔
        assert_eq!(state.position, Duration::from_secs(32));
        assert!(state.playing);
    }

    #[test]
    fn test_diff_payload_keeps_previous_fields() {
        let mut baseline = StreamBaseline::default();
        let full = r#"{"payload":{"title":"A","artist":"B","durationMicros":100000000,
            "elapsedTimeMicros":5000000,"timestampEpochMicros":1700000010000000,"playing":true}}"#;
        let first = state_of(merge_payload(full, None, &mut baseline, NOW));

        let pause = r#"{"diff":true,"payload":{"playing":false,"elapsedTimeMicros":7000000}}"#;
        let second = state_of(merge_payload(pause, Some(&first), &mut baseline, NOW + 9_000_000));

        assert_eq!(second.title.as_deref(), Some("A"));
        assert_eq!(second.artists, vec!["B"]);
        assert_eq!(second.duration, Duration::from_secs(100));
        assert!(!second.playing);
        // 暂停时不外推
        assert_eq!(second.position, Duration::from_secs(7));
    }

    #[test]
    fn test_empty_payload_clears_and_garbage_is_ignored() {
        let mut baseline = StreamBaseline::default();
        assert_eq!(
            merge_payload(r#"{"payload":{}}"#, None, &mut baseline, NOW),
            Some(StreamUpdate::Cleared)
        );
        assert_eq!(merge_payload("not json", None, &mut baseline, NOW), None);
        assert_eq!(merge_payload(r#"{"type":"x"}"#, None, &mut baseline, NOW), None);
    }

    #[test]
    fn test_position_is_clamped_to_duration() {
        let mut baseline = StreamBaseline::default();
        let line = r#"{"payload":{"title":"A","durationMicros":10000000,
            "elapsedTimeMicros":9000000,"timestampEpochMicros":1700000000000000,"playing":true}}"#;
        let state = state_of(merge_payload(line, None, &mut baseline, NOW));
        assert_eq!(state.position, Duration::from_secs(10));
    }

    fn shared() -> Arc<StreamShared> {
        Arc::new(StreamShared {
            hub: StateHub::new(StateEquality::Timeline),
            predictor: Mutex::new(PositionPredictor::default()),
        })
    }

    #[test]
    fn test_stream_lines_publish_and_clear() {
        let shared = shared();
        let mut rx = shared.hub.subscribe();
        let mut baseline = StreamBaseline::default();

        shared.handle_line(
            r#"{"payload":{"title":"A","playing":false,"elapsedTimeMicros":1000000}}"#,
            &mut baseline,
        );
        shared.handle_line(r#"{"payload":{}}"#, &mut baseline);

        assert!(rx.try_recv().unwrap().is_some());
        assert!(rx.try_recv().unwrap().is_none());
        assert!(shared.hub.current().is_none());
    }

    #[test]
    fn test_tick_respects_envelope() {
        let shared = shared();
        let t0 = Instant::now();
        shared.hub.publish(PlayerState {
            title: Some("A".to_string()),
            position: Duration::from_secs(10),
            duration: Duration::from_secs(200),
            playing: true,
            ..Default::default()
        });
        shared
            .predictor
            .lock()
            .unwrap()
            .resync(Duration::from_secs(10), true, t0);

        shared.tick(t0 + Duration::from_millis(200));
        assert_eq!(
            shared.hub.current().unwrap().position,
            Duration::from_millis(10_200)
        );

        // 预测值离上次发布的位置太远时不发布
        shared
            .predictor
            .lock()
            .unwrap()
            .resync(Duration::from_secs(60), true, t0);
        shared.tick(t0 + Duration::from_millis(300));
        assert_eq!(
            shared.hub.current().unwrap().position,
            Duration::from_millis(10_200)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_restarts_after_failure_and_exit() {
        let shared = shared();
        let mut rx = shared.hub.subscribe();
        let token = CancellationToken::new();

        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let open = move || -> io::Result<(Option<Child>, BufReader<&'static [u8]>)> {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Err(io::Error::new(io::ErrorKind::NotFound, "missing")),
                1 => Ok((
                    None,
                    BufReader::new(
                        &b"{\"payload\":{\"title\":\"A\",\"playing\":false}}\n"[..],
                    ),
                )),
                _ => Err(io::Error::new(io::ErrorKind::NotFound, "missing")),
            }
        };
        let handle = tokio::spawn(supervise(Arc::clone(&shared), token.clone(), open));

        // 第一次启动失败，重试后读到状态，流结束时清空
        let state = rx.recv().await.unwrap().unwrap();
        assert_eq!(state.title.as_deref(), Some("A"));
        assert!(rx.recv().await.unwrap().is_none());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(attempts.load(Ordering::SeqCst) >= 3);

        token.cancel();
        handle.await.unwrap();
    }
}
