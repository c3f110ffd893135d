use std::time::{Duration, Instant};

/// 位置预测的阈值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictorConfig {
    /// 观测值偏离预测超过该值时视为跳转
    pub seek_threshold: Duration,
    /// 外部位置覆盖的最小偏差，小于该值的差异当作抖动忽略
    pub override_threshold: Duration,
    /// 预测位置与上次发布的位置相差在该范围内才发布
    pub tick_envelope: Duration,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            seek_threshold: Duration::from_millis(500),
            override_threshold: Duration::from_millis(1500),
            tick_envelope: Duration::from_millis(500),
        }
    }
}

/// 一次观测的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// 第一次观测，建立基准
    Initial,
    /// 偏离预测过大，已重新同步
    Seek,
    /// 播放/暂停切换，已重新同步
    StateChange,
    /// 与预测一致，基准保持不变
    Continuous,
}

#[derive(Debug, Clone, Copy)]
struct Baseline {
    sync_time: Instant,
    sync_position: Duration,
    playing: bool,
}

fn distance(a: Duration, b: Duration) -> Duration {
    if a > b {
        a - b
    } else {
        b - a
    }
}

/// 在稀疏的位置更新之间推算播放位置
///
/// 所有方法都显式接收当前时间，方便测试。
#[derive(Debug, Default)]
pub struct PositionPredictor {
    config: PredictorConfig,
    baseline: Option<Baseline>,
}

impl PositionPredictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            config,
            baseline: None,
        }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// 丢弃基准（曲目消失时）
    pub fn reset(&mut self) {
        self.baseline = None;
    }

    pub fn is_playing(&self) -> bool {
        self.baseline.is_some_and(|b| b.playing)
    }

    /// 以给定位置重新建立基准
    pub fn resync(&mut self, position: Duration, playing: bool, now: Instant) {
        self.baseline = Some(Baseline {
            sync_time: now,
            sync_position: position,
            playing,
        });
    }

    /// 推算 `now` 时刻的位置，时长已知时不会超过时长
    pub fn predict(&self, now: Instant, duration: Duration) -> Option<Duration> {
        let b = self.baseline?;
        let mut position = if b.playing {
            b.sync_position + now.saturating_duration_since(b.sync_time)
        } else {
            b.sync_position
        };

        if !duration.is_zero() && position > duration {
            position = duration;
        }
        Some(position)
    }

    /// 处理播放源报告的位置
    pub fn observe(&mut self, position: Duration, playing: bool, now: Instant) -> Observation {
        let Some(b) = self.baseline else {
            self.resync(position, playing, now);
            return Observation::Initial;
        };

        if b.playing != playing {
            self.resync(position, playing, now);
            return Observation::StateChange;
        }

        let predicted = self.predict(now, Duration::ZERO).unwrap_or(position);
        if distance(predicted, position) > self.config.seek_threshold {
            self.resync(position, playing, now);
            return Observation::Seek;
        }

        Observation::Continuous
    }

    /// 使用更可靠的外部位置（例如 YesPlayMusic 的进度）校正
    ///
    /// 只有偏差达到 `override_threshold` 才重新同步，返回是否同步。
    pub fn apply_override(&mut self, position: Duration, now: Instant) -> bool {
        let Some(b) = self.baseline else {
            return false;
        };
        let predicted = self.predict(now, Duration::ZERO).unwrap_or(position);
        if distance(predicted, position) < self.config.override_threshold {
            return false;
        }

        self.resync(position, b.playing, now);
        true
    }

    /// 定时推进：预测位置与上次发布的位置相差不大时返回预测位置
    ///
    /// 暂停或差距过大（播放源报告了跳转）时返回 `None`。
    pub fn tick(&self, last_published: Duration, now: Instant, duration: Duration) -> Option<Duration> {
        if !self.is_playing() {
            return None;
        }

        let predicted = self.predict(now, duration)?;
        (distance(predicted, last_published) < self.config.tick_envelope).then_some(predicted)
    }
}

/// 只在变化时才刷新位置的播放源（SMTC）的时间线
///
/// 两次轮询读到相同的位置说明播放源没有更新，此时沿用预测值，
/// 只有读数变化时才交给预测器判断是否跳转。
#[derive(Debug, Default)]
pub struct SessionTimeline {
    predictor: PositionPredictor,
    last_report: Option<(Duration, bool)>,
}

impl SessionTimeline {
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            predictor: PositionPredictor::new(config),
            last_report: None,
        }
    }

    /// 曲目变化或会话消失时调用
    pub fn reset(&mut self) {
        self.predictor.reset();
        self.last_report = None;
    }

    /// 处理一次系统读数，返回应当发布的位置
    pub fn update(&mut self, reported: Duration, playing: bool, duration: Duration, now: Instant) -> Duration {
        if self.last_report != Some((reported, playing)) {
            self.last_report = Some((reported, playing));
            self.predictor.observe(reported, playing, now);
        }
        self.predictor.predict(now, duration).unwrap_or(reported)
    }

    /// 处理更可靠的外部进度，小的漂移当作抖动忽略
    pub fn update_from_override(
        &mut self,
        position: Duration,
        playing: bool,
        duration: Duration,
        now: Instant,
    ) -> Duration {
        let has_baseline = self.predictor.predict(now, Duration::ZERO).is_some();
        if !has_baseline || self.predictor.is_playing() != playing {
            self.predictor.resync(position, playing, now);
        } else {
            self.predictor.apply_override(position, now);
        }
        self.last_report = None;
        self.predictor.predict(now, duration).unwrap_or(position)
    }

    pub fn tick(&self, last_published: Duration, now: Instant, duration: Duration) -> Option<Duration> {
        self.predictor.tick(last_published, now, duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SONG: Duration = Duration::from_secs(240);

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn test_prediction_advances_only_while_playing() {
        let t0 = Instant::now();
        let mut p = PositionPredictor::default();
        assert_eq!(p.predict(t0, SONG), None);

        p.resync(secs(10), true, t0);
        assert_eq!(p.predict(t0 + secs(3), SONG), Some(secs(13)));

        p.resync(secs(10), false, t0);
        assert_eq!(p.predict(t0 + secs(3), SONG), Some(secs(10)));
    }

    #[test]
    fn test_prediction_is_clamped_to_duration() {
        let t0 = Instant::now();
        let mut p = PositionPredictor::default();
        p.resync(secs(235), true, t0);

        for offset in [0, 4, 5, 6, 60] {
            let predicted = p.predict(t0 + secs(offset), SONG).unwrap();
            assert!(predicted <= SONG);
        }
        assert_eq!(p.predict(t0 + secs(60), SONG), Some(SONG));
        // 时长未知时不截断
        assert_eq!(p.predict(t0 + secs(60), Duration::ZERO), Some(secs(295)));
    }

    #[test]
    fn test_seek_resyncs_immediately() {
        let t0 = Instant::now();
        let mut p = PositionPredictor::default();
        assert_eq!(p.observe(secs(10), true, t0), Observation::Initial);

        let t1 = t0 + secs(1);
        assert_eq!(p.observe(secs(40), true, t1), Observation::Seek);
        assert_eq!(p.predict(t1, SONG), Some(secs(40)));
        assert_eq!(p.predict(t1 + millis(200), SONG), Some(secs(40) + millis(200)));
    }

    #[test]
    fn test_small_jitter_is_continuous() {
        let t0 = Instant::now();
        let mut p = PositionPredictor::default();
        p.observe(secs(10), true, t0);

        assert_eq!(p.observe(secs(11) + millis(300), true, t0 + secs(1)), Observation::Continuous);
        // 基准没有变化
        assert_eq!(p.predict(t0 + secs(2), SONG), Some(secs(12)));
    }

    #[test]
    fn test_pause_resyncs() {
        let t0 = Instant::now();
        let mut p = PositionPredictor::default();
        p.observe(secs(10), true, t0);

        assert_eq!(p.observe(secs(12), false, t0 + secs(2)), Observation::StateChange);
        assert_eq!(p.predict(t0 + secs(10), SONG), Some(secs(12)));
        assert_eq!(p.tick(secs(12), t0 + secs(10), SONG), None);
    }

    #[test]
    fn test_override_ignores_small_drift() {
        let t0 = Instant::now();
        let mut p = PositionPredictor::default();
        assert!(!p.apply_override(secs(5), t0));

        p.resync(secs(10), true, t0);
        let now = t0 + secs(2);

        // 预测 12s，外部报告 12.8s
        assert!(!p.apply_override(secs(12) + millis(800), now));
        assert_eq!(p.predict(now, SONG), Some(secs(12)));

        assert!(p.apply_override(secs(13) + millis(500), now));
        assert_eq!(p.predict(now, SONG), Some(secs(13) + millis(500)));
    }

    #[test]
    fn test_tick_envelope() {
        let t0 = Instant::now();
        let mut p = PositionPredictor::default();
        p.resync(secs(10), true, t0);

        let now = t0 + millis(200);
        assert_eq!(p.tick(secs(10), now, SONG), Some(secs(10) + millis(200)));
        // 上次发布的位置离预测太远：播放源自己报告了跳转
        assert_eq!(p.tick(secs(30), now, SONG), None);
    }

    #[test]
    fn test_session_timeline_ignores_stale_readings() {
        let t0 = Instant::now();
        let mut timeline = SessionTimeline::default();
        assert_eq!(timeline.update(secs(10), true, SONG, t0), secs(10));

        // 系统一直报告 10s，预测继续前进
        assert_eq!(timeline.update(secs(10), true, SONG, t0 + secs(5)), secs(15));

        // 新的读数与预测相差很大：跳转
        assert_eq!(timeline.update(secs(100), true, SONG, t0 + secs(6)), secs(100));
    }

    #[test]
    fn test_session_timeline_override() {
        let t0 = Instant::now();
        let mut timeline = SessionTimeline::default();
        timeline.update_from_override(secs(10), true, SONG, t0);

        let now = t0 + secs(2);
        assert_eq!(timeline.update_from_override(secs(12) + millis(800), true, SONG, now), secs(12));
        assert_eq!(timeline.update_from_override(secs(20), true, SONG, now), secs(20));
        // 暂停立即同步
        assert_eq!(timeline.update_from_override(secs(21), false, SONG, now + secs(5)), secs(21));
    }
}
