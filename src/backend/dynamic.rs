use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::{Backend, StateHub, StateReceiver};
use crate::player::{PlayerState, StateEquality};

/// 选择时使用的子后端状况
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Liveness {
    pub playing: bool,
    pub has_state: bool,
}

/// 选择活跃的子后端（索引越小优先级越高）
///
/// 1. 优先级最高的正在播放的后端
/// 2. 没有后端在播放时，保持当前后端（只要它还有状态）
/// 3. 否则取优先级最高的、有状态的后端
pub fn select_backend(liveness: &[Liveness], current: Option<usize>) -> Option<usize> {
    if let Some(i) = liveness.iter().position(|l| l.playing) {
        return Some(i);
    }

    if let Some(i) = current.filter(|&i| liveness.get(i).is_some_and(|l| l.has_state)) {
        return Some(i);
    }

    liveness.iter().position(|l| l.has_state)
}

struct Shared {
    children: Vec<Arc<dyn Backend>>,
    selected: RwLock<Option<usize>>,
    hub: StateHub,
}

impl Shared {
    fn selected(&self) -> Option<usize> {
        *self.selected.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn active(&self) -> Option<Arc<dyn Backend>> {
        self.selected().and_then(|i| self.children.get(i).cloned())
    }

    fn liveness_from_state(&self) -> Vec<Liveness> {
        self.children
            .iter()
            .map(|child| {
                let state = child.current_state();
                Liveness {
                    playing: state.as_ref().is_some_and(|s| s.playing),
                    has_state: state.is_some(),
                }
            })
            .collect()
    }

    async fn liveness_from_probe(&self) -> Vec<Liveness> {
        let probes = join_all(self.children.iter().map(|child| child.probe())).await;
        self.children
            .iter()
            .zip(probes)
            .map(|(child, playing)| Liveness {
                playing,
                has_state: child.current_state().is_some(),
            })
            .collect()
    }

    /// 发布选中后端的最新快照，和上次发布的相同时不通知
    fn republish(&self, selected: Option<usize>) {
        match selected.and_then(|i| self.children[i].current_state()) {
            Some(state) => {
                self.hub.publish(state);
            }
            None => {
                self.hub.clear();
            }
        }
    }

    /// 重新选择，切换时立即发布新后端的当前状态；返回是否发生了切换
    fn reselect(&self, liveness: &[Liveness]) -> bool {
        let mut selected = self.selected.write().unwrap_or_else(PoisonError::into_inner);
        let next = select_backend(liveness, *selected);
        if next == *selected {
            return false;
        }

        match next {
            Some(i) => info!("切换到播放源: {}", self.children[i].name()),
            None => info!("没有可用的播放源"),
        }
        *selected = next;
        // 持有写锁发布，保证切换与转发的顺序
        self.republish(next);
        true
    }

    /// 子后端的事件只用来触发重新选择和发布；发布的总是它的最新快照
    fn on_child_event(&self, index: usize) {
        if self.reselect(&self.liveness_from_state()) {
            return;
        }
        let selected = self.selected.read().unwrap_or_else(PoisonError::into_inner);
        if *selected == Some(index) {
            self.republish(*selected);
        }
    }
}

/// 动态后端：同时运行多个播放源，把优先级最高的活跃播放源作为自己的状态
pub struct DynamicBackend {
    shared: Arc<Shared>,
    arbiter_interval: Duration,
    started: AtomicBool,
}

impl DynamicBackend {
    /// `children` 按优先级从高到低排列
    pub fn new(children: Vec<Arc<dyn Backend>>, arbiter_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                children,
                selected: RwLock::new(None),
                hub: StateHub::new(StateEquality::Timeline),
            }),
            arbiter_interval,
            started: AtomicBool::new(false),
        }
    }

    /// 当前选中的子后端名称
    pub fn active_name(&self) -> Option<String> {
        self.shared.active().map(|b| b.name().to_string())
    }
}

#[async_trait]
impl Backend for DynamicBackend {
    fn name(&self) -> &str {
        "Dynamic"
    }

    async fn start(&self, token: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let (tx, mut events) = mpsc::unbounded_channel::<usize>();

        for (index, child) in self.shared.children.iter().enumerate() {
            // 先订阅再启动，避免错过第一个状态
            let mut rx = child.subscribe();
            let tx = tx.clone();
            let forward_token = token.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = forward_token.cancelled() => break,
                        event = rx.recv() => match event {
                            Some(_) => {
                                if tx.send(index).is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
            });

            debug!("启动播放源: {}", child.name());
            child.start(token.child_token()).await;
        }
        drop(tx);

        let shared = Arc::clone(&self.shared);
        let arbiter_interval = self.arbiter_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(arbiter_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    Some(index) = events.recv() => shared.on_child_event(index),
                    _ = ticker.tick() => {
                        let liveness = shared.liveness_from_probe().await;
                        shared.reselect(&liveness);
                    }
                }
            }
            debug!("动态后端选择循环结束");
        });
    }

    /// 直接读取选中后端的快照，位置总是最新的
    fn current_state(&self) -> Option<PlayerState> {
        self.shared.active()?.current_state()
    }

    fn subscribe(&self) -> StateReceiver {
        self.shared.hub.subscribe()
    }

    async fn play(&self) {
        if let Some(b) = self.shared.active() {
            b.play().await;
        }
    }

    async fn pause(&self) {
        if let Some(b) = self.shared.active() {
            b.pause().await;
        }
    }

    async fn toggle(&self) {
        if let Some(b) = self.shared.active() {
            b.toggle().await;
        }
    }

    async fn next(&self) {
        if let Some(b) = self.shared.active() {
            b.next().await;
        }
    }

    async fn previous(&self) {
        if let Some(b) = self.shared.active() {
            b.previous().await;
        }
    }

    async fn seek(&self, position: Duration) {
        if let Some(b) = self.shared.active() {
            b.seek(position).await;
        }
    }

    async fn probe(&self) -> bool {
        match self.shared.active() {
            Some(b) => b.probe().await,
            None => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::timeout;

    /// 测试用后端：状态由测试直接发布，记录收到的控制命令
    pub(crate) struct FakeBackend {
        pub name: &'static str,
        pub hub: StateHub,
        pub commands: Mutex<Vec<String>>,
    }

    impl FakeBackend {
        pub(crate) fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                hub: StateHub::new(StateEquality::Timeline),
                commands: Mutex::new(Vec::new()),
            })
        }

        fn record(&self, command: &str) {
            self.commands.lock().unwrap().push(command.to_string());
        }

        pub(crate) fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        fn name(&self) -> &str {
            self.name
        }

        async fn start(&self, _token: CancellationToken) {}

        fn current_state(&self) -> Option<PlayerState> {
            self.hub.current()
        }

        fn subscribe(&self) -> StateReceiver {
            self.hub.subscribe()
        }

        async fn play(&self) {
            self.record("play");
        }

        async fn pause(&self) {
            self.record("pause");
        }

        async fn toggle(&self) {
            self.record("toggle");
        }

        async fn next(&self) {
            self.record("next");
        }

        async fn previous(&self) {
            self.record("previous");
        }

        async fn seek(&self, position: Duration) {
            self.record(&format!("seek {}", position.as_secs()));
        }
    }

    pub(crate) fn state(title: &str, playing: bool) -> PlayerState {
        PlayerState {
            title: Some(title.to_string()),
            artists: vec!["Artist".to_string()],
            duration: Duration::from_secs(200),
            playing,
            source_app: Some(title.to_string()),
            ..Default::default()
        }
    }

    const IDLE: Liveness = Liveness {
        playing: false,
        has_state: true,
    };
    const PLAYING: Liveness = Liveness {
        playing: true,
        has_state: true,
    };
    const GONE: Liveness = Liveness {
        playing: false,
        has_state: false,
    };

    #[test]
    fn test_select_prefers_playing_over_priority() {
        // B（索引 0，高优先级）空闲，A（索引 1）在播放
        assert_eq!(select_backend(&[IDLE, PLAYING], None), Some(1));
        assert_eq!(select_backend(&[GONE, PLAYING], Some(0)), Some(1));
    }

    #[test]
    fn test_select_higher_priority_when_both_play() {
        assert_eq!(select_backend(&[PLAYING, PLAYING], Some(1)), Some(0));
    }

    #[test]
    fn test_select_keeps_current_when_nothing_plays() {
        assert_eq!(select_backend(&[IDLE, IDLE], Some(1)), Some(1));
        assert_eq!(select_backend(&[IDLE, GONE], Some(1)), Some(0));
        assert_eq!(select_backend(&[GONE, GONE], Some(0)), None);
        assert_eq!(select_backend(&[], None), None);
    }

    async fn recv(rx: &mut StateReceiver) -> Option<PlayerState> {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_arbiter_switches_and_routes_controls() {
        let high = FakeBackend::new("high");
        let low = FakeBackend::new("low");
        let dynamic = DynamicBackend::new(
            vec![high.clone() as Arc<dyn Backend>, low.clone() as Arc<dyn Backend>],
            Duration::from_secs(3600),
        );

        let mut rx = dynamic.subscribe();
        let token = CancellationToken::new();
        dynamic.start(token.clone()).await;

        low.hub.publish(state("low", true));
        let event = recv(&mut rx).await.unwrap();
        assert_eq!(event.title.as_deref(), Some("low"));
        assert_eq!(dynamic.active_name().as_deref(), Some("low"));

        // 高优先级后端出现但没有播放：不切换，也不转发
        high.hub.publish(state("high", false));
        dynamic.toggle().await;
        assert_eq!(low.commands(), vec!["toggle"]);

        high.hub.publish(state("high", true));
        let event = recv(&mut rx).await.unwrap();
        assert_eq!(event.title.as_deref(), Some("high"));
        assert!(event.playing);
        assert_eq!(dynamic.current_state().unwrap().title.as_deref(), Some("high"));

        dynamic.seek(Duration::from_secs(30)).await;
        assert_eq!(high.commands(), vec!["seek 30"]);

        // 高优先级后端消失，回到低优先级后端
        high.hub.clear();
        let event = recv(&mut rx).await.unwrap();
        assert_eq!(event.title.as_deref(), Some("low"));

        low.hub.clear();
        assert!(recv(&mut rx).await.is_none());
        assert!(dynamic.current_state().is_none());

        token.cancel();
    }

    #[tokio::test]
    async fn test_back_to_back_child_updates_emit_once() {
        let high = FakeBackend::new("high");
        let low = FakeBackend::new("low");
        let dynamic = DynamicBackend::new(
            vec![high.clone() as Arc<dyn Backend>, low.clone() as Arc<dyn Backend>],
            Duration::from_secs(3600),
        );

        let mut rx = dynamic.subscribe();
        let token = CancellationToken::new();
        dynamic.start(token.clone()).await;

        high.hub.publish(state("high", false));
        high.hub.publish(state("high", true));

        let event = recv(&mut rx).await.unwrap();
        assert_eq!(event.title.as_deref(), Some("high"));
        assert!(event.playing);

        // 两个子事件都处理完之后不应该再有重复通知
        low.hub.publish(state("low", false));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        high.hub.clear();
        let event = recv(&mut rx).await.unwrap();
        assert_eq!(event.title.as_deref(), Some("low"));
        assert!(rx.try_recv().is_err());

        token.cancel();
    }
}
