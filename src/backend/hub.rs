use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

use crate::backend::StateReceiver;
use crate::player::{PlayerState, StateEquality};

type Subscriber = mpsc::UnboundedSender<Option<PlayerState>>;

#[derive(Default)]
struct HubInner {
    state: Option<PlayerState>,
    subscribers: Vec<Subscriber>,
}

impl HubInner {
    /// 发送给所有订阅者，同时移除已关闭的订阅者
    fn broadcast(&mut self, value: Option<PlayerState>) {
        self.subscribers.retain(|tx| tx.send(value.clone()).is_ok());
    }
}

/// 每个后端共用的状态中心：保存最近的快照，只在状态实质变化时通知订阅者
pub struct StateHub {
    equality: StateEquality,
    inner: Mutex<HubInner>,
}

impl StateHub {
    pub fn new(equality: StateEquality) -> Self {
        Self {
            equality,
            inner: Mutex::new(HubInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> StateReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }

    pub fn current(&self) -> Option<PlayerState> {
        self.lock().state.clone()
    }

    /// 发布新状态，返回是否通知了订阅者
    ///
    /// 快照总是会被替换，这样按 `Metadata` 规则比较时位置也保持最新。
    pub fn publish(&self, state: PlayerState) -> bool {
        let mut inner = self.lock();
        let changed = inner
            .state
            .as_ref()
            .map_or(true, |prev| !self.equality.same(prev, &state));

        inner.state = Some(state.clone());
        if changed {
            trace!("状态变化: {:?}", state.title);
            inner.broadcast(Some(state));
        }
        changed
    }

    /// 只更新播放位置（轮询或预测得到），位置不变时不通知
    pub fn publish_position(&self, position: Duration) -> bool {
        let mut inner = self.lock();
        let Some(state) = inner.state.as_ref() else {
            return false;
        };
        if state.position == position {
            return false;
        }

        let next = state.with_position(position);
        inner.state = Some(next.clone());
        inner.broadcast(Some(next));
        true
    }

    /// 不做比较直接转发（上游已经去重）
    pub fn forward(&self, state: Option<PlayerState>) {
        let mut inner = self.lock();
        inner.state = state.clone();
        inner.broadcast(state);
    }

    /// 播放源消失：之前有状态时通知一次 `None`
    pub fn clear(&self) -> bool {
        let mut inner = self.lock();
        if inner.state.take().is_none() {
            return false;
        }
        inner.broadcast(None);
        true
    }
}
