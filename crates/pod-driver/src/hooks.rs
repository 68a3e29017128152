//! 观察者钩子
//!
//! 状态和队列的变化直接通知已注册的观察者，取代全局事件总线。
//! 回调在核心线程上同步触发，实现必须快速返回、禁止阻塞操作；
//! 需要重活的观察者应通过 channel 把事件转交自己的线程处理。

use std::sync::Arc;

use crate::command::{ActionResult, CommandId};
use crate::state::PodState;

/// Pod 状态观察者
pub trait PodStateObserver: Send + Sync {
    /// 状态发生整体替换后调用（advance / discard / 会话数据变化）
    fn on_pod_state_changed(&self, state: &PodState);
}

/// 队列观察者
///
/// UI 层据此刷新控件可用性（原实现里由 EventQueueChanged 总线承担）。
pub trait QueueObserver: Send + Sync {
    /// 队列内容变化（入队、出队、取消、冲刷）
    fn on_queue_changed(&self, pending: usize, executing: bool);

    /// 单条命令完成（结果已交付）
    fn on_command_completed(&self, id: CommandId, result: &ActionResult) {
        let _ = (id, result);
        // 默认：不处理
    }
}

/// 观察者注册表
///
/// 本身不做线程同步，使用方以 `RwLock` 包裹（读多写少）。
pub struct ObserverRegistry<T: ?Sized> {
    observers: Vec<Arc<T>>,
}

impl<T: ?Sized> Default for ObserverRegistry<T> {
    fn default() -> Self {
        ObserverRegistry {
            observers: Vec::new(),
        }
    }
}

impl<T: ?Sized> ObserverRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册观察者
    pub fn add(&mut self, observer: Arc<T>) {
        self.observers.push(observer);
    }

    /// 注销指定观察者（按 Arc 指针判等）
    pub fn remove(&mut self, observer: &Arc<T>) {
        self.observers.retain(|o| !Arc::ptr_eq(o, observer));
    }

    /// 清空所有观察者
    pub fn clear(&mut self) {
        self.observers.clear();
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// 遍历触发
    pub fn for_each(&self, mut f: impl FnMut(&Arc<T>)) {
        for observer in &self.observers {
            f(observer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        calls: AtomicUsize,
    }

    impl PodStateObserver for Counter {
        fn on_pod_state_changed(&self, _state: &PodState) {
            self.calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_registry_add_trigger_remove() {
        let mut registry: ObserverRegistry<dyn PodStateObserver> = ObserverRegistry::new();
        let counter = Arc::new(Counter {
            calls: AtomicUsize::new(0),
        });
        let as_observer: Arc<dyn PodStateObserver> = counter.clone();
        registry.add(as_observer.clone());
        assert_eq!(registry.len(), 1);

        let state = PodState::default();
        registry.for_each(|o| o.on_pod_state_changed(&state));
        assert_eq!(counter.calls.load(Ordering::Relaxed), 1);

        registry.remove(&as_observer);
        assert!(registry.is_empty());
        registry.for_each(|o| o.on_pod_state_changed(&state));
        assert_eq!(counter.calls.load(Ordering::Relaxed), 1);
    }
}
