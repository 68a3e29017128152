//! 可观察值容器
//!
//! 为 UI 层提供"当前值 + 变更通知"的最小抽象：持有一个值，
//! `set` 时同步通知所有订阅者。订阅返回 RAII 凭据，凭据析构
//! 即退订，不存在全局注册表。

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Listener<T> = Box<dyn Fn(&T) + Send>;

struct WatchInner<T> {
    value: T,
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
}

/// 可观察值
///
/// 回调在 `set` 的调用线程上同步触发，实现必须快速返回，且不得
/// 在回调内再调用同一个 `WatchValue`（内部锁不可重入）。
pub struct WatchValue<T> {
    inner: Arc<Mutex<WatchInner<T>>>,
}

impl<T: Send + 'static> WatchValue<T> {
    /// 以初始值创建
    pub fn new(value: T) -> Self {
        WatchValue {
            inner: Arc::new(Mutex::new(WatchInner {
                value,
                next_id: 1,
                listeners: Vec::new(),
            })),
        }
    }

    /// 替换当前值并通知所有订阅者
    pub fn set(&self, value: T) {
        let inner = &mut *self.inner.lock();
        inner.value = value;
        for (_, listener) in &inner.listeners {
            listener(&inner.value);
        }
    }

    /// 订阅变更
    ///
    /// 订阅时立即用当前值触发一次回调（订阅者无需区分"错过的
    /// 初始值"和后续变更）。返回的凭据析构即退订。
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + 'static) -> Subscription {
        let id = {
            let inner = &mut *self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            listener(&inner.value);
            inner.listeners.push((id, Box::new(listener)));
            id
        };

        let weak: Weak<Mutex<WatchInner<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.lock().listeners.retain(|(i, _)| *i != id);
                }
            })),
        }
    }

    /// 当前订阅数
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

impl<T: Clone + Send + 'static> WatchValue<T> {
    /// 读取当前值
    pub fn get(&self) -> T {
        self.inner.lock().value.clone()
    }
}

impl<T> Clone for WatchValue<T> {
    fn clone(&self) -> Self {
        WatchValue {
            inner: self.inner.clone(),
        }
    }
}

/// 订阅凭据（析构即退订）
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}
