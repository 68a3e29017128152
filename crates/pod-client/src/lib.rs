//! # Pod 客户端层
//!
//! 面向 UI / 自动化调用方的高层封装：
//! - [`PodManager`]: 高层操作门面（蜂鸣、激活、停用、丢弃）
//! - [`ActionExecutor`]: 把一次动作包装为可观察的执行状态
//! - [`WatchValue`]: 当前值 + 变更通知的可观察容器
//!
//! # 示例
//!
//! ```no_run
//! use std::sync::Arc;
//! use pod_client::{ActionExecutor, PodManager};
//! use pod_driver::{ActionResult, PodStateManager, PodStateStore};
//! # fn open_radio_link() -> Box<dyn pod_radio::RadioLink> { unimplemented!() }
//!
//! let state = Arc::new(PodStateManager::with_store(PodStateStore::new(
//!     "/var/lib/podlink/pod_state.json",
//! )));
//! let manager = Arc::new(PodManager::new(open_radio_link(), state));
//!
//! // UI 按钮点击：提交蜂鸣并把等待过程交给执行器
//! let executor = ActionExecutor::new();
//! let manager_clone = manager.clone();
//! executor.run("play-test-beep", move || {
//!     match manager_clone.play_test_beep() {
//!         Ok(handle) => handle.wait().unwrap_or_else(|e| {
//!             ActionResult::failure(format!("Queue torn down: {}", e))
//!         }),
//!         Err(e) => ActionResult::failure(e.to_string()),
//!     }
//! });
//! ```

mod executor;
mod manager;
mod observable;

pub use executor::ActionExecutor;
pub use manager::PodManager;
pub use observable::{Subscription, WatchValue};

#[cfg(test)]
mod tests {
    use super::*;
    use pod_driver::{ActionResult, PodStateManager};
    use pod_radio::mock::MockRadioLink;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    /// 完整客户端路径：按钮点击 → 执行器 → 队列 → mock 链路 → 结果投递
    #[test]
    fn test_executor_drives_manager_action() {
        let (link, _mock) = MockRadioLink::new();
        let state = Arc::new(PodStateManager::ephemeral());
        let manager = Arc::new(PodManager::new(Box::new(link), state));

        let executor = ActionExecutor::new();
        let (tx, rx) = mpsc::channel();
        let _sub = executor.executing().subscribe(move |executing| {
            if !executing {
                let _ = tx.send(());
            }
        });
        rx.recv_timeout(Duration::from_millis(100)).unwrap();

        let manager_clone = manager.clone();
        assert!(executor.run("play-test-beep", move || {
            match manager_clone.play_test_beep() {
                Ok(handle) => handle
                    .wait_timeout(Duration::from_secs(1))
                    .unwrap_or_else(|e| ActionResult::failure(e.to_string())),
                Err(e) => ActionResult::failure(e.to_string()),
            }
        }));

        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        let result = executor.last_result().get().unwrap();
        assert!(result.success, "beep failed: {:?}", result.comment);
    }
}
