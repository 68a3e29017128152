//! 动作执行器
//!
//! 把一次可能失败的工作单元（通常是"提交命令并等待结果"）包装成
//! UI 可观察的执行状态：`executing` 标志 + 恰好一次的结果投递。
//! 动作内部的 panic 被捕获并折算为失败结果，故障不会外泄到调用方。

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pod_driver::ActionResult;
use tracing::{debug, error};

use crate::observable::WatchValue;

struct ExecutorShared {
    /// 内部互斥：同一执行器同时最多跑一个动作
    busy: AtomicBool,
    executing: WatchValue<bool>,
    result: WatchValue<Option<ActionResult>>,
}

/// 动作执行器
///
/// UI 订阅 [`executing`](Self::executing) 控制控件禁用、订阅
/// [`last_result`](Self::last_result) 展示结果。每次 [`run`](Self::run)
/// 恰好产生一次结果投递：成功、失败、panic 皆然。
pub struct ActionExecutor {
    shared: Arc<ExecutorShared>,
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionExecutor {
    pub fn new() -> Self {
        ActionExecutor {
            shared: Arc::new(ExecutorShared {
                busy: AtomicBool::new(false),
                executing: WatchValue::new(false),
                result: WatchValue::new(None),
            }),
        }
    }

    /// 执行中标志
    pub fn executing(&self) -> &WatchValue<bool> {
        &self.shared.executing
    }

    /// 最近一次结果（尚未执行过为 `None`）
    pub fn last_result(&self) -> &WatchValue<Option<ActionResult>> {
        &self.shared.result
    }

    /// 在后台线程上执行动作
    ///
    /// 已有动作在执行时拒绝并返回 `false`（调用方应已通过
    /// `executing` 禁用了入口）。接受后立即返回，结果异步投递。
    pub fn run(
        &self,
        name: &str,
        action: impl FnOnce() -> ActionResult + Send + 'static,
    ) -> bool {
        if self
            .shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Action {} refused: executor busy", name);
            return false;
        }

        self.shared.executing.set(true);
        let shared = self.shared.clone();
        let name = name.to_string();
        let spawned = std::thread::Builder::new()
            .name(format!("pod-action-{}", name))
            .spawn(move || {
                let result = match panic::catch_unwind(AssertUnwindSafe(action)) {
                    Ok(result) => result,
                    Err(payload) => {
                        let text = panic_text(payload.as_ref());
                        error!("Action {} panicked: {}", name, text);
                        ActionResult::failure(format!("Internal fault: {}", text))
                    },
                };
                debug!(
                    "Action {} finished (success: {})",
                    name, result.success
                );
                // 先投递结果、再清执行标志：订阅 executing 下降沿的
                // 一方此时总能读到最终结果
                shared.result.set(Some(result));
                shared.executing.set(false);
                shared.busy.store(false, Ordering::Release);
            });

        match spawned {
            Ok(_) => true,
            Err(e) => {
                error!("Failed to spawn action thread: {}", e);
                self.shared.result.set(Some(ActionResult::failure(format!(
                    "Failed to start action: {}",
                    e
                ))));
                self.shared.executing.set(false);
                self.shared.busy.store(false, Ordering::Release);
                false
            },
        }
    }
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    /// 订阅 executing 的下降沿，动作结束时收到通知
    fn finished_signal(executor: &ActionExecutor) -> (crate::Subscription, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel();
        let sub = executor.executing().subscribe(move |executing| {
            if !executing {
                let _ = tx.send(());
            }
        });
        // 订阅时立即触发一次（初值 false），吞掉它
        rx.recv_timeout(Duration::from_millis(100)).unwrap();
        (sub, rx)
    }

    #[test]
    fn test_run_success_posts_result() {
        let executor = ActionExecutor::new();
        let (_sub, finished) = finished_signal(&executor);

        assert!(executor.run("beep", || ActionResult::ok_with_comment("beeped")));
        finished.recv_timeout(Duration::from_secs(1)).unwrap();

        let result = executor.last_result().get().unwrap();
        assert!(result.success);
        assert_eq!(result.comment.as_deref(), Some("beeped"));
        assert!(!executor.executing().get());
    }

    #[test]
    fn test_run_refused_while_busy() {
        let executor = ActionExecutor::new();
        let (_sub, finished) = finished_signal(&executor);
        let (release_tx, release_rx) = mpsc::channel::<()>();

        assert!(executor.run("slow", move || {
            release_rx.recv().unwrap();
            ActionResult::ok()
        }));
        // 第一个动作还挂着，第二个被拒绝
        assert!(!executor.run("second", || ActionResult::ok()));

        release_tx.send(()).unwrap();
        finished.recv_timeout(Duration::from_secs(1)).unwrap();
        // 结束后再次可用
        assert!(executor.run("third", || ActionResult::ok()));
        finished.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_panic_becomes_failure_result() {
        let executor = ActionExecutor::new();
        let (_sub, finished) = finished_signal(&executor);

        assert!(executor.run("explode", || panic!("bolus amount out of range")));
        finished.recv_timeout(Duration::from_secs(1)).unwrap();

        let result = executor.last_result().get().unwrap();
        assert!(!result.success);
        assert!(result
            .comment
            .as_deref()
            .unwrap()
            .contains("bolus amount out of range"));
        // panic 之后执行器仍然可用
        assert!(executor.run("after", || ActionResult::ok()));
        finished.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_executing_flag_transitions() {
        let executor = ActionExecutor::new();
        let transitions = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let transitions_clone = transitions.clone();
        let (tx, rx) = mpsc::channel();
        let _sub = executor.executing().subscribe(move |executing| {
            transitions_clone.lock().push(*executing);
            if !executing {
                let _ = tx.send(());
            }
        });
        rx.recv_timeout(Duration::from_millis(100)).unwrap();

        executor.run("noop", ActionResult::ok);
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        // 初值 false → true → false
        assert_eq!(*transitions.lock(), vec![false, true, false]);
    }
}
