//! 命令队列
//!
//! 保证物理链路上同一时刻最多一条命令在途（单飞），同时允许多个
//! 逻辑调用方并发提交。提交立即返回结果句柄，执行由单一 worker
//! 线程串行推进：出队 → 链路往返 → 调和 → 交付结果 → 下一条。
//!
//! 排序规则：优先级类之间严格排序，同类内按提交顺序 FIFO。
//! 传输超时不自动重试：队列上报失败，重试策略由调用方决定。

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use pod_protocol::{CustomCommand, PumpCommand};
use pod_radio::RadioLink;
use tracing::{debug, error, warn};

use crate::command::{ActionResult, CommandId, CommandPriority, QueuedCommand, ResultHandle};
use crate::error::DriverError;
use crate::hooks::{ObserverRegistry, QueueObserver};
use crate::reconcile::ResultReconciler;
use crate::state::PodStateManager;

/// 带超时的线程 join
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(self.join());
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

struct QueueInner {
    high: VecDeque<QueuedCommand>,
    normal: VecDeque<QueuedCommand>,
    /// 当前在途命令（用于去重和 pending 查询）
    executing: Option<(CommandId, PumpCommand)>,
}

impl QueueInner {
    fn len(&self) -> usize {
        self.high.len() + self.normal.len()
    }

    /// 出队下一条命令：优先级类优先，类内 FIFO
    fn pop_next(&mut self) -> Option<QueuedCommand> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }

    /// 自定义命令标签是否已排队或在途
    fn contains_custom(&self, tag: CustomCommand) -> bool {
        let queued = self
            .high
            .iter()
            .chain(self.normal.iter())
            .any(|entry| entry.kind.custom_tag() == Some(tag));
        let executing = self
            .executing
            .as_ref()
            .is_some_and(|(_, kind)| kind.custom_tag() == Some(tag));
        queued || executing
    }

    /// 按标识移除排队中的命令（在途命令不可移除）
    fn remove(&mut self, id: CommandId) -> Option<QueuedCommand> {
        for queue in [&mut self.high, &mut self.normal] {
            if let Some(pos) = queue.iter().position(|entry| entry.id == id) {
                return queue.remove(pos);
            }
        }
        None
    }
}

struct QueueShared {
    inner: Mutex<QueueInner>,
    cond: Condvar,
    running: AtomicBool,
    link: Mutex<Box<dyn RadioLink>>,
    state: Arc<PodStateManager>,
    reconciler: ResultReconciler,
    observers: RwLock<ObserverRegistry<dyn QueueObserver>>,
}

impl QueueShared {
    fn notify_queue_changed(&self) {
        let (pending, executing) = {
            let inner = self.inner.lock();
            (inner.len(), inner.executing.is_some())
        };
        if let Ok(observers) = self.observers.read() {
            observers.for_each(|o| o.on_queue_changed(pending, executing));
        }
    }

    fn notify_completed(&self, id: CommandId, result: &ActionResult) {
        if let Ok(observers) = self.observers.read() {
            observers.for_each(|o| o.on_command_completed(id, result));
        }
    }
}

/// 命令队列
///
/// # 并发模型
///
/// - 多生产者：任意线程并发调用 [`submit`](Self::submit)，调用不阻塞
/// - 单消费者：唯一的 worker 线程持有链路做往返，单飞不变量由此成立
/// - 结果按出队顺序交付，相互之间永不乱序
pub struct CommandQueue {
    shared: Arc<QueueShared>,
    worker: Option<JoinHandle<()>>,
}

impl CommandQueue {
    /// 创建队列并启动 worker 线程
    pub fn new(link: Box<dyn RadioLink>, state: Arc<PodStateManager>) -> Self {
        let shared = Arc::new(QueueShared {
            inner: Mutex::new(QueueInner {
                high: VecDeque::new(),
                normal: VecDeque::new(),
                executing: None,
            }),
            cond: Condvar::new(),
            running: AtomicBool::new(true),
            link: Mutex::new(link),
            state: state.clone(),
            reconciler: ResultReconciler::new(state),
            observers: RwLock::new(ObserverRegistry::new()),
        });

        let shared_clone = shared.clone();
        let worker = std::thread::Builder::new()
            .name("pod-command-queue".to_string())
            .spawn(move || worker_loop(shared_clone))
            .expect("failed to spawn command queue worker");

        CommandQueue {
            shared,
            worker: Some(worker),
        }
    }

    /// 提交命令（默认优先级）
    pub fn submit(&self, command: PumpCommand) -> Result<ResultHandle, DriverError> {
        self.submit_with_priority(command, CommandPriority::for_command(&command))
    }

    /// 提交命令（指定优先级）
    ///
    /// 校验通过后立即返回句柄，结果异步交付。
    ///
    /// # 错误
    /// - `DriverError::NotReady`: 链路未就绪（拒绝，不排队）
    /// - `DriverError::DuplicateCommand`: 同标签自定义命令已排队/在途
    /// - `DriverError::UncertainState`: 命令类别被不确定标志锁定
    /// - `DriverError::ChannelClosed`: 队列已销毁
    pub fn submit_with_priority(
        &self,
        command: PumpCommand,
        priority: CommandPriority,
    ) -> Result<ResultHandle, DriverError> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(DriverError::ChannelClosed);
        }

        // 就绪检查不得阻塞提交方：链路互斥量被在途往返占用时跳过
        // 检查（能在途说明链路刚刚还是就绪的），最终裁决由发送路径
        // 的 NotReady 错误给出
        if let Some(link) = self.shared.link.try_lock()
            && !link.link_state().is_ready()
        {
            return Err(DriverError::NotReady);
        }

        // 不确定标志按类别锁定；Status 类永远不会被标记，
        // 状态读取因此总能通过，用于解除锁定
        if let Some(class) = self.shared.state.uncertain_class()
            && command.class() == class
        {
            return Err(DriverError::UncertainState(class));
        }

        let handle = {
            let mut inner = self.shared.inner.lock();

            if let Some(tag) = command.custom_tag()
                && inner.contains_custom(tag)
            {
                return Err(DriverError::DuplicateCommand(tag));
            }

            let (result_tx, result_rx) = crossbeam_channel::bounded(1);
            let id = CommandId::next();
            let entry = QueuedCommand {
                id,
                kind: command,
                priority,
                submitted_at: Instant::now(),
                result_tx,
            };
            match priority {
                CommandPriority::High => inner.high.push_back(entry),
                CommandPriority::Normal => inner.normal.push_back(entry),
            }
            debug!("Command {:?} submitted (id {})", command, id.as_u64());
            ResultHandle::new(id, result_rx)
        };

        self.shared.cond.notify_one();
        self.shared.notify_queue_changed();
        Ok(handle)
    }

    /// 指定标签的自定义命令是否在排队或在途
    ///
    /// UI 据此决定是否重新启用控件。
    pub fn is_command_pending(&self, tag: CustomCommand) -> bool {
        self.shared.inner.lock().contains_custom(tag)
    }

    /// 排队中的命令数（不含在途）
    pub fn pending_count(&self) -> usize {
        self.shared.inner.lock().len()
    }

    /// 是否有命令在途
    pub fn is_executing(&self) -> bool {
        self.shared.inner.lock().executing.is_some()
    }

    /// 按标识撤回尚未执行的命令
    ///
    /// 已交给链路的命令不可撤回，只能等待或超时。撤回成功时向
    /// 对应句柄冲刷一次失败结果，返回 `true`。
    pub fn cancel(&self, id: CommandId) -> bool {
        let removed = self.shared.inner.lock().remove(id);
        match removed {
            Some(entry) => {
                let result = ActionResult::failure("Command cancelled before execution");
                let _ = entry.result_tx.send(result.clone());
                self.shared.notify_completed(entry.id, &result);
                self.shared.notify_queue_changed();
                debug!("Command {} cancelled", id.as_u64());
                true
            },
            None => false,
        }
    }

    /// 注册队列观察者
    pub fn add_observer(&self, observer: Arc<dyn QueueObserver>) {
        if let Ok(mut observers) = self.shared.observers.write() {
            observers.add(observer);
        }
    }

    /// 注销队列观察者
    pub fn remove_observer(&self, observer: &Arc<dyn QueueObserver>) {
        if let Ok(mut observers) = self.shared.observers.write() {
            observers.remove(observer);
        }
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        // 先置停止标志再唤醒 worker，worker 退出前冲刷剩余命令
        self.shared.running.store(false, Ordering::Release);
        self.shared.cond.notify_all();

        if let Some(handle) = self.worker.take()
            && handle.join_timeout(Duration::from_secs(2)).is_err()
        {
            error!("Command queue worker failed to shut down within 2s");
        }
    }
}

/// worker 主循环（单飞执行点）
fn worker_loop(shared: Arc<QueueShared>) {
    loop {
        // 取下一条命令；停止标志一旦置位就不再执行新命令
        let entry = {
            let mut inner = shared.inner.lock();
            loop {
                if !shared.running.load(Ordering::Acquire) {
                    break None;
                }
                if let Some(entry) = inner.pop_next() {
                    inner.executing = Some((entry.id, entry.kind));
                    break Some(entry);
                }
                shared.cond.wait(&mut inner);
            }
        };

        let Some(entry) = entry else { break };
        shared.notify_queue_changed();

        // 出队时复查不确定标志：命令可能在排队期间被同类超时锁定
        // （提交时的检查只覆盖提交时刻），被锁定的命令不触设备
        if let Some(class) = shared.state.uncertain_class()
            && entry.kind.class() == class
        {
            shared.inner.lock().executing = None;
            let result = ActionResult::failure(format!(
                "Command class {:?} has an unresolved uncertain outcome, \
                 issue a status read first",
                class
            ));
            warn!(
                "Command {:?} (id {}) flushed without execution: class {:?} uncertain",
                entry.kind,
                entry.id.as_u64(),
                class
            );
            let _ = entry.result_tx.send(result.clone());
            shared.notify_completed(entry.id, &result);
            shared.notify_queue_changed();
            continue;
        }

        debug!(
            "Executing command {:?} (id {}, waited {:?} in queue)",
            entry.kind,
            entry.id.as_u64(),
            entry.submitted_at.elapsed()
        );
        let outcome = {
            let mut link = shared.link.lock();
            link.send(&entry.kind.encode())
        };
        let result = shared.reconciler.reconcile(&entry.kind, outcome);

        shared.inner.lock().executing = None;

        // 先交付、后取下一条：结果交付顺序与出队顺序一致
        if entry.result_tx.send(result.clone()).is_err() {
            // 调用方已放弃句柄，结果只进观察者
            debug!("Result receiver dropped for command {}", entry.id.as_u64());
        }
        shared.notify_completed(entry.id, &result);
        shared.notify_queue_changed();
    }

    // 停机冲刷：每个未执行的句柄仍然恰好收到一次结果
    let drained: Vec<QueuedCommand> = {
        let mut inner = shared.inner.lock();
        let mut drained: Vec<QueuedCommand> = inner.high.drain(..).collect();
        drained.extend(inner.normal.drain(..));
        drained
    };
    if !drained.is_empty() {
        warn!("Flushing {} queued commands on shutdown", drained.len());
        for entry in drained {
            let result = ActionResult::failure("Command queue shut down before execution");
            let _ = entry.result_tx.send(result.clone());
            shared.notify_completed(entry.id, &result);
        }
    }
}
