//! 命令队列条目与结果交付类型
//!
//! 提供命令优先级、命令标识和单次结果通道。结果通道是一对一的
//! 单发通道（bounded(1)）：每条提交的命令恰好产生一次结果交付，
//! 即使在超时、内部故障或队列销毁时也不例外。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use pod_protocol::PumpCommand;

use crate::error::DriverError;

/// 命令优先级
///
/// 优先级类之间严格排序，同类内按提交顺序 FIFO。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPriority {
    /// 高优先级：状态读取、停用等安全相关命令
    High,
    /// 普通优先级：常规流量
    Normal,
}

impl CommandPriority {
    /// 命令的默认优先级
    ///
    /// 状态读取用于解除不确定状态，停用用于终止输注，二者优先放行。
    pub fn for_command(command: &PumpCommand) -> Self {
        match command {
            PumpCommand::GetStatus | PumpCommand::Deactivate => CommandPriority::High,
            _ => CommandPriority::Normal,
        }
    }
}

/// 命令标识（进程内单调递增）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId(u64);

impl CommandId {
    /// 分配下一个命令标识
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        CommandId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// 动作结果
///
/// 每条执行（或被冲刷）的命令恰好产生一次，永不部分填充。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    /// 是否成功
    pub success: bool,
    /// 人类可读说明（失败时为失败原因）
    pub comment: Option<String>,
}

impl ActionResult {
    /// 成功结果（无说明）
    pub fn ok() -> Self {
        ActionResult {
            success: true,
            comment: None,
        }
    }

    /// 成功结果（带说明）
    pub fn ok_with_comment(comment: impl Into<String>) -> Self {
        ActionResult {
            success: true,
            comment: Some(comment.into()),
        }
    }

    /// 失败结果
    pub fn failure(comment: impl Into<String>) -> Self {
        ActionResult {
            success: false,
            comment: Some(comment.into()),
        }
    }
}

/// 队列内部的命令条目
///
/// 队列只在条目排队期间持有所有权；结果一经交付归调用方所有。
pub(crate) struct QueuedCommand {
    pub(crate) id: CommandId,
    pub(crate) kind: PumpCommand,
    pub(crate) priority: CommandPriority,
    pub(crate) submitted_at: Instant,
    pub(crate) result_tx: Sender<ActionResult>,
}

/// 结果句柄
///
/// `submit` 立即返回本句柄，结果稍后异步交付。调用方可以在任意
/// 线程上等待（阻塞、限时或轮询），交付顺序与出队顺序一致。
pub struct ResultHandle {
    id: CommandId,
    receiver: Receiver<ActionResult>,
}

impl ResultHandle {
    pub(crate) fn new(id: CommandId, receiver: Receiver<ActionResult>) -> Self {
        ResultHandle { id, receiver }
    }

    /// 对应的命令标识（可用于 `cancel`）
    pub fn command_id(&self) -> CommandId {
        self.id
    }

    /// 阻塞等待结果
    ///
    /// # 错误
    /// - `DriverError::ChannelClosed`: 队列在交付前被销毁且未冲刷结果
    ///   （正常销毁路径会冲刷失败结果，此错误只在极端情况下出现）
    pub fn wait(&self) -> Result<ActionResult, DriverError> {
        self.receiver.recv().map_err(|_| DriverError::ChannelClosed)
    }

    /// 限时等待结果
    pub fn wait_timeout(&self, timeout: Duration) -> Result<ActionResult, DriverError> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            crossbeam_channel::RecvTimeoutError::Timeout => DriverError::Timeout,
            crossbeam_channel::RecvTimeoutError::Disconnected => DriverError::ChannelClosed,
        })
    }

    /// 非阻塞取结果
    pub fn try_result(&self) -> Option<ActionResult> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pod_protocol::{ActivationStep, CustomCommand};

    #[test]
    fn test_default_priority() {
        assert_eq!(
            CommandPriority::for_command(&PumpCommand::GetStatus),
            CommandPriority::High
        );
        assert_eq!(
            CommandPriority::for_command(&PumpCommand::Deactivate),
            CommandPriority::High
        );
        assert_eq!(
            CommandPriority::for_command(&PumpCommand::Bolus { units_milli: 100 }),
            CommandPriority::Normal
        );
        assert_eq!(
            CommandPriority::for_command(&PumpCommand::Activate(ActivationStep::Pair)),
            CommandPriority::Normal
        );
        assert_eq!(
            CommandPriority::for_command(&PumpCommand::Custom(CustomCommand::PlayTestBeep)),
            CommandPriority::Normal
        );
    }

    #[test]
    fn test_command_id_monotonic() {
        let a = CommandId::next();
        let b = CommandId::next();
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_result_handle_delivery() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let handle = ResultHandle::new(CommandId::next(), rx);
        tx.send(ActionResult::ok()).unwrap();
        let result = handle.wait().unwrap();
        assert!(result.success);
    }

    #[test]
    fn test_result_handle_closed() {
        let (tx, rx) = crossbeam_channel::bounded::<ActionResult>(1);
        let handle = ResultHandle::new(CommandId::next(), rx);
        drop(tx);
        assert!(matches!(handle.wait(), Err(DriverError::ChannelClosed)));
    }

    #[test]
    fn test_action_result_constructors() {
        assert!(ActionResult::ok().success);
        assert_eq!(ActionResult::ok().comment, None);
        let failed = ActionResult::failure("no response");
        assert!(!failed.success);
        assert_eq!(failed.comment.as_deref(), Some("no response"));
    }
}
