//! 驱动层错误类型定义

use pod_protocol::{ActivationProgress, CommandClass, CustomCommand};
use pod_radio::RadioError;
use thiserror::Error;

use crate::persist::PersistError;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 同类型自定义命令已在排队或在途（提交时拒绝，调用方可据此禁用控件）
    #[error("Custom command already pending: {0:?}")]
    DuplicateCommand(CustomCommand),

    /// 链路未就绪（命令被拒绝，不排队；链路就绪后可重试）
    #[error("Radio link not ready")]
    NotReady,

    /// 传输超时（时限内无应答，设备可能已执行）
    #[error("Response timeout")]
    Timeout,

    /// 链路级失败
    #[error("Link error: {0}")]
    Link(String),

    /// 命令类别处于不确定状态，需要先完成一次状态读取
    #[error("Command class {0:?} has an unresolved uncertain outcome, issue a status read first")]
    UncertainState(CommandClass),

    /// 试图在未 discard 的情况下回退激活进度（程序错误）
    #[error("Activation progress cannot regress from {current:?} to {requested:?} without discard")]
    Regression {
        current: ActivationProgress,
        requested: ActivationProgress,
    },

    /// 持久化写入失败（本次操作失败，之前的持久化状态仍然权威）
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistError),

    /// 结果通道已关闭（队列已销毁）
    #[error("Command queue shut down")]
    ChannelClosed,
}

impl From<RadioError> for DriverError {
    fn from(err: RadioError) -> Self {
        match err {
            RadioError::Timeout => DriverError::Timeout,
            RadioError::NotReady => DriverError::NotReady,
            RadioError::Link(message) => DriverError::Link(message),
            RadioError::Io(io) => DriverError::Link(io.to_string()),
        }
    }
}
