//! # Pod 无线链路抽象层
//!
//! 提供统一的无线链路接口抽象。比特级成帧由具体链路实现负责，
//! 本层只约定 send/receive 原语和链路就绪状态。

use std::time::Duration;

use pod_protocol::PodResponse;
use thiserror::Error;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(any(test, feature = "mock"))]
pub use mock::MockRadioLink;

/// 链路层统一错误类型
#[derive(Error, Debug)]
pub enum RadioError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    /// 超时：约定时限内未收到任何应答。
    /// 命令可能已被设备执行（确认丢失），上层不得据此假设未执行。
    #[error("Response timeout")]
    Timeout,
    /// 链路级失败（载波丢失、CRC 连续失败等），命令未送达
    #[error("Link error: {0}")]
    Link(String),
    /// 链路尚未就绪
    #[error("Link not ready")]
    NotReady,
}

/// 链路就绪状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// 可以发送命令
    Ready,
    /// 链路未建立（硬件未配置 / 正在重连）
    NotReady,
    /// 链路被占用（另一端正在进行长操作）
    Busy,
}

impl LinkState {
    pub fn is_ready(self) -> bool {
        self == LinkState::Ready
    }
}

/// 无线链路接口
///
/// `send` 是一次完整的命令往返：发送命令字节并等待设备应答。
/// 实现必须保证同一时刻只处理一次往返（上层队列已经序列化调用，
/// 实现不需要自己加锁）。
pub trait RadioLink: Send {
    /// 发送命令并等待应答
    ///
    /// # 错误
    /// - `RadioError::Timeout`: 时限内无应答，**设备可能已执行**
    /// - `RadioError::Link`: 链路级失败，命令未送达
    /// - `RadioError::NotReady`: 链路未就绪
    fn send(&mut self, command: &[u8]) -> Result<PodResponse, RadioError>;

    /// 查询链路状态
    fn link_state(&self) -> LinkState;

    /// 设置单次往返超时（默认实现忽略）
    fn set_response_timeout(&mut self, _timeout: Duration) {}
}
