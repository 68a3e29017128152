//! # Pod 协议层
//!
//! 定义泵命令词汇表、激活里程碑排序和设备应答类型。
//! 本层不做任何 I/O，不持有线程，供上层 driver/client 复用。

pub mod command;
pub mod progress;
pub mod response;

pub use command::{ActivationStep, CommandClass, CustomCommand, PumpCommand};
pub use progress::ActivationProgress;
pub use response::{NackCode, PodResponse, StatusResponse};
