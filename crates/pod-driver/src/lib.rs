//! # Pod 驱动层
//!
//! 本模块提供 Pod 泵的核心决策逻辑，包括：
//! - Pod 状态机（激活/停用进度、会话数据、不确定标志）
//! - 持久化存储（带版本的状态记录，失败关闭）
//! - 命令队列（单飞串行执行、优先级、自定义命令去重）
//! - 结果调和（超时 vs 已执行未确认的保守判定）
//! - 观察者钩子（状态/队列变化的直接通知，替代全局事件总线）
//!
//! # 使用场景
//!
//! UI 层和后台触发器只与 [`CommandQueue`] 和 [`PodStateManager`] 交互；
//! 无线收发通过 `pod-radio` 的 [`pod_radio::RadioLink`] 注入。

pub mod command;
mod error;
pub mod hooks;
pub mod persist;
pub mod queue;
pub mod reconcile;
pub mod state;

pub use command::{ActionResult, CommandId, CommandPriority, ResultHandle};
pub use error::DriverError;
pub use hooks::{PodStateObserver, QueueObserver};
pub use persist::{PersistError, PodStateStore};
pub use queue::CommandQueue;
pub use reconcile::ResultReconciler;
pub use state::{PodState, PodStateManager, Uncertainty};
