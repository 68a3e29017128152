//! 激活进度里程碑
//!
//! Pod 生命周期是多步流程（配对 → 充注 → 基础率初始化 → 插入套管 → 完成），
//! 里程碑之间是全序关系：序数严格递增，任意两个里程碑不共享同一序数。
//! 比较语义使用 "at least"（序数 >= 目标序数）。

use num_enum::TryFromPrimitive;

/// 激活/停用进度里程碑（全序）
///
/// 序数显式固定，持久化记录中只存储序数本身。
/// 未知序数（来自更新固件的未来版本）视为记录损坏，由加载方做失败关闭处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum ActivationProgress {
    /// 无进度（初始状态 / discard 之后）
    #[default]
    None = 0,
    /// 配对握手完成（已分配 Pod 地址）
    PairingCompleted = 1,
    /// 充注指令已下发
    Priming = 2,
    /// 充注完成
    PrimingCompleted = 3,
    /// 基础率方案已写入
    BasalInitialized = 4,
    /// 套管插入指令已下发
    InsertingCannula = 5,
    /// 激活完成，Pod 进入正常输注
    Completed = 6,
    /// 停用流程已开始
    DeactivationStarted = 7,
    /// 停用完成（Pod 已停机）
    Deactivated = 8,
}

impl ActivationProgress {
    /// 当前进度是否达到目标里程碑（序数比较）
    pub fn is_at_least(self, target: ActivationProgress) -> bool {
        self as u8 >= target as u8
    }

    /// 获取序数（用于持久化）
    pub fn ordinal(self) -> u8 {
        self as u8
    }
}
