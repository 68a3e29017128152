//! 设备应答类型
//!
//! 链路层负责解帧，向上交付结构化应答。状态应答携带设备侧命令序号，
//! 序号是调和器判定"超时但已执行"的唯一证据来源。

use num_enum::FromPrimitive;

/// NACK 拒绝码
///
/// 未知码字归入 `Unknown`（协议可能扩展新码字，拒绝语义不变）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum NackCode {
    /// nonce 校验失败，需要重新同步
    BadNonce = 0x01,
    /// 命令在当前 Pod 状态下不合法
    IllegalState = 0x02,
    /// 设备忙，稍后重试
    Busy = 0x03,
    /// 未知拒绝码
    #[num_enum(default)]
    Unknown = 0xFF,
}

/// 状态应答
///
/// `sequence_number` 是设备每成功执行一条命令递增一次的 4-bit 计数器
/// （回绕语义，见 [`StatusResponse::sequence_advanced_since`]）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusResponse {
    /// 设备侧命令序号（0..=15，回绕）
    pub sequence_number: u8,
    /// 累计已输出脉冲数
    pub delivered_pulses: u32,
    /// 储药器余量（0.001 U），Pod 低于阈值前不上报
    pub reservoir_milli: Option<u32>,
    /// 故障码（无故障为 None）
    pub fault_code: Option<u8>,
}

impl StatusResponse {
    /// 判断序号自基线以来是否前进过
    ///
    /// 序号是 4-bit 回绕计数器，基线与当前值相等视为未前进，
    /// 其余一律视为前进过（队列一次只放行一条命令，两次状态读取
    /// 之间不会累积超过 15 条命令，因此不会误判完整回绕）。
    pub fn sequence_advanced_since(&self, baseline: u8) -> bool {
        (self.sequence_number & 0x0F) != (baseline & 0x0F)
    }
}

/// 设备应答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodResponse {
    /// 确认应答，携带执行后的命令序号
    Ack { sequence_number: u8 },
    /// 拒绝应答：命令未执行，状态未变
    Nack(NackCode),
    /// 状态应答（GetStatus 的返回）
    Status(StatusResponse),
}
