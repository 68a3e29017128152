//! 泵命令词汇表
//!
//! 区分两类命令：
//! - 内建命令：状态读取、推注、激活/停用步骤等常规流量
//! - 自定义命令（Custom）：一次性、带类型标签的命令（如测试蜂鸣），
//!   队列层按标签去重，同一标签同时最多存在一个排队/在途实例

use serde::{Deserialize, Serialize};

use crate::progress::ActivationProgress;

/// 激活流程的单个步骤
///
/// 每个步骤对应一个目标里程碑，步骤成功后由调和器推进进度。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationStep {
    /// 配对握手（分配地址、交换会话密钥）
    Pair,
    /// 充注储药器
    Prime,
    /// 写入基础率方案
    InitializeBasal,
    /// 插入套管，完成激活
    InsertCannula,
}

impl ActivationStep {
    /// 步骤成功后应达到的里程碑
    pub fn target_milestone(self) -> ActivationProgress {
        match self {
            ActivationStep::Pair => ActivationProgress::PairingCompleted,
            ActivationStep::Prime => ActivationProgress::PrimingCompleted,
            ActivationStep::InitializeBasal => ActivationProgress::BasalInitialized,
            ActivationStep::InsertCannula => ActivationProgress::Completed,
        }
    }
}

/// 自定义命令类型标签（去重键）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomCommand {
    /// 播放测试蜂鸣
    PlayTestBeep,
    /// 读取脉冲日志
    ReadPulseLog,
    /// 暂停输注
    SuspendDelivery,
    /// 恢复输注
    ResumeDelivery,
}

/// 泵命令（内建 | 自定义）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpCommand {
    /// 状态读取（同时用于解除不确定状态）
    GetStatus,
    /// 推注，单位为千分之一单位（0.001 U）
    Bolus { units_milli: u32 },
    /// 激活流程步骤
    Activate(ActivationStep),
    /// 停用 Pod
    Deactivate,
    /// 自定义命令
    Custom(CustomCommand),
}

/// 命令类别
///
/// 不确定状态（超时后无法判断设备是否已执行）按类别锁定：
/// 同类命令在状态读取解除不确定之前一律拒绝，避免有物理后果的
/// 动作被二次执行。`Status` 类永远不被锁定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandClass {
    /// 状态读取
    Status,
    /// 输注类（推注、暂停/恢复），物理后果最重
    Delivery,
    /// 生命周期类（激活步骤、停用）
    Lifecycle,
    /// 维护类（蜂鸣、日志读取）
    Maintenance,
}

impl PumpCommand {
    /// 命令所属类别
    pub fn class(&self) -> CommandClass {
        match self {
            PumpCommand::GetStatus => CommandClass::Status,
            PumpCommand::Bolus { .. } => CommandClass::Delivery,
            PumpCommand::Activate(_) | PumpCommand::Deactivate => CommandClass::Lifecycle,
            PumpCommand::Custom(custom) => match custom {
                CustomCommand::SuspendDelivery | CustomCommand::ResumeDelivery => {
                    CommandClass::Delivery
                },
                CustomCommand::PlayTestBeep | CustomCommand::ReadPulseLog => {
                    CommandClass::Maintenance
                },
            },
        }
    }

    /// 自定义命令的类型标签（内建命令返回 None）
    pub fn custom_tag(&self) -> Option<CustomCommand> {
        match self {
            PumpCommand::Custom(custom) => Some(*custom),
            _ => None,
        }
    }

    /// 编码为传输层字节（标签字节 + 参数）
    ///
    /// 比特级无线帧封装不在本层范围内，链路层负责最终成帧。
    pub fn encode(&self) -> Vec<u8> {
        match self {
            PumpCommand::GetStatus => vec![0x0E],
            PumpCommand::Bolus { units_milli } => {
                let mut bytes = vec![0x1A];
                bytes.extend_from_slice(&units_milli.to_be_bytes());
                bytes
            },
            PumpCommand::Activate(step) => vec![
                0x03,
                match step {
                    ActivationStep::Pair => 0x01,
                    ActivationStep::Prime => 0x02,
                    ActivationStep::InitializeBasal => 0x03,
                    ActivationStep::InsertCannula => 0x04,
                },
            ],
            PumpCommand::Deactivate => vec![0x1C],
            PumpCommand::Custom(custom) => vec![
                0x1F,
                match custom {
                    CustomCommand::PlayTestBeep => 0x01,
                    CustomCommand::ReadPulseLog => 0x02,
                    CustomCommand::SuspendDelivery => 0x03,
                    CustomCommand::ResumeDelivery => 0x04,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_class_mapping() {
        assert_eq!(PumpCommand::GetStatus.class(), CommandClass::Status);
        assert_eq!(
            PumpCommand::Bolus { units_milli: 1500 }.class(),
            CommandClass::Delivery
        );
        assert_eq!(
            PumpCommand::Activate(ActivationStep::Prime).class(),
            CommandClass::Lifecycle
        );
        assert_eq!(PumpCommand::Deactivate.class(), CommandClass::Lifecycle);
        assert_eq!(
            PumpCommand::Custom(CustomCommand::PlayTestBeep).class(),
            CommandClass::Maintenance
        );
        assert_eq!(
            PumpCommand::Custom(CustomCommand::SuspendDelivery).class(),
            CommandClass::Delivery
        );
    }

    #[test]
    fn test_custom_tag() {
        assert_eq!(
            PumpCommand::Custom(CustomCommand::ReadPulseLog).custom_tag(),
            Some(CustomCommand::ReadPulseLog)
        );
        assert_eq!(PumpCommand::GetStatus.custom_tag(), None);
    }

    #[test]
    fn test_activation_step_targets_ascend() {
        let steps = [
            ActivationStep::Pair,
            ActivationStep::Prime,
            ActivationStep::InitializeBasal,
            ActivationStep::InsertCannula,
        ];
        for pair in steps.windows(2) {
            assert!(pair[1].target_milestone() > pair[0].target_milestone());
        }
    }

    #[test]
    fn test_encode_tag_bytes_distinct() {
        let commands = [
            PumpCommand::GetStatus,
            PumpCommand::Bolus { units_milli: 100 },
            PumpCommand::Activate(ActivationStep::Pair),
            PumpCommand::Deactivate,
            PumpCommand::Custom(CustomCommand::PlayTestBeep),
        ];
        let tags: Vec<u8> = commands.iter().map(|c| c.encode()[0]).collect();
        for (i, a) in tags.iter().enumerate() {
            for b in &tags[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_command_class_serde_stable_names() {
        // 类别名进入持久化的状态记录，序列化名称不可随意改动
        assert_eq!(
            serde_json::to_string(&CommandClass::Delivery).unwrap(),
            r#""Delivery""#
        );
        let class: CommandClass = serde_json::from_str(r#""Lifecycle""#).unwrap();
        assert_eq!(class, CommandClass::Lifecycle);
    }

    #[test]
    fn test_encode_bolus_payload() {
        let bytes = PumpCommand::Bolus { units_milli: 0x0102_0304 }.encode();
        assert_eq!(bytes, vec![0x1A, 0x01, 0x02, 0x03, 0x04]);
    }
}
