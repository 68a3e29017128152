//! 结果调和器
//!
//! 无线链路上最难的正确性问题：设备可能已经执行了命令（蜂鸣、
//! 推注步骤），但确认应答被噪声吞掉，控制端无法区分"从未执行"
//! 和"已执行、确认丢失"。本模块落实保守偏置契约：
//!
//! - 没有证据绝不假设成功
//! - 存在执行的部分证据时绝不假设失败
//! - 超时后同类命令一律锁定，直到一次状态读取给出证据

use std::sync::Arc;

use pod_protocol::{
    ActivationProgress, CommandClass, PodResponse, PumpCommand, StatusResponse,
};
use pod_radio::RadioError;
use tracing::{debug, info, warn};

use crate::command::ActionResult;
use crate::error::DriverError;
use crate::state::{PodStateManager, Uncertainty};

/// 结果调和器
///
/// 队列 worker 在每条命令往返结束后调用 [`reconcile`](Self::reconcile)，
/// 由它更新 Pod 状态并把原始链路结果折算为一次 [`ActionResult`]。
/// 它是 Pod 状态的唯一常规写入方（显式 discard 除外）。
pub struct ResultReconciler {
    state: Arc<PodStateManager>,
}

impl ResultReconciler {
    pub fn new(state: Arc<PodStateManager>) -> Self {
        ResultReconciler { state }
    }

    /// 调和一次命令往返的结果
    ///
    /// 绝不向上传播 panic / 未处理错误：所有路径折算为 `ActionResult`。
    pub fn reconcile(
        &self,
        command: &PumpCommand,
        outcome: Result<PodResponse, RadioError>,
    ) -> ActionResult {
        match outcome {
            Ok(PodResponse::Ack { sequence_number }) => {
                self.on_ack(command, sequence_number)
            },
            Ok(PodResponse::Nack(code)) => {
                // 显式拒绝：未执行，状态不变，可安全重试
                info!("Pod rejected command {:?}: {:?}", command, code);
                ActionResult::failure(format!(
                    "Pod rejected command ({:?}), no state change, safe to retry",
                    code
                ))
            },
            Ok(PodResponse::Status(status)) => self.on_status(status),
            Err(RadioError::Timeout) => self.on_timeout(command),
            Err(RadioError::Link(message)) => {
                // 链路级失败：命令未送达，状态不变
                ActionResult::failure(format!("Link error: {}", message))
            },
            Err(RadioError::NotReady) => ActionResult::failure("Radio link not ready"),
            Err(RadioError::Io(e)) => ActionResult::failure(format!("Link IO error: {}", e)),
        }
    }

    /// 确认应答：立即推进状态
    fn on_ack(&self, command: &PumpCommand, sequence_number: u8) -> ActionResult {
        if let Err(e) = self
            .state
            .record_successful_communication(Some(sequence_number))
        {
            warn!("Failed to record communication time: {}", e);
        }

        match command {
            PumpCommand::Activate(step) => {
                match self.state.advance(step.target_milestone()) {
                    Ok(()) => ActionResult::ok_with_comment(format!(
                        "Activation step {:?} completed",
                        step
                    )),
                    Err(e) => ActionResult::failure(e.to_string()),
                }
            },
            PumpCommand::Deactivate => {
                // 停用成功即销毁状态（"无 Pod"）
                self.state.discard();
                ActionResult::ok_with_comment("Pod deactivated, state discarded")
            },
            _ => {
                debug!("Command {:?} acknowledged (seq {})", command, sequence_number);
                ActionResult::ok()
            },
        }
    }

    /// 状态应答：更新序号并在有不确定标志时解除歧义
    fn on_status(&self, status: StatusResponse) -> ActionResult {
        let uncertainty = self.state.snapshot().uncertainty;

        if let Err(e) = self
            .state
            .record_successful_communication(Some(status.sequence_number))
        {
            warn!("Failed to record communication time: {}", e);
        }

        let resolution = match uncertainty {
            None => None,
            Some(u) => Some(self.resolve_uncertainty(u, &status)),
        };

        match resolution {
            None => {
                if let Some(fault) = status.fault_code {
                    warn!("Pod reports fault code 0x{:02X}", fault);
                    ActionResult::ok_with_comment(format!("Pod fault code 0x{:02X}", fault))
                } else {
                    ActionResult::ok()
                }
            },
            Some(Ok(comment)) => ActionResult::ok_with_comment(comment),
            Some(Err(e)) => ActionResult::failure(e.to_string()),
        }
    }

    /// 用状态应答的序号证据解除不确定标志
    ///
    /// 证据规则：设备每成功执行一条命令，序号递增一次。序号越过
    /// 基线 ⇒ 不确定的命令实际执行过 ⇒ 追溯为成功（生命周期步骤
    /// 补推进度）；序号未动 ⇒ 确认未执行。没有基线（从未通信过）
    /// 时无证据可言，保守按未执行处理但不追溯成功。
    fn resolve_uncertainty(
        &self,
        uncertainty: Uncertainty,
        status: &StatusResponse,
    ) -> Result<String, DriverError> {
        let executed = uncertainty
            .sequence_baseline
            .map(|baseline| status.sequence_advanced_since(baseline))
            .unwrap_or(false);

        if executed {
            info!(
                "Status read resolved uncertain {:?} command as executed (seq {:?} -> {})",
                uncertainty.class, uncertainty.sequence_baseline, status.sequence_number
            );
            match uncertainty.pending_milestone {
                Some(ActivationProgress::Deactivated) => {
                    // 停用实际已发生：销毁状态（discard 自带清除不确定标志）
                    self.state.discard();
                    return Ok("Uncertain deactivation confirmed executed, state discarded"
                        .to_string());
                },
                Some(milestone) => self.state.advance(milestone)?,
                None => {},
            }
            self.state.clear_uncertainty()?;
            Ok(format!(
                "Uncertain {:?} command confirmed executed",
                uncertainty.class
            ))
        } else {
            info!(
                "Status read resolved uncertain {:?} command as not executed",
                uncertainty.class
            );
            self.state.clear_uncertainty()?;
            Ok(format!(
                "Uncertain {:?} command confirmed not executed, safe to retry",
                uncertainty.class
            ))
        }
    }

    /// 超时：标记失败并按命令类别设置不确定标志
    fn on_timeout(&self, command: &PumpCommand) -> ActionResult {
        let class = command.class();

        // 状态读取没有物理后果，超时不设置不确定标志
        if class == CommandClass::Status {
            return ActionResult::failure("No response to status read");
        }

        let snapshot = self.state.snapshot();
        let pending_milestone = match command {
            PumpCommand::Activate(step) => Some(step.target_milestone()),
            PumpCommand::Deactivate => Some(ActivationProgress::Deactivated),
            _ => None,
        };
        let uncertainty = Uncertainty {
            class,
            sequence_baseline: snapshot.last_sequence_number,
            pending_milestone,
        };

        match self.state.mark_uncertain(uncertainty) {
            Ok(()) => ActionResult::failure(format!(
                "No response from pod, command may have been executed; \
                 {:?} commands blocked until a status read resolves the uncertainty",
                class
            )),
            Err(e) => ActionResult::failure(format!(
                "No response from pod and the uncertainty flag could not be persisted: {}",
                e
            )),
        }
    }
}
