//! Pod 管理门面
//!
//! 面向调用方（UI、自动化触发器）的高层 API：把播放蜂鸣、推进
//! 激活这类意图翻译为队列提交，并暴露控件刷新所需的查询接口。
//! 所有操作立即返回结果句柄，不在调用线程上做链路往返。

use std::sync::Arc;

use pod_driver::{
    CommandQueue, DriverError, PodState, PodStateManager, ResultHandle,
};
use pod_protocol::{ActivationProgress, ActivationStep, CustomCommand, PumpCommand};
use pod_radio::RadioLink;
use tracing::info;

/// Pod 管理器
///
/// 持有命令队列与状态管理器的组合根。析构时队列停机并冲刷
/// 未执行的命令（见 [`CommandQueue`] 的销毁语义）。
pub struct PodManager {
    state: Arc<PodStateManager>,
    queue: CommandQueue,
}

impl PodManager {
    /// 在给定链路与状态管理器之上创建管理器
    pub fn new(link: Box<dyn RadioLink>, state: Arc<PodStateManager>) -> Self {
        let queue = CommandQueue::new(link, state.clone());
        PodManager { state, queue }
    }

    /// 状态管理器（注册观察者、读取快照）
    pub fn state(&self) -> &Arc<PodStateManager> {
        &self.state
    }

    /// 底层命令队列（细粒度控制：优先级提交、取消）
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// 当前 Pod 状态快照
    pub fn pod_state(&self) -> Arc<PodState> {
        self.state.snapshot()
    }

    /// 播放测试蜂鸣
    pub fn play_test_beep(&self) -> Result<ResultHandle, DriverError> {
        self.queue
            .submit(PumpCommand::Custom(CustomCommand::PlayTestBeep))
    }

    /// 读取脉冲日志
    pub fn read_pulse_log(&self) -> Result<ResultHandle, DriverError> {
        self.queue
            .submit(PumpCommand::Custom(CustomCommand::ReadPulseLog))
    }

    /// 暂停输注
    pub fn suspend_delivery(&self) -> Result<ResultHandle, DriverError> {
        self.queue
            .submit(PumpCommand::Custom(CustomCommand::SuspendDelivery))
    }

    /// 恢复输注
    pub fn resume_delivery(&self) -> Result<ResultHandle, DriverError> {
        self.queue
            .submit(PumpCommand::Custom(CustomCommand::ResumeDelivery))
    }

    /// 推注
    pub fn bolus(&self, units_milli: u32) -> Result<ResultHandle, DriverError> {
        self.queue.submit(PumpCommand::Bolus { units_milli })
    }

    /// 读取设备状态（高优先级，同时用于解除不确定状态）
    pub fn read_status(&self) -> Result<ResultHandle, DriverError> {
        self.queue.submit(PumpCommand::GetStatus)
    }

    /// 当前进度对应的下一个激活步骤
    ///
    /// 激活已完成（或已进入停用）时返回 `None`。中断在半途的进度
    /// （如 `Priming`）归入其所属步骤重做。
    pub fn next_activation_step(&self) -> Option<ActivationStep> {
        match self.state.activation_progress() {
            ActivationProgress::None => Some(ActivationStep::Pair),
            ActivationProgress::PairingCompleted | ActivationProgress::Priming => {
                Some(ActivationStep::Prime)
            },
            ActivationProgress::PrimingCompleted => Some(ActivationStep::InitializeBasal),
            ActivationProgress::BasalInitialized | ActivationProgress::InsertingCannula => {
                Some(ActivationStep::InsertCannula)
            },
            ActivationProgress::Completed
            | ActivationProgress::DeactivationStarted
            | ActivationProgress::Deactivated => None,
        }
    }

    /// 提交指定激活步骤
    pub fn activate_step(&self, step: ActivationStep) -> Result<ResultHandle, DriverError> {
        self.queue.submit(PumpCommand::Activate(step))
    }

    /// 停用 Pod（高优先级）
    pub fn deactivate(&self) -> Result<ResultHandle, DriverError> {
        self.queue.submit(PumpCommand::Deactivate)
    }

    /// 丢弃 Pod 状态（不与设备通信）
    ///
    /// 面向"Pod 已物理移除/报废"的场景：设备不可达，状态直接作废。
    pub fn discard_pod(&self) {
        info!("Discarding pod state on caller request");
        self.state.discard();
    }

    /// 指定标签的自定义命令是否在排队或在途（控件刷新用）
    pub fn is_command_pending(&self, tag: CustomCommand) -> bool {
        self.queue.is_command_pending(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pod_radio::mock::MockRadioLink;
    use std::time::Duration;

    fn manager_with_mock() -> (PodManager, pod_radio::mock::MockRadioHandle) {
        let (link, handle) = MockRadioLink::new();
        let state = Arc::new(PodStateManager::ephemeral());
        (PodManager::new(Box::new(link), state), handle)
    }

    #[test]
    fn test_beep_roundtrip() {
        let (manager, _mock) = manager_with_mock();
        let handle = manager.play_test_beep().unwrap();
        let result = handle.wait_timeout(Duration::from_secs(1)).unwrap();
        assert!(result.success);
    }

    #[test]
    fn test_duplicate_beep_blocked_while_pending() {
        let (manager, mock) = manager_with_mock();
        mock.set_send_delay(Duration::from_millis(80));

        let first = manager.play_test_beep().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(manager.is_command_pending(CustomCommand::PlayTestBeep));
        assert!(matches!(
            manager.play_test_beep(),
            Err(DriverError::DuplicateCommand(CustomCommand::PlayTestBeep))
        ));

        assert!(first.wait_timeout(Duration::from_secs(1)).unwrap().success);
        assert!(!manager.is_command_pending(CustomCommand::PlayTestBeep));
    }

    #[test]
    fn test_activation_steps_in_order() {
        let (manager, _mock) = manager_with_mock();

        let mut steps = Vec::new();
        while let Some(step) = manager.next_activation_step() {
            steps.push(step);
            let result = manager
                .activate_step(step)
                .unwrap()
                .wait_timeout(Duration::from_secs(1))
                .unwrap();
            assert!(result.success);
        }

        assert_eq!(
            steps,
            vec![
                ActivationStep::Pair,
                ActivationStep::Prime,
                ActivationStep::InitializeBasal,
                ActivationStep::InsertCannula,
            ]
        );
        assert!(manager.state().is_pod_activation_completed());
        assert_eq!(manager.next_activation_step(), None);
    }

    #[test]
    fn test_discard_pod_resets_state_without_radio() {
        let (manager, mock) = manager_with_mock();
        manager
            .state()
            .record_pod_identity(0xDEAD_BEEF, None, None)
            .unwrap();
        manager
            .activate_step(ActivationStep::Pair)
            .unwrap()
            .wait_timeout(Duration::from_secs(1))
            .unwrap();
        let sent_before = mock.sent_count();

        manager.discard_pod();
        assert!(!manager.state().has_pod_state());
        // 丢弃不产生链路流量
        assert_eq!(mock.sent_count(), sent_before);
        // 丢弃后可以从头激活
        assert_eq!(manager.next_activation_step(), Some(ActivationStep::Pair));
    }

    #[test]
    fn test_deactivate_discards_state() {
        let (manager, _mock) = manager_with_mock();
        manager
            .state()
            .record_pod_identity(0x1234_0000, None, None)
            .unwrap();
        let result = manager
            .deactivate()
            .unwrap()
            .wait_timeout(Duration::from_secs(1))
            .unwrap();
        assert!(result.success);
        assert!(!manager.state().has_pod_state());
    }
}
