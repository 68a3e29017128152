//! Mock 链路实现
//!
//! 按脚本回放应答序列，用于在没有真实无线硬件的情况下测试队列和
//! 调和逻辑。控制句柄与链路实例共享内部状态，测试线程通过句柄注入
//! 应答、读取已发送命令。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pod_protocol::{NackCode, PodResponse, StatusResponse};

use crate::{LinkState, RadioError, RadioLink};

/// 脚本化的单次往返结果
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// 确认应答
    Ack { sequence_number: u8 },
    /// 拒绝应答
    Nack(NackCode),
    /// 状态应答
    Status(StatusResponse),
    /// 超时（无应答）
    Timeout,
    /// 链路级失败
    LinkError(String),
}

struct MockInner {
    script: VecDeque<ScriptedOutcome>,
    sent: Vec<Vec<u8>>,
    link_state: LinkState,
    send_delay: Duration,
    /// 脚本耗尽时自动 Ack 使用的递增序号
    auto_sequence: u8,
    /// 当前处于 `send` 往返中的调用数
    active_sends: usize,
    /// 观测到的最大并发往返数（单飞不变量下应恒为 1）
    max_active_sends: usize,
}

/// Mock 链路（交给队列 worker 持有）
pub struct MockRadioLink {
    inner: Arc<Mutex<MockInner>>,
}

/// Mock 控制句柄（留在测试线程）
#[derive(Clone)]
pub struct MockRadioHandle {
    inner: Arc<Mutex<MockInner>>,
}

impl MockRadioLink {
    /// 创建链路实例和控制句柄
    pub fn new() -> (MockRadioLink, MockRadioHandle) {
        let inner = Arc::new(Mutex::new(MockInner {
            script: VecDeque::new(),
            sent: Vec::new(),
            link_state: LinkState::Ready,
            send_delay: Duration::ZERO,
            auto_sequence: 0,
            active_sends: 0,
            max_active_sends: 0,
        }));
        (
            MockRadioLink {
                inner: inner.clone(),
            },
            MockRadioHandle { inner },
        )
    }
}

impl MockRadioHandle {
    /// 注入一次脚本化结果（FIFO 消费）
    pub fn enqueue(&self, outcome: ScriptedOutcome) {
        self.inner.lock().script.push_back(outcome);
    }

    /// 注入一次 Ack
    pub fn enqueue_ack(&self, sequence_number: u8) {
        self.enqueue(ScriptedOutcome::Ack { sequence_number });
    }

    /// 注入一次 Nack
    pub fn enqueue_nack(&self, code: NackCode) {
        self.enqueue(ScriptedOutcome::Nack(code));
    }

    /// 注入一次状态应答
    pub fn enqueue_status(&self, status: StatusResponse) {
        self.enqueue(ScriptedOutcome::Status(status));
    }

    /// 注入一次超时
    pub fn enqueue_timeout(&self) {
        self.enqueue(ScriptedOutcome::Timeout);
    }

    /// 设置链路状态（影响 `link_state()` 与后续 `send`）
    pub fn set_link_state(&self, state: LinkState) {
        self.inner.lock().link_state = state;
    }

    /// 设置每次 `send` 的人为延迟（测试并发提交时使用）
    pub fn set_send_delay(&self, delay: Duration) {
        self.inner.lock().send_delay = delay;
    }

    /// 取走已发送的命令字节（清空记录）
    pub fn take_sent_commands(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.inner.lock().sent)
    }

    /// 已发送命令数
    pub fn sent_count(&self) -> usize {
        self.inner.lock().sent.len()
    }

    /// 观测到的最大并发往返数
    ///
    /// 队列的单飞约束成立时恒为 1（或 0，若从未发送）。
    pub fn max_active_sends(&self) -> usize {
        self.inner.lock().max_active_sends
    }
}

impl RadioLink for MockRadioLink {
    fn send(&mut self, command: &[u8]) -> Result<PodResponse, RadioError> {
        let (outcome, delay) = {
            let mut inner = self.inner.lock();
            if !inner.link_state.is_ready() {
                return Err(RadioError::NotReady);
            }
            inner.sent.push(command.to_vec());
            let outcome = inner.script.pop_front().unwrap_or_else(|| {
                inner.auto_sequence = (inner.auto_sequence + 1) & 0x0F;
                ScriptedOutcome::Ack {
                    sequence_number: inner.auto_sequence,
                }
            });
            inner.active_sends += 1;
            inner.max_active_sends = inner.max_active_sends.max(inner.active_sends);
            (outcome, inner.send_delay)
        };

        // 锁外休眠：若上层违反单飞约束，这里会观测到并发往返
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.inner.lock().active_sends -= 1;

        match outcome {
            ScriptedOutcome::Ack { sequence_number } => Ok(PodResponse::Ack { sequence_number }),
            ScriptedOutcome::Nack(code) => Ok(PodResponse::Nack(code)),
            ScriptedOutcome::Status(status) => Ok(PodResponse::Status(status)),
            ScriptedOutcome::Timeout => Err(RadioError::Timeout),
            ScriptedOutcome::LinkError(message) => Err(RadioError::Link(message)),
        }
    }

    fn link_state(&self) -> LinkState {
        self.inner.lock().link_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_scripted_outcomes_fifo() {
        let (mut link, handle) = MockRadioLink::new();
        handle.enqueue_ack(3);
        handle.enqueue_timeout();

        assert!(matches!(
            link.send(&[0x0E]),
            Ok(PodResponse::Ack { sequence_number: 3 })
        ));
        assert!(matches!(link.send(&[0x0E]), Err(RadioError::Timeout)));
    }

    #[test]
    fn test_mock_auto_ack_when_script_empty() {
        let (mut link, _handle) = MockRadioLink::new();
        let first = link.send(&[0x0E]).unwrap();
        let second = link.send(&[0x0E]).unwrap();
        match (first, second) {
            (
                PodResponse::Ack { sequence_number: a },
                PodResponse::Ack { sequence_number: b },
            ) => assert_ne!(a, b),
            other => panic!("Unexpected responses: {:?}", other),
        }
    }

    #[test]
    fn test_mock_not_ready_rejects_send() {
        let (mut link, handle) = MockRadioLink::new();
        handle.set_link_state(LinkState::NotReady);
        assert!(matches!(link.send(&[0x0E]), Err(RadioError::NotReady)));
        // 未就绪时不记录发送
        assert_eq!(handle.sent_count(), 0);
    }

    #[test]
    fn test_mock_records_sent_commands() {
        let (mut link, handle) = MockRadioLink::new();
        link.send(&[0x0E]).unwrap();
        link.send(&[0x1C]).unwrap();
        let sent = handle.take_sent_commands();
        assert_eq!(sent, vec![vec![0x0E], vec![0x1C]]);
        assert_eq!(handle.sent_count(), 0);
    }
}
