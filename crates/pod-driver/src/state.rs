//! Pod 状态机
//!
//! 记录激活/停用进度和 Pod 身份/会话数据。状态整体是一个不可变
//! 快照（`ArcSwap` 整体替换）：读取方无锁并发读取，写入方单一
//! （调和器与显式 discard），每次状态变更先持久化、后发布。

use std::sync::Arc;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use pod_protocol::{ActivationProgress, CommandClass};
use tracing::{debug, error, info, warn};

use crate::error::DriverError;
use crate::hooks::{ObserverRegistry, PodStateObserver};
use crate::persist::PodStateStore;

/// 不确定标志
///
/// 上一条命令超时且物理效果未确认时设置。`sequence_baseline` 是
/// 发出该命令前最后已知的设备序号，是后续状态读取判定"已执行/
/// 未执行"的证据基线。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uncertainty {
    /// 被锁定的命令类别
    pub class: CommandClass,
    /// 命令发出前最后已知的设备序号（从未通信过则为 None）
    pub sequence_baseline: Option<u8>,
    /// 命令若已执行应达到的里程碑（非生命周期命令为 None）
    pub pending_milestone: Option<ActivationProgress>,
}

/// Pod 状态快照
///
/// 整体替换、整体持久化。`activation_progress` 除显式 discard 外
/// 单调不减。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PodState {
    /// Pod 地址（配对前为 None）
    pub pod_address: Option<u32>,
    /// 激活进度
    pub activation_progress: ActivationProgress,
    /// 最后一次成功通信时间（unix 毫秒）
    pub last_successful_communication: Option<u64>,
    /// 会话密钥（不透明字节）
    pub session_key: Option<Vec<u8>>,
    /// nonce（不透明字节）
    pub nonce: Option<Vec<u8>>,
    /// 最后已知的设备命令序号
    pub last_sequence_number: Option<u8>,
    /// 不确定标志（见 [`Uncertainty`]）
    pub uncertainty: Option<Uncertainty>,
}

impl PodState {
    /// 是否记录过任何身份数据（配对尝试之后为 true）
    pub fn has_pod_state(&self) -> bool {
        self.pod_address.is_some()
    }

    /// 配对握手是否完整完成
    pub fn is_pod_initialized(&self) -> bool {
        self.pod_address.is_some()
            && self
                .activation_progress
                .is_at_least(ActivationProgress::PairingCompleted)
    }

    /// 激活是否到达终态
    pub fn is_pod_activation_completed(&self) -> bool {
        self.activation_progress
            .is_at_least(ActivationProgress::Completed)
    }
}

/// Pod 状态管理器
///
/// # 并发模型
///
/// - 读取：`snapshot()` 为 wait-free 的 `ArcSwap::load`，任意线程并发
/// - 写入：`write_lock` 串行化全部写入方；先写持久化存储，成功后
///   才发布新快照（崩溃一致性：断电后进度绝不超前于持久化记录）
pub struct PodStateManager {
    state: ArcSwap<PodState>,
    write_lock: Mutex<()>,
    store: Option<PodStateStore>,
    observers: RwLock<ObserverRegistry<dyn PodStateObserver>>,
}

impl PodStateManager {
    /// 创建带持久化存储的管理器
    ///
    /// 启动时从存储加载状态；不可读/损坏的记录按"无 Pod"处理
    /// （失败关闭，不 panic）。
    pub fn with_store(store: PodStateStore) -> Self {
        let initial = store.load().unwrap_or_default();
        PodStateManager {
            state: ArcSwap::from_pointee(initial),
            write_lock: Mutex::new(()),
            store: Some(store),
            observers: RwLock::new(ObserverRegistry::new()),
        }
    }

    /// 创建无持久化的管理器（测试用）
    pub fn ephemeral() -> Self {
        PodStateManager {
            state: ArcSwap::from_pointee(PodState::default()),
            write_lock: Mutex::new(()),
            store: None,
            observers: RwLock::new(ObserverRegistry::new()),
        }
    }

    /// 获取当前状态快照（无锁）
    pub fn snapshot(&self) -> Arc<PodState> {
        self.state.load_full()
    }

    /// 是否记录过身份数据
    pub fn has_pod_state(&self) -> bool {
        self.state.load().has_pod_state()
    }

    /// 配对握手是否完整完成
    pub fn is_pod_initialized(&self) -> bool {
        self.state.load().is_pod_initialized()
    }

    /// 激活是否到达终态
    pub fn is_pod_activation_completed(&self) -> bool {
        self.state.load().is_pod_activation_completed()
    }

    /// 当前激活进度
    pub fn activation_progress(&self) -> ActivationProgress {
        self.state.load().activation_progress
    }

    /// 当前被不确定标志锁定的命令类别
    pub fn uncertain_class(&self) -> Option<CommandClass> {
        self.state.load().uncertainty.map(|u| u.class)
    }

    /// 注册状态观察者
    pub fn add_observer(&self, observer: Arc<dyn PodStateObserver>) {
        if let Ok(mut observers) = self.observers.write() {
            observers.add(observer);
        }
    }

    /// 注销状态观察者
    pub fn remove_observer(&self, observer: &Arc<dyn PodStateObserver>) {
        if let Ok(mut observers) = self.observers.write() {
            observers.remove(observer);
        }
    }

    /// 推进激活进度
    ///
    /// 等于当前进度为幂等成功；严格低于当前进度是程序错误，返回
    /// `DriverError::Regression`（回退只能通过 `discard`）。
    ///
    /// # 错误
    /// - `DriverError::Regression`: 目标里程碑低于当前进度
    /// - `DriverError::Persistence`: 持久化失败，状态未变
    pub fn advance(&self, milestone: ActivationProgress) -> Result<(), DriverError> {
        let _guard = self.write_lock.lock();
        let current = self.state.load().activation_progress;
        if milestone < current {
            return Err(DriverError::Regression {
                current,
                requested: milestone,
            });
        }
        if milestone == current {
            return Ok(());
        }
        self.publish_locked(|state| {
            state.activation_progress = milestone;
        })?;
        info!("Activation progress advanced to {:?}", milestone);
        Ok(())
    }

    /// 丢弃 Pod 状态
    ///
    /// 无条件重置为空状态，总是成功。持久化失败只记录日志：物理上
    /// 已知死亡的 Pod 状态必须立即作废，内存状态优先清空。
    pub fn discard(&self) {
        let _guard = self.write_lock.lock();
        if let Err(e) = self.publish_locked(|state| {
            *state = PodState::default();
        }) {
            error!("Failed to persist discarded pod state: {}", e);
            // 内存状态仍然清空（publish_locked 失败路径未发布），这里强制发布
            self.force_publish(PodState::default());
        }
        info!("Pod state discarded");
    }

    /// 记录 Pod 身份/会话数据（首次配对尝试时创建状态）
    pub fn record_pod_identity(
        &self,
        address: u32,
        session_key: Option<Vec<u8>>,
        nonce: Option<Vec<u8>>,
    ) -> Result<(), DriverError> {
        let _guard = self.write_lock.lock();
        self.publish_locked(|state| {
            state.pod_address = Some(address);
            state.session_key = session_key.clone();
            state.nonce = nonce.clone();
        })?;
        debug!(
            "Pod identity recorded: address={:08X}, session_key={}",
            address,
            session_key.as_deref().map(hex::encode).unwrap_or_default()
        );
        Ok(())
    }

    /// 记录一次成功通信（时间戳 + 设备序号）
    pub fn record_successful_communication(
        &self,
        sequence_number: Option<u8>,
    ) -> Result<(), DriverError> {
        let _guard = self.write_lock.lock();
        self.publish_locked(|state| {
            state.last_successful_communication = Some(now_millis());
            if sequence_number.is_some() {
                state.last_sequence_number = sequence_number;
            }
        })
    }

    /// 设置不确定标志
    ///
    /// 持久化失败时**仍然**发布内存标志（锁定同类命令比放行更保守），
    /// 并把错误返回给调用方。
    pub fn mark_uncertain(&self, uncertainty: Uncertainty) -> Result<(), DriverError> {
        let _guard = self.write_lock.lock();
        warn!(
            "Marking command class {:?} as uncertain (sequence baseline: {:?})",
            uncertainty.class, uncertainty.sequence_baseline
        );
        match self.publish_locked(|state| {
            state.uncertainty = Some(uncertainty);
        }) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Failed to persist uncertainty flag: {}", e);
                let mut next = (**self.state.load()).clone();
                next.uncertainty = Some(uncertainty);
                self.force_publish(next);
                Err(e)
            },
        }
    }

    /// 清除不确定标志（状态读取已解除歧义后调用）
    pub fn clear_uncertainty(&self) -> Result<(), DriverError> {
        let _guard = self.write_lock.lock();
        self.publish_locked(|state| {
            state.uncertainty = None;
        })
    }

    /// 先持久化、后发布的统一写路径（调用方必须持有 write_lock）
    fn publish_locked(&self, f: impl FnOnce(&mut PodState)) -> Result<(), DriverError> {
        let mut next = (**self.state.load()).clone();
        f(&mut next);
        if let Some(store) = &self.store {
            store.save(&next)?;
        }
        self.force_publish(next);
        Ok(())
    }

    fn force_publish(&self, next: PodState) {
        let next = Arc::new(next);
        self.state.store(next.clone());
        if let Ok(observers) = self.observers.read() {
            observers.for_each(|o| o.on_pod_state_changed(&next));
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
