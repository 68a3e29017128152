//! Pod 状态持久化
//!
//! 状态序列化为带版本号的 JSON 记录写入单个文件：
//!
//! ```text
//! { "version": 1, "pod_address": ..., "progress": <ordinal>, ... }
//! ```
//!
//! 写入走临时文件 + 原子重命名，返回前已落盘；加载端失败关闭：
//! 文件缺失、JSON 损坏、版本过新、序数未知一律按"无 Pod"处理，
//! 绝不 panic。未来版本新增的未知字段在加载时被忽略（向前兼容）。

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use pod_protocol::{ActivationProgress, CommandClass};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::state::{PodState, Uncertainty};

/// 当前状态记录格式版本
pub const STATE_FORMAT_VERSION: u8 = 1;

/// 持久化错误
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 磁盘上的状态记录
///
/// 与 [`PodState`] 解耦：磁盘布局的演进不影响内存表示。
/// 不透明字节以 hex 字符串存储，记录文件可被人工检视。
#[derive(Debug, Serialize, Deserialize)]
struct PersistedPodState {
    version: u8,
    pod_address: Option<u32>,
    progress: u8,
    last_successful_communication: Option<u64>,
    session_key: Option<String>,
    nonce: Option<String>,
    last_sequence_number: Option<u8>,
    uncertainty: Option<PersistedUncertainty>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedUncertainty {
    class: CommandClass,
    sequence_baseline: Option<u8>,
    pending_milestone: Option<u8>,
}

/// Pod 状态存储
pub struct PodStateStore {
    path: PathBuf,
}

impl PodStateStore {
    /// 创建指向给定文件路径的存储
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PodStateStore { path: path.into() }
    }

    /// 状态文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 加载状态
    ///
    /// 返回 `None` 表示"无 Pod"：文件缺失，或记录不可用（损坏、
    /// 版本过新、序数未知）。不可用的记录只告警，不报错。
    pub fn load(&self) -> Option<PodState> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read pod state file, treating as no pod: {}", e);
                return None;
            },
        };

        let record: PersistedPodState = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!("Corrupt pod state record, treating as no pod: {}", e);
                return None;
            },
        };

        if record.version > STATE_FORMAT_VERSION {
            warn!(
                "Pod state record version {} is newer than supported {}, treating as no pod",
                record.version, STATE_FORMAT_VERSION
            );
            return None;
        }

        let progress = match ActivationProgress::try_from(record.progress) {
            Ok(progress) => progress,
            Err(_) => {
                warn!(
                    "Unknown activation progress ordinal {}, treating as no pod",
                    record.progress
                );
                return None;
            },
        };

        let uncertainty = match record.uncertainty {
            None => None,
            Some(u) => {
                let pending_milestone = match u.pending_milestone {
                    None => None,
                    Some(ordinal) => match ActivationProgress::try_from(ordinal) {
                        Ok(milestone) => Some(milestone),
                        Err(_) => {
                            warn!(
                                "Unknown pending milestone ordinal {}, treating as no pod",
                                ordinal
                            );
                            return None;
                        },
                    },
                };
                Some(Uncertainty {
                    class: u.class,
                    sequence_baseline: u.sequence_baseline,
                    pending_milestone,
                })
            },
        };

        let session_key = match record.session_key.as_deref().map(hex::decode) {
            None => None,
            Some(Ok(bytes)) => Some(bytes),
            Some(Err(e)) => {
                warn!("Corrupt session key in pod state record, treating as no pod: {}", e);
                return None;
            },
        };
        let nonce = match record.nonce.as_deref().map(hex::decode) {
            None => None,
            Some(Ok(bytes)) => Some(bytes),
            Some(Err(e)) => {
                warn!("Corrupt nonce in pod state record, treating as no pod: {}", e);
                return None;
            },
        };

        debug!("Loaded pod state record (progress: {:?})", progress);
        Some(PodState {
            pod_address: record.pod_address,
            activation_progress: progress,
            last_successful_communication: record.last_successful_communication,
            session_key,
            nonce,
            last_sequence_number: record.last_sequence_number,
            uncertainty,
        })
    }

    /// 保存状态
    ///
    /// 写入临时文件并 flush 后原子重命名到目标路径，调用返回时
    /// 记录已落盘。失败时目标文件保持原内容（之前的持久化状态
    /// 仍然权威）。
    pub fn save(&self, state: &PodState) -> Result<(), PersistError> {
        let record = PersistedPodState {
            version: STATE_FORMAT_VERSION,
            pod_address: state.pod_address,
            progress: state.activation_progress.ordinal(),
            last_successful_communication: state.last_successful_communication,
            session_key: state.session_key.as_deref().map(hex::encode),
            nonce: state.nonce.as_deref().map(hex::encode),
            last_sequence_number: state.last_sequence_number,
            uncertainty: state.uncertainty.map(|u| PersistedUncertainty {
                class: u.class,
                sequence_baseline: u.sequence_baseline,
                pending_milestone: u.pending_milestone.map(|m| m.ordinal()),
            }),
        };

        let tmp_path = self.path.with_extension("tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, &record)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
