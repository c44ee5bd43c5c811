//! 전송 세션 상태 머신
//!
//! ```text
//! pending ──accept/시작──▶ transferring ──전체 수신 + complete──▶ completed
//!    │                         ├──취소──▶ cancelled
//!    └──거절/실패──▶ failed ◀──┘ 채널 에러, 잘못된 청크 순서
//! ```
//!
//! completed / failed / cancelled 는 종료 상태이며 이후 전이 없음.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::message::{FileDescriptor, PeerId, TransferId};
use crate::{Error, Result};

/// 전송 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Transferring,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }

    /// 허용된 전이인지 확인
    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Pending, Transferring)
                | (Pending, Failed)
                | (Transferring, Completed)
                | (Transferring, Cancelled)
                | (Transferring, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Transferring => "transferring",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 전송 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// 보내는 쪽 (전송 ID 생성)
    Outbound,
    /// 받는 쪽
    Inbound,
}

/// 청크 기록 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// transferred_size 에 반영됨
    Counted,
    /// 전송 중이 아니라서 무시됨 (대기 중이거나 이미 종료됨)
    Ignored,
}

/// 전송 세션
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSession {
    id: TransferId,
    direction: Direction,
    counterparty_peer_id: PeerId,
    files: Vec<FileDescriptor>,
    status: TransferStatus,
    total_size: u64,
    transferred_size: u64,
    progress: u8,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl TransferSession {
    /// 새 세션 생성 (pending). total_size 는 여기서 고정됨.
    ///
    /// 파일 크기 합이 u64 를 넘으면 `MalformedMessage`
    pub fn new(
        id: impl Into<TransferId>,
        direction: Direction,
        counterparty_peer_id: impl Into<PeerId>,
        files: Vec<FileDescriptor>,
    ) -> Result<Self> {
        let total_size = total_size_of(&files)?;
        Ok(Self {
            id: id.into(),
            direction,
            counterparty_peer_id: counterparty_peer_id.into(),
            files,
            status: TransferStatus::Pending,
            total_size,
            transferred_size: 0,
            progress: compute_progress(0, total_size),
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn counterparty(&self) -> &str {
        &self.counterparty_peer_id
    }

    pub fn files(&self) -> &[FileDescriptor] {
        &self.files
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn transferred_size(&self) -> u64 {
        self.transferred_size
    }

    /// 진행률 (0 ~ 100)
    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// 실패 사유
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// pending → transferring
    pub fn start(&mut self) -> Result<()> {
        self.transition(TransferStatus::Transferring)
    }

    /// pending → failed (로컬 또는 원격 거절)
    pub fn reject(&mut self, reason: Option<String>) -> Result<()> {
        if self.status != TransferStatus::Pending {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: TransferStatus::Failed,
            });
        }
        self.error = Some(reason.unwrap_or_else(|| "rejected".to_string()));
        self.transition(TransferStatus::Failed)
    }

    /// transferring → cancelled
    pub fn cancel(&mut self) -> Result<()> {
        self.transition(TransferStatus::Cancelled)
    }

    /// pending/transferring → failed
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        let to = TransferStatus::Failed;
        if !self.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.error = Some(reason.into());
        self.transition(to)
    }

    /// 청크 크기 반영
    ///
    /// 전송 중이 아니면 무시. 총 크기를 넘기는 청크는 세션을 실패시킴.
    pub fn record_chunk(&mut self, chunk_size: u64) -> Result<ChunkOutcome> {
        if self.status != TransferStatus::Transferring {
            return Ok(ChunkOutcome::Ignored);
        }

        let next = self.transferred_size.saturating_add(chunk_size);
        if next > self.total_size {
            let err = Error::ChunkOverflow {
                transferred: self.transferred_size,
                chunk_size,
                total_size: self.total_size,
            };
            self.fail(err.to_string())?;
            return Err(err);
        }

        self.transferred_size = next;
        self.progress = compute_progress(next, self.total_size);
        Ok(ChunkOutcome::Counted)
    }

    /// transferring → completed
    ///
    /// 모든 바이트가 반영되지 않았으면 잘못된 순서로 보고 세션을 실패시킴
    pub fn complete(&mut self) -> Result<()> {
        if self.status != TransferStatus::Transferring {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: TransferStatus::Completed,
            });
        }

        if self.transferred_size != self.total_size {
            let err = Error::IncompleteTransfer {
                transferred: self.transferred_size,
                total_size: self.total_size,
            };
            self.fail(err.to_string())?;
            return Err(err);
        }

        self.transition(TransferStatus::Completed)
    }

    fn transition(&mut self, to: TransferStatus) -> Result<()> {
        let from = self.status;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }

        self.status = to;
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
        }

        debug!("전송 {} 상태 전이: {} -> {}", self.id, from, to);
        Ok(())
    }
}

/// 선언된 파일 크기의 합
pub fn total_size_of(files: &[FileDescriptor]) -> Result<u64> {
    files
        .iter()
        .try_fold(0u64, |sum, f| sum.checked_add(f.size))
        .ok_or_else(|| Error::MalformedMessage("파일 크기 합이 u64 범위를 넘음".into()))
}

/// floor(transferred * 100 / total), total 이 0 이면 100
pub fn compute_progress(transferred: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((transferred as u128 * 100) / total as u128).min(100) as u8
}
