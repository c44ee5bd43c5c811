//! 전송 기록
//!
//! 종료된 세션을 최신순으로 보관 (최대 개수 제한).
//! 디스크/키-값 저장소 영속화는 [`HistoryStore`] 구현체에 맡김.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{FileDescriptor, PeerId, TransferId};
use crate::session::{Direction, TransferSession, TransferStatus};
use crate::Result;

/// 기록 항목
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub transfer_id: TransferId,
    pub direction: Direction,
    pub peer_id: PeerId,
    pub files: Vec<FileDescriptor>,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl HistoryEntry {
    pub fn from_session(session: &TransferSession) -> Self {
        Self {
            transfer_id: session.id().to_string(),
            direction: session.direction(),
            peer_id: session.counterparty().to_string(),
            files: session.files().to_vec(),
            status: session.status(),
            created_at: session.created_at(),
            completed_at: session.completed_at(),
        }
    }
}

/// 기록 영속화 인터페이스
pub trait HistoryStore {
    fn load(&self) -> Result<Vec<HistoryEntry>>;
    fn save(&self, entries: &[HistoryEntry]) -> Result<()>;
}

/// 전송 기록 (최신 항목이 앞)
#[derive(Debug, Clone)]
pub struct TransferHistory {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl TransferHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(1024)),
            limit,
        }
    }

    /// 저장소에서 불러오기 (초과분은 잘라냄)
    pub fn load_from(store: &dyn HistoryStore, limit: usize) -> Result<Self> {
        let mut history = Self::new(limit);
        history.entries.extend(store.load()?.into_iter().take(limit));
        Ok(history)
    }

    pub fn save_to(&self, store: &dyn HistoryStore) -> Result<()> {
        let entries: Vec<HistoryEntry> = self.entries.iter().cloned().collect();
        store.save(&entries)
    }

    /// 맨 앞에 추가, 한도를 넘는 오래된 항목 제거
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(self.limit);
    }

    pub fn remove(&mut self, transfer_id: &str) -> Option<HistoryEntry> {
        let index = self
            .entries
            .iter()
            .position(|e| e.transfer_id == transfer_id)?;
        self.entries.remove(index)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn by_direction(&self, direction: Direction) -> Vec<&HistoryEntry> {
        self.entries
            .iter()
            .filter(|e| e.direction == direction)
            .collect()
    }

    pub fn by_peer(&self, peer_id: &str) -> Vec<&HistoryEntry> {
        self.entries.iter().filter(|e| e.peer_id == peer_id).collect()
    }

    pub fn by_status(&self, status: TransferStatus) -> Vec<&HistoryEntry> {
        self.entries.iter().filter(|e| e.status == status).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
