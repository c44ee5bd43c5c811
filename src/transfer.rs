//! 전송 관리자 (엔드포인트측)
//!
//! 한 엔드포인트의 모든 전송 세션을 소유하고
//! 릴레이 이벤트(transfer-request/accept/reject)와 채널 메시지를 세션 전이로 옮김.
//! 종료 상태에 도달한 세션은 전송 기록에 남김.

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::history::{HistoryEntry, TransferHistory};
use crate::message::{ChannelMessage, ClientMessage, FileDescriptor, PeerId, TransferId};
use crate::registry::generate_id;
use crate::session::{ChunkOutcome, Direction, TransferSession, TransferStatus};
use crate::{Config, Error, Result};

/// 수신 요청 처리 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundDecision {
    /// 사용자 결정 대기
    Pending,
    /// 자동 수락됨
    Accepted,
    /// 자동 거절됨
    Rejected { reason: String },
}

impl InboundDecision {
    /// 요청자에게 돌려보낼 릴레이 메시지 (대기 중이면 없음)
    pub fn reply(&self, target_peer_id: &str, transfer_id: &str) -> Option<ClientMessage> {
        match self {
            InboundDecision::Pending => None,
            InboundDecision::Accepted => Some(ClientMessage::TransferAccept {
                target_peer_id: target_peer_id.to_string(),
                transfer_id: transfer_id.to_string(),
            }),
            InboundDecision::Rejected { reason } => Some(ClientMessage::TransferReject {
                target_peer_id: target_peer_id.to_string(),
                transfer_id: transfer_id.to_string(),
                reason: Some(reason.clone()),
            }),
        }
    }
}

/// 채널 메시지 처리 결과
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// file-transfer-start 수신
    Started {
        transfer_id: TransferId,
        files: Vec<FileDescriptor>,
    },
    /// 청크가 반영됨 (저장은 호출자 몫)
    Chunk {
        transfer_id: TransferId,
        file_name: String,
        offset: u64,
        data: Bytes,
        progress: u8,
    },
    Completed {
        transfer_id: TransferId,
    },
    Cancelled {
        transfer_id: TransferId,
    },
    /// 상태에 영향 없음 (모르는 전송, 대기 중, 이미 종료 등)
    Ignored,
}

/// 전송 관리자
pub struct TransferManager {
    config: Config,
    sessions: DashMap<TransferId, TransferSession>,
    history: Mutex<TransferHistory>,
}

impl TransferManager {
    pub fn new(config: Config) -> Self {
        let history = TransferHistory::new(config.history_limit);
        Self::with_history(config, history)
    }

    /// 불러온 기록으로 시작
    pub fn with_history(config: Config, history: TransferHistory) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            history: Mutex::new(history),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 송신 세션 생성
    ///
    /// 수락을 기다리지 않도록 설정된 경우 바로 transferring
    pub fn begin_outbound(
        &self,
        counterparty: impl Into<PeerId>,
        files: Vec<FileDescriptor>,
    ) -> Result<TransferId> {
        let counterparty = counterparty.into();
        loop {
            let id = generate_id();
            if let Entry::Vacant(slot) = self.sessions.entry(id.clone()) {
                let mut session =
                    TransferSession::new(id.clone(), Direction::Outbound, counterparty, files)?;
                if !self.config.wait_for_accept {
                    session.start()?;
                }
                info!(
                    "송신 전송 생성: {} -> {}, {} 파일, {} bytes",
                    id,
                    session.counterparty(),
                    session.files().len(),
                    session.total_size()
                );
                slot.insert(session);
                return Ok(id);
            }
        }
    }

    /// 릴레이로 받은 transfer-request 처리
    pub fn on_transfer_request(
        &self,
        from: &str,
        transfer_id: &str,
        files: Vec<FileDescriptor>,
    ) -> Result<InboundDecision> {
        let slot = match self.sessions.entry(transfer_id.to_string()) {
            Entry::Occupied(_) => return Err(Error::DuplicateTransfer(transfer_id.to_string())),
            Entry::Vacant(slot) => slot,
        };

        let mut session = TransferSession::new(transfer_id, Direction::Inbound, from, files)?;
        let decision = if session.total_size() > self.config.max_file_size {
            let reason = format!(
                "transfer too large: {} bytes (max {})",
                session.total_size(),
                self.config.max_file_size
            );
            session.reject(Some(reason.clone()))?;
            InboundDecision::Rejected { reason }
        } else if self.config.auto_accept {
            session.start()?;
            InboundDecision::Accepted
        } else {
            InboundDecision::Pending
        };

        info!(
            "수신 요청: {} from {}, {} bytes, {:?}",
            transfer_id,
            from,
            session.total_size(),
            decision
        );

        if session.is_finished() {
            self.archive(&session);
        }
        slot.insert(session);
        Ok(decision)
    }

    /// 수신 요청 수락 (pending → transferring)
    pub fn accept(&self, transfer_id: &str) -> Result<()> {
        self.update(transfer_id, |s| s.start())
    }

    /// 수신 요청 거절 (pending → failed)
    pub fn reject(&self, transfer_id: &str, reason: Option<String>) -> Result<()> {
        self.update(transfer_id, |s| s.reject(reason))
    }

    /// 로컬 취소 (transferring → cancelled)
    ///
    /// 상대에게 채널로 보낼 file-transfer-cancel 을 반환
    pub fn cancel(&self, transfer_id: &str) -> Result<ChannelMessage> {
        self.update(transfer_id, |s| s.cancel())?;
        Ok(ChannelMessage::FileTransferCancel {
            transfer_id: transfer_id.to_string(),
        })
    }

    /// 상대가 수락함. 이번 호출로 전송이 시작되었으면 true.
    pub fn on_remote_accept(&self, from: &str, transfer_id: &str) -> Result<bool> {
        self.update(transfer_id, |s| {
            if s.counterparty() != from || s.direction() != Direction::Outbound {
                warn!("잘못된 transfer-accept 무시: {} from {}", transfer_id, from);
                return Ok(false);
            }
            match s.status() {
                TransferStatus::Pending => s.start().map(|_| true),
                _ => Ok(false),
            }
        })
    }

    /// 상대가 거절함
    pub fn on_remote_reject(
        &self,
        from: &str,
        transfer_id: &str,
        reason: Option<String>,
    ) -> Result<()> {
        self.update(transfer_id, |s| {
            if s.counterparty() != from {
                warn!("잘못된 transfer-reject 무시: {} from {}", transfer_id, from);
                return Ok(());
            }
            match s.status() {
                TransferStatus::Pending => s.reject(reason),
                TransferStatus::Transferring => {
                    s.fail(reason.unwrap_or_else(|| "rejected".to_string()))
                }
                _ => Ok(()),
            }
        })
    }

    /// PeerChannel 메시지 처리
    pub fn on_channel_message(&self, from: &str, message: ChannelMessage) -> Result<Received> {
        match message {
            ChannelMessage::FileTransferStart { transfer_id, files } => {
                self.on_start(from, transfer_id, files)
            }
            ChannelMessage::FileChunk {
                transfer_id,
                file_name,
                offset,
                chunk,
                chunk_size,
            } => {
                let known = self.update_from(from, &transfer_id, |s| {
                    if s.direction() != Direction::Inbound {
                        warn!("송신 전송에 대한 청크 무시: {} from {}", s.id(), from);
                        return Ok(None);
                    }
                    if s.status() != TransferStatus::Transferring {
                        return Ok(None);
                    }
                    if chunk.len() as u64 != chunk_size {
                        let err = Error::ChunkSizeMismatch {
                            declared: chunk_size,
                            actual: chunk.len() as u64,
                        };
                        s.fail(err.to_string())?;
                        return Err(err);
                    }
                    match s.record_chunk(chunk_size)? {
                        ChunkOutcome::Counted => Ok(Some(s.progress())),
                        ChunkOutcome::Ignored => Ok(None),
                    }
                })?;

                Ok(match known.flatten() {
                    Some(progress) => Received::Chunk {
                        transfer_id,
                        file_name,
                        offset,
                        data: chunk,
                        progress,
                    },
                    None => Received::Ignored,
                })
            }
            ChannelMessage::FileTransferComplete { transfer_id } => {
                let completed = self.update_from(from, &transfer_id, |s| {
                    if s.direction() != Direction::Inbound {
                        warn!("송신 전송에 대한 완료 신호 무시: {} from {}", s.id(), from);
                        return Ok(false);
                    }
                    if s.status() != TransferStatus::Transferring {
                        return Ok(false);
                    }
                    s.complete().map(|_| true)
                })?;

                Ok(if completed == Some(true) {
                    Received::Completed { transfer_id }
                } else {
                    Received::Ignored
                })
            }
            ChannelMessage::FileTransferCancel { transfer_id } => {
                let cancelled = self.update_from(from, &transfer_id, |s| match s.status() {
                    TransferStatus::Transferring => s.cancel().map(|_| true),
                    TransferStatus::Pending => s
                        .reject(Some("cancelled by peer".to_string()))
                        .map(|_| false),
                    _ => Ok(false),
                })?;

                Ok(if cancelled == Some(true) {
                    Received::Cancelled { transfer_id }
                } else {
                    Received::Ignored
                })
            }
            ChannelMessage::Unknown => {
                debug!("알 수 없는 채널 메시지 무시: from {}", from);
                Ok(Received::Ignored)
            }
        }
    }

    fn on_start(
        &self,
        from: &str,
        transfer_id: TransferId,
        files: Vec<FileDescriptor>,
    ) -> Result<Received> {
        match self.sessions.entry(transfer_id.clone()) {
            Entry::Occupied(entry) => {
                let session = entry.get();
                if session.counterparty() != from || session.direction() != Direction::Inbound {
                    warn!("잘못된 file-transfer-start 무시: {} from {}", transfer_id, from);
                    return Ok(Received::Ignored);
                }
            }
            Entry::Vacant(slot) => {
                // 채널이 열렸다는 것 자체를 수락으로 봄
                let mut session = TransferSession::new(
                    transfer_id.clone(),
                    Direction::Inbound,
                    from,
                    files.clone(),
                )?;
                session.start()?;
                info!("채널로 시작된 수신 전송: {} from {}", transfer_id, from);
                slot.insert(session);
            }
        }
        Ok(Received::Started { transfer_id, files })
    }

    /// 상대 연결이 끊김: 진행 중인 세션을 모두 실패 처리, 실패시킨 전송 ID 반환
    pub fn on_peer_disconnected(&self, peer_id: &str) -> Vec<TransferId> {
        let live: Vec<TransferId> = self
            .sessions
            .iter()
            .filter(|s| s.counterparty() == peer_id && !s.is_finished())
            .map(|s| s.key().clone())
            .collect();

        live.into_iter()
            .filter(|id| {
                self.update(id, |s| {
                    if s.is_finished() {
                        return Ok(false);
                    }
                    s.fail("peer disconnected").map(|_| true)
                })
                .unwrap_or(false)
            })
            .collect()
    }

    /// 채널 에러: 진행 중인 세션이면 실패 처리
    pub fn on_channel_error(&self, transfer_id: &str, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.update(transfer_id, |s| {
            if s.is_finished() {
                return Ok(false);
            }
            warn!("채널 에러로 전송 실패: {}, {}", transfer_id, reason);
            s.fail(reason).map(|_| true)
        })
        .unwrap_or(false)
    }

    /// 송신한 청크 반영 (스트리머 전용)
    pub fn record_sent(&self, transfer_id: &str, chunk_size: u64) -> Result<ChunkOutcome> {
        self.update(transfer_id, |s| s.record_chunk(chunk_size))
    }

    /// 송신 완료 반영 (스트리머 전용)
    pub fn complete_sent(&self, transfer_id: &str) -> Result<()> {
        self.update(transfer_id, |s| s.complete())
    }

    /// 세션 스냅샷
    pub fn session(&self, transfer_id: &str) -> Option<TransferSession> {
        self.sessions.get(transfer_id).map(|s| s.clone())
    }

    pub fn status(&self, transfer_id: &str) -> Option<TransferStatus> {
        self.sessions.get(transfer_id).map(|s| s.status())
    }

    pub fn sessions(&self) -> Vec<TransferSession> {
        self.sessions.iter().map(|s| s.clone()).collect()
    }

    /// 종료된 세션 제거 (기록에는 남아 있음), 제거 수 반환
    pub fn prune_finished(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_finished());
        before - self.sessions.len()
    }

    pub fn history(&self) -> MutexGuard<'_, TransferHistory> {
        self.history.lock()
    }

    /// 세션 갱신, 이번 갱신으로 종료되었으면 기록에 추가
    fn update<R>(
        &self,
        transfer_id: &str,
        f: impl FnOnce(&mut TransferSession) -> Result<R>,
    ) -> Result<R> {
        let mut session = self
            .sessions
            .get_mut(transfer_id)
            .ok_or_else(|| Error::UnknownTransfer(transfer_id.to_string()))?;

        let was_finished = session.is_finished();
        let result = f(&mut session);
        if !was_finished && session.is_finished() {
            self.archive(&session);
        }
        result
    }

    /// 상대 피어가 보낸 메시지용 갱신. 모르는 전송이거나 상대가 다르면 None.
    fn update_from<R>(
        &self,
        from: &str,
        transfer_id: &str,
        f: impl FnOnce(&mut TransferSession) -> Result<R>,
    ) -> Result<Option<R>> {
        match self.sessions.get(transfer_id).map(|s| s.counterparty() == from) {
            None => {
                debug!("모르는 전송의 채널 메시지 무시: {} from {}", transfer_id, from);
                Ok(None)
            }
            Some(false) => {
                warn!("다른 피어의 채널 메시지 무시: {} from {}", transfer_id, from);
                Ok(None)
            }
            Some(true) => self.update(transfer_id, f).map(Some),
        }
    }

    fn archive(&self, session: &TransferSession) {
        info!(
            "전송 {} 종료: {} ({}/{} bytes)",
            session.id(),
            session.status(),
            session.transferred_size(),
            session.total_size()
        );
        self.history.lock().push(HistoryEntry::from_session(session));
    }
}
