//! 피어 레지스트리
//!
//! 현재 연결된 피어 테이블. ID 발급, 주소/룸 추적, 조회 및 열거 담당.
//! 각 피어는 릴레이가 메시지를 밀어 넣는 송신 큐를 함께 가짐.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::message::{PeerId, PeerSummary, RoomId, ServerMessage};
use crate::ID_LEN;

/// ID 문자 집합 (base36)
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// 피어별 송신 큐
pub type Outbound = mpsc::Sender<ServerMessage>;

/// 피어 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub id: PeerId,
    #[serde(rename = "ip")]
    pub address: String,
    pub room: Option<RoomId>,
    pub connected_at: DateTime<Utc>,
}

impl Peer {
    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            id: self.id.clone(),
            ip: self.address.clone(),
        }
    }
}

/// 전달 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// 송신 큐에 들어감
    Queued,
    /// 대상 피어 없음
    NotFound,
    /// 큐가 가득 찼거나 연결이 닫힘
    NotWritable,
}

struct PeerEntry {
    peer: Peer,
    outbound: Outbound,
}

/// 피어 레지스트리
#[derive(Default)]
pub struct PeerRegistry {
    peers: DashMap<PeerId, PeerEntry>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 새 피어 등록
    ///
    /// 살아 있는 ID 와 겹치지 않을 때까지 다시 생성하며,
    /// 삽입은 entry 잠금 안에서 이루어지므로 동시 등록끼리 ID 가 충돌하지 않음
    pub fn register(&self, address: impl Into<String>, outbound: Outbound) -> Peer {
        self.register_greeted(address, outbound, |_| Vec::new())
    }

    /// 인사 메시지를 큐에 넣은 뒤 등록
    ///
    /// `greet` 의 메시지는 다른 피어가 이 피어를 볼 수 있게 되기 전에 큐에 들어가므로
    /// 항상 가장 먼저 전달됨. `greet` 안에서 레지스트리를 호출하면 안 됨 (entry 잠금 보유 중).
    pub fn register_greeted(
        &self,
        address: impl Into<String>,
        outbound: Outbound,
        greet: impl FnOnce(&Peer) -> Vec<ServerMessage>,
    ) -> Peer {
        let address = address.into();
        let mut greet = Some(greet);
        loop {
            let id = generate_id();
            if let Entry::Vacant(slot) = self.peers.entry(id.clone()) {
                let peer = Peer {
                    id,
                    address,
                    room: None,
                    connected_at: Utc::now(),
                };
                for message in greet.take().map(|f| f(&peer)).unwrap_or_default() {
                    if let Err(e) = outbound.try_send(message) {
                        warn!("인사 메시지 큐잉 실패: {}, {}", peer.id, e);
                    }
                }
                slot.insert(PeerEntry {
                    peer: peer.clone(),
                    outbound,
                });
                return peer;
            }
            debug!("피어 ID 충돌, 재생성: {}", id);
        }
    }

    /// 피어 제거 (룸 정리는 호출자 책임)
    pub fn unregister(&self, peer_id: &str) -> Option<Peer> {
        self.peers.remove(peer_id).map(|(_, entry)| entry.peer)
    }

    /// 스냅샷 (순서 무관)
    pub fn list(&self, excluding: Option<&str>) -> Vec<Peer> {
        self.peers
            .iter()
            .filter(|entry| Some(entry.key().as_str()) != excluding)
            .map(|entry| entry.peer.clone())
            .collect()
    }

    pub fn lookup(&self, peer_id: &str) -> Option<Peer> {
        self.peers.get(peer_id).map(|entry| entry.peer.clone())
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// 현재 룸
    pub fn room_of(&self, peer_id: &str) -> Option<RoomId> {
        self.peers.get(peer_id).and_then(|entry| entry.peer.room.clone())
    }

    /// 룸 필드 갱신 (RoomManager 전용)
    pub(crate) fn set_room(&self, peer_id: &str, room: Option<RoomId>) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(mut entry) => {
                entry.peer.room = room;
                true
            }
            None => false,
        }
    }

    /// 특정 피어의 송신 큐에 메시지 넣기 (대기 없음)
    pub fn send_to(&self, peer_id: &str, message: ServerMessage) -> Delivery {
        let outbound = match self.peers.get(peer_id) {
            Some(entry) => entry.outbound.clone(),
            None => return Delivery::NotFound,
        };

        match outbound.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => Delivery::NotWritable,
        }
    }

    /// 제외 대상을 뺀 모든 피어에게 전송, 큐에 들어간 수 반환
    pub fn broadcast(&self, message: &ServerMessage, excluding: Option<&str>) -> usize {
        let targets: Vec<Outbound> = self
            .peers
            .iter()
            .filter(|entry| Some(entry.key().as_str()) != excluding)
            .map(|entry| entry.outbound.clone())
            .collect();

        targets
            .into_iter()
            .filter(|outbound| outbound.try_send(message.clone()).is_ok())
            .count()
    }
}

/// 피어 ID / 전송 ID 생성 (base36, 약 51비트)
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}
