//! 릴레이 서비스
//!
//! 레지스트리, 룸 관리자, 라우터를 묶는 서비스 객체.
//! 네트워크 계층(`server`)은 연결마다 이 객체의 connect/handle/disconnect 만 호출.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::message::{PeerId, ServerMessage};
use crate::registry::{Outbound, Peer, PeerRegistry};
use crate::room::{RoomInfo, RoomManager};
use crate::router::{Routing, SignalingRouter};
use crate::Config;

/// 외부 조회용 상태 카운터
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub status: &'static str,
    pub peers: usize,
    pub rooms: usize,
    /// 가동 시간 (초)
    pub uptime: f64,
}

/// 릴레이
pub struct Relay {
    registry: Arc<PeerRegistry>,
    rooms: Arc<RoomManager>,
    router: SignalingRouter,
    started_at: Instant,
}

impl Relay {
    pub fn new(config: &Config) -> Self {
        let registry = Arc::new(PeerRegistry::new());
        let rooms = Arc::new(RoomManager::new());
        let router = SignalingRouter::new(registry.clone(), rooms.clone(), config.max_message_size);

        Self {
            registry,
            rooms,
            router,
            started_at: Instant::now(),
        }
    }

    /// 새 연결 등록
    ///
    /// 새 피어에게 peer-id, 이어서 다른 피어 스냅샷(peers-list)을 보냄.
    /// 기존 피어에게는 새 피어를 알리지 않음 (연결 시점 스냅샷만 제공).
    pub fn connect(&self, address: impl Into<String>, outbound: Outbound) -> Peer {
        // 등록 전에 스냅샷을 떠야 새 피어 자신이 빠짐
        let peers: Vec<_> = self.registry.list(None).iter().map(Peer::summary).collect();

        // 다른 피어의 브로드캐스트보다 peer-id 가 먼저 큐에 들어가도록 등록 전에 넣음
        let peer = self.registry.register_greeted(address, outbound, |peer| {
            vec![
                ServerMessage::PeerId {
                    peer_id: peer.id.clone(),
                },
                ServerMessage::PeersList { peers },
            ]
        });

        info!(
            "피어 연결: {} ({}), 현재 {} 명",
            peer.id,
            peer.address,
            self.registry.len()
        );
        peer
    }

    /// 연결 해제
    ///
    /// 룸 퇴장 → 레지스트리 제거 → 남은 피어 전체에 peer-disconnected
    pub fn disconnect(&self, peer_id: &str) -> Option<Peer> {
        if let Some(room) = self.registry.room_of(peer_id) {
            self.rooms.leave(&self.registry, peer_id, &room);
        }

        let peer = self.registry.unregister(peer_id)?;
        self.registry.broadcast(
            &ServerMessage::PeerDisconnected {
                peer_id: peer_id.to_string(),
            },
            Some(peer_id),
        );

        info!(
            "피어 연결 해제: {}, 남은 피어 {} 명",
            peer_id,
            self.registry.len()
        );
        Some(peer)
    }

    /// 수신 메시지 처리
    pub fn handle(&self, sender: &str, text: &str) -> Routing {
        self.router.handle(sender, text)
    }

    pub fn lookup(&self, peer_id: &str) -> Option<Peer> {
        self.registry.lookup(peer_id)
    }

    pub fn peers(&self, excluding: Option<&str>) -> Vec<Peer> {
        self.registry.list(excluding)
    }

    pub fn rooms(&self) -> Vec<RoomInfo> {
        self.rooms.list()
    }

    pub fn room_members(&self, room_id: &str) -> Option<Vec<PeerId>> {
        self.rooms.members(room_id)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn status(&self) -> RelayStatus {
        RelayStatus {
            status: "running",
            peers: self.registry.len(),
            rooms: self.rooms.len(),
            uptime: self.uptime().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PeerSummary;
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_connect_sends_id_then_snapshot() {
        let relay = Relay::new(&Config::default());

        let (tx_a, mut rx_a) = mpsc::channel(8);
        let a = relay.connect("10.0.0.1", tx_a);
        assert_eq!(
            drain(&mut rx_a),
            vec![
                ServerMessage::PeerId {
                    peer_id: a.id.clone()
                },
                ServerMessage::PeersList { peers: vec![] },
            ]
        );

        let (tx_b, mut rx_b) = mpsc::channel(8);
        let b = relay.connect("10.0.0.2", tx_b);
        assert_eq!(
            drain(&mut rx_b),
            vec![
                ServerMessage::PeerId {
                    peer_id: b.id.clone()
                },
                ServerMessage::PeersList {
                    peers: vec![PeerSummary {
                        id: a.id.clone(),
                        ip: "10.0.0.1".into()
                    }]
                },
            ]
        );

        // 기존 피어에게는 갱신된 목록을 보내지 않음
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn test_disconnect_cleans_room_and_broadcasts() {
        let relay = Relay::new(&Config::default());
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, _rx_b) = mpsc::channel(8);
        let a = relay.connect("10.0.0.1", tx_a);
        let b = relay.connect("10.0.0.2", tx_b);

        relay.handle(&a.id, r#"{"type":"join-room","roomId":"lobby"}"#);
        relay.handle(&b.id, r#"{"type":"join-room","roomId":"lobby"}"#);
        drain(&mut rx_a);

        relay.disconnect(&b.id);
        assert_eq!(
            drain(&mut rx_a),
            vec![
                ServerMessage::PeerLeftRoom {
                    peer_id: b.id.clone(),
                    room_id: "lobby".into()
                },
                ServerMessage::PeerDisconnected {
                    peer_id: b.id.clone()
                },
            ]
        );
        assert!(relay.lookup(&b.id).is_none());
        assert_eq!(relay.room_members("lobby").unwrap(), vec![a.id.clone()]);

        relay.disconnect(&a.id);
        let status = relay.status();
        assert_eq!(status.peers, 0);
        assert_eq!(status.rooms, 0);
    }

    #[test]
    fn test_disconnect_unknown_peer() {
        let relay = Relay::new(&Config::default());
        assert!(relay.disconnect("ghost").is_none());
    }
}
