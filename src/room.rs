//! 룸 관리
//!
//! - 룸은 첫 입장 시 생성, 멤버가 0 이 되면 삭제
//! - 룸마다 잠금을 따로 두어 서로 다른 룸의 작업은 서로 막지 않음
//! - 멤버 집합 변경, 피어의 room 필드 갱신, 알림 전송은 같은 룸 잠금 안에서 수행

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::message::{PeerId, RoomId, ServerMessage};
use crate::registry::PeerRegistry;

#[derive(Debug, Default)]
struct Room {
    members: HashSet<PeerId>,
    /// 테이블에서 제거됨 (잠금 대기 중이던 작업은 다시 조회해야 함)
    closed: bool,
}

/// 룸 스냅샷
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub members: Vec<PeerId>,
}

/// 룸 관리자
#[derive(Default)]
pub struct RoomManager {
    rooms: DashMap<RoomId, Arc<Mutex<Room>>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 룸 입장
    ///
    /// 다른 룸에 있던 피어는 먼저 그 룸에서 나감. 이미 같은 룸이면 아무것도 하지 않음.
    /// 같은 피어에 대한 join/leave 는 그 피어의 연결 태스크에서 순차 호출된다고 가정.
    pub fn join(&self, registry: &PeerRegistry, peer_id: &str, room_id: &str) -> bool {
        match registry.lookup(peer_id) {
            None => return false,
            Some(peer) => match peer.room {
                Some(current) if current == room_id => return true,
                Some(current) => {
                    self.leave(registry, peer_id, &current);
                }
                None => {}
            },
        }

        loop {
            // entry 가드는 문장 끝에서 해제됨 (룸 잠금 전에 샤드 잠금을 놓아야 함)
            let room = Arc::clone(self.rooms.entry(room_id.to_string()).or_default().value());
            let mut guard = room.lock();
            if guard.closed {
                continue;
            }

            if !registry.set_room(peer_id, Some(room_id.to_string())) {
                // 피어가 사라짐
                if guard.members.is_empty() {
                    self.close(room_id, &room, &mut guard);
                }
                return false;
            }

            guard.members.insert(peer_id.to_string());

            let joined = ServerMessage::PeerJoinedRoom {
                peer_id: peer_id.to_string(),
                room_id: room_id.to_string(),
            };
            for member in guard.members.iter().filter(|m| m.as_str() != peer_id) {
                registry.send_to(member, joined.clone());
            }

            info!(
                "룸 입장: peer={}, room={}, members={}",
                peer_id,
                room_id,
                guard.members.len()
            );
            return true;
        }
    }

    /// 룸 퇴장
    ///
    /// 남은 멤버에게 peer-left-room 알림, 비면 룸 삭제
    pub fn leave(&self, registry: &PeerRegistry, peer_id: &str, room_id: &str) -> bool {
        let room = self.rooms.get(room_id).map(|r| Arc::clone(r.value()));
        let room = match room {
            Some(room) => room,
            None => {
                self.clear_peer_room(registry, peer_id, room_id);
                return false;
            }
        };

        let mut guard = room.lock();
        if !guard.members.remove(peer_id) {
            drop(guard);
            self.clear_peer_room(registry, peer_id, room_id);
            return false;
        }
        self.clear_peer_room(registry, peer_id, room_id);

        if guard.members.is_empty() {
            self.close(room_id, &room, &mut guard);
        } else {
            let left = ServerMessage::PeerLeftRoom {
                peer_id: peer_id.to_string(),
                room_id: room_id.to_string(),
            };
            for member in guard.members.iter() {
                registry.send_to(member, left.clone());
            }
        }

        info!(
            "룸 퇴장: peer={}, room={}, remaining={}",
            peer_id,
            room_id,
            guard.members.len()
        );
        true
    }

    /// 룸 멤버 목록
    pub fn members(&self, room_id: &str) -> Option<Vec<PeerId>> {
        let room = self.rooms.get(room_id).map(|r| Arc::clone(r.value()))?;
        let guard = room.lock();
        Some(guard.members.iter().cloned().collect())
    }

    /// 전체 룸 스냅샷
    pub fn list(&self) -> Vec<RoomInfo> {
        let rooms: Vec<(RoomId, Arc<Mutex<Room>>)> = self
            .rooms
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        rooms
            .into_iter()
            .filter_map(|(id, room)| {
                let guard = room.lock();
                if guard.closed {
                    return None;
                }
                Some(RoomInfo {
                    id,
                    members: guard.members.iter().cloned().collect(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    fn close(&self, room_id: &str, room: &Arc<Mutex<Room>>, guard: &mut Room) {
        guard.closed = true;
        self.rooms
            .remove_if(room_id, |_, current| Arc::ptr_eq(current, room));
    }

    fn clear_peer_room(&self, registry: &PeerRegistry, peer_id: &str, room_id: &str) {
        if registry.room_of(peer_id).as_deref() == Some(room_id) {
            registry.set_room(peer_id, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Outbound;
    use tokio::sync::mpsc;

    fn connect(registry: &PeerRegistry) -> (PeerId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx): (Outbound, _) = mpsc::channel(64);
        (registry.register("127.0.0.1", tx).id, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    /// 룸 멤버십 == room 필드가 해당 룸인 피어 집합
    fn assert_consistent(registry: &PeerRegistry, rooms: &RoomManager) {
        for info in rooms.list() {
            assert!(!info.members.is_empty(), "빈 룸이 남아 있음: {}", info.id);
            let mut expected: Vec<PeerId> = registry
                .list(None)
                .into_iter()
                .filter(|p| p.room.as_deref() == Some(info.id.as_str()))
                .map(|p| p.id)
                .collect();
            let mut members = info.members.clone();
            expected.sort();
            members.sort();
            assert_eq!(members, expected);
        }
        for peer in registry.list(None) {
            if let Some(room) = peer.room {
                assert!(rooms.members(&room).unwrap().contains(&peer.id));
            }
        }
    }

    #[test]
    fn test_join_notifies_other_members() {
        let registry = PeerRegistry::new();
        let rooms = RoomManager::new();
        let (a, mut rx_a) = connect(&registry);
        let (b, mut rx_b) = connect(&registry);

        assert!(rooms.join(&registry, &a, "lobby"));
        assert!(drain(&mut rx_a).is_empty());

        assert!(rooms.join(&registry, &b, "lobby"));
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::PeerJoinedRoom {
                peer_id: b.clone(),
                room_id: "lobby".into()
            }]
        );
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(registry.room_of(&b).as_deref(), Some("lobby"));
        assert_consistent(&registry, &rooms);
    }

    #[test]
    fn test_leave_deletes_empty_room() {
        let registry = PeerRegistry::new();
        let rooms = RoomManager::new();
        let (a, mut rx_a) = connect(&registry);
        let (b, _rx_b) = connect(&registry);

        rooms.join(&registry, &a, "lobby");
        rooms.join(&registry, &b, "lobby");
        drain(&mut rx_a);

        assert!(rooms.leave(&registry, &b, "lobby"));
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::PeerLeftRoom {
                peer_id: b.clone(),
                room_id: "lobby".into()
            }]
        );
        assert!(registry.room_of(&b).is_none());

        assert!(rooms.leave(&registry, &a, "lobby"));
        assert!(rooms.is_empty());
        assert!(rooms.members("lobby").is_none());
    }

    #[test]
    fn test_join_other_room_leaves_previous() {
        let registry = PeerRegistry::new();
        let rooms = RoomManager::new();
        let (a, _rx_a) = connect(&registry);
        let (b, mut rx_b) = connect(&registry);

        rooms.join(&registry, &a, "red");
        rooms.join(&registry, &b, "red");
        rooms.join(&registry, &a, "blue");

        assert_eq!(rooms.members("red").unwrap(), vec![b.clone()]);
        assert_eq!(rooms.members("blue").unwrap(), vec![a.clone()]);
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMessage::PeerLeftRoom {
                peer_id: a.clone(),
                room_id: "red".into()
            }]
        );
        assert_consistent(&registry, &rooms);
    }

    #[test]
    fn test_leave_unknown_room_is_noop() {
        let registry = PeerRegistry::new();
        let rooms = RoomManager::new();
        let (a, _rx_a) = connect(&registry);

        assert!(!rooms.leave(&registry, &a, "nowhere"));
        assert!(!rooms.join(&registry, "ghost", "lobby"));
        assert!(rooms.is_empty());
    }

    #[test]
    fn test_concurrent_join_leave_consistency() {
        let registry = Arc::new(PeerRegistry::new());
        let rooms = Arc::new(RoomManager::new());
        let room_names = ["a", "b", "c"];

        let mut handles = Vec::new();
        for worker in 0..6 {
            let registry = registry.clone();
            let rooms = rooms.clone();
            handles.push(std::thread::spawn(move || {
                let (peer, _rx) = connect(&registry);
                for i in 0..300 {
                    let room = room_names[(worker + i) % room_names.len()];
                    rooms.join(&registry, &peer, room);
                    if i % 3 == 0 {
                        rooms.leave(&registry, &peer, room);
                    }
                }
                peer
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_consistent(&registry, &rooms);
    }
}
