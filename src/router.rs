//! 시그널링 라우터
//!
//! 수신 메시지를 검증하고 레지스트리/룸 관리자로 넘기거나 대상 피어로 전달.
//! 전달은 fire-and-forget: 송신자에게 성공/실패를 알리지 않음.
//! 버려지는 경로는 [`Routing::Dropped`] 로 드러나서 호출자와 테스트가 관찰 가능.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::message::{self, ClientMessage, PeerId, RoomId};
use crate::registry::{Delivery, PeerRegistry};
use crate::room::RoomManager;

/// 메시지를 버린 이유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// JSON 이 아니거나 필수 필드 누락, 크기 초과
    Malformed,
    /// 알 수 없는 메시지 타입
    UnknownKind(String),
    /// 대상 피어가 레지스트리에 없음
    TargetNotFound(PeerId),
    /// 대상 피어의 송신 큐가 가득 찼거나 닫힘
    TargetNotWritable(PeerId),
    /// 송신자가 이미 연결 해제됨
    UnknownSender,
    /// 속하지 않은 룸에서 나가려 함
    NotInRoom(RoomId),
}

/// 라우팅 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routing {
    Forwarded { target: PeerId },
    Joined { room_id: RoomId },
    Left { room_id: RoomId },
    Dropped(DropReason),
}

/// 시그널링 라우터
pub struct SignalingRouter {
    registry: Arc<PeerRegistry>,
    rooms: Arc<RoomManager>,
    max_message_size: usize,
}

impl SignalingRouter {
    pub fn new(registry: Arc<PeerRegistry>, rooms: Arc<RoomManager>, max_message_size: usize) -> Self {
        Self {
            registry,
            rooms,
            max_message_size,
        }
    }

    /// 원본 텍스트 처리 (단일 진입점)
    pub fn handle(&self, sender: &str, text: &str) -> Routing {
        if text.len() > self.max_message_size {
            warn!(
                "메시지 크기 초과: peer={}, size={} (최대 {})",
                sender,
                text.len(),
                self.max_message_size
            );
            return Routing::Dropped(DropReason::Malformed);
        }

        match message::decode::<ClientMessage>(text) {
            Ok(ClientMessage::Unknown) => {
                let kind = message::kind_of(text).unwrap_or_default();
                warn!("알 수 없는 메시지 타입: peer={}, type={}", sender, kind);
                Routing::Dropped(DropReason::UnknownKind(kind))
            }
            Ok(msg) => self.dispatch(sender, msg),
            Err(e) => {
                warn!("잘못된 메시지 무시: peer={}, {}", sender, e);
                Routing::Dropped(DropReason::Malformed)
            }
        }
    }

    /// 파싱된 메시지 처리
    pub fn dispatch(&self, sender: &str, msg: ClientMessage) -> Routing {
        if !self.registry.contains(sender) {
            return Routing::Dropped(DropReason::UnknownSender);
        }

        match msg {
            ClientMessage::JoinRoom { room_id } => {
                if self.rooms.join(&self.registry, sender, &room_id) {
                    Routing::Joined { room_id }
                } else {
                    Routing::Dropped(DropReason::UnknownSender)
                }
            }
            ClientMessage::LeaveRoom { room_id } => {
                if self.rooms.leave(&self.registry, sender, &room_id) {
                    Routing::Left { room_id }
                } else {
                    debug!("룸 퇴장 무시: peer={}, room={}", sender, room_id);
                    Routing::Dropped(DropReason::NotInRoom(room_id))
                }
            }
            ClientMessage::Unknown => Routing::Dropped(DropReason::UnknownKind(String::new())),
            forward => match forward.into_forward(sender) {
                Some((target, outgoing)) => self.forward(sender, target, outgoing),
                None => Routing::Dropped(DropReason::Malformed),
            },
        }
    }

    fn forward(
        &self,
        sender: &str,
        target: PeerId,
        outgoing: message::ServerMessage,
    ) -> Routing {
        match self.registry.send_to(&target, outgoing) {
            Delivery::Queued => {
                debug!("전달: {} -> {}", sender, target);
                Routing::Forwarded { target }
            }
            Delivery::NotFound => {
                debug!("전달 대상 없음, 버림: {} -> {}", sender, target);
                Routing::Dropped(DropReason::TargetNotFound(target))
            }
            Delivery::NotWritable => {
                warn!("전달 대상 쓰기 불가, 버림: {} -> {}", sender, target);
                Routing::Dropped(DropReason::TargetNotWritable(target))
            }
        }
    }
}
