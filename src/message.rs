//! 와이어 메시지 정의
//!
//! 모든 메시지는 `type` 필드로 구분되는 평면 JSON 객체
//! - [`ClientMessage`]: 클라이언트 → 릴레이
//! - [`ServerMessage`]: 릴레이 → 클라이언트
//! - [`ChannelMessage`]: PeerChannel 위의 대용량 전송 메시지

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// 릴레이가 발급하는 피어 ID
pub type PeerId = String;

/// 룸 ID
pub type RoomId = String;

/// 전송 ID (송신측이 생성)
pub type TransferId = String;

/// 파일 정보 (전송 시작 후 불변)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
        }
    }
}

/// peers-list 항목
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub id: PeerId,
    pub ip: String,
}

/// 클라이언트 → 릴레이 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Offer { target_peer_id: PeerId, offer: Value },

    #[serde(rename_all = "camelCase")]
    Answer { target_peer_id: PeerId, answer: Value },

    #[serde(rename_all = "camelCase")]
    IceCandidate {
        target_peer_id: PeerId,
        candidate: Value,
    },

    #[serde(rename_all = "camelCase")]
    TransferRequest {
        target_peer_id: PeerId,
        files: Vec<FileDescriptor>,
        transfer_id: TransferId,
    },

    #[serde(rename_all = "camelCase")]
    TransferAccept {
        target_peer_id: PeerId,
        transfer_id: TransferId,
    },

    #[serde(rename_all = "camelCase")]
    TransferReject {
        target_peer_id: PeerId,
        transfer_id: TransferId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: RoomId },

    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: RoomId },

    /// 인식하지 못한 타입
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// 전달 대상 피어 (포워딩 메시지만)
    pub fn target_peer_id(&self) -> Option<&str> {
        match self {
            ClientMessage::Offer { target_peer_id, .. }
            | ClientMessage::Answer { target_peer_id, .. }
            | ClientMessage::IceCandidate { target_peer_id, .. }
            | ClientMessage::TransferRequest { target_peer_id, .. }
            | ClientMessage::TransferAccept { target_peer_id, .. }
            | ClientMessage::TransferReject { target_peer_id, .. } => Some(target_peer_id),
            _ => None,
        }
    }

    /// 릴레이 전달용 메시지로 변환 (`fromPeerId` 태깅)
    ///
    /// 포워딩 대상이 아닌 메시지는 `None`
    pub fn into_forward(self, from_peer_id: &str) -> Option<(PeerId, ServerMessage)> {
        let from_peer_id = from_peer_id.to_string();
        let forwarded = match self {
            ClientMessage::Offer { target_peer_id, offer } => {
                (target_peer_id, ServerMessage::Offer { from_peer_id, offer })
            }
            ClientMessage::Answer { target_peer_id, answer } => {
                (target_peer_id, ServerMessage::Answer { from_peer_id, answer })
            }
            ClientMessage::IceCandidate {
                target_peer_id,
                candidate,
            } => (
                target_peer_id,
                ServerMessage::IceCandidate {
                    from_peer_id,
                    candidate,
                },
            ),
            ClientMessage::TransferRequest {
                target_peer_id,
                files,
                transfer_id,
            } => (
                target_peer_id,
                ServerMessage::TransferRequest {
                    from_peer_id,
                    files,
                    transfer_id,
                },
            ),
            ClientMessage::TransferAccept {
                target_peer_id,
                transfer_id,
            } => (
                target_peer_id,
                ServerMessage::TransferAccept {
                    from_peer_id,
                    transfer_id,
                },
            ),
            ClientMessage::TransferReject {
                target_peer_id,
                transfer_id,
                reason,
            } => (
                target_peer_id,
                ServerMessage::TransferReject {
                    from_peer_id,
                    transfer_id,
                    reason,
                },
            ),
            _ => return None,
        };
        Some(forwarded)
    }
}

/// 릴레이 → 클라이언트 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    PeerId { peer_id: PeerId },

    PeersList { peers: Vec<PeerSummary> },

    #[serde(rename_all = "camelCase")]
    PeerDisconnected { peer_id: PeerId },

    #[serde(rename_all = "camelCase")]
    Offer { from_peer_id: PeerId, offer: Value },

    #[serde(rename_all = "camelCase")]
    Answer { from_peer_id: PeerId, answer: Value },

    #[serde(rename_all = "camelCase")]
    IceCandidate {
        from_peer_id: PeerId,
        candidate: Value,
    },

    #[serde(rename_all = "camelCase")]
    TransferRequest {
        from_peer_id: PeerId,
        files: Vec<FileDescriptor>,
        transfer_id: TransferId,
    },

    #[serde(rename_all = "camelCase")]
    TransferAccept {
        from_peer_id: PeerId,
        transfer_id: TransferId,
    },

    #[serde(rename_all = "camelCase")]
    TransferReject {
        from_peer_id: PeerId,
        transfer_id: TransferId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    PeerJoinedRoom { peer_id: PeerId, room_id: RoomId },

    #[serde(rename_all = "camelCase")]
    PeerLeftRoom { peer_id: PeerId, room_id: RoomId },

    #[serde(other)]
    Unknown,
}

/// PeerChannel 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChannelMessage {
    #[serde(rename_all = "camelCase")]
    FileTransferStart {
        transfer_id: TransferId,
        files: Vec<FileDescriptor>,
    },

    /// 청크 바이트는 JSON 숫자 배열로 인코딩됨
    #[serde(rename_all = "camelCase")]
    FileChunk {
        transfer_id: TransferId,
        file_name: String,
        offset: u64,
        chunk: Bytes,
        chunk_size: u64,
    },

    #[serde(rename_all = "camelCase")]
    FileTransferComplete { transfer_id: TransferId },

    /// 명시적 취소 제어 메시지
    #[serde(rename_all = "camelCase")]
    FileTransferCancel { transfer_id: TransferId },

    #[serde(other)]
    Unknown,
}

impl ChannelMessage {
    pub fn transfer_id(&self) -> Option<&str> {
        match self {
            ChannelMessage::FileTransferStart { transfer_id, .. }
            | ChannelMessage::FileChunk { transfer_id, .. }
            | ChannelMessage::FileTransferComplete { transfer_id }
            | ChannelMessage::FileTransferCancel { transfer_id } => Some(transfer_id),
            ChannelMessage::Unknown => None,
        }
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// 바이트에서 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::MalformedMessage(format!("UTF-8 아님: {}", e)))?;
        decode(text)
    }
}

/// JSON 텍스트를 메시지로 파싱
///
/// JSON 이 아니거나, 문자열 `type` 이 없거나, 필수 필드가 빠지면 `MalformedMessage`.
/// 모르는 `type` 은 각 enum 의 `Unknown` 으로 파싱됨.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| Error::MalformedMessage(format!("JSON 파싱 실패: {}", e)))?;

    if !matches!(value.get("type"), Some(Value::String(_))) {
        return Err(Error::MalformedMessage("type 필드 없음".into()));
    }

    serde_json::from_value(value).map_err(|e| Error::MalformedMessage(e.to_string()))
}

/// 메시지를 JSON 텍스트로 직렬화
pub fn encode<T: Serialize>(message: &T) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// 원본 텍스트의 `type` 값 (진단 로그용)
pub fn kind_of(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("type")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_transfer_request() {
        let text = r#"{"type":"transfer-request","targetPeerId":"B1","files":[{"name":"doc.pdf","size":2097152,"type":"application/pdf"}],"transferId":"t1"}"#;
        let msg: ClientMessage = decode(text).unwrap();

        assert_eq!(
            msg,
            ClientMessage::TransferRequest {
                target_peer_id: "B1".into(),
                files: vec![FileDescriptor::new("doc.pdf", 2_097_152, "application/pdf")],
                transfer_id: "t1".into(),
            }
        );
    }

    #[test]
    fn test_decode_unknown_kind() {
        let msg: ClientMessage = decode(r#"{"type":"ping","seq":1}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unknown);
        assert_eq!(kind_of(r#"{"type":"ping"}"#).as_deref(), Some("ping"));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode::<ClientMessage>("not json"),
            Err(Error::MalformedMessage(_))
        ));
        assert!(matches!(
            decode::<ClientMessage>(r#"{"targetPeerId":"B1"}"#),
            Err(Error::MalformedMessage(_))
        ));
        // 필수 필드 누락
        assert!(matches!(
            decode::<ClientMessage>(r#"{"type":"transfer-accept","targetPeerId":"B1"}"#),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_forward_tags_sender() {
        let msg = ClientMessage::TransferReject {
            target_peer_id: "A1".into(),
            transfer_id: "t1".into(),
            reason: Some("busy".into()),
        };
        let (target, forwarded) = msg.into_forward("B1").unwrap();
        assert_eq!(target, "A1");

        let value: Value = serde_json::from_str(&encode(&forwarded).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type":"transfer-reject","fromPeerId":"B1","transferId":"t1","reason":"busy"})
        );
    }

    #[test]
    fn test_join_room_is_not_forwarded() {
        let msg = ClientMessage::JoinRoom {
            room_id: "lobby".into(),
        };
        assert!(msg.target_peer_id().is_none());
        assert!(msg.into_forward("A1").is_none());
    }

    #[test]
    fn test_chunk_wire_format() {
        let msg = ChannelMessage::FileChunk {
            transfer_id: "t1".into(),
            file_name: "a.bin".into(),
            offset: 0,
            chunk: Bytes::from_static(&[1, 2, 3]),
            chunk_size: 3,
        };
        let value: Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type":"file-chunk","transferId":"t1","fileName":"a.bin","offset":0,"chunk":[1,2,3],"chunkSize":3})
        );

        let restored = ChannelMessage::from_bytes(value.to_string().as_bytes()).unwrap();
        assert_eq!(restored, msg);
    }
}
