//! # Dropzone
//!
//! P2P 파일 드롭: 시그널링 릴레이 + 청크 전송 세션
//!
//! ## 핵심 특징
//! - **릴레이**: 피어 ID 발급, 피어/룸 추적, `targetPeerId` 기반 메시지 전달
//! - **무응답 전달**: 대상이 없거나 쓸 수 없으면 조용히 버림 (발신자에게 에러 없음)
//! - **룸**: 빈 룸은 즉시 제거, 피어는 한 번에 하나의 룸에만 속함
//! - **전송 세션**: pending → transferring → completed/failed/cancelled 상태 머신
//! - **청크 스트리밍**: 고정 크기 청크, 세션당 청크 하나씩 순차 전송
//! - **전송 기록**: 종료된 세션을 최신순으로 보관
//!
//! 파일 바이트는 릴레이를 지나지 않고 [`channel::PeerChannel`] 로만 오감.

pub mod channel;
pub mod chunk;
pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod message;
pub mod registry;
pub mod relay;
pub mod room;
pub mod router;
pub mod server;
pub mod session;
pub mod transfer;

pub use channel::{MemoryChannel, PeerChannel, TcpChannel};
pub use chunk::{ChunkStreamer, DownloadWriter, FileSource};
pub use client::RelayClient;
pub use config::Config;
pub use error::{Error, Result};
pub use history::{HistoryEntry, HistoryStore, TransferHistory};
pub use message::{ChannelMessage, ClientMessage, FileDescriptor, PeerId, RoomId, ServerMessage, TransferId};
pub use registry::{Delivery, Peer, PeerRegistry};
pub use relay::{Relay, RelayStatus};
pub use room::{RoomInfo, RoomManager};
pub use router::{DropReason, Routing, SignalingRouter};
pub use server::RelayServer;
pub use session::{Direction, TransferSession, TransferStatus};
pub use transfer::{InboundDecision, Received, TransferManager};

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 16384; // 16KB

/// 기본 릴레이 포트
pub const DEFAULT_RELAY_PORT: u16 = 3001;

/// 피어 ID / 전송 ID 길이 (base36 문자 수)
pub const ID_LEN: usize = 10;
