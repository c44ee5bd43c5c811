//! 에러 타입 정의

use thiserror::Error;

use crate::session::TransferStatus;

/// Dropzone 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 에러: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket 에러: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("잘못된 메시지: {0}")]
    MalformedMessage(String),

    #[error("메시지 크기 초과: {size} bytes (최대 {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("알 수 없는 전송: transfer_id={0}")]
    UnknownTransfer(String),

    #[error("중복된 전송 ID: transfer_id={0}")]
    DuplicateTransfer(String),

    #[error("유효하지 않은 상태 전이: {from} -> {to}")]
    InvalidTransition {
        from: TransferStatus,
        to: TransferStatus,
    },

    #[error("청크 초과: transferred={transferred}, chunk={chunk_size}, total={total_size}")]
    ChunkOverflow {
        transferred: u64,
        chunk_size: u64,
        total_size: u64,
    },

    #[error("청크 크기 불일치: declared={declared}, actual={actual}")]
    ChunkSizeMismatch { declared: u64, actual: u64 },

    #[error("전송 미완료: transferred={transferred}, total={total_size}")]
    IncompleteTransfer { transferred: u64, total_size: u64 },

    #[error("파일 크기 불일치: {name} expected {expected}, got {got}")]
    FileSizeMismatch {
        name: String,
        expected: u64,
        got: u64,
    },

    #[error("채널 종료")]
    ChannelClosed,

    #[error("연결 종료")]
    ConnectionClosed,

    #[error("설정 에러: {0}")]
    Config(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
