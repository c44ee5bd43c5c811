//! 릴레이 및 전송 설정

use std::net::SocketAddr;

use crate::{Error, Result, DEFAULT_CHUNK_SIZE, DEFAULT_RELAY_PORT};

/// Dropzone 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 릴레이 바인드 주소
    pub bind_addr: SocketAddr,

    /// 연결당 송신 큐 크기 (메시지 수)
    /// 큐가 가득 차면 해당 연결은 쓰기 불가로 보고 전달을 버림
    pub outbound_queue_size: usize,

    /// 수신 메시지 최대 크기 (바이트)
    pub max_message_size: usize,

    /// 청크 크기 (바이트)
    pub chunk_size: usize,

    /// 송신측이 transfer-accept 를 받은 뒤에만 스트리밍 시작
    pub wait_for_accept: bool,

    /// 수신 요청 자동 수락
    pub auto_accept: bool,

    /// 수신 허용 최대 전송 크기 (바이트)
    pub max_file_size: u64,

    /// 전송 기록 최대 개수
    pub history_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_RELAY_PORT)),
            outbound_queue_size: 256,
            max_message_size: 1024 * 1024,       // 1MB
            chunk_size: DEFAULT_CHUNK_SIZE,      // 16KB
            wait_for_accept: true,
            auto_accept: false,
            max_file_size: 1024 * 1024 * 1024,   // 1GB
            history_limit: 100,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 기본값에 환경 변수(PORT) 적용
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port
                .parse()
                .map_err(|_| Error::Config(format!("PORT 값이 올바르지 않음: {}", port)))?;
            config.bind_addr.set_port(port);
        }
        Ok(config)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size 는 0 보다 커야 함".into()));
        }
        if self.outbound_queue_size == 0 {
            return Err(Error::Config("outbound_queue_size 는 0 보다 커야 함".into()));
        }
        if self.max_message_size == 0 {
            return Err(Error::Config("max_message_size 는 0 보다 커야 함".into()));
        }
        Ok(())
    }

    /// 파일 크기에 대한 청크 수 계산
    pub fn chunks_for(&self, size: u64) -> u64 {
        size.div_ceil(self.chunk_size as u64)
    }

    /// 저메모리 기기용 설정
    pub fn low_memory() -> Self {
        Self {
            outbound_queue_size: 64,
            max_message_size: 256 * 1024,        // 256KB
            chunk_size: 8 * 1024,                // 8KB
            max_file_size: 256 * 1024 * 1024,    // 256MB
            history_limit: 20,
            ..Self::default()
        }
    }

    /// 신뢰할 수 있는 로컬 네트워크용 설정
    pub fn lan() -> Self {
        Self {
            outbound_queue_size: 1024,
            max_message_size: 4 * 1024 * 1024,   // 4MB
            chunk_size: 64 * 1024,               // 64KB
            auto_accept: true,
            max_file_size: u64::MAX,
            ..Self::default()
        }
    }
}
