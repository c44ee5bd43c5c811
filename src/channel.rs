//! PeerChannel: 피어 간 대용량 전송 채널
//!
//! 릴레이를 거치지 않는 양방향 메시지 채널. 메시지 순서는 보존됨.
//! - [`MemoryChannel`]: 같은 프로세스 안의 쌍 (테스트, 루프백)
//! - [`TcpChannel`]: 길이 접두 JSON 프레임
//!
//! ```text
//! ┌─────────────────┬─────────────────────────────┐
//! │ 길이 (4 bytes)  │ ChannelMessage JSON (N bytes)│
//! │  big-endian u32 │                             │
//! └─────────────────┴─────────────────────────────┘
//! ```

use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::debug;

use crate::message::ChannelMessage;
use crate::{Error, Result};

/// 프레임 최대 크기 (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// 피어 채널
pub trait PeerChannel: Send {
    /// 메시지 전송 (순서 보존)
    fn send(&mut self, message: ChannelMessage) -> impl Future<Output = Result<()>> + Send;

    /// 다음 메시지. 채널이 닫히면 `None`.
    fn recv(&mut self) -> impl Future<Output = Result<Option<ChannelMessage>>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// 메모리 채널
pub struct MemoryChannel {
    tx: Option<mpsc::Sender<ChannelMessage>>,
    rx: mpsc::Receiver<ChannelMessage>,
}

impl MemoryChannel {
    /// 연결된 채널 쌍 생성
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (tx_a, rx_b) = mpsc::channel(capacity);
        let (tx_b, rx_a) = mpsc::channel(capacity);
        (
            Self {
                tx: Some(tx_a),
                rx: rx_a,
            },
            Self {
                tx: Some(tx_b),
                rx: rx_b,
            },
        )
    }
}

impl PeerChannel for MemoryChannel {
    async fn send(&mut self, message: ChannelMessage) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::ChannelClosed)?;
        tx.send(message).await.map_err(|_| Error::ChannelClosed)
    }

    async fn recv(&mut self) -> Result<Option<ChannelMessage>> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

/// TCP 채널
pub struct TcpChannel {
    stream: TcpStream,
    peer_addr: SocketAddr,
}

impl TcpChannel {
    pub fn new(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        Ok(Self { stream, peer_addr })
    }

    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        debug!("채널 연결됨: {}", addr);
        Self::new(stream)
    }

    /// 연결 하나 수락
    pub async fn accept(listener: &TcpListener) -> Result<Self> {
        let (stream, addr) = listener.accept().await?;
        debug!("채널 수락됨: {}", addr);
        Self::new(stream)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl PeerChannel for TcpChannel {
    async fn send(&mut self, message: ChannelMessage) -> Result<()> {
        write_frame(&mut self.stream, &message).await
    }

    async fn recv(&mut self) -> Result<Option<ChannelMessage>> {
        read_frame(&mut self.stream).await
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// 프레임 하나 쓰기
pub async fn write_frame<W>(writer: &mut W, message: &ChannelMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = message.to_bytes()?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(Error::MessageTooLarge {
            size: body.len(),
            max_size: MAX_FRAME_SIZE,
        });
    }

    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// 프레임 하나 읽기. 프레임 경계에서 EOF 면 `None`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<ChannelMessage>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::MessageTooLarge {
            size: len,
            max_size: MAX_FRAME_SIZE,
        });
    }
    if len == 0 {
        return Err(Error::MalformedMessage("빈 프레임".into()));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    ChannelMessage::from_bytes(&body).map(Some)
}
