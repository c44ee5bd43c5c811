//! 릴레이 클라이언트
//!
//! 릴레이에 WebSocket 으로 붙어 peer-id / peers-list 를 받고,
//! 이후 시그널링 메시지를 주고받음.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::message::{self, ClientMessage, PeerId, PeerSummary, ServerMessage};
use crate::{Error, Result};

/// 릴레이 클라이언트
pub struct RelayClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    peer_id: PeerId,
    peers: Vec<PeerSummary>,
}

impl RelayClient {
    /// 연결 후 peer-id 와 peers-list 를 받을 때까지 대기
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _) = connect_async(url).await?;
        let mut client = Self {
            ws,
            peer_id: PeerId::new(),
            peers: Vec::new(),
        };

        let mut got_list = false;
        while client.peer_id.is_empty() || !got_list {
            match client.next_event().await? {
                ServerMessage::PeerId { peer_id } => client.peer_id = peer_id,
                ServerMessage::PeersList { .. } => got_list = true,
                other => debug!("연결 중 받은 메시지 무시: {:?}", other),
            }
        }

        info!(
            "릴레이 연결됨: {}, peer_id={}, 피어 {}명",
            url,
            client.peer_id,
            client.peers.len()
        );
        Ok(client)
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// 알려진 다른 피어 (연결 시점 스냅샷에서 끊긴 피어 제외)
    pub fn peers(&self) -> &[PeerSummary] {
        &self.peers
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let text = message::encode(message)?;
        self.ws.send(Message::Text(text)).await?;
        Ok(())
    }

    /// 다음 릴레이 이벤트
    ///
    /// 텍스트가 아닌 프레임과 파싱할 수 없는 메시지는 건너뜀
    pub async fn next_event(&mut self) -> Result<ServerMessage> {
        loop {
            let frame = match self.ws.next().await {
                Some(frame) => frame?,
                None => return Err(Error::ConnectionClosed),
            };

            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => return Err(Error::ConnectionClosed),
                _ => continue,
            };

            let event: ServerMessage = match message::decode(&text) {
                Ok(event) => event,
                Err(e) => {
                    warn!("릴레이 메시지 파싱 실패: {}", e);
                    continue;
                }
            };

            match &event {
                ServerMessage::PeersList { peers } => self.peers = peers.clone(),
                ServerMessage::PeerDisconnected { peer_id } => {
                    self.peers.retain(|p| &p.id != peer_id);
                }
                _ => {}
            }
            return Ok(event);
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}
