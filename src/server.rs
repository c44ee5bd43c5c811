//! 릴레이 네트워크 계층
//!
//! 하나의 TCP 포트에서
//! - WebSocket 업그레이드 요청 → 시그널링 연결
//! - 일반 HTTP GET → 읽기 전용 상태 JSON (/health, /api/status, /api/peers, /api/rooms)

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::message::{self, ServerMessage};
use crate::relay::Relay;
use crate::{Config, Error, Result};

/// HTTP 요청 헤더 최대 크기
const MAX_REQUEST_HEAD: usize = 8 * 1024;

/// 파싱된 HTTP 요청 헤더
#[derive(Debug)]
struct RequestHead {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
    }

    /// 핸드셰이크 헤더 검사 후 Sec-WebSocket-Key 반환. 실패 시 400 응답용 사유.
    fn websocket_key(&self) -> std::result::Result<&str, &'static str> {
        let connection_upgrade = self
            .header("connection")
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")))
            .unwrap_or(false);
        if !connection_upgrade {
            return Err("missing connection upgrade");
        }
        if self.header("sec-websocket-version").map(str::trim) != Some("13") {
            return Err("unsupported websocket version");
        }
        self.header("sec-websocket-key").ok_or("missing key")
    }
}

/// 릴레이 서버
pub struct RelayServer {
    config: Config,
    relay: Arc<Relay>,
}

impl RelayServer {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let relay = Arc::new(Relay::new(&config));
        Ok(Self { config, relay })
    }

    pub fn relay(&self) -> Arc<Relay> {
        self.relay.clone()
    }

    /// 설정된 주소에서 실행
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// 이미 바인딩된 리스너로 실행
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.serve_with_shutdown(listener, std::future::pending())
            .await
    }

    /// 종료 신호가 올 때까지 실행
    pub async fn serve_with_shutdown<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("릴레이 대기 중: {}", listener.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let relay = self.relay.clone();
                            let config = self.config.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, relay, config).await {
                                    debug!("연결 종료 {}: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("accept 에러: {}", e);
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("릴레이 종료");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    relay: Arc<Relay>,
    config: Config,
) -> Result<()> {
    let head = read_request_head(&mut stream).await?;

    if head.is_websocket_upgrade() {
        let key = match head.websocket_key() {
            Ok(key) => key.to_string(),
            Err(reason) => {
                debug!("잘못된 업그레이드 요청: {}, {}", addr, reason);
                write_response(&mut stream, "400 Bad Request", &json!({"error": reason})).await?;
                return Ok(());
            }
        };

        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Connection: Upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            derive_accept_key(key.as_bytes())
        );
        stream.write_all(response.as_bytes()).await?;

        let ws = WebSocketStream::from_raw_socket(stream, Role::Server, None).await;
        serve_peer(ws, addr, relay, config).await;
        return Ok(());
    }

    serve_status(&mut stream, &head, &relay).await
}

/// 시그널링 연결 하나 처리
async fn serve_peer(
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    relay: Arc<Relay>,
    config: Config,
) {
    let (mut sink, mut frames) = ws.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(config.outbound_queue_size);

    let peer = relay.connect(addr.ip().to_string(), tx);
    let peer_id = peer.id.clone();

    // 송신 태스크: 큐 → 소켓
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match message::encode(&msg) {
                Ok(text) => text,
                Err(e) => {
                    warn!("메시지 직렬화 실패: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                relay.handle(&peer_id, &text);
            }
            Ok(Message::Binary(data)) => {
                warn!("바이너리 프레임 무시: peer={}, {} bytes", peer_id, data.len());
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket 에러: peer={}, {}", peer_id, e);
                break;
            }
        }
    }

    relay.disconnect(&peer_id);
    writer.abort();
}

/// 상태 조회 응답
async fn serve_status(stream: &mut TcpStream, head: &RequestHead, relay: &Relay) -> Result<()> {
    if head.method != "GET" {
        return write_response(
            stream,
            "405 Method Not Allowed",
            &json!({"error": "method not allowed"}),
        )
        .await;
    }

    let path = head.path.split('?').next().unwrap_or("");
    let body = match path {
        "/health" => json!({"status": "healthy", "timestamp": Utc::now().to_rfc3339()}),
        "/api/status" => serde_json::to_value(relay.status())?,
        "/api/peers" => serde_json::to_value(relay.peers(None))?,
        "/api/rooms" => serde_json::to_value(relay.rooms())?,
        _ => {
            return write_response(stream, "404 Not Found", &json!({"error": "not found"})).await;
        }
    };

    write_response(stream, "200 OK", &body).await
}

async fn write_response(
    stream: &mut TcpStream,
    status: &str,
    body: &serde_json::Value,
) -> Result<()> {
    let body = body.to_string();
    let response = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Connection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// 요청 헤더 끝(`\r\n\r\n`)까지 읽기
///
/// 클라이언트는 응답 전에는 추가 데이터를 보내지 않으므로 헤더 뒤 바이트는 없다고 봄
async fn read_request_head(stream: &mut TcpStream) -> Result<RequestHead> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            return parse_request_head(&buf[..end]);
        }
        if buf.len() > MAX_REQUEST_HEAD {
            return Err(Error::MessageTooLarge {
                size: buf.len(),
                max_size: MAX_REQUEST_HEAD,
            });
        }
    }
}

fn parse_request_head(raw: &[u8]) -> Result<RequestHead> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| Error::MalformedMessage("HTTP 헤더가 UTF-8 아님".into()))?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (method, path) = match (parts.next(), parts.next()) {
        (Some(method), Some(path)) => (method.to_string(), path.to_string()),
        _ => {
            return Err(Error::MalformedMessage(format!(
                "요청 라인 오류: {}",
                request_line
            )))
        }
    };

    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect();

    Ok(RequestHead {
        method,
        path,
        headers,
    })
}
