//! Dropzone 클라이언트 - 릴레이를 통해 피어를 찾고 파일을 주고받음
//!
//! 시그널링은 릴레이로, 파일 바이트는 직접 TCP 채널로 전송.
//! 채널 주소는 릴레이가 그대로 전달하는 offer 에 실어 보냄.
//!
//! 사용법:
//!   cargo run --release --bin dropzone-client -- [OPTIONS] <list|send|receive> [FILES...]
//!
//! 예시:
//!   # 연결된 피어 보기
//!   cargo run --release --bin dropzone-client -- --relay ws://127.0.0.1:3001 list
//!
//!   # 파일 보내기
//!   cargo run --release --bin dropzone-client -- --to k3v9x0m2qa send report.pdf photo.png
//!
//!   # 받기 (수락 후 downloads/ 에 저장)
//!   cargo run --release --bin dropzone-client -- --output downloads receive

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dropzone::{
    ChunkStreamer, ClientMessage, Config, DownloadWriter, FileDescriptor, FileSource, PeerChannel,
    Received, RelayClient, ServerMessage, TcpChannel, TransferId, TransferManager, TransferStatus,
};

/// 채널 연결 대기 시간
const CHANNEL_TIMEOUT: Duration = Duration::from_secs(30);

enum Command {
    List,
    Send(Vec<PathBuf>),
    Receive,
}

/// 클라이언트 설정
struct ClientConfig {
    relay_url: String,
    target: Option<String>,
    advertise_ip: IpAddr,
    output_dir: PathBuf,
    command: Command,
    config: Config,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:3001".to_string(),
            target: None,
            advertise_ip: IpAddr::from([127, 0, 0, 1]),
            output_dir: PathBuf::from("."),
            command: Command::List,
            config: Config::default(),
        }
    }
}

fn parse_args() -> ClientConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--relay" | "-r" => {
                if i + 1 < args.len() {
                    config.relay_url = args[i + 1].clone();
                    i += 1;
                }
            }
            "--to" | "-t" => {
                if i + 1 < args.len() {
                    config.target = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--advertise" => {
                if i + 1 < args.len() {
                    config.advertise_ip = args[i + 1].parse().expect("유효한 IP 필요");
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    config.output_dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--chunk-size" => {
                if i + 1 < args.len() {
                    config.config.chunk_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--max-size" => {
                if i + 1 < args.len() {
                    config.config.max_file_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--auto-accept" | "-y" => {
                config.config.auto_accept = true;
            }
            "--no-wait" => {
                config.config.wait_for_accept = false;
            }
            "--help" | "-h" => {
                println!(
                    r#"Dropzone Client - P2P 파일 드롭 클라이언트

사용법:
  cargo run --release --bin dropzone-client -- [OPTIONS] <COMMAND> [FILES...]

명령:
  list                    릴레이에 연결된 피어 목록 출력
  send <FILES...>         --to 피어에게 파일 전송
  receive                 들어오는 전송을 받아 --output 에 저장

옵션:
  -r, --relay <URL>       릴레이 주소 (기본: ws://127.0.0.1:3001)
  -t, --to <PEER_ID>      받는 피어 ID
  --advertise <IP>        상대에게 알릴 채널 IP (기본: 127.0.0.1)
  -o, --output <DIR>      저장 디렉토리 (기본: .)
  --chunk-size <SIZE>     청크 크기 바이트 (기본: 16384)
  --max-size <SIZE>       수신 허용 최대 바이트 (기본: 1073741824)
  -y, --auto-accept       크기 제한 안의 요청 자동 수락
  --no-wait               transfer-accept 를 기다리지 않고 바로 전송
  -h, --help              이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    config.command = match positional.next().as_deref() {
        Some("send") => Command::Send(positional.map(PathBuf::from).collect()),
        Some("receive") => Command::Receive,
        _ => Command::List,
    };

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let client_config = parse_args();
    client_config.config.validate()?;

    info!("Dropzone Client starting...");
    info!("Relay: {}", client_config.relay_url);

    let mut client = RelayClient::connect(&client_config.relay_url).await?;
    info!("My peer ID: {}", client.peer_id());

    match &client_config.command {
        Command::List => {
            if client.peers().is_empty() {
                println!("연결된 다른 피어 없음");
            }
            for peer in client.peers() {
                println!("{}\t{}", peer.id, peer.ip);
            }
        }
        Command::Send(paths) => {
            let target = client_config
                .target
                .clone()
                .ok_or("--to <PEER_ID> 필요")?;
            send(&mut client, &client_config, &target, paths).await?;
        }
        Command::Receive => {
            receive(&mut client, &client_config).await?;
        }
    }

    client.close().await?;
    Ok(())
}

async fn send(
    client: &mut RelayClient,
    client_config: &ClientConfig,
    target: &str,
    paths: &[PathBuf],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        sources.push(FileSource::open(path).await?);
    }
    let files: Vec<_> = sources.iter().map(|s| s.descriptor.clone()).collect();

    let manager = TransferManager::new(client_config.config.clone());
    let transfer_id = manager.begin_outbound(target, files.clone())?;
    info!(
        "Transfer {}: {} files, {} bytes",
        transfer_id,
        files.len(),
        files.iter().map(|f| f.size).sum::<u64>()
    );

    client
        .send(&ClientMessage::TransferRequest {
            target_peer_id: target.to_string(),
            files,
            transfer_id: transfer_id.clone(),
        })
        .await?;

    // 수락 대기
    while manager.status(&transfer_id) == Some(TransferStatus::Pending) {
        match client.next_event().await? {
            ServerMessage::TransferAccept {
                from_peer_id,
                transfer_id: id,
            } if id == transfer_id => {
                manager.on_remote_accept(&from_peer_id, &id)?;
            }
            ServerMessage::TransferReject {
                from_peer_id,
                transfer_id: id,
                reason,
            } if id == transfer_id => {
                manager.on_remote_reject(&from_peer_id, &id, reason)?;
            }
            ServerMessage::PeerDisconnected { peer_id } => {
                manager.on_peer_disconnected(&peer_id);
            }
            _ => {}
        }
    }

    if manager.status(&transfer_id) != Some(TransferStatus::Transferring) {
        let session = manager.session(&transfer_id);
        warn!(
            "Transfer not started: {}",
            session.as_ref().and_then(|s| s.error()).unwrap_or("unknown")
        );
        return Ok(());
    }

    // 채널 주소를 offer 로 전달
    let listener = TcpListener::bind(SocketAddr::new(client_config.advertise_ip, 0)).await?;
    let channel_addr = listener.local_addr()?;
    client
        .send(&ClientMessage::Offer {
            target_peer_id: target.to_string(),
            offer: json!({ "transferId": transfer_id, "channel": channel_addr.to_string() }),
        })
        .await?;

    let mut channel = match tokio::time::timeout(CHANNEL_TIMEOUT, TcpChannel::accept(&listener)).await {
        Ok(channel) => channel?,
        Err(_) => {
            manager.on_channel_error(&transfer_id, "channel timeout");
            warn!("Transfer {} failed: channel timeout", transfer_id);
            return Ok(());
        }
    };

    let start = Instant::now();
    let streamer = ChunkStreamer::new(client_config.config.chunk_size);
    let status = streamer
        .stream(&manager, &transfer_id, sources, &mut channel)
        .await?;
    channel.close().await?;

    let elapsed = start.elapsed();
    if let Some(session) = manager.session(&transfer_id) {
        info!("Transfer {}: {}", transfer_id, status);
        info!("  Time: {:.2}s", elapsed.as_secs_f64());
        info!("  Bytes: {}/{}", session.transferred_size(), session.total_size());
        if elapsed.as_secs_f64() > 0.0 {
            info!(
                "  Throughput: {:.2} MB/s",
                session.transferred_size() as f64 / elapsed.as_secs_f64() / 1_000_000.0
            );
        }
    }
    Ok(())
}

async fn receive(
    client: &mut RelayClient,
    client_config: &ClientConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = TransferManager::new(client_config.config.clone());
    info!("Waiting for transfers as {}...", client.peer_id());

    loop {
        let (from, offer) = match client.next_event().await? {
            ServerMessage::TransferRequest {
                from_peer_id,
                files,
                transfer_id,
            } => {
                for file in &files {
                    info!("  {} ({} bytes, {})", file.name, file.size, file.mime_type);
                }
                let reply = reply_to_request(&manager, &from_peer_id, &transfer_id, files);
                client.send(&reply).await?;
                continue;
            }
            ServerMessage::Offer { from_peer_id, offer } => (from_peer_id, offer),
            ServerMessage::PeerDisconnected { peer_id } => {
                for id in manager.on_peer_disconnected(&peer_id) {
                    warn!("Transfer {} failed: {} disconnected", id, peer_id);
                }
                continue;
            }
            _ => continue,
        };

        let Some(addr) = channel_addr(&offer) else {
            warn!("Channel offer without address from {}", from);
            continue;
        };

        let mut channel = match TcpChannel::connect(addr).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!("Channel connect to {} failed: {}", addr, e);
                let offered = offer.get("transferId").and_then(Value::as_str);
                if let Some(id) = offered {
                    if manager.session(id).is_some_and(|s| s.counterparty() == from) {
                        manager.on_channel_error(id, e.to_string());
                    }
                }
                continue;
            }
        };
        client
            .send(&ClientMessage::Answer {
                target_peer_id: from.clone(),
                answer: json!({ "channel": "connected" }),
            })
            .await?;

        receive_files(&manager, &from, &mut channel, client_config).await?;
        manager.prune_finished();
    }
}

/// 채널이 닫히거나 전송이 끝날 때까지 수신. Ctrl+C 는 현재 전송을 취소.
async fn receive_files(
    manager: &TransferManager,
    from: &str,
    channel: &mut TcpChannel,
    client_config: &ClientConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = DownloadWriter::new(&client_config.output_dir);
    let mut current: Option<TransferId> = None;
    let mut last_progress = None;

    loop {
        let received = tokio::select! {
            received = channel.recv() => received,
            _ = tokio::signal::ctrl_c() => {
                if let Some(id) = &current {
                    match manager.cancel(id) {
                        Ok(cancel) => {
                            if let Err(e) = channel.send(cancel).await {
                                warn!("Failed to notify sender: {}", e);
                            }
                            warn!("Transfer {} cancelled", id);
                        }
                        Err(e) => warn!("Cancel failed: {}", e),
                    }
                }
                writer.discard().await;
                return Ok(());
            }
        };

        let message = match received {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(e) => {
                if let Some(id) = &current {
                    manager.on_channel_error(id, e.to_string());
                }
                break;
            }
        };

        match manager.on_channel_message(from, message) {
            Ok(Received::Started { transfer_id, files }) => {
                info!("Receiving {} ({} files)", transfer_id, files.len());
                writer.start(&files);
                current = Some(transfer_id);
            }
            Ok(Received::Chunk {
                transfer_id,
                file_name,
                offset,
                data,
                progress,
            }) => {
                if let Err(e) = writer.write(&file_name, offset, &data).await {
                    manager.on_channel_error(&transfer_id, e.to_string());
                    warn!("Transfer {} failed: {}", transfer_id, e);
                    writer.discard().await;
                    return Ok(());
                }
                if progress % 10 == 0 && last_progress != Some(progress) {
                    info!("  {}: {}%", transfer_id, progress);
                }
                last_progress = Some(progress);
            }
            Ok(Received::Completed { transfer_id }) => {
                for path in writer.finish().await? {
                    info!("Saved {:?}", path);
                }
                info!("Transfer {} completed", transfer_id);
                return Ok(());
            }
            Ok(Received::Cancelled { transfer_id }) => {
                writer.discard().await;
                warn!("Transfer {} cancelled by sender", transfer_id);
                return Ok(());
            }
            Ok(Received::Ignored) => {}
            Err(e) => {
                warn!("Transfer failed: {}", e);
                writer.discard().await;
                return Ok(());
            }
        }
    }

    if let Some(id) = current {
        if manager.status(&id) == Some(TransferStatus::Transferring) {
            manager.on_channel_error(&id, "channel closed");
        }
    }
    writer.discard().await;
    Ok(())
}

/// transfer-request 에 대한 응답. 잘못된 요청(중복 ID, 크기 합 초과)은 거절.
fn reply_to_request(
    manager: &TransferManager,
    from: &str,
    transfer_id: &str,
    files: Vec<FileDescriptor>,
) -> ClientMessage {
    let decided = manager
        .on_transfer_request(from, transfer_id, files)
        .and_then(|decision| match decision.reply(from, transfer_id) {
            Some(reply) => Ok(reply),
            None => {
                // 명령으로 받기를 시작했으므로 크기 제한 안이면 수락
                manager.accept(transfer_id)?;
                Ok(ClientMessage::TransferAccept {
                    target_peer_id: from.to_string(),
                    transfer_id: transfer_id.to_string(),
                })
            }
        });

    decided.unwrap_or_else(|e| {
        warn!("Rejecting transfer {} from {}: {}", transfer_id, from, e);
        ClientMessage::TransferReject {
            target_peer_id: from.to_string(),
            transfer_id: transfer_id.to_string(),
            reason: Some(e.to_string()),
        }
    })
}

fn channel_addr(offer: &Value) -> Option<SocketAddr> {
    offer.get("channel")?.as_str()?.parse().ok()
}
