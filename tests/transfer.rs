//! 엔드포인트 간 전송 통합 테스트

use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpListener;

use dropzone::{
    ChannelMessage, ChunkStreamer, Config, Direction, DownloadWriter, FileSource, InboundDecision,
    MemoryChannel, PeerChannel, Received, TcpChannel, TransferManager, TransferStatus,
};

fn data(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// 수신측 루프: 채널이 닫힐 때까지 처리하고 청크를 기록
async fn drain<C: PeerChannel>(
    manager: &TransferManager,
    from: &str,
    channel: &mut C,
    writer: &mut DownloadWriter,
) -> Vec<u8> {
    let mut progress = Vec::new();
    while let Some(msg) = channel.recv().await.unwrap() {
        if let Ok(Received::Chunk {
            file_name,
            offset,
            data,
            progress: p,
            ..
        }) = manager.on_channel_message(from, msg)
        {
            writer.write(&file_name, offset, &data).await.unwrap();
            progress.push(p);
        }
    }
    progress
}

#[tokio::test]
async fn test_request_accept_stream_over_memory_channel() {
    let sender = Arc::new(TransferManager::new(Config::default()));
    let receiver = Arc::new(TransferManager::new(Config::default()));

    let sources = vec![
        FileSource::from_bytes("one.bin", "application/octet-stream", data(40_000, 1)),
        FileSource::from_bytes("two.txt", "text/plain", data(100, 2)),
    ];
    let files: Vec<_> = sources.iter().map(|s| s.descriptor.clone()).collect();

    // 릴레이 단계: request → accept
    let id = sender.begin_outbound("B1", files.clone()).unwrap();
    let decision = receiver.on_transfer_request("A1", &id, files).unwrap();
    assert_eq!(decision, InboundDecision::Pending);
    receiver.accept(&id).unwrap();
    assert!(sender.on_remote_accept("B1", &id).unwrap());

    let dir = tempfile::tempdir().unwrap();
    let (mut a, mut b) = MemoryChannel::pair(4);

    let recv_task = {
        let receiver = receiver.clone();
        let path = dir.path().to_path_buf();
        tokio::spawn(async move {
            let mut writer = DownloadWriter::new(path);
            let progress = drain(&receiver, "A1", &mut b, &mut writer).await;
            writer.finish().await.unwrap();
            progress
        })
    };

    let status = ChunkStreamer::new(16384)
        .stream(&sender, &id, sources, &mut a)
        .await
        .unwrap();
    a.close().await.unwrap();
    let progress = recv_task.await.unwrap();

    assert_eq!(status, TransferStatus::Completed);
    assert_eq!(receiver.status(&id), Some(TransferStatus::Completed));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&100));

    assert_eq!(std::fs::read(dir.path().join("one.bin")).unwrap(), data(40_000, 1));
    assert_eq!(std::fs::read(dir.path().join("two.txt")).unwrap(), data(100, 2));

    let history = receiver.history();
    let entry = history.entries().next().unwrap();
    assert_eq!(entry.direction, Direction::Inbound);
    assert_eq!(entry.peer_id, "A1");
    assert_eq!(entry.status, TransferStatus::Completed);
}

#[tokio::test]
async fn test_stream_over_tcp_channel() {
    let config = Config {
        wait_for_accept: false,
        ..Config::default()
    };
    let sender = TransferManager::new(config.clone());
    let receiver = Arc::new(TransferManager::new(config));

    let payload = data(100_000, 7);
    let source = FileSource::from_bytes("photo.png", "image/png", payload.clone());
    let id = sender
        .begin_outbound("B1", vec![source.descriptor.clone()])
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let dir = tempfile::tempdir().unwrap();

    // 수신측은 file-transfer-start 로 세션을 만듦
    let recv_task = {
        let receiver = receiver.clone();
        let path = dir.path().to_path_buf();
        tokio::spawn(async move {
            let mut channel = TcpChannel::connect(addr).await.unwrap();
            let mut writer = DownloadWriter::new(path);
            drain(&receiver, "A1", &mut channel, &mut writer).await;
            writer.finish().await.unwrap()
        })
    };

    let mut channel = TcpChannel::accept(&listener).await.unwrap();
    let status = ChunkStreamer::new(16384)
        .stream(&sender, &id, vec![source], &mut channel)
        .await
        .unwrap();
    channel.close().await.unwrap();

    let written = recv_task.await.unwrap();
    assert_eq!(status, TransferStatus::Completed);
    assert_eq!(written, vec![dir.path().join("photo.png")]);
    assert_eq!(std::fs::read(&written[0]).unwrap(), payload);
    assert_eq!(receiver.status(&id), Some(TransferStatus::Completed));
}

#[tokio::test]
async fn test_cancel_mid_stream_ignores_late_chunks() {
    let receiver = TransferManager::new(Config::lan());
    let files = vec![dropzone::FileDescriptor::new("big.bin", 64 * 1024, "application/octet-stream")];
    receiver.on_transfer_request("A1", "t1", files).unwrap();

    let chunk = |offset: u64| ChannelMessage::FileChunk {
        transfer_id: "t1".into(),
        file_name: "big.bin".into(),
        offset,
        chunk: Bytes::from(vec![0u8; 16384]),
        chunk_size: 16384,
    };

    receiver.on_channel_message("A1", chunk(0)).unwrap();
    receiver.on_channel_message("A1", chunk(16384)).unwrap();
    receiver.cancel("t1").unwrap();

    // 이미 전송 중이던 청크와 완료 신호
    assert_eq!(
        receiver.on_channel_message("A1", chunk(32768)).unwrap(),
        Received::Ignored
    );
    assert_eq!(
        receiver
            .on_channel_message(
                "A1",
                ChannelMessage::FileTransferComplete {
                    transfer_id: "t1".into()
                }
            )
            .unwrap(),
        Received::Ignored
    );

    let session = receiver.session("t1").unwrap();
    assert_eq!(session.status(), TransferStatus::Cancelled);
    assert_eq!(session.transferred_size(), 32768);
    assert_eq!(session.progress(), 50);
    assert!(session.completed_at().is_some());
}

#[tokio::test]
async fn test_sender_cancel_reaches_receiver() {
    let config = Config {
        wait_for_accept: false,
        ..Config::default()
    };
    let sender = TransferManager::new(config.clone());
    let receiver = TransferManager::new(config);

    let source = FileSource::from_bytes("big.bin", "application/octet-stream", data(64 * 1024, 3));
    let id = sender
        .begin_outbound("B1", vec![source.descriptor.clone()])
        .unwrap();
    let (mut a, mut b) = MemoryChannel::pair(2);

    let streamer = ChunkStreamer::new(1024);
    let stream = streamer.stream(&sender, &id, vec![source], &mut a);
    let receive = async {
        let mut chunks = 0;
        while let Some(msg) = b.recv().await.unwrap() {
            match receiver.on_channel_message("A1", msg).unwrap() {
                Received::Chunk { .. } => {
                    chunks += 1;
                    if chunks == 1 {
                        sender.cancel(&id).unwrap();
                    }
                }
                Received::Cancelled { .. } => break,
                _ => {}
            }
        }
        chunks
    };

    let (status, chunks) = tokio::join!(stream, receive);
    assert_eq!(status.unwrap(), TransferStatus::Cancelled);
    assert!(chunks < 64);
    assert_eq!(sender.status(&id), Some(TransferStatus::Cancelled));
    assert_eq!(receiver.status(&id), Some(TransferStatus::Cancelled));
    assert!(receiver.session(&id).unwrap().completed_at().is_some());
}

#[tokio::test]
async fn test_receiver_cancel_stops_sender() {
    let config = Config {
        wait_for_accept: false,
        ..Config::default()
    };
    let sender = TransferManager::new(config.clone());
    let receiver = TransferManager::new(config);

    let source = FileSource::from_bytes("big.bin", "application/octet-stream", data(64 * 1024, 4));
    let id = sender
        .begin_outbound("B1", vec![source.descriptor.clone()])
        .unwrap();
    let (mut a, mut b) = MemoryChannel::pair(2);

    let stream = async {
        let status = ChunkStreamer::new(1024)
            .stream(&sender, &id, vec![source], &mut a)
            .await;
        a.close().await.unwrap();
        status
    };
    let receive = async {
        let mut late = Vec::new();
        while let Some(msg) = b.recv().await.unwrap() {
            match receiver.on_channel_message("A1", msg).unwrap() {
                Received::Chunk { .. } if receiver.status(&id) == Some(TransferStatus::Transferring) => {
                    // 받는 쪽 취소 메시지가 보내는 쪽 관리자에 도착
                    let cancel = receiver.cancel(&id).unwrap();
                    let outcome = sender.on_channel_message("B1", cancel).unwrap();
                    assert!(matches!(outcome, Received::Cancelled { .. }));
                }
                other => late.push(other),
            }
        }
        late
    };

    let (status, late) = tokio::join!(stream, receive);
    assert_eq!(status.unwrap(), TransferStatus::Cancelled);
    assert_eq!(receiver.status(&id), Some(TransferStatus::Cancelled));
    assert!(late.iter().all(|r| !matches!(r, Received::Completed { .. })));
}
