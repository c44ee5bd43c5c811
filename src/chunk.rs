//! 청크 스트리밍
//!
//! - 송신: 파일 목록 순서대로 고정 크기 청크로 잘라 PeerChannel 로 전송
//! - 수신: 받은 청크를 오프셋 위치에 기록 ([`DownloadWriter`])
//!
//! 한 세션에는 항상 청크 하나만 진행 중 (읽기 → 전송 → 다음 읽기).

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::channel::PeerChannel;
use crate::message::{ChannelMessage, FileDescriptor};
use crate::session::TransferStatus;
use crate::transfer::TransferManager;
use crate::{Error, Result};

/// 기본 MIME 타입
const DEFAULT_MIME: &str = "application/octet-stream";

/// 전송할 파일 하나
pub struct FileSource {
    pub descriptor: FileDescriptor,
    reader: Box<dyn AsyncRead + Unpin + Send>,
}

impl FileSource {
    pub fn new(descriptor: FileDescriptor, reader: impl AsyncRead + Unpin + Send + 'static) -> Self {
        Self {
            descriptor,
            reader: Box::new(reader),
        }
    }

    /// 메모리 데이터로 생성
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let descriptor = FileDescriptor::new(name, data.len() as u64, mime_type);
        Self::new(descriptor, std::io::Cursor::new(data))
    }

    /// 디스크 파일 열기
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Config(format!("파일 이름 없음: {}", path.display())))?;

        let descriptor = FileDescriptor::new(name, size, mime_for(path));
        Ok(Self::new(descriptor, file))
    }
}

/// 확장자로 MIME 타입 추정
fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("zip") => "application/zip",
        _ => DEFAULT_MIME,
    }
}

/// 청크 송신기
pub struct ChunkStreamer {
    chunk_size: usize,
}

impl ChunkStreamer {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// 세션의 파일들을 채널로 전송
    ///
    /// 세션이 transferring 이 아니면 (수락 대기, 취소 등) 아무것도 보내지 않거나
    /// 그 자리에서 멈추고 현재 상태를 반환. 채널 에러는 세션을 실패시킴.
    pub async fn stream<C: PeerChannel>(
        &self,
        manager: &TransferManager,
        transfer_id: &str,
        sources: Vec<FileSource>,
        channel: &mut C,
    ) -> Result<TransferStatus> {
        match self.stream_inner(manager, transfer_id, sources, channel).await {
            Ok(status) => Ok(status),
            Err(e) => {
                manager.on_channel_error(transfer_id, e.to_string());
                Err(e)
            }
        }
    }

    async fn stream_inner<C: PeerChannel>(
        &self,
        manager: &TransferManager,
        transfer_id: &str,
        sources: Vec<FileSource>,
        channel: &mut C,
    ) -> Result<TransferStatus> {
        let status = current_status(manager, transfer_id)?;
        if status != TransferStatus::Transferring {
            debug!("전송 {} 스트리밍 생략: {}", transfer_id, status);
            return Ok(status);
        }

        let files = sources.iter().map(|s| s.descriptor.clone()).collect();
        channel
            .send(ChannelMessage::FileTransferStart {
                transfer_id: transfer_id.to_string(),
                files,
            })
            .await?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut chunk_count = 0u64;

        for mut source in sources {
            let name = source.descriptor.name.clone();
            let expected = source.descriptor.size;
            let mut offset = 0u64;

            loop {
                let status = current_status(manager, transfer_id)?;
                if status != TransferStatus::Transferring {
                    info!("전송 {} 중단: {} ({} 청크 전송됨)", transfer_id, status, chunk_count);
                    return Ok(stopped(transfer_id, status, channel).await);
                }

                let n = read_full(&mut source.reader, &mut buf).await?;
                if n == 0 {
                    break;
                }
                if offset + n as u64 > expected {
                    return Err(Error::FileSizeMismatch {
                        name,
                        expected,
                        got: offset + n as u64,
                    });
                }

                channel
                    .send(ChannelMessage::FileChunk {
                        transfer_id: transfer_id.to_string(),
                        file_name: name.clone(),
                        offset,
                        chunk: Bytes::copy_from_slice(&buf[..n]),
                        chunk_size: n as u64,
                    })
                    .await?;
                manager.record_sent(transfer_id, n as u64)?;

                offset += n as u64;
                chunk_count += 1;
            }

            if offset != expected {
                return Err(Error::FileSizeMismatch {
                    name,
                    expected,
                    got: offset,
                });
            }
            debug!("파일 전송 완료: {} ({} bytes)", name, offset);
        }

        // 마지막 청크 직후 취소되었으면 완료 신호를 보내지 않음
        let status = current_status(manager, transfer_id)?;
        if status != TransferStatus::Transferring {
            return Ok(stopped(transfer_id, status, channel).await);
        }

        channel
            .send(ChannelMessage::FileTransferComplete {
                transfer_id: transfer_id.to_string(),
            })
            .await?;
        manager.complete_sent(transfer_id)?;

        info!("전송 {} 완료: {} 청크", transfer_id, chunk_count);
        Ok(TransferStatus::Completed)
    }
}

/// 스트리밍 도중 멈춤. 취소된 경우 상대에게 file-transfer-cancel 전송.
async fn stopped<C: PeerChannel>(
    transfer_id: &str,
    status: TransferStatus,
    channel: &mut C,
) -> TransferStatus {
    if status == TransferStatus::Cancelled {
        let cancel = ChannelMessage::FileTransferCancel {
            transfer_id: transfer_id.to_string(),
        };
        if let Err(e) = channel.send(cancel).await {
            debug!("전송 {} 취소 알림 실패: {}", transfer_id, e);
        }
    }
    status
}

fn current_status(manager: &TransferManager, transfer_id: &str) -> Result<TransferStatus> {
    manager
        .status(transfer_id)
        .ok_or_else(|| Error::UnknownTransfer(transfer_id.to_string()))
}

/// 버퍼가 찰 때까지 또는 EOF 까지 읽기
async fn read_full<R: AsyncRead + Unpin + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// 수신 파일 기록기
///
/// 청크를 파일의 오프셋 위치에 씀. 파일 이름의 경로 부분은 버림.
/// 청크가 없는 빈 파일은 [`DownloadWriter::finish`] 에서 만듦.
pub struct DownloadWriter {
    dir: PathBuf,
    files: HashMap<String, File>,
    expected: Vec<String>,
}

impl DownloadWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: HashMap::new(),
            expected: Vec::new(),
        }
    }

    /// file-transfer-start 의 파일 목록 등록
    pub fn start(&mut self, files: &[FileDescriptor]) {
        self.expected = files.iter().map(|f| f.name.clone()).collect();
    }

    pub async fn write(&mut self, file_name: &str, offset: u64, data: &[u8]) -> Result<()> {
        if !self.files.contains_key(file_name) {
            let path = self.path_for(file_name)?;
            tokio::fs::create_dir_all(&self.dir).await?;
            let file = File::create(&path).await?;
            self.files.insert(file_name.to_string(), file);
        }

        let file = self
            .files
            .get_mut(file_name)
            .ok_or_else(|| Error::MalformedMessage(format!("파일 없음: {}", file_name)))?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        Ok(())
    }

    /// 열린 파일을 모두 닫고 경로 목록 반환
    pub async fn finish(&mut self) -> Result<Vec<PathBuf>> {
        for name in std::mem::take(&mut self.expected) {
            if !self.files.contains_key(&name) {
                let path = self.path_for(&name)?;
                tokio::fs::create_dir_all(&self.dir).await?;
                let file = File::create(&path).await?;
                self.files.insert(name, file);
            }
        }

        let mut written = Vec::with_capacity(self.files.len());
        for (name, mut file) in self.files.drain() {
            file.flush().await?;
            file.sync_all().await?;
            written.push(self.dir.join(safe_name(&name).unwrap_or_default()));
        }
        written.sort();
        Ok(written)
    }

    /// 받다 만 파일 삭제
    pub async fn discard(&mut self) {
        self.expected.clear();
        for (name, file) in self.files.drain() {
            drop(file);
            if let Some(safe) = safe_name(&name) {
                if let Err(e) = tokio::fs::remove_file(self.dir.join(safe)).await {
                    warn!("임시 파일 삭제 실패: {}, {}", name, e);
                }
            }
        }
    }

    fn path_for(&self, file_name: &str) -> Result<PathBuf> {
        let safe = safe_name(file_name)
            .ok_or_else(|| Error::MalformedMessage(format!("잘못된 파일 이름: {}", file_name)))?;
        Ok(self.dir.join(safe))
    }
}

fn safe_name(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::transfer::Received;
    use crate::Config;

    fn manager() -> TransferManager {
        TransferManager::new(Config {
            wait_for_accept: false,
            ..Config::default()
        })
    }

    #[tokio::test]
    async fn test_2mb_yields_128_chunks() {
        let sender = manager();
        let data: Vec<u8> = (0..2_097_152u32).map(|i| (i % 251) as u8).collect();
        let source = FileSource::from_bytes("doc.pdf", "application/pdf", data);
        let id = sender
            .begin_outbound("B1", vec![source.descriptor.clone()])
            .unwrap();

        let (mut tx, mut rx) = MemoryChannel::pair(256);
        let streamer = ChunkStreamer::new(16384);
        let status = streamer.stream(&sender, &id, vec![source], &mut tx).await.unwrap();
        assert_eq!(status, TransferStatus::Completed);
        tx.close().await.unwrap();

        let receiver = manager();
        let mut chunks = 0u64;
        let mut last_progress = 0;
        while let Some(msg) = rx.recv().await.unwrap() {
            if let ChannelMessage::FileChunk { chunk_size, offset, .. } = &msg {
                assert_eq!(*chunk_size, 16384);
                assert_eq!(*offset, chunks * 16384);
                chunks += 1;
            }
            match receiver.on_channel_message("A1", msg).unwrap() {
                Received::Chunk { progress, .. } => {
                    let session = receiver.session(&id).unwrap();
                    assert_eq!(session.transferred_size(), chunks * 16384);
                    assert!(progress >= last_progress);
                    last_progress = progress;
                }
                Received::Completed { .. } => {}
                Received::Started { .. } => {}
                other => panic!("unexpected {:?}", other),
            }
        }

        assert_eq!(chunks, 128);
        assert_eq!(last_progress, 100);
        assert_eq!(receiver.status(&id), Some(TransferStatus::Completed));
        assert_eq!(sender.session(&id).unwrap().transferred_size(), 2_097_152);
    }

    #[tokio::test]
    async fn test_pending_session_is_not_streamed() {
        let sender = TransferManager::new(Config::default());
        let source = FileSource::from_bytes("a.txt", "text/plain", &b"hello"[..]);
        let id = sender
            .begin_outbound("B1", vec![source.descriptor.clone()])
            .unwrap();

        let (mut tx, mut rx) = MemoryChannel::pair(4);
        let status = ChunkStreamer::new(2)
            .stream(&sender, &id, vec![source], &mut tx)
            .await
            .unwrap();
        assert_eq!(status, TransferStatus::Pending);

        tx.close().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancel_stops_stream() {
        let sender = manager();
        let source = FileSource::from_bytes("a.bin", DEFAULT_MIME, vec![1u8; 1000]);
        let id = sender
            .begin_outbound("B1", vec![source.descriptor.clone()])
            .unwrap();

        // 용량 2: start + 청크 1개 후 송신이 막힘
        let (mut tx, mut rx) = MemoryChannel::pair(2);
        let streamer = ChunkStreamer::new(100);

        let stream = streamer.stream(&sender, &id, vec![source], &mut tx);
        let cancel = async {
            let first = rx.recv().await.unwrap();
            assert!(matches!(first, Some(ChannelMessage::FileTransferStart { .. })));
            sender.cancel(&id).unwrap();
            let mut rest = Vec::new();
            while let Ok(Ok(Some(msg))) =
                tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv()).await
            {
                rest.push(msg);
            }
            rest
        };

        let (status, rest) = tokio::join!(stream, cancel);
        assert_eq!(status.unwrap(), TransferStatus::Cancelled);
        assert!(rest.len() < 10);
        assert!(rest
            .iter()
            .all(|m| !matches!(m, ChannelMessage::FileTransferComplete { .. })));
        assert_eq!(
            rest.last(),
            Some(&ChannelMessage::FileTransferCancel {
                transfer_id: id.clone()
            })
        );
        assert_eq!(sender.status(&id), Some(TransferStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_short_source_fails_session() {
        let sender = manager();
        let descriptor = FileDescriptor::new("a.bin", 10, DEFAULT_MIME);
        let source = FileSource::new(descriptor.clone(), std::io::Cursor::new(vec![0u8; 4]));
        let id = sender.begin_outbound("B1", vec![descriptor]).unwrap();

        let (mut tx, _rx) = MemoryChannel::pair(8);
        let result = ChunkStreamer::new(16384)
            .stream(&sender, &id, vec![source], &mut tx)
            .await;

        assert!(matches!(result, Err(Error::FileSizeMismatch { got: 4, .. })));
        assert_eq!(sender.status(&id), Some(TransferStatus::Failed));
    }

    #[tokio::test]
    async fn test_closed_channel_fails_session() {
        let sender = manager();
        let source = FileSource::from_bytes("a.txt", "text/plain", &b"hello"[..]);
        let id = sender
            .begin_outbound("B1", vec![source.descriptor.clone()])
            .unwrap();

        let (mut tx, rx) = MemoryChannel::pair(4);
        drop(rx);
        let result = ChunkStreamer::new(16384)
            .stream(&sender, &id, vec![source], &mut tx)
            .await;

        assert!(matches!(result, Err(Error::ChannelClosed)));
        assert_eq!(sender.status(&id), Some(TransferStatus::Failed));
    }

    #[tokio::test]
    async fn test_download_writer() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = DownloadWriter::new(dir.path());

        writer.write("../../evil.txt", 0, b"hello ").await.unwrap();
        writer.write("../../evil.txt", 6, b"world").await.unwrap();
        let written = writer.finish().await.unwrap();

        assert_eq!(written, vec![dir.path().join("evil.txt")]);
        let content = tokio::fs::read(dir.path().join("evil.txt")).await.unwrap();
        assert_eq!(content, b"hello world");
    }

    #[tokio::test]
    async fn test_empty_file_created_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = DownloadWriter::new(dir.path());
        writer.start(&[
            FileDescriptor::new("empty.txt", 0, "text/plain"),
            FileDescriptor::new("b.txt", 2, "text/plain"),
        ]);

        writer.write("b.txt", 0, b"hi").await.unwrap();
        let written = writer.finish().await.unwrap();

        assert_eq!(
            written,
            vec![dir.path().join("b.txt"), dir.path().join("empty.txt")]
        );
        let meta = tokio::fs::metadata(dir.path().join("empty.txt")).await.unwrap();
        assert_eq!(meta.len(), 0);
    }

    #[tokio::test]
    async fn test_empty_file_streams_start_and_complete() {
        let sender = manager();
        let source = FileSource::from_bytes("empty.txt", "text/plain", Vec::new());
        let id = sender
            .begin_outbound("B1", vec![source.descriptor.clone()])
            .unwrap();

        let (mut tx, mut rx) = MemoryChannel::pair(4);
        let status = ChunkStreamer::new(16384)
            .stream(&sender, &id, vec![source], &mut tx)
            .await
            .unwrap();
        assert_eq!(status, TransferStatus::Completed);
        tx.close().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let receiver = manager();
        let mut writer = DownloadWriter::new(dir.path());
        while let Some(msg) = rx.recv().await.unwrap() {
            match receiver.on_channel_message("A1", msg).unwrap() {
                Received::Started { files, .. } => writer.start(&files),
                Received::Completed { .. } => {}
                other => panic!("unexpected {:?}", other),
            }
        }

        assert_eq!(receiver.status(&id), Some(TransferStatus::Completed));
        assert_eq!(writer.finish().await.unwrap(), vec![dir.path().join("empty.txt")]);
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for(Path::new("a/Doc.PDF")), "application/pdf");
        assert_eq!(mime_for(Path::new("noext")), DEFAULT_MIME);
    }
}
