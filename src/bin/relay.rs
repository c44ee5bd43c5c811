//! Dropzone 릴레이 - 시그널링 서버
//!
//! 피어 ID 발급, 피어/룸 추적, 시그널링 메시지 전달.
//! 같은 포트에서 상태 조회 HTTP 엔드포인트도 제공.
//!
//! 사용법:
//!   cargo run --release --bin dropzone-relay -- [OPTIONS]
//!
//! 예시:
//!   # 기본 포트 (3001, 또는 PORT 환경 변수)
//!   cargo run --release --bin dropzone-relay
//!
//!   # 주소 지정 + 디버그 로그
//!   RUST_LOG=dropzone=debug cargo run --release --bin dropzone-relay -- --bind 127.0.0.1:4000

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dropzone::{Config, RelayServer};

fn parse_args(mut config: Config) -> Config {
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--queue-size" => {
                if i + 1 < args.len() {
                    config.outbound_queue_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--max-message-size" => {
                if i + 1 < args.len() {
                    config.max_message_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--low-memory" => {
                let bind_addr = config.bind_addr;
                config = Config {
                    bind_addr,
                    ..Config::low_memory()
                };
            }
            "--help" | "-h" => {
                println!(
                    r#"Dropzone Relay - P2P 파일 드롭 시그널링 서버

- 피어 ID 발급 및 연결 시점 피어 목록 전송
- targetPeerId 기반 offer/answer/ice-candidate/transfer-* 전달
- 룸 참여/퇴장 알림
- 상태 조회: /health, /api/status, /api/peers, /api/rooms

사용법:
  cargo run --release --bin dropzone-relay -- [OPTIONS]

옵션:
  -b, --bind <ADDR>           바인드 주소 (기본: 0.0.0.0:3001, PORT 환경 변수 적용)
  --queue-size <N>            연결당 송신 큐 크기 (기본: 256)
  --max-message-size <SIZE>   수신 메시지 최대 바이트 (기본: 1048576)
  --low-memory                저메모리 기기용 설정
  -h, --help                  이 도움말 출력

환경 변수:
  PORT        릴레이 포트
  RUST_LOG    로그 필터 (기본: info)
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = parse_args(Config::from_env()?);

    info!("Dropzone Relay starting...");
    info!("Bind address: {}", config.bind_addr);
    info!("Outbound queue: {} messages", config.outbound_queue_size);
    info!("Max message size: {} bytes", config.max_message_size);

    let listener = TcpListener::bind(config.bind_addr).await?;
    let server = RelayServer::new(config)?;

    server
        .serve_with_shutdown(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let status = server.relay().status();
    info!(
        "종료 시점 상태: 피어 {}명, 룸 {}개, 가동 {:.1}s",
        status.peers, status.rooms, status.uptime
    );
    Ok(())
}
