//! End-to-end session scenarios against a bound server with mock
//! decode/recognize collaborators.

use futures_util::{SinkExt, StreamExt};
use scribed::config::Config;
use scribed::{AppState, Decoder, MockDecoder, MockRecognizer, Recognizer, router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

const TICK_MS: u64 = 200;

fn test_config(work_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.session.tick_interval_ms = TICK_MS;
    config.session.work_dir = Some(work_dir.to_path_buf());
    config
}

async fn start_server(
    config: Config,
    decoder: Arc<dyn Decoder>,
    recognizer: Arc<dyn Recognizer>,
) -> (SocketAddr, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState::new(Arc::new(config), decoder, recognizer, shutdown_rx);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });

    (addr, shutdown_tx)
}

async fn connect(
    addr: SocketAddr,
) -> tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
> {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/listen"))
        .await
        .unwrap();
    ws
}

async fn recv_text<S>(ws: &mut S) -> String
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a fragment")
            .expect("connection ended while waiting for a fragment")
            .unwrap();
        match msg {
            Message::Text(text) => return text.as_str().to_string(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_non_upgrade_request_gets_400_and_no_session() {
    let work_root = tempfile::TempDir::new().unwrap();
    let (addr, _shutdown) = start_server(
        test_config(work_root.path()),
        Arc::new(MockDecoder::new()),
        Arc::new(MockRecognizer::new()),
    )
    .await;

    let response = reqwest::get(format!("http://{addr}/listen")).await.unwrap();
    assert_eq!(response.status().as_u16(), 400);

    // No session directory was allocated
    assert_eq!(std::fs::read_dir(work_root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_health_endpoint() {
    let work_root = tempfile::TempDir::new().unwrap();
    let (addr, _shutdown) = start_server(
        test_config(work_root.path()),
        Arc::new(MockDecoder::new()),
        Arc::new(MockRecognizer::new()),
    )
    .await;

    let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(response.text().await.unwrap().contains("ok"));
}

#[tokio::test]
async fn test_silent_session_emits_empty_fragment() {
    let work_root = tempfile::TempDir::new().unwrap();
    let decoder = Arc::new(MockDecoder::new());
    let (addr, _shutdown) = start_server(
        test_config(work_root.path()),
        decoder.clone(),
        Arc::new(MockRecognizer::new()),
    )
    .await;

    let mut ws = connect(addr).await;

    // Send nothing; the first tick still fires and reports silence.
    let text = recv_text(&mut ws).await;
    assert_eq!(text, "");
    // No external pipeline ran for the empty snapshot
    assert_eq!(decoder.invocation_count(), 0);

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn test_streamed_audio_yields_cumulative_fragments() {
    let work_root = tempfile::TempDir::new().unwrap();
    let recognizer = Arc::new(MockRecognizer::new().echoing_size());
    let (addr, _shutdown) = start_server(
        test_config(work_root.path()),
        Arc::new(MockDecoder::new()),
        recognizer.clone(),
    )
    .await;

    let mut ws = connect(addr).await;

    // Stream audio for three tick intervals, then close.
    let mut fragments = Vec::new();
    for _ in 0..3 {
        ws.send(Message::binary(vec![1u8; 500])).await.unwrap();
        fragments.push(recv_text(&mut ws).await);
    }
    ws.close(None).await.unwrap();

    assert_eq!(fragments.len(), 3);
    let sizes: Vec<u64> = fragments.iter().map(|f| f.parse().unwrap()).collect();
    assert!(
        sizes[0] < sizes[1] && sizes[1] < sizes[2],
        "each fragment should cover a strictly larger snapshot: {sizes:?}"
    );

    // Every tick re-read the stream from the start
    let handed = recognizer.handed_sizes();
    assert_eq!(handed, sizes);
}

#[tokio::test]
async fn test_decoder_failure_skips_tick_and_session_continues() {
    let work_root = tempfile::TempDir::new().unwrap();
    let decoder = Arc::new(MockDecoder::new().failing_on(&[2]));
    let (addr, _shutdown) = start_server(
        test_config(work_root.path()),
        decoder.clone(),
        Arc::new(MockRecognizer::new().with_response("transcript")),
    )
    .await;

    let mut ws = connect(addr).await;
    ws.send(Message::binary(vec![1u8; 100])).await.unwrap();

    // Tick 1 succeeds, tick 2 fails (skipped, no fragment), tick 3 succeeds.
    let first = recv_text(&mut ws).await;
    let second = recv_text(&mut ws).await;
    assert_eq!(first, "transcript");
    assert_eq!(second, "transcript");
    assert!(decoder.invocation_count() >= 3);

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn test_session_storage_reclaimed_after_close() {
    let work_root = tempfile::TempDir::new().unwrap();
    let (addr, _shutdown) = start_server(
        test_config(work_root.path()),
        Arc::new(MockDecoder::new()),
        Arc::new(MockRecognizer::new()),
    )
    .await;

    let mut ws = connect(addr).await;
    ws.send(Message::binary(vec![1u8; 100])).await.unwrap();
    let _ = recv_text(&mut ws).await;
    ws.close(None).await.unwrap();

    // The per-session directory disappears within a bounded time after
    // the connection closes.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = std::fs::read_dir(work_root.path()).unwrap().count();
        if remaining == 0 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "session directory still present after close"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_oversized_frame_closes_with_policy_violation() {
    let work_root = tempfile::TempDir::new().unwrap();
    let mut config = test_config(work_root.path());
    config.session.max_frame_bytes = 64;
    let (addr, _shutdown) = start_server(
        config,
        Arc::new(MockDecoder::new()),
        Arc::new(MockRecognizer::new()),
    )
    .await;

    let mut ws = connect(addr).await;
    ws.send(Message::binary(vec![1u8; 1000])).await.unwrap();

    // The server drains and closes with a policy violation.
    let close = loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close")
        {
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => panic!("connection ended without a close frame"),
        }
    };
    let frame = close.expect("expected a close frame with a code");
    assert_eq!(frame.code, CloseCode::Policy);
}

#[tokio::test]
async fn test_server_shutdown_drains_active_session() {
    let work_root = tempfile::TempDir::new().unwrap();
    let (addr, shutdown) = start_server(
        test_config(work_root.path()),
        Arc::new(MockDecoder::new()),
        Arc::new(MockRecognizer::new()),
    )
    .await;

    let mut ws = connect(addr).await;
    ws.send(Message::binary(vec![1u8; 100])).await.unwrap();

    shutdown.send(true).unwrap();

    let close = loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close")
        {
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => panic!("connection ended without a close frame"),
        }
    };
    let frame = close.expect("expected a close frame with a code");
    assert_eq!(frame.code, CloseCode::Normal);

    // Storage is reclaimed on shutdown as well
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::fs::read_dir(work_root.path()).unwrap().count() > 0 {
        assert!(
            std::time::Instant::now() < deadline,
            "session directory still present after shutdown"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
