//! End-to-end server-side flow over an in-memory duplex socket: preface and
//! SETTINGS exchange, a request/response round trip, flow-control
//! backpressure, and the GOAWAY drain path.

use bytes::Bytes;
use h2_core::{handle_connection, Config, FrameType, Handler, HeaderField, Request, StreamHandle};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

const CLIENT_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// :method GET, :scheme https, :path / — each a one-byte indexed static-table
/// reference, satisfying the pseudo-header requirements with no dynamic
/// table involved.
const MINIMAL_REQUEST_HEADER_BLOCK: &[u8] = &[0x82, 0x87, 0x84];

fn frame_header(length: u32, frame_type: u8, flags: u8, stream_id: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    out.extend(&length.to_be_bytes()[1..]);
    out.push(frame_type);
    out.push(flags);
    out.extend(stream_id.to_be_bytes());
    out
}

async fn read_frame_header(client: &mut DuplexStream) -> (u32, u8, u8, u32) {
    let mut buf = [0u8; 9];
    client.read_exact(&mut buf).await.unwrap();
    let length = u32::from_be_bytes([0, buf[0], buf[1], buf[2]]);
    (length, buf[3], buf[4], u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]))
}

async fn read_frame_payload(client: &mut DuplexStream, length: u32) -> Vec<u8> {
    let mut payload = vec![0u8; length as usize];
    client.read_exact(&mut payload).await.unwrap();
    payload
}

/// Drains the server's opening SETTINGS frame and replies with the client's
/// own (empty) SETTINGS, as RFC 7540 3.5 requires before anything else.
async fn complete_preface_and_settings(client: &mut DuplexStream) {
    client.write_all(CLIENT_PREFACE).await.unwrap();
    let (length, frame_type, ..) = read_frame_header(client).await;
    assert_eq!(frame_type, FrameType::Settings as u8);
    read_frame_payload(client, length).await;

    client.write_all(&frame_header(0, FrameType::Settings as u8, 0x00, 0)).await.unwrap();
    let (length, frame_type, flags, _) = read_frame_header(client).await;
    assert_eq!(frame_type, FrameType::Settings as u8);
    assert_eq!(flags & 0x01, 0x01, "server must ack our SETTINGS");
    assert_eq!(length, 0);
}

struct Echo;
impl Handler for Echo {
    fn call(&self, mut request: Request, handle: StreamHandle) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> {
        Box::pin(async move {
            let method = request.header(":method").map(str::to_owned);
            assert_eq!(method.as_deref(), Some("GET"));
            let mut body = Vec::new();
            while let Some(chunk) = request.receive_body().await {
                body.extend_from_slice(&chunk);
            }
            let status = vec![HeaderField::new(b":status".to_vec(), b"200".to_vec())];
            if body.is_empty() {
                handle.send_headers(status, true).await?;
            } else {
                handle.send_headers(status, false).await?;
                handle.send_data(Bytes::from(body), true).await?;
            }
            Ok(())
        })
    }
}

#[tokio::test]
async fn request_with_no_body_gets_a_response_and_does_not_hang() {
    let _ = env_logger::try_init();
    let (mut client, server) = duplex(16 * 1024);
    let handler: Arc<dyn Handler> = Arc::new(Echo);
    let server_task = tokio::spawn(handle_connection(server, Config::default(), handler));

    complete_preface_and_settings(&mut client).await;

    let headers_flags = 0x01 | 0x04; // END_STREAM | END_HEADERS
    client
        .write_all(&frame_header(MINIMAL_REQUEST_HEADER_BLOCK.len() as u32, FrameType::Headers as u8, headers_flags, 1))
        .await
        .unwrap();
    client.write_all(MINIMAL_REQUEST_HEADER_BLOCK).await.unwrap();

    let (length, frame_type, flags, stream_id) =
        tokio::time::timeout(Duration::from_secs(5), read_frame_header(&mut client))
            .await
            .expect("handler must respond instead of hanging on an empty body");
    assert_eq!(frame_type, FrameType::Headers as u8);
    assert_eq!(stream_id, 1);
    assert_eq!(flags & 0x01, 0x01, "response HEADERS must carry END_STREAM");
    read_frame_payload(&mut client, length).await;

    drop(client);
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn request_with_a_body_is_echoed_back_as_data() {
    let _ = env_logger::try_init();
    let (mut client, server) = duplex(16 * 1024);
    let handler: Arc<dyn Handler> = Arc::new(Echo);
    let server_task = tokio::spawn(handle_connection(server, Config::default(), handler));

    complete_preface_and_settings(&mut client).await;

    client
        .write_all(&frame_header(MINIMAL_REQUEST_HEADER_BLOCK.len() as u32, FrameType::Headers as u8, 0x04, 1))
        .await
        .unwrap();
    client.write_all(MINIMAL_REQUEST_HEADER_BLOCK).await.unwrap();

    let body = b"hello from the client";
    client
        .write_all(&frame_header(body.len() as u32, FrameType::Data as u8, 0x01, 1))
        .await
        .unwrap();
    client.write_all(body).await.unwrap();

    let (length, frame_type, flags, stream_id) = read_frame_header(&mut client).await;
    assert_eq!(frame_type, FrameType::Headers as u8);
    assert_eq!(stream_id, 1);
    assert_eq!(flags & 0x01, 0, "headers-only portion of the response must not carry END_STREAM");
    read_frame_payload(&mut client, length).await;

    let (length, frame_type, flags, stream_id) = read_frame_header(&mut client).await;
    assert_eq!(frame_type, FrameType::Data as u8);
    assert_eq!(stream_id, 1);
    assert_eq!(flags & 0x01, 0x01);
    let echoed = read_frame_payload(&mut client, length).await;
    assert_eq!(echoed, body);

    drop(client);
    server_task.await.unwrap().unwrap();
}

struct LargeBody;
impl Handler for LargeBody {
    fn call(&self, _request: Request, handle: StreamHandle) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> {
        Box::pin(async move {
            handle.send_headers(vec![HeaderField::new(b":status".to_vec(), b"200".to_vec())], false).await?;
            // Larger than the tiny initial window we negotiate below, so the
            // first send_data call must park on the connection task until a
            // WINDOW_UPDATE arrives.
            handle.send_data(Bytes::from(vec![b'x'; 200]), true).await?;
            Ok(())
        })
    }
}

#[tokio::test]
async fn send_data_blocks_until_window_update_then_completes() {
    let _ = env_logger::try_init();
    let (mut client, server) = duplex(16 * 1024);
    let handler: Arc<dyn Handler> = Arc::new(LargeBody);
    let server_task = tokio::spawn(handle_connection(server, Config::default(), handler));

    client.write_all(CLIENT_PREFACE).await.unwrap();
    let (length, frame_type, ..) = read_frame_header(&mut client).await;
    assert_eq!(frame_type, FrameType::Settings as u8);
    read_frame_payload(&mut client, length).await;

    // Advertise a 50-byte initial window: every new stream's send window (the
    // direction the server writes in) is seeded from this value.
    let mut settings_payload = Vec::new();
    settings_payload.extend(4u16.to_be_bytes()); // SETTINGS_INITIAL_WINDOW_SIZE
    settings_payload.extend(50u32.to_be_bytes());
    client
        .write_all(&frame_header(settings_payload.len() as u32, FrameType::Settings as u8, 0x00, 0))
        .await
        .unwrap();
    client.write_all(&settings_payload).await.unwrap();
    let (length, frame_type, flags, _) = read_frame_header(&mut client).await;
    assert_eq!(frame_type, FrameType::Settings as u8);
    assert_eq!(flags & 0x01, 0x01);
    assert_eq!(length, 0);

    client
        .write_all(&frame_header(MINIMAL_REQUEST_HEADER_BLOCK.len() as u32, FrameType::Headers as u8, 0x05, 1))
        .await
        .unwrap();
    client.write_all(MINIMAL_REQUEST_HEADER_BLOCK).await.unwrap();

    let (length, frame_type, flags, stream_id) = read_frame_header(&mut client).await;
    assert_eq!(frame_type, FrameType::Headers as u8);
    assert_eq!(stream_id, 1);
    assert_eq!(flags & 0x01, 0);
    read_frame_payload(&mut client, length).await;

    // Only the first 50 bytes fit under the window; the handler parks until
    // we grant more room.
    let (length, frame_type, flags, stream_id) = read_frame_header(&mut client).await;
    assert_eq!(frame_type, FrameType::Data as u8);
    assert_eq!(stream_id, 1);
    assert_eq!(length, 50);
    assert_eq!(flags & 0x01, 0, "partial DATA must not carry END_STREAM yet");
    read_frame_payload(&mut client, length).await;

    let no_more_frames = tokio::time::timeout(Duration::from_millis(200), read_frame_header(&mut client)).await;
    assert!(no_more_frames.is_err(), "handler should still be parked on the exhausted window");

    client
        .write_all(&frame_header(4, FrameType::WindowUpdate as u8, 0x00, 1))
        .await
        .unwrap();
    client.write_all(&200u32.to_be_bytes()).await.unwrap();

    let (length, frame_type, flags, stream_id) =
        tokio::time::timeout(Duration::from_secs(5), read_frame_header(&mut client))
            .await
            .expect("WINDOW_UPDATE must unpark the remaining send_data");
    assert_eq!(frame_type, FrameType::Data as u8);
    assert_eq!(stream_id, 1);
    assert_eq!(length, 150);
    assert_eq!(flags & 0x01, 0x01);
    read_frame_payload(&mut client, length).await;

    drop(client);
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn idle_connection_is_closed_after_its_read_timeout() {
    let _ = env_logger::try_init();
    let (mut client, server) = duplex(4096);
    let mut config = Config::default();
    config.read_timeout = Duration::from_millis(50);
    let handler: Arc<dyn Handler> = Arc::new(Echo);
    let server_task = tokio::spawn(handle_connection(server, config, handler));

    client.write_all(CLIENT_PREFACE).await.unwrap();
    let (length, frame_type, ..) = read_frame_header(&mut client).await;
    assert_eq!(frame_type, FrameType::Settings as u8);
    read_frame_payload(&mut client, length).await;

    // Never send our own SETTINGS: the connection should time out the idle
    // socket and emit GOAWAY rather than hang forever.
    let (length, frame_type, ..) = tokio::time::timeout(Duration::from_secs(5), read_frame_header(&mut client))
        .await
        .expect("server must emit GOAWAY on read timeout");
    assert_eq!(frame_type, FrameType::GoAway as u8);
    read_frame_payload(&mut client, length).await;

    server_task.await.unwrap().unwrap();
}
