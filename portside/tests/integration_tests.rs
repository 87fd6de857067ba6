//! End-to-end tests driving the full stack over real TCP sockets.
//!
//! Each test binds a listener, serves the accepted side through a pipeline
//! filter and a scheduler, and speaks the raw wire format from the client
//! side.

use std::sync::{Arc, Mutex};

use portside::prelude::*;

const MASK_KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

fn any_local() -> std::net::SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Reads from `stream` until the filter yields a package.
async fn read_package<F: PipelineFilter>(
    stream: &mut TcpConnection,
    filter: &mut F,
    buffer: &mut BytesMut,
) -> F::Package {
    loop {
        if let Some(package) = filter.filter(buffer).expect("clean frame from server") {
            return package;
        }
        buffer.reserve(4096);
        let n = stream.read_buf(buffer).await.expect("read from server");
        assert!(n > 0, "server closed before a full frame arrived");
    }
}

/// A text frame sent by a client comes back echoed by the handler.
#[tokio::test]
async fn websocket_echo_over_tcp() {
    let listener = TcpTransport::bind(any_local()).await.unwrap();
    let addr = listener.local_addr();

    let server = tokio::spawn(async move {
        let transport = listener.accept().await.unwrap();
        let mut connection = Connection::new(Box::new(transport), ConnectionOptions::default());
        let stream = connection.run(WebSocketPipelineFilter::new()).unwrap();
        let session = Session::new(connection);

        let scheduler = SerialPackageScheduler::new(SchedulerCore::new(handler_fn(
            |session: Arc<Session>, package: WebSocketPackage, _token| async move {
                if let Some(text) = package.message() {
                    let reply = WebSocketPackage::text(format!("echo: {text}"));
                    let encoder = WebSocketEncoder::new();
                    session.connection().send_with(&encoder, &reply).await?;
                }
                Ok(())
            },
        )));

        serve_packages(session, stream, scheduler).await;
    });

    let mut client = TcpTransport::connect(addr).await.unwrap();

    let mut frame = BytesMut::new();
    encode_frame(
        &mut frame,
        true,
        false,
        OpCode::Text,
        Some(MASK_KEY),
        b"ahoy",
    );
    client.write_all(&frame).await.unwrap();

    let mut filter = WebSocketPipelineFilter::new();
    let mut buffer = BytesMut::new();
    let package = read_package(&mut client, &mut filter, &mut buffer).await;

    assert_eq!(package.op_code(), OpCode::Text);
    assert_eq!(package.message(), Some("echo: ahoy"));

    drop(client);
    server.await.unwrap();
}

/// Ping frames flow through handling like any other package.
#[tokio::test]
async fn ping_is_answered_with_pong() {
    let listener = TcpTransport::bind(any_local()).await.unwrap();
    let addr = listener.local_addr();

    let server = tokio::spawn(async move {
        let transport = listener.accept().await.unwrap();
        let mut connection = Connection::new(Box::new(transport), ConnectionOptions::default());
        let stream = connection.run(WebSocketPipelineFilter::new()).unwrap();
        let session = Session::new(connection);

        let scheduler = SerialPackageScheduler::new(SchedulerCore::new(handler_fn(
            |session: Arc<Session>, package: WebSocketPackage, _token| async move {
                if package.op_code() == OpCode::Ping {
                    let reply = WebSocketPackage::pong(package.into_data());
                    let encoder = WebSocketEncoder::new();
                    session.connection().send_with(&encoder, &reply).await?;
                }
                Ok(())
            },
        )));

        serve_packages(session, stream, scheduler).await;
    });

    let mut client = TcpTransport::connect(addr).await.unwrap();

    let mut frame = BytesMut::new();
    encode_frame(
        &mut frame,
        true,
        false,
        OpCode::Ping,
        Some(MASK_KEY),
        b"heartbeat",
    );
    client.write_all(&frame).await.unwrap();

    let mut filter = WebSocketPipelineFilter::new();
    let mut buffer = BytesMut::new();
    let package = read_package(&mut client, &mut filter, &mut buffer).await;

    assert_eq!(package.op_code(), OpCode::Pong);
    assert_eq!(package.data().as_ref(), b"heartbeat");

    drop(client);
    server.await.unwrap();
}

/// Lines arrive in order through the serial scheduler, and the close reason
/// reflects the client hanging up.
#[tokio::test]
async fn line_protocol_preserves_order_and_close_reason() {
    let listener = TcpTransport::bind(any_local()).await.unwrap();
    let addr = listener.local_addr();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_handler = seen.clone();

    let server = tokio::spawn(async move {
        let transport = listener.accept().await.unwrap();
        let mut connection = Connection::new(Box::new(transport), ConnectionOptions::default());
        let stream = connection.run(LinePipelineFilter::new()).unwrap();
        let session = Session::new(connection);
        let mut closed = session.connection().closed();

        let scheduler = SerialPackageScheduler::new(SchedulerCore::new(handler_fn(
            move |_session: Arc<Session>, line: String, _token| {
                let seen = seen_in_handler.clone();
                async move {
                    seen.lock().unwrap().push(line);
                    Ok(())
                }
            },
        )));

        serve_packages(session, stream, scheduler).await;
        closed.changed().await.unwrap();
        let reason = *closed.borrow();
        reason
    });

    let mut client = TcpTransport::connect(addr).await.unwrap();
    client.write_all(b"first\r\nsecond\r\nthird\r\n").await.unwrap();
    drop(client);

    let reason = server.await.unwrap();
    assert_eq!(reason, Some(CloseReason::RemoteClosing));
    assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
}

/// A burst of sends drains through the batch queue without loss or reorder.
#[tokio::test]
async fn send_burst_drains_in_order() {
    let listener = TcpTransport::bind(any_local()).await.unwrap();
    let addr = listener.local_addr();

    let server = tokio::spawn(async move {
        let transport = listener.accept().await.unwrap();
        let mut connection = Connection::new(Box::new(transport), ConnectionOptions::default());
        let stream = connection.run(LinePipelineFilter::new()).unwrap();
        let session = Session::new(connection);

        let scheduler = SerialPackageScheduler::new(SchedulerCore::new(handler_fn(
            |session: Arc<Session>, _line: String, _token| async move {
                for i in 0..100 {
                    let line = format!("line {i}");
                    session
                        .connection()
                        .send_with(&LinePackageEncoder, &line)
                        .await?;
                }
                Ok(())
            },
        )));

        serve_packages(session, stream, scheduler).await;
    });

    let mut client = TcpTransport::connect(addr).await.unwrap();
    client.write_all(b"go\r\n").await.unwrap();

    let mut filter = LinePipelineFilter::new();
    let mut buffer = BytesMut::new();
    let mut received = Vec::new();
    while received.len() < 100 {
        let line = read_package(&mut client, &mut filter, &mut buffer).await;
        received.push(line);
    }

    for (i, line) in received.iter().enumerate() {
        assert_eq!(line, &format!("line {i}"));
    }

    drop(client);
    server.await.unwrap();
}

/// Deflate-compressed traffic survives the round trip when both ends enable
/// the extension.
#[cfg(feature = "compression")]
#[tokio::test]
async fn deflate_round_trip_over_tcp() {
    let listener = TcpTransport::bind(any_local()).await.unwrap();
    let addr = listener.local_addr();

    let server = tokio::spawn(async move {
        let transport = listener.accept().await.unwrap();
        let mut connection = Connection::new(Box::new(transport), ConnectionOptions::default());
        let mut filter = WebSocketPipelineFilter::new();
        filter.add_extension(Box::new(DeflateExtension::new()));
        let stream = connection.run(filter).unwrap();
        let session = Session::new(connection);

        let scheduler = SerialPackageScheduler::new(SchedulerCore::new(handler_fn(
            |session: Arc<Session>, package: WebSocketPackage, _token| async move {
                if let Some(text) = package.message() {
                    let reply = WebSocketPackage::text(text);
                    let mut encoder = WebSocketEncoder::new();
                    encoder.add_extension(Box::new(DeflateExtension::new()));
                    session.connection().send_with(&encoder, &reply).await?;
                }
                Ok(())
            },
        )));

        serve_packages(session, stream, scheduler).await;
    });

    let mut client = TcpTransport::connect(addr).await.unwrap();

    let text = "compressible ".repeat(200);
    let package = WebSocketPackage::text(text.clone());
    let mut client_encoder = WebSocketEncoder::new().with_masking(true);
    client_encoder.add_extension(Box::new(DeflateExtension::new()));

    let mut frame = BytesMut::new();
    let written = client_encoder.encode(&mut frame, &package).unwrap();
    assert!(written < text.len(), "deflate should shrink repetitive text");
    client.write_all(&frame).await.unwrap();

    let mut filter = WebSocketPipelineFilter::new();
    filter.add_extension(Box::new(DeflateExtension::new()));
    let mut buffer = BytesMut::new();
    let echoed = read_package(&mut client, &mut filter, &mut buffer).await;

    assert_eq!(echoed.message(), Some(text.as_str()));

    drop(client);
    server.await.unwrap();
}
