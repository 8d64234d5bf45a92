mod common;

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{Peer, accept, init_tracing, listen, ok, pipe_connector};
use h1pipe_client::transport::{BoxIo, ConnectTarget};
use h1pipe_client::{Client, ClientError, ConnectionEvent, ErrorKind, RequestOptions};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

#[tokio::test]
async fn test_abort_pending_never_written() {
    init_tracing();
    let (listener, url) = listen().await;
    let (go_tx, go_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        assert_eq!(peer.read_request().await.unwrap().path, "/slow");
        go_rx.await.unwrap();
        peer.write(ok("slow")).await;
        tokio::time::timeout(Duration::from_millis(200), peer.read_request())
            .await
            .is_err()
    });

    let client = Client::builder(&url).build().unwrap();
    let slow = client.send(RequestOptions::get("/slow")).unwrap();
    let queued = client.send(RequestOptions::get("/queued")).unwrap();

    queued.abort();
    let err = queued.await.unwrap_err();
    assert!(matches!(err, ClientError::RequestAborted));

    go_tx.send(()).unwrap();
    assert_eq!(slow.await.unwrap().body.collect().await.unwrap(), "slow");
    assert!(server.await.unwrap(), "aborted request reached the socket");
}

#[tokio::test]
async fn test_abort_running_destroys_socket() {
    init_tracing();
    let (listener, url) = listen().await;
    let (read_tx, read_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        peer.read_request().await.unwrap();
        read_tx.send(()).unwrap();
        peer.closed().await
    });

    let client = Client::builder(&url).build().unwrap();
    let response = client.send(RequestOptions::get("/hang")).unwrap();
    read_rx.await.unwrap();

    response.abort();
    let err = response.await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RequestAborted);
    assert!(server.await.unwrap());
}

#[tokio::test]
async fn test_dropping_future_aborts() {
    init_tracing();
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        peer.read_request().await.unwrap();
        peer.closed().await
    });

    let client = Client::builder(&url).build().unwrap();
    let result = tokio::time::timeout(
        Duration::from_millis(200),
        client.request(RequestOptions::get("/hang")),
    )
    .await;
    assert!(result.is_err());
    assert!(server.await.unwrap());
}

#[tokio::test]
async fn test_close_waits_for_queue() {
    init_tracing();
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        peer.read_request().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        peer.write(ok("done")).await;
        peer.closed().await
    });

    let client = Client::builder(&url).build().unwrap();
    let response = client.send(RequestOptions::get("/")).unwrap();
    let (closed, response) = tokio::join!(client.close(), response);

    closed.unwrap();
    assert_eq!(response.unwrap().body.collect().await.unwrap(), "done");
    assert!(client.closed());
    assert!(client.destroyed());
    assert!(matches!(
        client.send(RequestOptions::get("/")).unwrap_err(),
        ClientError::ClientDestroyed
    ));
    assert!(server.await.unwrap());
}

#[tokio::test]
async fn test_dispatch_after_close_is_rejected() {
    let (listener, url) = listen().await;
    let client = Client::builder(&url).build().unwrap();
    let close = client.clone();
    let closing = tokio::spawn(async move { close.close().await });
    closing.await.unwrap().unwrap();
    drop(listener);

    let err = client.request(RequestOptions::get("/")).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::ClientClosed | ClientError::ClientDestroyed
    ));
}

#[tokio::test]
async fn test_destroy_fails_outstanding_requests() {
    init_tracing();
    let (listener, url) = listen().await;
    let (read_tx, read_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        peer.read_request().await.unwrap();
        read_tx.send(()).unwrap();
        peer.closed().await;
    });

    let client = Client::builder(&url).build().unwrap();
    let running = client.send(RequestOptions::get("/a")).unwrap();
    let queued = client.send(RequestOptions::get("/b")).unwrap();
    read_rx.await.unwrap();

    client
        .destroy(Some(ClientError::informational("shutting down")))
        .await;

    assert_eq!(running.await.unwrap_err().to_string(), "shutting down");
    assert!(matches!(
        queued.await.unwrap_err(),
        ClientError::ClientDestroyed
    ));
    assert!(client.destroyed());
}

#[tokio::test]
async fn test_introspection_before_connect() {
    let (connector, _peers) = pipe_connector();
    let client = Client::builder("http://localhost")
        .connector(connector)
        .build()
        .unwrap();

    assert_eq!(client.pipelining(), 1);
    assert!(!client.busy());
    assert!(!client.connected());

    let _a = client.send(RequestOptions::get("/a")).unwrap();
    let _b = client.send(RequestOptions::get("/b")).unwrap();
    assert_eq!(client.pending(), 2);
    assert_eq!(client.size(), 2);
    assert!(client.busy());

    client.set_pipelining(4).unwrap();
    assert_eq!(client.pipelining(), 4);
    assert!(client.set_pipelining(0).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout_abandons_response() {
    init_tracing();
    let (connector, mut peers) = pipe_connector();
    let (late_tx, late_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(peer.read_request().await.unwrap().path, "/slow");
        late_rx.await.unwrap();
        peer.write(ok("late")).await;
        assert_eq!(peer.read_request().await.unwrap().path, "/next");
        peer.write(ok("next")).await;
    });

    let client = Client::builder("http://localhost")
        .connector(connector)
        .request_timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    let start = Instant::now();
    let err = client.request(RequestOptions::get("/slow")).await.unwrap_err();
    assert!(matches!(err, ClientError::RequestTimeout));
    assert!(start.elapsed() >= Duration::from_secs(5));

    late_tx.send(()).unwrap();
    let next = client.request(RequestOptions::get("/next")).await.unwrap();
    assert_eq!(next.body.collect().await.unwrap(), "next");
    server.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_headers_timeout() {
    init_tracing();
    let (connector, mut peers) = pipe_connector();
    let server = tokio::spawn(async move {
        let mut peer = peers.recv().await.unwrap();
        peer.read_request().await.unwrap();
        peer.closed().await
    });

    let client = Client::builder("http://localhost")
        .connector(connector)
        .headers_timeout(Duration::from_secs(2))
        .request_timeout(Duration::ZERO)
        .build()
        .unwrap();

    let start = Instant::now();
    let err = client.request(RequestOptions::get("/")).await.unwrap_err();
    assert!(matches!(err, ClientError::HeadersTimeout));
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert!(server.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_timeout_from_server() {
    init_tracing();
    let (connector, mut peers) = pipe_connector();
    let server = tokio::spawn(async move {
        let mut peer = peers.recv().await.unwrap();
        peer.read_request().await.unwrap();
        peer.write("HTTP/1.1 200 OK\r\nkeep-alive: timeout=3\r\ncontent-length: 2\r\n\r\nok")
            .await;
        peer.closed().await
    });

    let client = Client::builder("http://localhost")
        .connector(connector)
        .build()
        .unwrap();
    let mut events = client.subscribe();

    let response = client.request(RequestOptions::get("/")).await.unwrap();
    assert_eq!(response.body.collect().await.unwrap(), "ok");
    assert!(matches!(events.recv().await.unwrap(), ConnectionEvent::Connected));

    // timeout=3 minus the 1s threshold
    let idle = Instant::now();
    match events.recv().await.unwrap() {
        ConnectionEvent::Disconnected(err) => assert_eq!(err.kind(), ErrorKind::SocketTimeout),
        other => panic!("unexpected event {other:?}"),
    }
    let elapsed = idle.elapsed();
    assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(4));
    assert!(server.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_without_timeout_keeps_previous() {
    init_tracing();
    let (connector, mut peers) = pipe_connector();
    let server = tokio::spawn(async move {
        let mut peer = peers.recv().await.unwrap();
        peer.read_request().await.unwrap();
        peer.write("HTTP/1.1 200 OK\r\nkeep-alive: timeout=11\r\ncontent-length: 1\r\n\r\na")
            .await;
        peer.read_request().await.unwrap();
        peer.write("HTTP/1.1 200 OK\r\nkeep-alive: max=10\r\ncontent-length: 1\r\n\r\nb")
            .await;
        peer.closed().await
    });

    let client = Client::builder("http://localhost")
        .connector(connector)
        .build()
        .unwrap();
    let mut events = client.subscribe();

    for expected in ["a", "b"] {
        let response = client.request(RequestOptions::get("/")).await.unwrap();
        assert_eq!(response.body.collect().await.unwrap(), expected);
    }
    assert!(matches!(events.recv().await.unwrap(), ConnectionEvent::Connected));

    // Still timeout=11 minus the threshold, not the 4s idle default.
    let idle = Instant::now();
    match events.recv().await.unwrap() {
        ConnectionEvent::Disconnected(err) => assert_eq!(err.kind(), ErrorKind::SocketTimeout),
        other => panic!("unexpected event {other:?}"),
    }
    let elapsed = idle.elapsed();
    assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
    assert!(server.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_backoff() {
    init_tracing();
    let attempts = Arc::new(AtomicUsize::new(0));
    let (peer_tx, mut peers) = mpsc::unbounded_channel();
    let counter = Arc::clone(&attempts);
    let connector = move |_target: ConnectTarget| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        let peer_tx = peer_tx.clone();
        async move {
            if attempt < 2 {
                return Err(ClientError::from(io::Error::from(
                    io::ErrorKind::ConnectionRefused,
                )));
            }
            let (client, server) = tokio::io::duplex(1024);
            let _ = peer_tx.send(Peer::new(server));
            Ok(Box::new(client) as BoxIo)
        }
    };
    tokio::spawn(async move {
        let mut peer = peers.recv().await.unwrap();
        peer.read_request().await.unwrap();
        peer.write(ok("up")).await;
        peer.closed().await;
    });

    let client = Client::builder("http://localhost")
        .connector(connector)
        .build()
        .unwrap();

    let start = Instant::now();
    let response = client.request(RequestOptions::get("/")).await.unwrap();
    assert_eq!(response.body.collect().await.unwrap(), "up");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    // 0s, then 1s, then 2s
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));
}

#[tokio::test]
async fn test_fatal_connect_error_fails_queue() {
    init_tracing();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let connector = move |_target: ConnectTarget| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<BoxIo, _>(ClientError::from(io::Error::from(io::ErrorKind::PermissionDenied))) }
    };

    let client = Client::builder("http://localhost")
        .connector(connector)
        .build()
        .unwrap();
    let a = client.send(RequestOptions::get("/a")).unwrap();
    let b = client.send(RequestOptions::get("/b")).unwrap();

    assert_eq!(a.await.unwrap_err().kind(), ErrorKind::Socket);
    assert_eq!(b.await.unwrap_err().kind(), ErrorKind::Socket);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dropped_body_is_discarded() {
    init_tracing();
    let (listener, url) = listen().await;
    let (dropped_tx, dropped_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        peer.read_request().await.unwrap();
        peer.write("HTTP/1.1 200 OK\r\ncontent-length: 20\r\n\r\n0123456789").await;
        dropped_rx.await.unwrap();
        peer.write("0123456789").await;
        // Same connection serves the next request.
        assert_eq!(peer.read_request().await.unwrap().path, "/next");
        peer.write(ok("next")).await;
    });

    let client = Client::builder(&url).build().unwrap();
    let response = client.request(RequestOptions::get("/big")).await.unwrap();
    drop(response);
    dropped_tx.send(()).unwrap();

    let next = client.request(RequestOptions::get("/next")).await.unwrap();
    assert_eq!(next.body.collect().await.unwrap(), "next");
    server.await.unwrap();
}

#[tokio::test]
async fn test_dropped_body_over_cap_destroys_socket() {
    init_tracing();
    let (listener, url) = listen().await;
    let (dropped_tx, dropped_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        peer.read_request().await.unwrap();
        peer.write("HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\n").await;
        dropped_rx.await.unwrap();
        peer.write([b'x'; 50]).await;
        peer.closed().await
    });

    let client = Client::builder(&url)
        .max_aborted_payload(8)
        .build()
        .unwrap();
    let mut events = client.subscribe();
    let response = client.request(RequestOptions::get("/big")).await.unwrap();
    drop(response);
    dropped_tx.send(()).unwrap();

    assert!(matches!(events.recv().await.unwrap(), ConnectionEvent::Connected));
    match events.recv().await.unwrap() {
        ConnectionEvent::Disconnected(err) => assert_eq!(err.to_string(), "max aborted payload"),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(server.await.unwrap());
}
