mod common;

use std::time::Duration;

use common::{accept, init_tracing, listen, ok};
use h1pipe_client::{Client, ClientError, ErrorKind, Pipeline, RequestOptions};

#[tokio::test]
async fn test_pipelined_responses_in_order() {
    init_tracing();
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let mut paths = Vec::new();
        for _ in 0..3 {
            paths.push(peer.read_request().await.unwrap().path);
        }
        // All three were written before any response.
        peer.write(format!("{}{}{}", ok("0"), ok("1"), ok("2"))).await;
        paths
    });

    let client = Client::builder(&url).pipelining(3).build().unwrap();
    let responses: Vec<_> = (0..3)
        .map(|i| client.send(RequestOptions::get(format!("/{i}"))).unwrap())
        .collect();

    for (i, response) in responses.into_iter().enumerate() {
        let response = response.await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body.collect().await.unwrap(), i.to_string());
    }
    assert_eq!(server.await.unwrap(), vec!["/0", "/1", "/2"]);
}

#[tokio::test]
async fn test_non_idempotent_waits_for_running() {
    init_tracing();
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let first = peer.read_request().await.unwrap();
        assert_eq!(first.path, "/a");

        let early = tokio::time::timeout(Duration::from_millis(200), peer.read_request()).await;
        assert!(early.is_err(), "POST written while GET was running");

        peer.write(ok("a")).await;
        let second = peer.read_request().await.unwrap();
        assert_eq!(second.method, "POST");
        assert_eq!(second.body, b"x");
        peer.write(ok("b")).await;
    });

    let client = Client::builder(&url).pipelining(2).build().unwrap();
    let a = client.send(RequestOptions::get("/a")).unwrap();
    let b = client.send(RequestOptions::post("/b").body("x")).unwrap();

    assert_eq!(a.await.unwrap().body.collect().await.unwrap(), "a");
    assert_eq!(b.await.unwrap().body.collect().await.unwrap(), "b");
    server.await.unwrap();
}

#[tokio::test]
async fn test_requeue_on_close() {
    init_tracing();
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut first = accept(&listener).await;
        for _ in 0..3 {
            first.read_request().await.unwrap();
        }
        drop(first);

        let mut second = accept(&listener).await;
        let retried = [
            second.read_request().await.unwrap().path,
            second.read_request().await.unwrap().path,
        ];
        second.write(format!("{}{}", ok("1"), ok("2"))).await;
        retried
    });

    let client = Client::builder(&url).pipelining(3).build().unwrap();
    let responses: Vec<_> = (0..3)
        .map(|i| client.send(RequestOptions::get(format!("/{i}"))).unwrap())
        .collect();
    let mut responses = responses.into_iter();

    let head = responses.next().unwrap().await;
    assert!(head.is_err());
    for expected in ["1", "2"] {
        let response = responses.next().unwrap().await.unwrap();
        assert_eq!(response.body.collect().await.unwrap(), expected);
    }
    assert_eq!(server.await.unwrap(), ["/1".to_string(), "/2".to_string()]);
}

#[tokio::test]
async fn test_connection_close_forces_reconnect() {
    init_tracing();
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut first = accept(&listener).await;
        first.read_request().await.unwrap();
        first
            .write("HTTP/1.1 200 OK\r\nconnection: close\r\ncontent-length: 1\r\n\r\na")
            .await;
        assert!(first.closed().await);

        let mut second = accept(&listener).await;
        assert_eq!(second.read_request().await.unwrap().path, "/b");
        second.write(ok("b")).await;
    });

    let client = Client::builder(&url).build().unwrap();
    let a = client.request(RequestOptions::get("/a")).await.unwrap();
    assert_eq!(a.body.collect().await.unwrap(), "a");
    let b = client.request(RequestOptions::get("/b")).await.unwrap();
    assert_eq!(b.body.collect().await.unwrap(), "b");
    server.await.unwrap();
}

#[tokio::test]
async fn test_content_length_mismatch_fails_only_that_request() {
    init_tracing();
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let request = peer.read_request().await.unwrap();
        peer.write(ok("after")).await;
        request.path
    });

    let client = Client::builder(&url).build().unwrap();
    let err = client
        .request(
            RequestOptions::post("/upload")
                .header("content-length", "10")
                .body("abc"),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::ContentLengthMismatch {
            expected: 10,
            actual: 3
        }
    ));

    let response = client.request(RequestOptions::get("/after")).await.unwrap();
    assert_eq!(response.body.collect().await.unwrap(), "after");
    assert_eq!(server.await.unwrap(), "/after");
}

#[tokio::test]
async fn test_streamed_length_mismatch_destroys_connection() {
    init_tracing();
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut first = accept(&listener).await;
        // The declared five bytes never arrive.
        assert!(first.read_request().await.is_none());

        let mut second = accept(&listener).await;
        let path = second.read_request().await.unwrap().path;
        second.write(ok("fresh")).await;
        path
    });

    let client = Client::builder(&url).build().unwrap();
    let Pipeline { mut body, response } = client
        .pipeline(RequestOptions::post("/upload").header("content-length", "5"))
        .unwrap();
    body.send("abc").await.unwrap();
    body.finish();

    let err = response.await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::ContentLengthMismatch {
            expected: 5,
            actual: 3
        }
    ));

    let response = client.request(RequestOptions::get("/next")).await.unwrap();
    assert_eq!(response.body.collect().await.unwrap(), "fresh");
    assert_eq!(server.await.unwrap(), "/next");
}

#[tokio::test]
async fn test_streaming_body_is_chunked() {
    init_tracing();
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let request = peer.read_request().await.unwrap();
        assert!(request.chunked);
        assert_eq!(request.body, b"hello world");
        peer.write(
            "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n\
             5\r\nhello\r\n0\r\nx-sum: 5\r\n\r\n",
        )
        .await;
    });

    let client = Client::builder(&url).build().unwrap();
    let Pipeline { mut body, response } = client.pipeline(RequestOptions::post("/echo")).unwrap();
    body.send("hello ").await.unwrap();
    body.send("world").await.unwrap();
    body.finish();

    let response = response.await.unwrap();
    let (data, trailers) = response.body.collect_with_trailers().await.unwrap();
    assert_eq!(data, "hello");
    assert_eq!(trailers["x-sum"], "5");
    server.await.unwrap();
}

#[tokio::test]
async fn test_fixed_body_has_content_length() {
    init_tracing();
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let request = peer.read_request().await.unwrap();
        peer.write(ok("")).await;
        request
    });

    let client = Client::builder(&url).build().unwrap();
    client
        .request(RequestOptions::put("/items/1").body("twelve bytes"))
        .await
        .unwrap();

    let request = server.await.unwrap();
    assert!(!request.chunked);
    assert_eq!(request.header("content-length"), Some("12"));
    assert_eq!(request.body, b"twelve bytes");
    assert_eq!(request.header("host"), Some(url.trim_start_matches("http://")));
}

#[tokio::test]
async fn test_informational_response_then_final() {
    init_tracing();
    let (listener, url) = listen().await;
    tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        peer.read_request().await.unwrap();
        peer.write(format!(
            "HTTP/1.1 103 Early Hints\r\nlink: </style.css>\r\n\r\n{}",
            ok("ok")
        ))
        .await;
        peer.closed().await;
    });

    let client = Client::builder(&url).build().unwrap();
    let response = client.request(RequestOptions::get("/")).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body.collect().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_100_continue_is_protocol_error() {
    init_tracing();
    let (listener, url) = listen().await;
    tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        peer.read_request().await.unwrap();
        peer.write("HTTP/1.1 100 Continue\r\n\r\n").await;
        peer.closed().await;
    });

    let client = Client::builder(&url).build().unwrap();
    let err = client.request(RequestOptions::get("/")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}
