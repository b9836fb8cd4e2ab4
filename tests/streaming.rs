//! Streamed bodies crossing the mesh.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshwire::transport::Body;
use meshwire::{BoxError, Coordinator, MeshConfig, MeshRequest, MeshResponse, Server};

mod common;

const CHUNKS: usize = 40;

fn streaming_config() -> MeshConfig {
    let mut config = MeshConfig::default();
    config.streaming.max_inline_body = 16;
    config
}

/// Answers with the request body size, then `CHUNKS` numbered chunks.
fn counting_server(written: Arc<AtomicUsize>) -> Server {
    Server::handler(move |req: MeshRequest| {
        let written = written.clone();
        async move {
            let received = req.body.collect().await?.len();

            let (mut writer, body) = Body::channel(None);
            tokio::spawn(async move {
                if writer.write(format!("received={received};")).await.is_err() {
                    return;
                }
                for i in 0..CHUNKS {
                    if writer.write(format!("{i};")).await.is_err() {
                        return;
                    }
                    written.fetch_add(1, Ordering::SeqCst);
                }
                let _ = writer.end();
            });
            Ok::<_, BoxError>(MeshResponse::ok(body))
        }
    })
}

#[tokio::test]
async fn test_streamed_bodies_both_ways_with_backpressure() {
    let config = streaming_config();
    let coordinator = Coordinator::new(config.clone());
    let written = Arc::new(AtomicUsize::new(0));
    let server_written = written.clone();
    let (port, _unit) = common::spawn_unit(config, move |_| counting_server(server_written));
    coordinator.add_route("stream", [port], None).await.unwrap();

    let (mut request_writer, request_body) = Body::channel(None);
    let producer = tokio::spawn(async move {
        for _ in 0..10 {
            request_writer.write(vec![7u8; 100]).await.unwrap();
        }
        request_writer.end().unwrap();
    });

    let response = coordinator
        .dispatch("stream", MeshRequest::post("/upload", request_body))
        .await
        .unwrap();
    producer.await.unwrap();

    let Body::Stream(mut reader) = response.body else {
        panic!("response of unknown length must stream");
    };

    let first = reader.read().await.unwrap().unwrap();
    assert_eq!(first, "received=1000;");

    let mut expected = 0;
    let mut reads = 0;
    while let Some(chunk) = reader.read().await.unwrap() {
        reads += 1;
        assert_eq!(chunk, format!("{expected};"));
        expected += 1;

        // Slow consumer: the producer may not run ahead.
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(
            written.load(Ordering::SeqCst) <= reads + 1,
            "producer ran ahead: {} written, {} read",
            written.load(Ordering::SeqCst),
            reads
        );
    }
    assert_eq!(expected, CHUNKS);
    assert_eq!(written.load(Ordering::SeqCst), CHUNKS);
}

#[tokio::test]
async fn test_small_known_length_body_is_inlined() {
    let config = streaming_config();
    let coordinator = Coordinator::new(config.clone());
    let (port, _unit) = common::spawn_unit(config, |_| {
        Server::handler(|req: MeshRequest| async move {
            let kind = if req.body.is_stream() { "stream" } else { "inline" };
            Ok::<_, BoxError>(MeshResponse::ok(kind))
        })
    });
    coordinator.add_route("kind", [port], None).await.unwrap();

    let (mut writer, body) = Body::channel(Some(5));
    tokio::spawn(async move {
        writer.write("hello").await.unwrap();
        writer.end().unwrap();
    });
    let response = coordinator
        .dispatch("kind", MeshRequest::post("/", body))
        .await
        .unwrap();
    assert_eq!(common::text(response).await, "inline");

    let (mut writer, body) = Body::channel(None);
    tokio::spawn(async move {
        writer.write("hello").await.unwrap();
        writer.end().unwrap();
    });
    let response = coordinator
        .dispatch("kind", MeshRequest::post("/", body))
        .await
        .unwrap();
    assert_eq!(common::text(response).await, "stream");
}

#[tokio::test]
async fn test_producer_abort_reaches_consumer() {
    let config = streaming_config();
    let coordinator = Coordinator::new(config.clone());
    let (port, _unit) = common::spawn_unit(config, |_| {
        Server::handler(|req: MeshRequest| async move {
            match req.body.collect().await {
                Ok(bytes) => Ok::<_, BoxError>(MeshResponse::ok(format!("got {}", bytes.len()))),
                Err(e) => Ok(MeshResponse::ok(format!("failed: {e}"))),
            }
        })
    });
    coordinator.add_route("sink", [port], None).await.unwrap();

    let (mut writer, body) = Body::channel(None);
    tokio::spawn(async move {
        writer.write("partial").await.unwrap();
        writer.abort("disk full").unwrap();
    });
    let response = coordinator
        .dispatch("sink", MeshRequest::post("/", body))
        .await
        .unwrap();
    assert_eq!(
        common::text(response).await,
        "failed: Stream aborted: disk full"
    );
}
