//! End-to-end transfers through gateways, the engine, the relay and the
//! progress decorator.

use std::io::{Cursor, Read, Write};
use std::sync::{Arc, Mutex};

use nimbus_gateway::{
    Capabilities, Capability, ConnectionRegistry, FileSystemId, Gateway, GatewayError,
    LocalGateway, MemoryGateway, ReadFault, TransferOptions, download, download_to_relay, upload,
};
use nimbus_transfer::{
    ProgressReporter, ProgressSample, RelayError, RetryConfig, TransferConfig, TransferError,
    clear_cursor,
};
use tokio_util::sync::CancellationToken;

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn fast_options(chunk_size: usize, max_attempts: u32) -> TransferOptions {
    TransferOptions::new(TransferConfig {
        chunk_size,
        retry: RetryConfig {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_factor: 1.0,
            jitter: 0.0,
        },
    })
}

fn recording_reporter() -> (Arc<dyn ProgressReporter>, Arc<Mutex<Vec<ProgressSample>>>) {
    let samples = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&samples);
    let reporter: Arc<dyn ProgressReporter> = Arc::new(move |s: ProgressSample| {
        sink.lock().unwrap().push(s);
    });
    (reporter, samples)
}

#[tokio::test]
async fn download_survives_truncations_and_resets() {
    let data = content(1000);
    let mem = MemoryGateway::new("drive");
    mem.insert("videos/clip.mp4", data.clone());
    mem.inject(
        "videos/clip.mp4",
        [
            ReadFault::TruncateAt(100),
            ReadFault::ResetAt(450),
            ReadFault::Refuse,
            ReadFault::TruncateAt(999),
        ],
    );
    let (reporter, samples) = recording_reporter();
    let options = fast_options(64, 5).with_reporter(reporter);

    let (summary, sink) = download(
        Arc::new(mem.clone()),
        &FileSystemId::file("videos/clip.mp4"),
        Cursor::new(Vec::new()),
        clear_cursor,
        &options,
    )
    .await
    .unwrap();

    assert_eq!(summary.bytes_transferred, 1000);
    assert_eq!(summary.retries, 4);
    assert_eq!(mem.open_count("videos/clip.mp4"), 5);
    assert_eq!(sink.into_inner(), data);

    let samples = samples.lock().unwrap();
    assert_eq!(samples.last().unwrap().percent_completed, 100);
    assert!(samples.iter().all(|s| s.bytes_total == 1000));
    assert!(samples.iter().all(|s| s.bytes_transferred <= s.bytes_total));
}

#[tokio::test]
async fn retried_download_reports_each_byte_once() {
    let data = content(1000);
    let mem = MemoryGateway::new("drive");
    mem.insert("f", data.clone());
    mem.inject("f", [ReadFault::TruncateAt(600)]);
    let (reporter, samples) = recording_reporter();

    let (summary, sink) = download(
        Arc::new(mem),
        &FileSystemId::file("f"),
        Cursor::new(Vec::new()),
        clear_cursor,
        &fast_options(100, 2).with_reporter(reporter),
    )
    .await
    .unwrap();
    assert_eq!(summary.retries, 1);
    assert_eq!(sink.into_inner(), data);

    let samples = samples.lock().unwrap();
    let transferred: Vec<u64> = samples.iter().map(|s| s.bytes_transferred).collect();
    assert_eq!(
        transferred,
        vec![100, 200, 300, 400, 500, 600, 700, 800, 900, 1000]
    );
    assert!(samples.iter().all(|s| s.bytes_transferred <= s.bytes_total));
    assert!(
        samples
            .windows(2)
            .all(|w| w[0].percent_completed < w[1].percent_completed)
    );
    assert_eq!(samples.iter().filter(|s| s.percent_completed == 100).count(), 1);
}

#[tokio::test]
async fn relay_download_progress_follows_resets() {
    let mem = MemoryGateway::new("drive");
    mem.insert("f", content(400));
    mem.inject("f", [ReadFault::ResetAt(250), ReadFault::TruncateAt(120)]);
    let (reporter, samples) = recording_reporter();

    let (mut reader, task) = download_to_relay(
        Arc::new(mem),
        &FileSystemId::file("f"),
        &fast_options(50, 3).with_reporter(reporter),
    )
    .await
    .unwrap();
    let consumer = tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 128];
        while !matches!(reader.read(&mut buf), Ok(0)) {}
    });

    task.await.unwrap().unwrap();
    consumer.await.unwrap();
    let samples = samples.lock().unwrap();
    assert!(samples.iter().all(|s| s.bytes_transferred <= 400));
    assert_eq!(samples.last().unwrap().bytes_transferred, 400);
}

#[tokio::test]
async fn download_gives_up_after_budget() {
    let mem = MemoryGateway::new("drive");
    mem.insert("f", content(50));
    mem.inject("f", std::iter::repeat_n(ReadFault::ResetAt(10), 10));

    let err = download(
        Arc::new(mem.clone()),
        &FileSystemId::file("f"),
        Cursor::new(Vec::new()),
        clear_cursor,
        &fast_options(8, 2),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        GatewayError::Transfer(TransferError::ExhaustedRetries { retries: 2, .. })
    ));
    assert_eq!(mem.open_count("f"), 3);
}

#[tokio::test]
async fn authentication_failure_is_not_retried() {
    let mem = MemoryGateway::new("drive");
    mem.insert("f", content(50));
    mem.inject("f", [ReadFault::Deny]);

    let err = download(
        Arc::new(mem.clone()),
        &FileSystemId::file("f"),
        Cursor::new(Vec::new()),
        clear_cursor,
        &fast_options(8, 5),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, GatewayError::Transfer(TransferError::Auth(_))));
    assert_eq!(mem.open_count("f"), 1);
}

#[tokio::test]
async fn missing_remote_file_fails_before_transfer() {
    let mem = MemoryGateway::new("drive");
    let err = download(
        Arc::new(mem.clone()),
        &FileSystemId::file("nope"),
        Cursor::new(Vec::new()),
        clear_cursor,
        &fast_options(8, 5),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
    assert_eq!(mem.open_count("nope"), 0);
}

#[tokio::test]
async fn unreadable_gateway_is_rejected() {
    let mem = MemoryGateway::new("drop-box")
        .with_capabilities(Capabilities::empty().with(Capability::Write));
    mem.insert("f", content(4));
    let err = download(
        Arc::new(mem),
        &FileSystemId::file("f"),
        Cursor::new(Vec::new()),
        clear_cursor,
        &fast_options(8, 5),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Unsupported {
            capability: Capability::Read,
            ..
        }
    ));
}

#[tokio::test]
async fn relay_download_feeds_blocking_consumer() {
    let data = content(5000);
    let mem = MemoryGateway::new("drive");
    mem.insert("big.bin", data.clone());
    mem.inject("big.bin", [ReadFault::ResetAt(1234), ReadFault::TruncateAt(4000)]);

    let (mut reader, task) = download_to_relay(
        Arc::new(mem),
        &FileSystemId::file("big.bin"),
        &fast_options(512, 3),
    )
    .await
    .unwrap();

    let consumer = tokio::task::spawn_blocking(move || {
        let mut assembled = Vec::new();
        let mut buf = [0u8; 300];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => assembled.extend_from_slice(&buf[..n]),
                Err(e) if matches!(RelayError::from_io(&e), Some(RelayError::Rewound)) => {
                    assembled.clear();
                }
                Err(e) => panic!("relay failed: {e}"),
            }
        }
        (assembled, reader.is_completed())
    });

    let summary = task.await.unwrap().unwrap();
    let (assembled, completed) = consumer.await.unwrap();
    assert_eq!(summary.retries, 2);
    assert!(completed);
    assert_eq!(assembled, data);
}

#[tokio::test]
async fn relay_ends_uncompleted_when_engine_gives_up() {
    let mem = MemoryGateway::new("drive");
    mem.insert("f", content(100));
    mem.inject("f", std::iter::repeat_n(ReadFault::ResetAt(40), 5));

    let (mut reader, task) =
        download_to_relay(Arc::new(mem), &FileSystemId::file("f"), &fast_options(16, 1))
            .await
            .unwrap();

    let consumer = tokio::task::spawn_blocking(move || {
        let mut sink = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => sink.extend_from_slice(&buf[..n]),
                Err(_) => sink.clear(),
            }
        }
        reader.is_completed()
    });

    let result = task.await.unwrap();
    assert!(matches!(
        result,
        Err(GatewayError::Transfer(TransferError::ExhaustedRetries { .. }))
    ));
    assert!(!consumer.await.unwrap());
}

#[tokio::test]
async fn upload_from_local_file_to_gateway() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("report.pdf");
    let data = content(3000);
    std::fs::File::create(&local).unwrap().write_all(&data).unwrap();

    let remote = MemoryGateway::new("drive");
    let summary = upload(
        &local,
        Arc::new(remote.clone()),
        &FileSystemId::file("docs/report.pdf"),
        &fast_options(1024, 2),
    )
    .await
    .unwrap();

    assert_eq!(summary.bytes_transferred, 3000);
    assert_eq!(remote.contents("docs/report.pdf").unwrap(), data);
}

#[tokio::test]
async fn upload_of_missing_local_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryGateway::new("drive");
    let err = upload(
        &dir.path().join("absent"),
        Arc::new(remote.clone()),
        &FileSystemId::file("x"),
        &fast_options(1024, 2),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, GatewayError::Io(_)));
    assert!(remote.contents("x").is_none());
}

#[tokio::test]
async fn registry_routes_transfers_between_accounts() {
    let src_dir = tempfile::tempdir().unwrap();
    let dst_dir = tempfile::tempdir().unwrap();
    let data = content(777);
    std::fs::write(src_dir.path().join("photo.raw"), &data).unwrap();

    let registry = ConnectionRegistry::new();
    registry
        .register("home", Arc::new(LocalGateway::new("home", src_dir.path())))
        .await;
    registry
        .register("work", Arc::new(LocalGateway::new("work", dst_dir.path())))
        .await;

    let home = registry.get("home").await.unwrap();
    let (_, buffer) = download(
        home,
        &FileSystemId::file("photo.raw"),
        Cursor::new(Vec::new()),
        clear_cursor,
        &fast_options(100, 1),
    )
    .await
    .unwrap();

    let staged = src_dir.path().join("staged.raw");
    std::fs::write(&staged, buffer.into_inner()).unwrap();
    let work: Arc<dyn Gateway> = registry.get("work").await.unwrap();
    upload(
        &staged,
        work,
        &FileSystemId::file("inbox/photo.raw"),
        &fast_options(100, 1),
    )
    .await
    .unwrap();
    assert_eq!(std::fs::read(dst_dir.path().join("inbox/photo.raw")).unwrap(), data);

    registry.remove("work").await;
    assert!(matches!(
        registry.get("work").await,
        Err(GatewayError::UnknownAccount(_))
    ));
}

#[tokio::test]
async fn cancelled_download_stops() {
    let mem = MemoryGateway::new("drive");
    mem.insert("f", content(100));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = download(
        Arc::new(mem.clone()),
        &FileSystemId::file("f"),
        Cursor::new(Vec::new()),
        clear_cursor,
        &fast_options(16, 3).with_cancellation(cancel),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, GatewayError::Transfer(TransferError::Cancelled)));
    assert_eq!(mem.open_count("f"), 0);
}
