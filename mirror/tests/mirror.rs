//! The mirrored surface must behave like the synchronous facades, one
//! worker per file.

use blackbox_mirror::MirrorParser;
use blackbox_runtime::{Error, FirmwareDate, FirmwareKind, ParserEvent};
use blackbox_testing as stub;

async fn load_default() -> (MirrorParser, blackbox_mirror::AsyncLogFile) {
    let parser = MirrorParser::from_bytes(stub::default_stub_wat()).unwrap();
    let file = parser.load_file(b"stub-log".to_vec()).await.unwrap();
    (parser, file)
}

#[tokio::test]
async fn surface_parity_with_sync_facades() {
    let (_parser, file) = load_default().await;

    assert_eq!(file.log_count().await.unwrap(), stub::LOG_COUNT);
    assert_eq!(file.memory_size().await.unwrap(), 2 * 65536);
    assert!(file.parse_headers(stub::LOG_COUNT).await.unwrap().is_none());

    let headers = file.parse_headers(0).await.unwrap().unwrap();
    assert_eq!(
        headers.firmware_revision().await.unwrap(),
        stub::FIRMWARE_REVISION
    );
    assert_eq!(
        headers.firmware_kind().await.unwrap(),
        FirmwareKind::Betaflight
    );
    assert_eq!(
        headers.firmware_version().await.unwrap().to_string(),
        "4.3.0"
    );
    assert_eq!(
        headers.board_info().await.unwrap(),
        Some(stub::BOARD_INFO.to_owned())
    );
    assert_eq!(headers.craft_name().await.unwrap(), None);
    assert!(matches!(
        headers.firmware_date().await.unwrap(),
        Some(FirmwareDate::Utc(_))
    ));
    assert_eq!(
        headers.main_frame_def().await.unwrap().len(),
        stub::MAIN_FIELDS.len()
    );
}

#[tokio::test]
async fn worker_memoizes_headers_decodes() {
    let (_parser, file) = load_default().await;
    let headers = file.parse_headers(0).await.unwrap().unwrap();

    // Two awaits, one module read: the stub poisons re-reads.
    assert_eq!(
        headers.firmware_revision().await.unwrap(),
        stub::FIRMWARE_REVISION
    );
    assert_eq!(
        headers.firmware_revision().await.unwrap(),
        stub::FIRMWARE_REVISION
    );
}

#[tokio::test]
async fn headers_ids_are_idempotent_per_index() {
    let (_parser, file) = load_default().await;

    let first = file.parse_headers(0).await.unwrap().unwrap();
    let second = file.parse_headers(0).await.unwrap().unwrap();
    assert_eq!(first.id(), second.id());

    let other = file.parse_headers(1).await.unwrap().unwrap();
    assert_ne!(first.id(), other.id());
}

#[tokio::test]
async fn parser_ids_are_append_only() {
    let (_parser, file) = load_default().await;
    let headers = file.parse_headers(0).await.unwrap().unwrap();

    let a = headers.get_data_parser(None).await.unwrap();
    let b = headers.get_data_parser(None).await.unwrap();
    assert_ne!(a.id(), b.id());
}

#[tokio::test]
async fn event_stream_crosses_the_boundary() {
    let (_parser, file) = load_default().await;
    let headers = file.parse_headers(0).await.unwrap().unwrap();
    let parser = headers.get_data_parser(None).await.unwrap();

    let mut events = Vec::new();
    while let Some(event) = parser.next().await.unwrap() {
        events.push(event);
    }

    assert_eq!(events.len(), stub::EVENT_SEQUENCE_LEN as usize);
    assert!(matches!(events[0], ParserEvent::Event));
    match &events[1] {
        ParserEvent::Main(frame) => {
            assert_eq!(frame.time, stub::MAIN_TIME);
            assert_eq!(frame.fields.get("loopIteration"), Some(&100));
        }
        other => panic!("expected main frame, got {other:?}"),
    }
    assert!(parser.done());
    assert!(parser.next().await.unwrap().is_none());

    let stats = parser.stats().await.unwrap();
    let sum = stats.counts.event + stats.counts.main + stats.counts.slow + stats.counts.gps;
    assert_eq!(sum, stub::EVENT_SEQUENCE_LEN);
}

#[tokio::test]
async fn module_errors_rematerialize_with_message() {
    let parser = MirrorParser::from_bytes(stub::stub_wat(&stub::StubOptions {
        throw_on_headers: Some(1),
        ..Default::default()
    }))
    .unwrap();
    let file = parser.load_file(b"stub-log".to_vec()).await.unwrap();

    match file.parse_headers(1).await {
        Err(Error::Parse(message)) => assert_eq!(message, stub::PARSE_ERROR_MESSAGE),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[tokio::test]
async fn load_failures_surface_before_any_facade() {
    let parser = MirrorParser::from_bytes(stub::stub_wat(&stub::StubOptions {
        alloc_fails: true,
        ..Default::default()
    }))
    .unwrap();

    assert!(matches!(
        parser.load_file(b"stub-log".to_vec()).await,
        Err(Error::AllocationFailed(8))
    ));
}

#[tokio::test]
async fn shutdown_abandons_all_calls() {
    let (_parser, file) = load_default().await;
    let headers = file.parse_headers(0).await.unwrap().unwrap();

    file.shutdown();

    assert!(matches!(file.log_count().await, Err(Error::Disconnected)));
    assert!(matches!(
        headers.firmware_revision().await,
        Err(Error::Disconnected)
    ));
}

#[tokio::test]
async fn headers_outlive_the_file_facade() {
    let (_parser, file) = load_default().await;
    let headers = file.parse_headers(0).await.unwrap().unwrap();
    drop(file);

    // The worker stays up as long as any facade holds the channel.
    assert_eq!(
        headers.firmware_revision().await.unwrap(),
        stub::FIRMWARE_REVISION
    );
}

#[tokio::test]
async fn distinct_files_parse_in_parallel() {
    let parser = MirrorParser::from_bytes(stub::default_stub_wat()).unwrap();
    let first = parser.load_file(b"stub-log".to_vec()).await.unwrap();
    let second = parser.load_file(b"stub-log".to_vec()).await.unwrap();

    async fn drain(file: &blackbox_mirror::AsyncLogFile) -> u32 {
        let headers = file.parse_headers(0).await.unwrap().unwrap();
        let parser = headers.get_data_parser(None).await.unwrap();
        let mut count = 0;
        while parser.next().await.unwrap().is_some() {
            count += 1;
        }
        count
    }

    let (a, b) = tokio::join!(drain(&first), drain(&second));
    assert_eq!(a, stub::EVENT_SEQUENCE_LEN);
    assert_eq!(b, stub::EVENT_SEQUENCE_LEN);
}
