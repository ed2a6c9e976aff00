//! Event decoding and parser state machine against the stub module.

use std::rc::Rc;
use std::sync::Arc;

use blackbox_runtime::{Error, FieldFilterSet, Loader, LogFile, ParserEvent, Stats};
use blackbox_testing as stub;

fn load_default() -> LogFile {
    Loader::from_bytes(stub::default_stub_wat())
        .unwrap()
        .load_file(b"stub-log")
        .unwrap()
}

#[test]
fn event_sequence_decodes_known_values() {
    let file = load_default();
    let headers = file.parse_headers(0).unwrap().unwrap();
    let parser = headers.get_data_parser(None).unwrap();

    assert!(matches!(
        parser.next().unwrap(),
        Some(ParserEvent::Event)
    ));

    match parser.next().unwrap() {
        Some(ParserEvent::Main(frame)) => {
            assert_eq!(frame.time, stub::MAIN_TIME);
            assert_eq!(frame.fields.len(), stub::MAIN_FIELDS.len());
            for ((name, _, _), expected) in stub::MAIN_FIELDS.iter().zip(stub::MAIN_FIELD_VALUES) {
                assert_eq!(frame.fields.get(*name), Some(&expected), "field {name}");
            }
        }
        other => panic!("expected main frame, got {other:?}"),
    }

    match parser.next().unwrap() {
        Some(ParserEvent::Slow(frame)) => {
            assert_eq!(frame.fields.len(), 1);
            assert_eq!(
                frame.fields.get(stub::SLOW_FIELDS[0].0),
                Some(&stub::SLOW_FIELD_VALUE)
            );
        }
        other => panic!("expected slow frame, got {other:?}"),
    }

    // Zero-field gps def with a zero-length array: empty map, not an error.
    match parser.next().unwrap() {
        Some(ParserEvent::Gps(frame)) => {
            assert_eq!(frame.time, stub::GPS_TIME);
            assert!(frame.fields.is_empty());
        }
        other => panic!("expected gps frame, got {other:?}"),
    }

    assert!(parser.next().unwrap().is_none());
    assert!(parser.done());
}

#[test]
fn done_parser_never_calls_the_module() {
    let file = load_default();
    let headers = file.parse_headers(0).unwrap().unwrap();
    let parser = headers.get_data_parser(None).unwrap();

    while parser.next().unwrap().is_some() {}
    assert!(parser.done());

    // The stub traps on any advance past end-of-stream, so these stay
    // `Ok(None)` only if the host really stops calling in.
    assert!(parser.next().unwrap().is_none());
    assert!(parser.next().unwrap().is_none());
}

#[test]
fn stats_are_monotonic_and_match_yielded_events() {
    let file = load_default();
    let headers = file.parse_headers(0).unwrap().unwrap();
    let parser = headers.get_data_parser(None).unwrap();

    let initial = parser.stats().unwrap();
    assert_eq!(initial, Stats::default());

    let mut yielded = 0u32;
    let mut previous = initial;
    while parser.next().unwrap().is_some() {
        yielded += 1;

        let stats = parser.stats().unwrap();
        let sum = |s: Stats| s.counts.event + s.counts.main + s.counts.slow + s.counts.gps;
        assert!(sum(stats) >= sum(previous), "counts regressed");
        assert!(stats.progress >= previous.progress, "progress regressed");
        assert_eq!(sum(stats), yielded);

        // Reading stats never advances the cursor.
        assert_eq!(parser.stats().unwrap(), stats);
        previous = stats;
    }

    assert_eq!(yielded, stub::EVENT_SEQUENCE_LEN);
    assert_eq!(parser.stats().unwrap().progress, 1.0);
}

#[test]
fn field_count_mismatch_is_fatal() {
    let file = Loader::from_bytes(stub::stub_wat(&stub::StubOptions {
        main_field_count_mismatch: true,
        ..Default::default()
    }))
    .unwrap()
    .load_file(b"stub-log")
    .unwrap();
    let headers = file.parse_headers(0).unwrap().unwrap();
    let parser = headers.get_data_parser(None).unwrap();

    assert!(matches!(parser.next().unwrap(), Some(ParserEvent::Event)));
    assert!(matches!(
        parser.next(),
        Err(Error::FieldCountMismatch {
            expected: 3,
            actual: 2
        })
    ));
}

#[test]
fn unknown_event_discriminant_is_fatal() {
    let file = Loader::from_bytes(stub::stub_wat(&stub::StubOptions {
        bad_event_kind: true,
        ..Default::default()
    }))
    .unwrap()
    .load_file(b"stub-log")
    .unwrap();
    let headers = file.parse_headers(0).unwrap().unwrap();
    let parser = headers.get_data_parser(None).unwrap();

    assert!(matches!(parser.next().unwrap(), Some(ParserEvent::Event)));
    assert!(matches!(parser.next(), Err(Error::InvalidEventKind(9))));
}

#[test]
fn unfiltered_parser_reuses_headers_defs() {
    let file = load_default();
    let headers = file.parse_headers(0).unwrap().unwrap();
    let parser = headers.get_data_parser(None).unwrap();

    assert!(Arc::ptr_eq(
        parser.main_frame_def(),
        &headers.main_frame_def().unwrap()
    ));
    assert!(Rc::ptr_eq(parser.headers(), &headers));
}

#[test]
fn filtered_parser_carries_narrowed_defs() {
    let file = load_default();
    let headers = file.parse_headers(0).unwrap().unwrap();

    let filter = FieldFilterSet {
        main: Some(vec!["loopIteration".into(), "vbatLatest".into()]),
        slow: None,
        gps: None,
    };
    let parser = headers.get_data_parser(Some(filter)).unwrap();

    let def = parser.main_frame_def();
    assert_eq!(def.len(), 2);
    assert_eq!(&*def.get(0).unwrap().name, "loopIteration");
    assert_eq!(&*def.get(1).unwrap().name, "vbatLatest");

    // The headers' own schema is untouched.
    assert_eq!(headers.main_frame_def().unwrap().len(), 3);
}

#[test]
fn events_iterator_pulls_to_completion() {
    let file = load_default();
    let headers = file.parse_headers(0).unwrap().unwrap();
    let parser = headers.get_data_parser(None).unwrap();

    let events: Vec<ParserEvent> = parser.events().collect::<Result<_, _>>().unwrap();
    assert_eq!(events.len(), stub::EVENT_SEQUENCE_LEN as usize);
    assert!(parser.done());
}

#[test]
fn events_serialize_stably() {
    let file = load_default();
    let headers = file.parse_headers(0).unwrap().unwrap();
    let parser = headers.get_data_parser(None).unwrap();

    parser.next().unwrap();
    let main = parser.next().unwrap().unwrap();

    let json = serde_json::to_value(&main).unwrap();
    assert_eq!(json["Main"]["time"], 0.5);
    assert_eq!(json["Main"]["fields"]["loopIteration"], 100);
    assert_eq!(json["Main"]["fields"]["vbatLatest"], -1);

    let back: ParserEvent = serde_json::from_value(json).unwrap();
    assert_eq!(back, main);

    let stats = serde_json::to_value(parser.stats().unwrap()).unwrap();
    assert_eq!(stats["counts"]["main"], 1);
    assert_eq!(stats["counts"]["event"], 1);
}
