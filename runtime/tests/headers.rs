//! Header decoding and caching against the stub module.

use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use chrono::NaiveDate;

use blackbox_runtime::{Error, FirmwareDate, FirmwareKind, Loader, LogFile, Unit};
use blackbox_testing as stub;

fn load_default() -> LogFile {
    Loader::from_bytes(stub::default_stub_wat())
        .unwrap()
        .load_file(b"stub-log")
        .unwrap()
}

#[test]
fn log_count_and_bounds() {
    let file = load_default();
    assert_eq!(file.log_count().unwrap(), stub::LOG_COUNT);

    for index in 0..stub::LOG_COUNT {
        assert!(file.parse_headers(index).unwrap().is_some());
    }
    assert!(file.parse_headers(stub::LOG_COUNT).unwrap().is_none());
    assert!(file.parse_headers(9999).unwrap().is_none());
}

#[test]
fn live_headers_are_cached_by_index() {
    let file = load_default();
    let first = file.parse_headers(0).unwrap().unwrap();
    let second = file.parse_headers(0).unwrap().unwrap();
    assert!(Rc::ptr_eq(&first, &second));

    // Memoized: both reads observe the module's first answer.
    assert_eq!(first.firmware_revision().unwrap(), stub::FIRMWARE_REVISION);
    assert_eq!(second.firmware_revision().unwrap(), stub::FIRMWARE_REVISION);
}

#[test]
fn collected_headers_are_recreated() {
    let file = load_default();
    let headers = file.parse_headers(0).unwrap().unwrap();
    assert_eq!(headers.firmware_revision().unwrap(), stub::FIRMWARE_REVISION);
    drop(headers);

    // A fresh instance decodes again; the stub marks re-reads, proving the
    // old cache was not resurrected.
    let headers = file.parse_headers(0).unwrap().unwrap();
    assert_eq!(headers.firmware_revision().unwrap(), stub::STALE_REVISION);
}

#[test]
fn headers_a_fields() {
    let file = load_default();
    let headers = file.parse_headers(0).unwrap().unwrap();

    assert_eq!(headers.firmware_kind().unwrap(), FirmwareKind::Betaflight);
    assert_eq!(headers.firmware_version().unwrap().to_string(), "4.3.0");
    assert_eq!(headers.debug_mode().unwrap(), stub::DEBUG_MODE);
    assert_eq!(headers.pwm_protocol().unwrap(), stub::PWM_PROTOCOL);
    assert_eq!(headers.board_info().unwrap(), Some(stub::BOARD_INFO));
    assert_eq!(headers.craft_name().unwrap(), None);

    let (year, month, day, hour, minute, second, milli) = stub::FIRMWARE_DATE;
    let expected = NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_milli_opt(hour, minute, second, milli)
        .unwrap();
    match headers.firmware_date().unwrap() {
        Some(FirmwareDate::Utc(date)) => assert_eq!(*date, expected),
        other => panic!("expected structured date, got {other:?}"),
    }

    let disabled: HashSet<String> = stub::DISABLED_FIELDS.iter().map(|s| s.to_string()).collect();
    assert_eq!(headers.disabled_fields().unwrap(), &disabled);
    let features: HashSet<String> = stub::FEATURES.iter().map(|s| s.to_string()).collect();
    assert_eq!(headers.features().unwrap(), &features);

    let unknown: BTreeMap<String, String> = stub::UNKNOWN_HEADERS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    assert_eq!(headers.unknown().unwrap(), &unknown);
}

#[test]
fn headers_b_fields() {
    let file = load_default();
    let headers = file.parse_headers(1).unwrap().unwrap();

    assert_eq!(headers.firmware_kind().unwrap(), FirmwareKind::Inav);
    assert_eq!(headers.board_info().unwrap(), None);
    assert_eq!(headers.craft_name().unwrap(), Some(stub::CRAFT_NAME));

    match headers.firmware_date().unwrap() {
        Some(FirmwareDate::Raw(raw)) => assert_eq!(raw, stub::RAW_FIRMWARE_DATE),
        other => panic!("expected raw date fallback, got {other:?}"),
    }
}

#[test]
fn frame_defs_decode_once_per_kind() {
    let file = load_default();
    let headers = file.parse_headers(0).unwrap().unwrap();

    let main = headers.main_frame_def().unwrap();
    assert_eq!(main.len(), stub::MAIN_FIELDS.len());
    for (field, (name, signed, raw_unit)) in main.iter().zip(stub::MAIN_FIELDS) {
        assert_eq!(&*field.name, name);
        assert_eq!(field.signed, signed);
        assert_eq!(field.unit, Unit::from_raw(raw_unit));
    }
    // Unknown unit tag degrades instead of failing.
    assert_eq!(main.get(2).unwrap().unit, Unit::Unitless);

    let slow = headers.slow_frame_def().unwrap();
    assert_eq!(slow.len(), 1);
    assert_eq!(slow.get(0).unwrap().unit, Unit::FlightMode);

    let gps = headers.gps_frame_def().unwrap();
    assert!(gps.is_empty());

    // Decoded once; later calls share the same schema.
    assert!(Arc::ptr_eq(&main, &headers.main_frame_def().unwrap()));
}

#[test]
fn module_parse_error_is_typed_and_skippable() {
    let file = Loader::from_bytes(stub::stub_wat(&stub::StubOptions {
        throw_on_headers: Some(1),
        ..Default::default()
    }))
    .unwrap()
    .load_file(b"stub-log")
    .unwrap();

    match file.parse_headers(1) {
        Err(Error::Parse(message)) => assert_eq!(message, stub::PARSE_ERROR_MESSAGE),
        other => panic!("expected parse error, got {other:?}"),
    }

    // The failure is per-sub-log; others remain readable.
    let headers = file.parse_headers(0).unwrap().unwrap();
    assert_eq!(headers.firmware_revision().unwrap(), stub::FIRMWARE_REVISION);
}

#[test]
fn unknown_firmware_kind_is_fatal() {
    let file = Loader::from_bytes(stub::stub_wat(&stub::StubOptions {
        bad_firmware_kind: true,
        ..Default::default()
    }))
    .unwrap()
    .load_file(b"stub-log")
    .unwrap();

    let headers = file.parse_headers(0).unwrap().unwrap();
    assert!(matches!(
        headers.firmware_kind(),
        Err(Error::InvalidFirmwareKind(7))
    ));
}
