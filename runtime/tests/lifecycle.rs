//! Handle lifetime, cascade release, and failure-injection behavior.

use std::rc::Rc;

use blackbox_runtime::{Error, Loader, LogFile};
use blackbox_testing as stub;

fn load_default() -> LogFile {
    Loader::from_bytes(stub::default_stub_wat())
        .unwrap()
        .load_file(b"stub-log")
        .unwrap()
}

#[test]
fn freeing_a_file_cascades_through_the_tree() {
    let file = load_default();
    let headers = file.parse_headers(0).unwrap().unwrap();
    let parser = headers.get_data_parser(None).unwrap();

    file.free().unwrap();

    assert!(!file.is_alive());
    assert!(!headers.is_alive());
    assert!(!parser.is_alive());

    assert!(matches!(
        file.log_count(),
        Err(Error::UseAfterFree("LogFile"))
    ));
    assert!(matches!(
        headers.firmware_kind(),
        Err(Error::UseAfterFree("LogHeaders"))
    ));
    assert!(matches!(
        parser.next(),
        Err(Error::UseAfterFree("DataParser"))
    ));
    assert!(matches!(
        parser.stats(),
        Err(Error::UseAfterFree("DataParser"))
    ));
}

#[test]
fn free_is_idempotent() {
    let file = load_default();
    // The stub traps on a second module-side release; both calls staying
    // `Ok` means the second one never reached the module.
    file.free().unwrap();
    file.free().unwrap();
}

#[test]
fn freeing_headers_spares_the_file() {
    let file = load_default();
    let headers = file.parse_headers(0).unwrap().unwrap();
    let parser = headers.get_data_parser(None).unwrap();

    headers.free().unwrap();

    assert!(!headers.is_alive());
    assert!(!parser.is_alive());
    assert!(file.is_alive());
    assert_eq!(file.log_count().unwrap(), stub::LOG_COUNT);
}

#[test]
fn freed_headers_are_replaced_on_next_request() {
    let file = load_default();
    let first = file.parse_headers(0).unwrap().unwrap();
    first.free().unwrap();

    // The weak cache still holds the dead instance; a new one is created.
    let second = file.parse_headers(0).unwrap().unwrap();
    assert!(!Rc::ptr_eq(&first, &second));
    assert!(second.is_alive());
}

#[test]
fn memoized_values_outlive_the_handle() {
    let file = load_default();
    let headers = file.parse_headers(0).unwrap().unwrap();
    assert_eq!(headers.firmware_revision().unwrap(), stub::FIRMWARE_REVISION);

    headers.free().unwrap();

    // Host-side copies stay readable; undecoded fields do not.
    assert_eq!(headers.firmware_revision().unwrap(), stub::FIRMWARE_REVISION);
    assert!(matches!(
        headers.disabled_fields(),
        Err(Error::UseAfterFree("LogHeaders"))
    ));
}

#[test]
fn allocation_failure_is_fatal_before_parsing() {
    let loader = Loader::from_bytes(stub::stub_wat(&stub::StubOptions {
        alloc_fails: true,
        ..Default::default()
    }))
    .unwrap();

    assert!(matches!(
        loader.load_file(b"stub-log"),
        Err(Error::AllocationFailed(8))
    ));
}

#[test]
fn memory_size_reports_linear_memory() {
    let file = load_default();
    // The stub declares two 64 KiB pages.
    assert_eq!(file.memory_size(), 2 * 65536);
}
