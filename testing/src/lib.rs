//! Synthetic decoder-module stand-ins for the host test suites.
//!
//! [`stub_wat`] emits the WAT text of a module implementing the full
//! pinned export ABI over a known memory image: fixed header strings,
//! three frame definitions, and a short event sequence. The stub also
//! enforces host contracts the real module cannot check: it traps on a
//! double `file_free` and on a cursor advance past end-of-stream, so a
//! host bug shows up as a failing call instead of silent corruption.
//!
//! Handles are opaque constants: file `0x10`, headers `4096 + log index`,
//! parser `8192`, filter builder `12288`. Two sub-logs exist: log 0
//! ("headers A": Betaflight, structured date, board info set) and log 1
//! ("headers B": INAV, raw-string date, craft name set).

/// Values baked into the stub's memory image, for test assertions.
pub const LOG_COUNT: u32 = 2;
pub const FIRMWARE_REVISION: &str = "Betaflight 4.3.0 (c8bfcd5a) STM32F745";
/// What `headers_firmwareRevision` returns on any call after the first
/// for a given headers handle; memoizing hosts never see it.
pub const STALE_REVISION: &str = "<stale revision read>";
pub const BOARD_INFO: &str = "SPEEDYBEEF405";
pub const CRAFT_NAME: &str = "ColibriRace";
pub const DEBUG_MODE: &str = "GYRO_SCALED";
pub const PWM_PROTOCOL: &str = "DSHOT600";
pub const DISABLED_FIELDS: [&str; 2] = ["magADC", "sonarRaw"];
pub const FEATURES: [&str; 2] = ["RX_SERIAL", "TELEMETRY"];
pub const UNKNOWN_HEADERS: [(&str, &str); 2] =
    [("gyro_sync_denom", "8"), ("rc_interpolation", "AUTO")];
pub const RAW_FIRMWARE_DATE: &str = "Jul  1 2022";
pub const PARSE_ERROR_MESSAGE: &str = "unsupported data version";

/// Main frame definition: name, signedness, raw unit byte. The third
/// field carries an unknown unit tag on purpose.
pub const MAIN_FIELDS: [(&str, bool, u8); 3] = [
    ("loopIteration", false, 0),
    ("vbatLatest", true, 12),
    ("motorLegacy", false, 200),
];
pub const SLOW_FIELDS: [(&str, bool, u8); 1] = [("flightModeFlags", false, 6)];

/// Decoded values of the one main frame in the event sequence.
pub const MAIN_FIELD_VALUES: [i64; 3] = [100, -1, 7];
pub const SLOW_FIELD_VALUE: i64 = 2;
pub const MAIN_TIME: f64 = 0.5;
pub const GPS_TIME: f64 = 1.25;

/// Structured firmware date of headers A: (year, month, day, hour,
/// minute, second, millisecond).
pub const FIRMWARE_DATE: (i32, u32, u32, u32, u32, u32, u32) = (2022, 6, 14, 9, 30, 21, 0);

/// Non-terminal events the default sequence yields, in order:
/// event, main, slow, gps.
pub const EVENT_SEQUENCE_LEN: u32 = 4;

const FILE_HANDLE: u32 = 0x10;
const HEADERS_BASE: u32 = 4096;
const DATA_HANDLE: u32 = 8192;
const BUILDER_HANDLE: u32 = 12288;
const EVENT_STRIDE: u32 = 24;

/// Behavior knobs for failure-injection variants.
#[derive(Debug, Clone, Default)]
pub struct StubOptions {
    /// `file_getHeaders` for this log index calls the `main.throw` import.
    pub throw_on_headers: Option<u32>,
    /// `data_alloc` always returns 0.
    pub alloc_fails: bool,
    /// The second event record carries discriminant 9.
    pub bad_event_kind: bool,
    /// `headers_firmwareKind` returns 7 for every handle.
    pub bad_firmware_kind: bool,
    /// The main frame reports 2 fields against a 3-field definition.
    pub main_field_count_mismatch: bool,
}

/// WAT text of the default, well-behaved stub.
pub fn default_stub_wat() -> String {
    stub_wat(&StubOptions::default())
}

/// WAT text of a stub with the given failure injections.
pub fn stub_wat(options: &StubOptions) -> String {
    let mut image = Image::new();

    // Strings.
    let rev = image.push_str(FIRMWARE_REVISION);
    let stale = image.push_str(STALE_REVISION);
    let board = image.push_str(BOARD_INFO);
    let craft = image.push_str(CRAFT_NAME);
    let debug = image.push_str(DEBUG_MODE);
    let pwm = image.push_str(PWM_PROTOCOL);
    let raw_date = image.push_str(RAW_FIRMWARE_DATE);
    let err_msg = image.push_str(PARSE_ERROR_MESSAGE);
    let disabled: Vec<_> = DISABLED_FIELDS.iter().map(|s| image.push_str(s)).collect();
    let features: Vec<_> = FEATURES.iter().map(|s| image.push_str(s)).collect();
    let unknown: Vec<_> = UNKNOWN_HEADERS
        .iter()
        .map(|(k, v)| (image.push_str(k), image.push_str(v)))
        .collect();
    let main_names: Vec<_> = MAIN_FIELDS
        .iter()
        .map(|(name, _, _)| image.push_str(name))
        .collect();
    let slow_names: Vec<_> = SLOW_FIELDS
        .iter()
        .map(|(name, _, _)| image.push_str(name))
        .collect();

    // Frame definition descriptors, stride 12.
    image.align(4);
    let main_desc = image.offset();
    for (i, (_, signed, unit)) in MAIN_FIELDS.iter().enumerate() {
        image.push_descriptor(main_names[i], *signed, *unit);
    }
    let slow_desc = image.offset();
    for (i, (_, signed, unit)) in SLOW_FIELDS.iter().enumerate() {
        image.push_descriptor(slow_names[i], *signed, *unit);
    }

    // Frame definition records: (len, ptr).
    let main_rec = image.push_pair(MAIN_FIELDS.len() as u32, main_desc);
    let slow_rec = image.push_pair(SLOW_FIELDS.len() as u32, slow_desc);
    let gps_rec = image.push_pair(0, 0);
    // Rewritten at runtime for filtered parsers.
    let dyn_rec = image.push_pair(0, 0);

    // String slices and unknown-header pairs.
    let disabled_slice = image.offset();
    for (len, ptr) in &disabled {
        image.push_pair(*len, *ptr);
    }
    let features_slice = image.offset();
    for (len, ptr) in &features {
        image.push_pair(*len, *ptr);
    }
    let unknown_slice = image.offset();
    for ((klen, kptr), (vlen, vptr)) in &unknown {
        image.push_pair(*klen, *kptr);
        image.push_pair(*vlen, *vptr);
    }

    // Frame field arrays.
    let main_values = image.offset();
    image.push_u32(100);
    image.push_u32(0xFFFF_FFFF);
    image.push_u32(7);
    let slow_values = image.offset();
    image.push_u32(2);

    // Event sequence, stride 24: kind byte, padding to 8, payload.
    let reported_main_len = if options.main_field_count_mismatch {
        MAIN_FIELDS.len() as u32 - 1
    } else {
        MAIN_FIELDS.len() as u32
    };
    let second_kind = if options.bad_event_kind { 9 } else { 2 };

    image.align(8);
    let events_base = image.offset();
    image.push_event(1, &[]);
    image.push_event(second_kind, &main_payload(MAIN_TIME, reported_main_len, main_values));
    image.push_event(3, &pair_bytes(1, slow_values));
    image.push_event(4, &main_payload(GPS_TIME, 0, 0));
    image.push_event(0, &[]);
    let n_events = 5u32;

    image.align(8);
    let event_area = image.offset();
    image.push_zeros(EVENT_STRIDE as usize);

    image.align(8);
    let arena = image.offset();
    image.push_zeros(256);

    image.align(8);
    let heap_base = image.offset();

    let data_alloc_body = if options.alloc_fails {
        "    (i32.const 0)".to_owned()
    } else {
        "    (local $ptr i32)\n\
         \x20   (local.set $ptr (global.get $heap))\n\
         \x20   (global.set $heap (i32.and (i32.add (i32.add (global.get $heap) (local.get $len)) (i32.const 7)) (i32.const -8)))\n\
         \x20   (local.get $ptr)"
            .to_owned()
    };

    let throw_clause = match options.throw_on_headers {
        Some(index) => format!(
            "    (if (i32.eq (local.get $log) (i32.const {index}))\n\
             \x20     (then (call $throw (i32.const {len}) (i32.const {ptr})) unreachable))\n",
            len = err_msg.0,
            ptr = err_msg.1,
        ),
        None => String::new(),
    };

    let firmware_kind_body = if options.bad_firmware_kind {
        "    (i32.const 7)".to_owned()
    } else {
        format!(
            "    (if (result i32) (i32.eq (local.get $h) (i32.const {HEADERS_BASE}))\n\
             \x20     (then (i32.const 0))\n\
             \x20     (else (i32.const 1)))"
        )
    };

    format!(
        r#"(module
  (import "main" "panic" (func $panic (param i32 i32)))
  (import "main" "throw" (func $throw (param i32 i32)))
  (memory (export "memory") 2)
  (data (i32.const 0) "{data}")

  (global $heap (mut i32) (i32.const {heap_base}))
  (global $cursor (mut i32) (i32.const 0))
  (global $c_event (mut i32) (i32.const 0))
  (global $c_main (mut i32) (i32.const 0))
  (global $c_slow (mut i32) (i32.const 0))
  (global $c_gps (mut i32) (i32.const 0))
  (global $fwrev_seen (mut i32) (i32.const 0))
  (global $file_freed (mut i32) (i32.const 0))
  (global $filtered (mut i32) (i32.const 0))
  (global $main_pushes (mut i32) (i32.const 0))

  (func (export "data_alloc") (param $len i32) (result i32)
{data_alloc_body})

  (func (export "slice8_free") (param $len i32) (param $ptr i32))
  (func (export "sliceStr_free") (param $len i32) (param $ptr i32))
  (func (export "unknownHeaders_free") (param $len i32) (param $ptr i32))
  (func (export "frameDef_free") (param $rec i32))

  (func (export "file_new") (param $ptr i32) (param $len i32) (result i32)
    (i32.const {FILE_HANDLE}))

  (func (export "file_free") (param $f i32)
    (if (global.get $file_freed) (then unreachable))
    (global.set $file_freed (i32.const 1)))

  (func (export "file_logCount") (param $f i32) (result i32)
    (i32.const {LOG_COUNT}))

  (func (export "file_getHeaders") (param $f i32) (param $log i32) (result i32)
{throw_clause}    (i32.add (i32.const {HEADERS_BASE}) (local.get $log)))

  (func (export "headers_free") (param $h i32))
  (func (export "data_free") (param $p i32))

  (func (export "headers_mainDef") (param $h i32) (result i32) (i32.const {main_rec}))
  (func (export "headers_slowDef") (param $h i32) (result i32) (i32.const {slow_rec}))
  (func (export "headers_gpsDef") (param $h i32) (result i32) (i32.const {gps_rec}))

  (func (export "headers_firmwareRevision") (param $h i32) (result i32 i32)
    (local $bit i32)
    (local.set $bit (i32.shl (i32.const 1) (i32.and (i32.sub (local.get $h) (i32.const {HEADERS_BASE})) (i32.const 31))))
    (if (i32.and (global.get $fwrev_seen) (local.get $bit))
      (then (return (i32.const {stale_len}) (i32.const {stale_ptr}))))
    (global.set $fwrev_seen (i32.or (global.get $fwrev_seen) (local.get $bit)))
    (i32.const {rev_len}) (i32.const {rev_ptr}))

  (func (export "headers_firmwareKind") (param $h i32) (result i32)
{firmware_kind_body})

  (func (export "headers_firmwareDate") (param $h i32)
      (result i32 i32 i32 i32 i32 i32 i32 i32)
    (if (result i32 i32 i32 i32 i32 i32 i32 i32)
        (i32.eq (local.get $h) (i32.const {HEADERS_BASE}))
      (then (i32.const 1) (i32.const {d_year}) (i32.const {d_month}) (i32.const {d_day})
            (i32.const {d_hour}) (i32.const {d_minute}) (i32.const {d_second}) (i32.const {d_milli}))
      (else (i32.const 2) (i32.const {raw_date_len}) (i32.const {raw_date_ptr})
            (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0))))

  (func (export "headers_firmwareVersion") (param $h i32) (result i32 i32 i32)
    (i32.const 4) (i32.const 3) (i32.const 0))

  (func (export "headers_boardInfo") (param $h i32) (result i32 i32)
    (if (result i32 i32) (i32.eq (local.get $h) (i32.const {HEADERS_BASE}))
      (then (i32.const {board_len}) (i32.const {board_ptr}))
      (else (i32.const 0) (i32.const 0))))

  (func (export "headers_craftName") (param $h i32) (result i32 i32)
    (if (result i32 i32) (i32.eq (local.get $h) (i32.const {HEADERS_BASE}))
      (then (i32.const 0) (i32.const 0))
      (else (i32.const {craft_len}) (i32.const {craft_ptr}))))

  (func (export "headers_debugMode") (param $h i32) (result i32 i32)
    (i32.const {debug_len}) (i32.const {debug_ptr}))

  (func (export "headers_pwmProtocol") (param $h i32) (result i32 i32)
    (i32.const {pwm_len}) (i32.const {pwm_ptr}))

  (func (export "headers_disabledFields") (param $h i32) (result i32 i32)
    (i32.const 2) (i32.const {disabled_slice}))

  (func (export "headers_features") (param $h i32) (result i32 i32)
    (i32.const 2) (i32.const {features_slice}))

  (func (export "headers_unknown") (param $h i32) (result i32 i32)
    (i32.const 2) (i32.const {unknown_slice}))

  (func (export "filter_new") (param $size i32) (param $m i32) (param $s i32) (param $g i32)
      (result i32 i32)
    (global.set $main_pushes (i32.const 0))
    (i32.const {BUILDER_HANDLE}) (i32.const {arena}))

  (func (export "filter_main") (param $b i32) (param $len i32) (param $ptr i32)
    (global.set $main_pushes (i32.add (global.get $main_pushes) (i32.const 1))))
  (func (export "filter_slow") (param $b i32) (param $len i32) (param $ptr i32))
  (func (export "filter_gps") (param $b i32) (param $len i32) (param $ptr i32))

  (func (export "data_new") (param $h i32) (param $filter i32) (result i32 i32)
    (global.set $filtered (i32.ne (local.get $filter) (i32.const 0)))
    (global.set $cursor (i32.const 0))
    (global.set $c_event (i32.const 0))
    (global.set $c_main (i32.const 0))
    (global.set $c_slow (i32.const 0))
    (global.set $c_gps (i32.const 0))
    (i32.const {DATA_HANDLE}) (i32.const {event_area}))

  (func (export "data_mainDef") (param $p i32) (result i32)
    (if (global.get $filtered)
      (then
        (i32.store (i32.const {dyn_rec}) (global.get $main_pushes))
        (i32.store (i32.const {dyn_rec_hi}) (i32.const {main_desc}))
        (return (i32.const {dyn_rec}))))
    (i32.const {main_rec}))

  (func (export "data_slowDef") (param $p i32) (result i32) (i32.const {slow_rec}))
  (func (export "data_gpsDef") (param $p i32) (result i32) (i32.const {gps_rec}))

  (func (export "data_next") (param $p i32)
    (local $kind i32)
    (if (i32.ge_u (global.get $cursor) (i32.const {n_events})) (then unreachable))
    (memory.copy (i32.const {event_area})
      (i32.add (i32.const {events_base}) (i32.mul (global.get $cursor) (i32.const {EVENT_STRIDE})))
      (i32.const {EVENT_STRIDE}))
    (global.set $cursor (i32.add (global.get $cursor) (i32.const 1)))
    (local.set $kind (i32.load8_u (i32.const {event_area})))
    (if (i32.eq (local.get $kind) (i32.const 1))
      (then (global.set $c_event (i32.add (global.get $c_event) (i32.const 1)))))
    (if (i32.eq (local.get $kind) (i32.const 2))
      (then (global.set $c_main (i32.add (global.get $c_main) (i32.const 1)))))
    (if (i32.eq (local.get $kind) (i32.const 3))
      (then (global.set $c_slow (i32.add (global.get $c_slow) (i32.const 1)))))
    (if (i32.eq (local.get $kind) (i32.const 4))
      (then (global.set $c_gps (i32.add (global.get $c_gps) (i32.const 1))))))

  (func (export "data_stats") (param $p i32) (result i32 i32 i32 i32 i32 f32)
    (global.get $c_event) (global.get $c_main) (global.get $c_slow) (global.get $c_gps)
    (i32.const 0)
    (f32.div (f32.convert_i32_u (global.get $cursor)) (f32.const {n_events})))
)
"#,
        data = image.escaped(),
        rev_len = rev.0,
        rev_ptr = rev.1,
        stale_len = stale.0,
        stale_ptr = stale.1,
        board_len = board.0,
        board_ptr = board.1,
        craft_len = craft.0,
        craft_ptr = craft.1,
        debug_len = debug.0,
        debug_ptr = debug.1,
        pwm_len = pwm.0,
        pwm_ptr = pwm.1,
        raw_date_len = raw_date.0,
        raw_date_ptr = raw_date.1,
        d_year = FIRMWARE_DATE.0,
        d_month = FIRMWARE_DATE.1,
        d_day = FIRMWARE_DATE.2,
        d_hour = FIRMWARE_DATE.3,
        d_minute = FIRMWARE_DATE.4,
        d_second = FIRMWARE_DATE.5,
        d_milli = FIRMWARE_DATE.6,
        dyn_rec_hi = dyn_rec + 4,
    )
}

fn main_payload(time: f64, len: u32, ptr: u32) -> Vec<u8> {
    let mut payload = time.to_le_bytes().to_vec();
    payload.extend_from_slice(&pair_bytes(len, ptr));
    payload
}

fn pair_bytes(len: u32, ptr: u32) -> Vec<u8> {
    let mut bytes = len.to_le_bytes().to_vec();
    bytes.extend_from_slice(&ptr.to_le_bytes());
    bytes
}

/// Little helper assembling the memory image and handing out offsets.
struct Image {
    bytes: Vec<u8>,
}

impl Image {
    fn new() -> Self {
        // Keep offset 0 unused so a zero pointer always means "absent".
        Self { bytes: vec![0; 16] }
    }

    fn offset(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn align(&mut self, to: usize) {
        while self.bytes.len() % to != 0 {
            self.bytes.push(0);
        }
    }

    fn push_zeros(&mut self, count: usize) {
        self.bytes.extend(std::iter::repeat(0).take(count));
    }

    fn push_u32(&mut self, value: u32) -> u32 {
        let offset = self.offset();
        self.bytes.extend_from_slice(&value.to_le_bytes());
        offset
    }

    /// Append a string, returning its `(len, ptr)` record.
    fn push_str(&mut self, s: &str) -> (u32, u32) {
        let offset = self.offset();
        self.bytes.extend_from_slice(s.as_bytes());
        (s.len() as u32, offset)
    }

    /// Append a `(len, ptr)` pair, returning its offset.
    fn push_pair(&mut self, len: u32, ptr: u32) -> u32 {
        let offset = self.push_u32(len);
        self.push_u32(ptr);
        offset
    }

    /// Append one field descriptor (stride 12).
    fn push_descriptor(&mut self, name: (u32, u32), signed: bool, unit: u8) {
        self.push_u32(name.0);
        self.push_u32(name.1);
        self.bytes.push(signed as u8);
        self.bytes.push(unit);
        self.bytes.extend_from_slice(&[0, 0]);
    }

    /// Append one event record (stride 24): kind byte, padding to 8,
    /// payload, zero fill.
    fn push_event(&mut self, kind: u8, payload: &[u8]) {
        debug_assert!(payload.len() <= 16);
        self.bytes.push(kind);
        self.push_zeros(7);
        self.bytes.extend_from_slice(payload);
        self.push_zeros(16 - payload.len());
    }

    /// The image as a WAT data-segment string literal.
    fn escaped(&self) -> String {
        let mut out = String::with_capacity(self.bytes.len() * 3);
        for &byte in &self.bytes {
            match byte {
                b'"' | b'\\' => {
                    out.push('\\');
                    out.push(byte as char);
                }
                0x20..=0x7e => out.push(byte as char),
                _ => out.push_str(&format!("\\{byte:02x}")),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_alignment_and_offsets() {
        let mut image = Image::new();
        let (len, ptr) = image.push_str("abc");
        assert_eq!((len, ptr), (3, 16));
        image.align(4);
        assert_eq!(image.offset() % 4, 0);
        let pair = image.push_pair(7, 9);
        assert_eq!(image.offset(), pair + 8);
    }

    #[test]
    fn wat_mentions_every_export() {
        let wat = default_stub_wat();
        for export in [
            "data_alloc",
            "sliceStr_free",
            "file_new",
            "file_logCount",
            "file_getHeaders",
            "headers_firmwareDate",
            "frameDef_free",
            "filter_new",
            "data_new",
            "data_next",
            "data_stats",
        ] {
            assert!(wat.contains(export), "missing export {export}");
        }
    }
}
