//! Integration tests: write containers through a session, reopen them, and
//! check that every value comes back bit-identical with a verified checksum.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fbuf_codecs::{Lz4Codec, PassThroughCodec, ZstdCodec};
use fbuf_core::format::{HEADER_SIZE, MIN_BLOCK_SIZE};
use fbuf_core::{
    Checksum, ChecksumAlgo, Codec, CodecError, FbufError, Mode, Session, BLOCK_SIZE, SPILL_SIZE,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// Generate `len` deterministic bytes using a simple LCG.
fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

/// Generate `len` highly compressible bytes (repeating pattern).
fn compressible_bytes(len: usize) -> Vec<u8> {
    let pattern = b"entity work.counter port map (clk => clk, reset => rst); ";
    (0..len).map(|i| pattern[i % pattern.len()]).collect()
}

// ── helpers ───────────────────────────────────────────────────────────────

fn create(path: &Path, codec: Arc<dyn Codec>) -> Session {
    Session::create(path, ChecksumAlgo::Adler32, codec)
        .unwrap()
        .expect("output file should be creatable")
}

fn open(path: &Path, codec: Arc<dyn Codec>) -> Session {
    Session::open(path, ChecksumAlgo::Adler32, codec)
        .unwrap()
        .expect("container should exist")
}

fn adler(data: &[u8]) -> u32 {
    let mut cs = Checksum::new(ChecksumAlgo::Adler32);
    cs.update(data);
    cs.finish()
}

/// One value of every primitive kind.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Uint(u64),
    Int(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Double(u64),
    Raw(Vec<u8>),
}

fn mixed_values(count: usize, seed: u64) -> Vec<Value> {
    let mut rng = seed;
    let mut next = || {
        rng = rng
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        rng
    };
    (0..count)
        .map(|i| {
            let r = next();
            match i % 8 {
                0 => Value::Uint(r >> (r % 64)),
                1 => Value::Int((r as i64) >> (r % 64)),
                2 => Value::U8(r as u8),
                3 => Value::U16(r as u16),
                4 => Value::U32(r as u32),
                5 => Value::U64(r),
                6 => Value::Double(r),
                _ => Value::Raw(pseudo_random_bytes((r % 300) as usize, r)),
            }
        })
        .collect()
}

fn write_value(s: &mut Session, v: &Value) {
    match v {
        Value::Uint(x) => s.put_uint(*x),
        Value::Int(x) => s.put_int(*x),
        Value::U8(x) => s.write_u8(*x),
        Value::U16(x) => s.write_u16(*x),
        Value::U32(x) => s.write_u32(*x),
        Value::U64(x) => s.write_u64(*x),
        Value::Double(bits) => s.write_double(f64::from_bits(*bits)),
        Value::Raw(bytes) => s.write_raw(bytes),
    }
    .unwrap();
}

fn read_like(s: &mut Session, v: &Value) -> Value {
    match v {
        Value::Uint(_) => Value::Uint(s.get_uint().unwrap()),
        Value::Int(_) => Value::Int(s.get_int().unwrap()),
        Value::U8(_) => Value::U8(s.read_u8().unwrap()),
        Value::U16(_) => Value::U16(s.read_u16().unwrap()),
        Value::U32(_) => Value::U32(s.read_u32().unwrap()),
        Value::U64(_) => Value::U64(s.read_u64().unwrap()),
        Value::Double(_) => Value::Double(s.read_double().unwrap().to_bits()),
        Value::Raw(bytes) => {
            let mut buf = vec![0u8; bytes.len()];
            s.read_raw(&mut buf).unwrap();
            Value::Raw(buf)
        }
    }
}

fn round_trip_raw(dir: &TempDir, name: &str, data: &[u8], codec: Arc<dyn Codec>) {
    let path = dir.path().join(name);

    let mut w = create(&path, codec.clone());
    w.write_raw(data).unwrap();
    let written = w.close().unwrap();

    let mut r = open(&path, codec);
    let mut back = vec![0u8; data.len()];
    r.read_raw(&mut back).unwrap();
    assert_eq!(back.as_slice(), data, "{name}: payload differs");
    assert_eq!(r.close().unwrap(), written, "{name}: checksum differs");
}

// ── tests ──────────────────────────────────────────────────────────────────

#[test]
fn test_roundtrip_boundary_sizes() {
    let dir = TempDir::new().unwrap();
    let sizes = [
        0,
        1,
        MIN_BLOCK_SIZE - 1,
        BLOCK_SIZE - 1,
        BLOCK_SIZE,
        BLOCK_SIZE + 1,
        SPILL_SIZE - 1,
        SPILL_SIZE,
        3 * SPILL_SIZE + 17,
    ];
    for size in sizes {
        let data = pseudo_random_bytes(size, size as u64);
        round_trip_raw(&dir, &format!("lz4_{size}"), &data, Arc::new(Lz4Codec));
        round_trip_raw(&dir, &format!("zstd_{size}"), &data, Arc::new(ZstdCodec::default()));
        round_trip_raw(&dir, &format!("stored_{size}"), &data, Arc::new(PassThroughCodec));
    }
}

#[test]
fn test_roundtrip_mixed_primitives() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mixed.fbuf");
    // enough values to span several blocks
    let values = mixed_values(40_000, 0xDEAD_BEEF);

    let mut w = create(&path, Arc::new(Lz4Codec));
    for v in &values {
        write_value(&mut w, v);
    }
    let written = w.close().unwrap();

    let mut r = open(&path, Arc::new(Lz4Codec));
    assert!(r.len() > 2 * SPILL_SIZE);
    for v in &values {
        assert_eq!(&read_like(&mut r, v), v);
    }
    assert_eq!(r.close().unwrap(), written);
}

#[test]
fn test_unsigned_example_sequence() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("uints.fbuf");
    let values = [0u64, 127, 128, 300, 1 << 63];

    let mut w = create(&path, Arc::new(Lz4Codec));
    for v in values {
        w.put_uint(v).unwrap();
    }
    w.close().unwrap();

    let mut r = open(&path, Arc::new(Lz4Codec));
    let back: Vec<u64> = (0..values.len()).map(|_| r.get_uint().unwrap()).collect();
    assert_eq!(back, values);
    r.close().unwrap();
}

#[test]
fn test_special_doubles_are_bit_exact() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("doubles.fbuf");
    let values = [
        0.0,
        -0.0,
        f64::INFINITY,
        f64::NEG_INFINITY,
        f64::MIN_POSITIVE,
        f64::from_bits(0x7ff8_0000_dead_beef),
        f64::from_bits(0xfff0_0000_0000_0001),
    ];

    let mut w = create(&path, Arc::new(Lz4Codec));
    for v in values {
        w.write_double(v).unwrap();
    }
    w.close().unwrap();

    let mut r = open(&path, Arc::new(Lz4Codec));
    for v in values {
        assert_eq!(r.read_double().unwrap().to_bits(), v.to_bits());
    }
    r.close().unwrap();
}

#[test]
fn test_header_records_length_and_checksum() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("header.fbuf");
    let data = compressible_bytes(BLOCK_SIZE * 2 + 5000);

    let mut w = create(&path, Arc::new(ZstdCodec::default()));
    w.write_raw(&data).unwrap();
    let checksum = w.close().unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..4], b"FBUF");
    assert_eq!(bytes[4], b'Z');
    assert_eq!(bytes[5], b'A');
    assert_eq!(&bytes[6..8], &[0, 0]);
    assert_eq!(&bytes[8..12], &(data.len() as u32).to_be_bytes());
    assert_eq!(&bytes[12..16], &checksum.to_be_bytes());
    assert_eq!(checksum, adler(&data));
    assert!(bytes.len() < data.len() / 4, "compressible data should shrink");
}

/// The digest covers logical bytes, so it cannot depend on how writes were
/// sliced or where blocks were cut.
#[test]
fn test_checksum_independent_of_write_granularity() {
    let dir = TempDir::new().unwrap();
    let data = pseudo_random_bytes(BLOCK_SIZE * 2 + 333, 7);

    let bulk = dir.path().join("bulk.fbuf");
    let mut w = create(&bulk, Arc::new(Lz4Codec));
    w.write_raw(&data).unwrap();
    let bulk_cs = w.close().unwrap();

    let bytewise = dir.path().join("bytewise.fbuf");
    let mut w = create(&bytewise, Arc::new(PassThroughCodec));
    for chunk in data.chunks(97) {
        for &b in chunk {
            w.write_u8(b).unwrap();
        }
    }
    let bytewise_cs = w.close().unwrap();

    assert_eq!(bulk_cs, bytewise_cs);
    assert_eq!(bulk_cs, adler(&data));
}

#[test]
fn test_empty_container() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.fbuf");

    let w = create(&path, Arc::new(Lz4Codec));
    let cs = w.close().unwrap();
    assert_eq!(cs, adler(b""));
    assert_eq!(std::fs::metadata(&path).unwrap().len(), HEADER_SIZE as u64);

    let mut r = open(&path, Arc::new(Lz4Codec));
    assert!(r.is_empty());
    assert!(matches!(r.read_u8(), Err(FbufError::ReadPastEnd { .. })));
    assert_eq!(r.close().unwrap(), cs);
}

#[test]
fn test_checksum_none() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nocheck.fbuf");

    let mut w = Session::create(&path, ChecksumAlgo::None, Arc::new(Lz4Codec))
        .unwrap()
        .unwrap();
    w.put_int(-42).unwrap();
    assert_eq!(w.close().unwrap(), 0);

    let mut r = Session::open(&path, ChecksumAlgo::None, Arc::new(Lz4Codec))
        .unwrap()
        .unwrap();
    assert_eq!(r.checksum_algo(), ChecksumAlgo::None);
    assert_eq!(r.get_int().unwrap(), -42);
    assert_eq!(r.close().unwrap(), 0);
}

#[test]
fn test_missing_file_is_not_an_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("does-not-exist.fbuf");
    let result = Session::open(&missing, ChecksumAlgo::Adler32, Arc::new(Lz4Codec)).unwrap();
    assert!(result.is_none());

    let unwritable: PathBuf = dir.path().join("no-such-dir").join("out.fbuf");
    let result = Session::create(&unwritable, ChecksumAlgo::Adler32, Arc::new(Lz4Codec)).unwrap();
    assert!(result.is_none());
}

#[test]
fn test_codec_mismatch_is_incompatible() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("zstd.fbuf");

    let mut w = create(&path, Arc::new(ZstdCodec::default()));
    w.write_raw(b"hello world test data for codec mismatch").unwrap();
    w.close().unwrap();

    let err = Session::open(&path, ChecksumAlgo::Adler32, Arc::new(Lz4Codec)).unwrap_err();
    assert!(matches!(err, FbufError::Incompatible { .. }), "{err}");
    assert!(err.to_string().contains("compression algorithm"));
    assert_eq!(err.name(), path.display().to_string());

    let err = Session::open(&path, ChecksumAlgo::None, Arc::new(ZstdCodec::default())).unwrap_err();
    assert!(err.to_string().contains("checksum algorithm"), "{err}");
}

#[test]
fn test_foreign_file_is_incompatible() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("foreign.bin");
    std::fs::write(&path, b"NOTFBUF-at-all-and-longer-than-a-header").unwrap();
    let err = Session::open(&path, ChecksumAlgo::Adler32, Arc::new(Lz4Codec)).unwrap_err();
    assert!(matches!(err, FbufError::Incompatible { .. }));

    let short = dir.path().join("short.bin");
    std::fs::write(&short, b"FBUF").unwrap();
    let err = Session::open(&short, ChecksumAlgo::Adler32, Arc::new(Lz4Codec)).unwrap_err();
    assert!(matches!(err, FbufError::Corrupt { .. }), "{err}");
}

/// Flipping a byte inside a stored block must surface as an error, either
/// while decompressing or when the checksum is verified at close.
#[test]
fn test_corruption_is_detected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pristine.fbuf");
    let data = pseudo_random_bytes(10_000, 0x1234_5678);

    let mut w = create(&path, Arc::new(Lz4Codec));
    w.write_raw(&data).unwrap();
    w.close().unwrap();
    let pristine = std::fs::read(&path).unwrap();

    let first_data = HEADER_SIZE + 4;
    for offset in [first_data, first_data + 1, first_data + 500, first_data + 4321, pristine.len() - 1] {
        let mut damaged = pristine.clone();
        damaged[offset] ^= 0x55;
        let bad = dir.path().join(format!("damaged_{offset}.fbuf"));
        std::fs::write(&bad, &damaged).unwrap();

        match Session::open(&bad, ChecksumAlgo::Adler32, Arc::new(Lz4Codec)) {
            Err(_) => {}
            Ok(Some(mut r)) => {
                let mut back = vec![0u8; data.len()];
                r.read_raw(&mut back).unwrap();
                assert_ne!(back, data, "offset {offset}: flip had no effect");
                let err = r.close().unwrap_err();
                assert!(
                    matches!(err, FbufError::ChecksumMismatch { .. }),
                    "offset {offset}: {err}"
                );
            }
            Ok(None) => panic!("damaged file vanished"),
        }
    }
}

#[test]
fn test_oversized_block_prefix_is_corrupt() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("prefix.fbuf");

    let mut w = create(&path, Arc::new(Lz4Codec));
    w.write_raw(&compressible_bytes(1000)).unwrap();
    w.close().unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    bytes[HEADER_SIZE..HEADER_SIZE + 4].copy_from_slice(&(SPILL_SIZE as u32 + 1).to_be_bytes());
    std::fs::write(&path, &bytes).unwrap();

    let err = Session::open(&path, ChecksumAlgo::Adler32, Arc::new(Lz4Codec)).unwrap_err();
    assert!(matches!(err, FbufError::Corrupt { .. }), "{err}");
}

#[test]
fn test_reads_stop_at_payload_end() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bounds.fbuf");

    let mut w = create(&path, Arc::new(Lz4Codec));
    w.write_raw(&[9u8; 40]).unwrap();
    w.close().unwrap();

    let mut r = open(&path, Arc::new(Lz4Codec));
    assert_eq!(r.len(), 40);
    let mut buf = [0u8; 36];
    r.read_raw(&mut buf).unwrap();

    let err = r.read_u64().unwrap_err();
    match err {
        FbufError::ReadPastEnd {
            position,
            wanted,
            len,
            ..
        } => assert_eq!((position, wanted, len), (36, 8, 40)),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(r.position(), 36, "failed read must not move the cursor");
    assert_eq!(r.read_u32().unwrap(), 0x0909_0909);
    assert_eq!(r.remaining(), 0);
    r.close().unwrap();
}

#[test]
fn test_operations_check_mode() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mode.fbuf");

    let mut w = create(&path, Arc::new(Lz4Codec));
    assert_eq!(w.mode(), Mode::Write);
    assert!(matches!(
        w.read_u8(),
        Err(FbufError::WrongMode {
            expected: Mode::Read,
            ..
        })
    ));
    w.write_u32(7).unwrap();
    w.close().unwrap();

    let mut r = open(&path, Arc::new(Lz4Codec));
    assert_eq!(r.mode(), Mode::Read);
    assert!(matches!(r.write_u8(1), Err(FbufError::WrongMode { .. })));
    assert_eq!(r.read_u32().unwrap(), 7);
    r.close().unwrap();
}

#[test]
fn test_session_name_is_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("named.fbuf");
    let w = create(&path, Arc::new(Lz4Codec));
    assert_eq!(w.name(), path.display().to_string());
    w.close().unwrap();
}

/// Writes a block and then fails, leaving the session to be dropped by `?`.
fn write_then_fail(path: &Path) -> fbuf_core::Result<()> {
    let mut w = create(path, Arc::new(Lz4Codec));
    w.write_raw(&pseudo_random_bytes(BLOCK_SIZE + 10, 3))?;
    assert!(path.exists());
    w.read_u8()?;
    w.close()?;
    Ok(())
}

#[test]
fn test_writer_dropped_on_error_removes_output() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("abandoned.fbuf");

    let err = write_then_fail(&path).unwrap_err();
    assert!(matches!(err, FbufError::WrongMode { .. }), "{err}");
    assert!(!path.exists(), "half-written container must not survive");
}

/// Refuses to compress anything.
struct BrokenCodec;

impl Codec for BrokenCodec {
    fn tag(&self) -> u8 {
        b'L'
    }

    fn name(&self) -> &'static str {
        "broken"
    }

    fn compress_block(&self, _raw: &[u8]) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::new("broken", "out of memory"))
    }

    fn decompress_block(&self, _compressed: &[u8], _out: &mut [u8]) -> Result<usize, CodecError> {
        Err(CodecError::new("broken", "out of memory"))
    }
}

#[test]
fn test_failed_close_removes_output() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("failed.fbuf");

    let mut w = create(&path, Arc::new(BrokenCodec));
    w.write_raw(b"stays pending until close").unwrap();
    assert!(path.exists());

    let err = w.close().unwrap_err();
    assert!(matches!(err, FbufError::Codec { .. }), "{err}");
    assert!(!path.exists(), "failed close must delete the output");
}

#[test]
fn test_dropped_reader_keeps_input() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("input.fbuf");

    let mut w = create(&path, Arc::new(Lz4Codec));
    w.put_uint(5).unwrap();
    w.close().unwrap();

    let r = open(&path, Arc::new(Lz4Codec));
    assert_eq!(r.verify().unwrap(), adler(&[5, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]));
    drop(r);
    assert!(path.exists());
}
