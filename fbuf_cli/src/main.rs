use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use fbuf_codecs::{codec_by_tag, Lz4Codec, PassThroughCodec, ZstdCodec};
use fbuf_core::format::{tag_display, HEADER_SIZE};
use fbuf_core::framer::scan_blocks;
use fbuf_core::{ChecksumAlgo, Codec, Header, Mode, Session, BLOCK_SIZE};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "fbuf",
    about = "Pack, unpack, inspect, and verify FBUF compressed containers",
    version
)]
struct Cli {
    /// Log more detail (repeat for trace output); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum CodecArg {
    Lz4,
    Zstd,
    None,
}

#[derive(Clone, Copy, ValueEnum)]
enum ChecksumArg {
    Adler32,
    None,
}

impl From<ChecksumArg> for ChecksumAlgo {
    fn from(arg: ChecksumArg) -> Self {
        match arg {
            ChecksumArg::Adler32 => ChecksumAlgo::Adler32,
            ChecksumArg::None => ChecksumAlgo::None,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file's bytes in an FBUF container
    Pack {
        /// Source file ("-" reads stdin)
        input: PathBuf,
        /// Destination container ("-" streams to stdout with a trailer)
        output: PathBuf,
        /// Block compressor
        #[arg(short, long, value_enum, default_value = "lz4", env = "FBUF_CODEC")]
        codec: CodecArg,
        /// Zstd compression level (only used with --codec zstd)
        #[arg(long, default_value_t = 3)]
        zstd_level: i32,
        /// Payload checksum
        #[arg(long, value_enum, default_value = "adler32", env = "FBUF_CHECKSUM")]
        checksum: ChecksumArg,
    },
    /// Restore the bytes stored by `pack`
    ///
    /// Nothing is written unless the payload checksum matches. A container
    /// streamed to a pipe keeps its length and checksum in a trailer, so it
    /// must also be read from a pipe: saved to a regular file (for example
    /// `fbuf pack in - | cat > out.fbuf`) it fails with a checksum mismatch.
    /// Pipe such files in instead: `cat out.fbuf | fbuf unpack - out`.
    Unpack {
        /// Source container ("-" reads stdin)
        input: PathBuf,
        /// Destination file ("-" writes to stdout)
        output: PathBuf,
        /// Expected block compressor (default: taken from the header, lz4 on stdin)
        #[arg(short, long, value_enum, env = "FBUF_CODEC")]
        codec: Option<CodecArg>,
        /// Expected payload checksum (default: taken from the header, adler32 on stdin)
        #[arg(long, value_enum, env = "FBUF_CHECKSUM")]
        checksum: Option<ChecksumArg>,
    },
    /// Print header fields and block statistics
    Inspect {
        /// Container to inspect
        file: PathBuf,
        /// Print per-block details
        #[arg(long)]
        blocks: bool,
    },
    /// Decompress a container and check its payload checksum
    ///
    /// Containers streamed to a pipe and later saved to a file only verify
    /// when piped back into `unpack -`.
    Verify {
        /// Container to verify
        file: PathBuf,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn make_codec(codec: CodecArg, zstd_level: i32) -> Arc<dyn Codec> {
    match codec {
        CodecArg::Lz4 => Arc::new(Lz4Codec),
        CodecArg::Zstd => Arc::new(ZstdCodec::new(zstd_level)),
        CodecArg::None => Arc::new(PassThroughCodec),
    }
}

fn is_stdio(path: &Path) -> bool {
    path.to_str() == Some("-")
}

/// A `File` owning a duplicate of stdin or stdout, so sessions can treat
/// the pipe like any other descriptor.
#[cfg(unix)]
fn stdio_file(mode: Mode) -> anyhow::Result<File> {
    use std::os::fd::AsFd;
    let fd = match mode {
        Mode::Read => io::stdin().as_fd().try_clone_to_owned()?,
        Mode::Write => io::stdout().as_fd().try_clone_to_owned()?,
    };
    Ok(File::from(fd))
}

#[cfg(not(unix))]
fn stdio_file(_mode: Mode) -> anyhow::Result<File> {
    bail!("reading or writing containers on stdio requires a unix platform")
}

/// Read the header without any compatibility check, to learn which codec
/// and checksum a container was written with.
fn peek_header(path: &Path) -> anyhow::Result<Header> {
    let mut f = File::open(path).with_context(|| format!("opening {path:?}"))?;
    let mut buf = [0u8; HEADER_SIZE];
    f.read_exact(&mut buf)
        .with_context(|| format!("reading header of {path:?}"))?;
    Ok(Header::from_bytes(&buf, &path.display().to_string())?)
}

fn algorithms_for(header: &Header) -> anyhow::Result<(Arc<dyn Codec>, ChecksumAlgo)> {
    let Some(codec) = codec_by_tag(header.compression) else {
        bail!("unknown compression algorithm {}", tag_display(header.compression));
    };
    let Some(algo) = ChecksumAlgo::from_tag(header.checksum) else {
        bail!("unknown checksum algorithm {}", tag_display(header.checksum));
    };
    Ok((codec, algo))
}

fn open_for_read(path: &Path) -> anyhow::Result<Session> {
    let header = peek_header(path)?;
    let (codec, algo) = algorithms_for(&header)?;
    open_with(path, codec, algo)
}

fn open_with(path: &Path, codec: Arc<dyn Codec>, algo: ChecksumAlgo) -> anyhow::Result<Session> {
    Session::open(path, algo, codec)?.with_context(|| format!("cannot open {path:?}"))
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

// ── Subcommand implementations ─────────────────────────────────────────────
//
// `pack` stores the input as length-prefixed chunks followed by a zero
// length, so `unpack` can reproduce it exactly even when the input came
// from a pipe of unknown length.

fn run_pack(
    input: PathBuf,
    output: PathBuf,
    codec: CodecArg,
    zstd_level: i32,
    checksum: ChecksumArg,
) -> anyhow::Result<()> {
    let codec = make_codec(codec, zstd_level);
    let codec_display = codec.name();
    let algo = ChecksumAlgo::from(checksum);

    let mut session = if is_stdio(&output) {
        Session::from_file(stdio_file(Mode::Write)?, "<stdout>", Mode::Write, algo, codec)?
    } else {
        Session::create(&output, algo, codec)?
            .with_context(|| format!("creating output file {:?}", output))?
    };

    let mut src: Box<dyn Read> = if is_stdio(&input) {
        Box::new(io::stdin().lock())
    } else {
        let file =
            File::open(&input).with_context(|| format!("opening input file {:?}", input))?;
        Box::new(BufReader::new(file))
    };

    let t0 = Instant::now();
    let mut buf = vec![0u8; BLOCK_SIZE];
    let mut bytes_read = 0u64;
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("reading input"),
        };
        session.put_uint(n as u64)?;
        session.write_raw(&buf[..n])?;
        bytes_read += n as u64;
    }
    session.put_uint(0)?;

    let name = session.name().to_string();
    let checksum = session.close()?;
    let elapsed = t0.elapsed();
    info!(file = %name, bytes = bytes_read, "packed");

    eprintln!("  codec       : {}", codec_display);
    eprintln!("  checksum    : {} {:08x}", algo.name(), checksum);
    eprintln!("  raw size    : {}", human_bytes(bytes_read));
    if !is_stdio(&output) {
        let compressed_size = std::fs::metadata(&output)?.len();
        eprintln!("  container   : {}", human_bytes(compressed_size));
        if compressed_size > 0 {
            eprintln!("  ratio       : {:.2}x", bytes_read as f64 / compressed_size as f64);
        }
    }
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_unpack(
    input: PathBuf,
    output: PathBuf,
    codec: Option<CodecArg>,
    checksum: Option<ChecksumArg>,
) -> anyhow::Result<()> {
    let mut session = if is_stdio(&input) {
        // The header cannot be peeked on a pipe; fall back to the defaults `pack` uses.
        let codec = make_codec(codec.unwrap_or(CodecArg::Lz4), 3);
        let algo = checksum.map_or(ChecksumAlgo::Adler32, ChecksumAlgo::from);
        let file = stdio_file(Mode::Read)?;
        Session::from_file(file, "<stdin>", Mode::Read, algo, codec)?
    } else if codec.is_none() && checksum.is_none() {
        open_for_read(&input)?
    } else {
        let (header_codec, header_algo) = algorithms_for(&peek_header(&input)?)?;
        let codec = codec.map_or(header_codec, |c| make_codec(c, 3));
        let algo = checksum.map_or(header_algo, ChecksumAlgo::from);
        open_with(&input, codec, algo)?
    };

    // The payload was checksummed at open; refuse it before writing anything.
    session.verify()?;

    let t0 = Instant::now();
    let total_raw = if is_stdio(&output) {
        extract_records(&mut session, &mut io::stdout().lock())?
    } else {
        let file =
            File::create(&output).with_context(|| format!("creating output file {:?}", output))?;
        let mut dst = BufWriter::new(file);
        match extract_records(&mut session, &mut dst) {
            Ok(n) => n,
            Err(e) => {
                drop(dst);
                let _ = std::fs::remove_file(&output);
                return Err(e);
            }
        }
    };

    let checksum = session.close()?;
    let elapsed = t0.elapsed();
    debug!(bytes = total_raw, "unpacked");

    eprintln!("  raw size    : {}", human_bytes(total_raw));
    eprintln!("  checksum    : {:08x} (verified)", checksum);
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

/// Copy `pack`'s chunk records to `dst` up to the zero terminator,
/// returning the number of bytes restored.
fn extract_records(session: &mut Session, dst: &mut dyn Write) -> anyhow::Result<u64> {
    let mut total = 0u64;
    let mut chunk = Vec::new();
    loop {
        let n = session.get_uint()?;
        if n == 0 {
            break;
        }
        if n > session.remaining() as u64 {
            bail!(
                "{}: record of {} bytes at offset {} runs past the payload end ({} bytes left)",
                session.name(),
                n,
                session.position(),
                session.remaining()
            );
        }
        chunk.resize(n as usize, 0);
        session.read_raw(&mut chunk)?;
        dst.write_all(&chunk)?;
        total += n;
    }
    dst.flush()?;
    Ok(total)
}

fn run_inspect(file: PathBuf, show_blocks: bool) -> anyhow::Result<()> {
    let header = peek_header(&file)?;
    let bytes = std::fs::read(&file).with_context(|| format!("reading {file:?}"))?;
    let blocks = scan_blocks(&bytes, &file.display().to_string())?;
    let compressed: u64 = blocks.iter().map(|b| u64::from(b.compressed_len)).sum();

    let codec_name = codec_by_tag(header.compression).map_or("unknown", |c| c.name());
    let checksum_name = ChecksumAlgo::from_tag(header.checksum).map_or("unknown", |a| a.name());

    println!("=== FBUF container: {:?} ===", file);
    println!();
    println!("  compression    : {} ({})", codec_name, tag_display(header.compression));
    println!("  checksum algo  : {} ({})", checksum_name, tag_display(header.checksum));
    println!("  payload length : {}", human_bytes(u64::from(header.length)));
    println!("  checksum       : {:08x}", header.checksum_value);
    println!("  block count    : {}", blocks.len());
    println!("  compressed     : {}", human_bytes(compressed));
    println!("  file on disk   : {}", human_bytes(bytes.len() as u64));
    if compressed > 0 {
        println!("  ratio          : {:.2}x", f64::from(header.length) / compressed as f64);
    }

    if show_blocks {
        println!();
        println!("  {:>8}  {:>14}  {:>12}", "block", "file offset", "compressed");
        println!("  {}", "-".repeat(38));
        for (i, b) in blocks.iter().enumerate() {
            println!(
                "  {:>8}  {:>14}  {:>12}",
                i,
                b.offset,
                human_bytes(u64::from(b.compressed_len))
            );
        }
    }

    Ok(())
}

fn run_verify(file: PathBuf) -> anyhow::Result<()> {
    let t0 = Instant::now();
    let session = open_for_read(&file)?;
    let len = session.len();
    let checksum = session.close()?;
    println!(
        "{:?}: ok ({}, checksum {:08x}, {:.3}s)",
        file,
        human_bytes(len as u64),
        checksum,
        t0.elapsed().as_secs_f64()
    );
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Pack {
            input,
            output,
            codec,
            zstd_level,
            checksum,
        } => run_pack(input, output, codec, zstd_level, checksum),
        Commands::Unpack {
            input,
            output,
            codec,
            checksum,
        } => run_unpack(input, output, codec, checksum),
        Commands::Inspect { file, blocks } => run_inspect(file, blocks),
        Commands::Verify { file } => run_verify(file),
    }
}
