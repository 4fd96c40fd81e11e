/// zcp – multi-threaded block-parallel file compressor.
///
///   zcp file.txt                 → compress to file.txt.lz4
///   zcp -d file.txt.lz4          → decompress to file.txt
///   zcp -l 9 -p 8 file.txt out   → high compression, 8 workers
///   zcp -b 256K file.txt         → 256 KiB blocks
///   zcp -t none file.txt         → plain copy (passthrough codec)
use std::env;
use std::fs;
use std::io::{self, Write};
use std::process::{self, ExitCode};

use zcp::{detect_format, Format, ZFile, DEFAULT_BLOCK_SIZE, DEFAULT_LEVEL};

/// CLI default: worker count when -p is not given.
const CLI_THREADS: usize = 8;

fn usage() {
    eprintln!("zcp - multi-thread compression tool");
    eprintln!();
    eprintln!("Usage: zcp [OPTIONS] INPUT [OUTPUT]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -d, --unzip          Decompress mode");
    eprintln!("  -t, --type T         Compression type: lz4 (default), none");
    eprintln!("  -l, --level N        Compression level: 1 low .. 12 high");
    eprintln!("  -p, --threads N      Number of threads (0=auto, default {CLI_THREADS})");
    eprintln!("  -b, --block-size S   Block size in bytes, KiB (xxxK) or MiB (xxxM)");
    eprintln!("  -h, --help           Show this help");
    eprintln!();
    eprintln!("Without OUTPUT, compression appends the type extension and");
    eprintln!("decompression strips the last extension of INPUT.");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompressType {
    Lz4,
    Copy,
}

impl CompressType {
    fn extension(self) -> &'static str {
        match self {
            CompressType::Lz4 => ".lz4",
            CompressType::Copy => ".cpy",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            CompressType::Lz4 => "lz4",
            CompressType::Copy => "none",
        }
    }
}

#[derive(Debug)]
struct Opts {
    unzip: bool,
    ctype: Option<CompressType>,
    level: u32,
    threads: usize,
    block_size: usize,
    input: Option<String>,
    output: Option<String>,
}

/// Parse a block-size argument: plain bytes, or a K/M suffixed count.
fn parse_block_size(arg: &str) -> Option<usize> {
    let (digits, factor) = match arg.as_bytes().last()? {
        b'k' | b'K' => (&arg[..arg.len() - 1], 1024),
        b'm' | b'M' => (&arg[..arg.len() - 1], 1024 * 1024),
        _ => (arg, 1),
    };
    let n: usize = digits.parse().ok()?;
    n.checked_mul(factor)
}

fn parse_args() -> Opts {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut opts = Opts {
        unzip: false,
        ctype: None,
        level: DEFAULT_LEVEL,
        threads: CLI_THREADS,
        block_size: DEFAULT_BLOCK_SIZE,
        input: None,
        output: None,
    };

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        match arg.as_str() {
            "-d" | "--unzip" | "--decompress" => opts.unzip = true,
            "-h" | "--help" => {
                usage();
                process::exit(0);
            }
            "-t" | "--type" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("zcp: missing argument for -t");
                    process::exit(1);
                }
                opts.ctype = match args[i].as_str() {
                    "lz4" => Some(CompressType::Lz4),
                    "none" => Some(CompressType::Copy),
                    "lz4hc" | "snappy" | "zlib" | "zstd" => {
                        eprintln!("zcp: type '{}' not implemented", args[i]);
                        process::exit(1);
                    }
                    other => {
                        eprintln!("zcp: unknown compression type '{other}'");
                        process::exit(1);
                    }
                };
            }
            "-l" | "--level" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("zcp: missing argument for -l");
                    process::exit(1);
                }
                opts.level = match args[i].parse() {
                    Ok(n) => n,
                    Err(_) => {
                        eprintln!("zcp: invalid level '{}'", args[i]);
                        process::exit(1);
                    }
                };
            }
            "-p" | "--threads" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("zcp: missing argument for -p");
                    process::exit(1);
                }
                opts.threads = match args[i].parse() {
                    Ok(n) => n,
                    Err(_) => {
                        eprintln!("zcp: invalid thread count '{}'", args[i]);
                        process::exit(1);
                    }
                };
            }
            "-b" | "--block-size" | "--bloc-size" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("zcp: missing argument for -b");
                    process::exit(1);
                }
                opts.block_size = match parse_block_size(&args[i]) {
                    Some(n) if n > 0 => n,
                    _ => {
                        eprintln!("zcp: invalid block size '{}'", args[i]);
                        process::exit(1);
                    }
                };
            }
            s if s.starts_with('-') => {
                eprintln!("zcp: unknown option '{s}'");
                process::exit(1);
            }
            _ => {
                if opts.input.is_none() {
                    opts.input = Some(arg.clone());
                } else if opts.output.is_none() {
                    opts.output = Some(arg.clone());
                } else {
                    eprintln!("zcp: unexpected argument '{arg}'");
                    process::exit(1);
                }
            }
        }
        i += 1;
    }

    opts
}

/// Derive the output path when none is given.
fn default_output(input: &str, unzip: bool, ctype: CompressType) -> Result<String, String> {
    if !unzip {
        return Ok(format!("{input}{}", ctype.extension()));
    }
    match input.rfind('.') {
        Some(dot) if dot > 0 => Ok(input[..dot].to_string()),
        _ => Err("output file must be set (no extension detected)".to_string()),
    }
}

/// Copy the whole stream from `zfin` to `zfout` with a progress line.
fn pump(
    zfin: &mut ZFile,
    zfout: &mut ZFile,
    chunk_size: usize,
    total: u64,
) -> Result<(), String> {
    let mut buffer = vec![0u8; chunk_size];
    let mut done: u64 = 0;
    let mut last_percent = -1i32;

    while !zfin.eof() {
        let n = zfin
            .read(&mut buffer)
            .map_err(|e| format!("error reading input file: {e}"))?;
        if n == 0 {
            break;
        }
        done += n as u64;
        zfout
            .write(&buffer[..n])
            .map_err(|e| format!("error writing output file: {e}"))?;

        if total > 0 {
            let percent = (done as f64 * 100.0 / total as f64) as i32;
            if percent != last_percent {
                print!(
                    "  > progress: {} MB / {} MB ({percent:2} %)\r",
                    done / 1024 / 1024,
                    total / 1024 / 1024
                );
                let _ = io::stdout().flush();
                last_percent = percent;
            }
        }
    }
    if last_percent >= 0 {
        println!();
    }
    Ok(())
}

fn run() -> Result<(), String> {
    let opts = parse_args();
    let input = match &opts.input {
        Some(input) => input.clone(),
        None => {
            usage();
            return Err("no input file provided".to_string());
        }
    };

    // Decompression without -t probes the file; compression defaults to lz4.
    let ctype = match (opts.ctype, opts.unzip) {
        (Some(t), _) => t,
        (None, false) => CompressType::Lz4,
        (None, true) => match detect_format(&input) {
            Format::Lz4 => CompressType::Lz4,
            Format::None => CompressType::Copy,
        },
    };
    let output = match &opts.output {
        Some(output) => output.clone(),
        None => default_output(&input, opts.unzip, ctype)?,
    };

    println!("arguments [{}]:", if opts.unzip { "unzip" } else { "zip" });
    println!("  > input file  : {input}");
    println!("  > output file : {output}");
    println!("  > type        : {}", ctype.as_str());
    if !opts.unzip {
        println!("  > level       : {}", opts.level);
        println!("  > threads     : {}", opts.threads);
        println!("  > block size  : {} bytes", opts.block_size);
    }
    println!();

    let total = fs::metadata(&input).map(|m| m.len()).unwrap_or(0);

    let mut zfin = if opts.unzip && ctype == CompressType::Lz4 {
        ZFile::open_read(&input)
    } else {
        ZFile::open_raw_read(&input)
    }
    .map_err(|e| format!("error opening input file '{input}': {e}"))?;

    let mut zfout = if !opts.unzip && ctype == CompressType::Lz4 {
        ZFile::open_write(&output, opts.level, opts.block_size, opts.threads)
    } else {
        ZFile::open_raw_write(&output)
    }
    .map_err(|e| format!("error opening output file '{output}': {e}"))?;

    pump(&mut zfin, &mut zfout, opts.block_size, total)?;

    zfin.close().map_err(|e| format!("error closing input file: {e}"))?;
    zfout
        .close()
        .map_err(|e| format!("error closing output file: {e}"))?;

    let ratio = if opts.unzip { zfin.ratio() } else { zfout.ratio() };
    println!("  > compress ratio : {ratio:2.2} %");

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("zcp: {e}");
            ExitCode::FAILURE
        }
    }
}
