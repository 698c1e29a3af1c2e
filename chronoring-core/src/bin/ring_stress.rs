//! Two-thread soak test for `AudioRingBuffer`.
//!
//! A writer thread streams a deterministic per-frame pattern into the ring
//! while a reader thread keeps fetching the newest window and checks every
//! frame it gets back. Frames inside the returned range must match the
//! pattern; frames outside it must be silence.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use chronoring::{
    config::{read_config, RingConfig},
    AudioRingBuffer, ChronoringError, DiagnosticsSnapshot,
};
use crossbeam_channel::{unbounded, Sender};
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    seconds: Option<f64>,
    capacity: Option<usize>,
    block: Option<usize>,
    channels: Option<u32>,
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct WriterReport {
    blocks: u64,
    frames: u64,
    end_time: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReaderReport {
    reads: u64,
    frames_checked: u64,
    corrupt_frames: u64,
    misses: u64,
}

enum Report {
    Writer(WriterReport),
    Reader(ReaderReport),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    config: RingConfig,
    elapsed_secs: f64,
    writer: WriterReport,
    reader: ReaderReport,
    diagnostics: DiagnosticsSnapshot,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chronoring=info,ring_stress=info")),
        )
        .init();

    match run() {
        Ok(0) => {}
        Ok(corrupt) => {
            error!(corrupt, "ring stress observed corrupt frames");
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("ring_stress failed: {e:#}");
            std::process::exit(1);
        }
    }
}

fn parse_args() -> anyhow::Result<Args> {
    fn value<T: std::str::FromStr>(flag: &str, raw: Option<String>) -> anyhow::Result<T> {
        let Some(raw) = raw else {
            bail!("missing value for {flag}");
        };
        raw.parse::<T>()
            .map_err(|_| anyhow::anyhow!("invalid value for {flag}: {raw}"))
    }

    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = Some(value("--config", it.next())?),
            "--seconds" => args.seconds = Some(value("--seconds", it.next())?),
            "--capacity" => args.capacity = Some(value("--capacity", it.next())?),
            "--block" => args.block = Some(value("--block", it.next())?),
            "--channels" => args.channels = Some(value("--channels", it.next())?),
            "--output" => args.output = Some(value("--output", it.next())?),
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run -p chronoring-core --release --bin ring_stress -- \\
  [--config <file.json>] [--seconds <n>] [--capacity <frames>] [--block <frames>] \\
  [--channels <n>] [--output <file.json>]"
                );
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

fn build_config(args: &Args) -> anyhow::Result<RingConfig> {
    let mut config = match args.config.as_deref() {
        Some(path) => read_config(path).with_context(|| format!("loading {}", path.display()))?,
        None => RingConfig::default(),
    };
    config.apply_env_overrides();

    if let Some(seconds) = args.seconds {
        config.duration_secs = seconds;
    }
    if let Some(capacity) = args.capacity {
        config.capacity_frames = capacity;
    }
    if let Some(block) = args.block {
        config.block_frames = block;
    }
    if let Some(channels) = args.channels {
        config.format.channels = channels;
    }
    config.normalize();
    Ok(config)
}

/// Byte `index` of frame `time` in channel stream `stream`.
fn pattern_byte(time: i64, stream: usize, index: usize) -> u8 {
    let mixed = (time as u64)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .rotate_left(stream as u32 * 7 + 3);
    (mixed >> ((index % 8) * 8)) as u8 ^ index as u8
}

fn fill_pattern(block: &mut [Vec<u8>], start: i64, bytes_per_frame: usize) {
    for (stream, data) in block.iter_mut().enumerate() {
        for (i, frame) in data.chunks_exact_mut(bytes_per_frame).enumerate() {
            for (b, byte) in frame.iter_mut().enumerate() {
                *byte = pattern_byte(start + i as i64, stream, b);
            }
        }
    }
}

fn run() -> anyhow::Result<u64> {
    let args = parse_args()?;
    let config = build_config(&args)?;

    let mut ring = AudioRingBuffer::from_config(&config).context("allocating ring buffer")?;
    let format = *ring.format();
    let streams = format.channel_stream_count() as usize;
    let bpf = format.bytes_per_frame() as usize;
    let block_frames = config.block_frames;
    let window_frames = config.reader_window_frames;
    let duration = Duration::from_secs_f64(config.duration_secs);

    info!(
        capacity_frames = config.capacity_frames,
        block_frames,
        window_frames,
        seconds = config.duration_secs,
        format = %format,
        "starting ring stress"
    );

    let (tx, rx) = unbounded::<Report>();
    let writer_done = AtomicBool::new(false);
    let started = Instant::now();

    let (mut writer, mut reader) = ring.split();
    thread::scope(|scope| -> anyhow::Result<()> {
        let writer_tx: Sender<Report> = tx.clone();
        let writer_done = &writer_done;
        thread::Builder::new()
            .name("ring-writer".into())
            .spawn_scoped(scope, move || {
                let mut report = WriterReport::default();
                let mut block = vec![vec![0u8; block_frames * bpf]; streams];
                let mut time = 0i64;
                while started.elapsed() < duration {
                    fill_pattern(&mut block, time, bpf);
                    if let Err(e) = writer.write(&block, block_frames, time) {
                        warn!("write failed at {time}: {e}");
                        break;
                    }
                    time += block_frames as i64;
                    report.blocks += 1;
                    report.frames += block_frames as u64;
                }
                report.end_time = time;
                writer_done.store(true, Ordering::Release);
                let _ = writer_tx.send(Report::Writer(report));
            })
            .context("spawning writer thread")?;

        let reader_tx = tx.clone();
        thread::Builder::new()
            .name("ring-reader".into())
            .spawn_scoped(scope, move || {
                let mut report = ReaderReport::default();
                let mut window = vec![vec![0u8; window_frames * bpf]; streams];
                while !writer_done.load(Ordering::Acquire) {
                    let Ok(bounds) = reader.get_time_bounds() else {
                        continue;
                    };
                    if bounds.is_empty() {
                        thread::yield_now();
                        continue;
                    }

                    let start = bounds.end - window_frames as i64;
                    report.reads += 1;
                    let filled = match reader.read(&mut window, window_frames, start) {
                        Ok(filled) => filled,
                        Err(ChronoringError::OutOfBounds { .. }) => {
                            report.misses += 1;
                            continue;
                        }
                        Err(e) => {
                            warn!("read failed at {start}: {e}");
                            continue;
                        }
                    };

                    for (stream, data) in window.iter().enumerate() {
                        for (i, frame) in data.chunks_exact(bpf).enumerate() {
                            let time = start + i as i64;
                            let ok = if filled.contains(time) {
                                frame
                                    .iter()
                                    .enumerate()
                                    .all(|(b, &byte)| byte == pattern_byte(time, stream, b))
                            } else {
                                frame.iter().all(|&byte| byte == 0)
                            };
                            report.frames_checked += 1;
                            if !ok {
                                report.corrupt_frames += 1;
                            }
                        }
                    }
                }
                let _ = reader_tx.send(Report::Reader(report));
            })
            .context("spawning reader thread")?;
        Ok(())
    })?;
    drop(tx);

    let mut writer_report = WriterReport::default();
    let mut reader_report = ReaderReport::default();
    for report in rx.iter() {
        match report {
            Report::Writer(r) => writer_report = r,
            Report::Reader(r) => reader_report = r,
        }
    }

    let summary = Summary {
        config,
        elapsed_secs: started.elapsed().as_secs_f64(),
        writer: writer_report,
        reader: reader_report,
        diagnostics: ring.diagnostics().snapshot(),
    };

    let json = serde_json::to_string_pretty(&summary)?;
    println!("{json}");
    if let Some(path) = args.output.as_ref() {
        std::fs::write(path, &json)
            .with_context(|| format!("writing summary to {}", path.display()))?;
        info!(path = %path.display(), "wrote stress summary");
    }

    Ok(summary.reader.corrupt_frames)
}
