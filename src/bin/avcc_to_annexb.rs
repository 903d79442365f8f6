//! Reframe captured length-prefixed samples into an Annex B stream.
//!
//! Each `--input` file holds one compressed picture as the encoder delivered
//! it: NAL units behind 4-byte big-endian lengths. When parameter set files
//! are given, the first input is written as a keyframe with those sets in
//! front of it; every later input is written as a delta picture.
//!
//! Usage:
//!   avcc-to-annexb [options] --input <file> [--input <file> ...]
//!
//! Options:
//!   --codec <h264|hevc>     Codec of the samples (default: hevc)
//!   --vps <file>            Raw VPS payload (HEVC only)
//!   --sps <file>            Raw SPS payload
//!   --pps <file>            Raw PPS payload
//!   --input <file>          Length-prefixed sample (repeatable, in order)
//!   --output <file>         Output path (default: temp.h265 / temp.h264 in the temp dir)
//!   --verify                Re-split the output and list its NAL units

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use annexb_recorder::codec::{Codec, CompressedSample, FormatDescription, StaticFormatDescription};
use annexb_recorder::{create_sink, split_annex_b, NalKind, RecorderConfig, SamplePipeline};

struct Args {
    codec: Codec,
    vps: Option<PathBuf>,
    sps: Option<PathBuf>,
    pps: Option<PathBuf>,
    inputs: Vec<PathBuf>,
    output: Option<PathBuf>,
    verify: bool,
}

fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        codec: Codec::Hevc,
        vps: None,
        sps: None,
        pps: None,
        inputs: Vec::new(),
        output: None,
        verify: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--codec" if i + 1 < args.len() => {
                parsed.codec = args[i + 1].parse()?;
                i += 2;
            }
            "--vps" if i + 1 < args.len() => {
                parsed.vps = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--sps" if i + 1 < args.len() => {
                parsed.sps = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--pps" if i + 1 < args.len() => {
                parsed.pps = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--input" if i + 1 < args.len() => {
                parsed.inputs.push(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--output" if i + 1 < args.len() => {
                parsed.output = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--verify" => {
                parsed.verify = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                tracing::warn!("Ignoring unknown argument: {}", other);
                i += 1;
            }
        }
    }

    if parsed.inputs.is_empty() {
        print_usage();
        bail!("at least one --input is required");
    }
    Ok(parsed)
}

fn print_usage() {
    println!("Reframe length-prefixed H.264/HEVC samples into an Annex B stream");
    println!();
    println!("Usage: avcc-to-annexb [options] --input <file> [--input <file> ...]");
    println!();
    println!("Options:");
    println!("  --codec <h264|hevc>     Codec of the samples (default: hevc)");
    println!("  --vps <file>            Raw VPS payload (HEVC only)");
    println!("  --sps <file>            Raw SPS payload");
    println!("  --pps <file>            Raw PPS payload");
    println!("  --input <file>          Length-prefixed sample (repeatable, in order)");
    println!("  --output <file>         Output path (default: temp.h265 / temp.h264 in the temp dir)");
    println!("  --verify                Re-split the output and list its NAL units");
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

/// Parameter sets from the command line, if the caller supplied any.
fn load_format(args: &Args) -> Result<Option<StaticFormatDescription>> {
    let (Some(sps), Some(pps)) = (&args.sps, &args.pps) else {
        if args.sps.is_some() || args.pps.is_some() || args.vps.is_some() {
            bail!("--sps and --pps must be given together");
        }
        return Ok(None);
    };
    let format = match args.codec {
        Codec::H264 => StaticFormatDescription::h264(read(sps)?, read(pps)?),
        Codec::Hevc => {
            let vps = args.vps.as_ref().context("HEVC parameter sets need --vps")?;
            StaticFormatDescription::hevc(read(vps)?, read(sps)?, read(pps)?)
        }
    };
    Ok(Some(format))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("annexb_recorder=info".parse()?)
                .add_directive("avcc_to_annexb=info".parse()?),
        )
        .init();

    let args = parse_args()?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| RecorderConfig::default_output_path(args.codec));
    let mut format = load_format(&args)?;

    let sink = create_sink(&output)?;
    let mut pipeline = SamplePipeline::new(args.codec, sink);

    for (index, input) in args.inputs.iter().enumerate() {
        let data = read(input)?;
        // Samples are spaced one 30 fps frame apart.
        let pts_us = index as u64 * 33_333;
        let sample = match format.take() {
            Some(desc) => {
                let desc: Box<dyn FormatDescription> = Box::new(desc);
                CompressedSample::keyframe(data, pts_us, Some(desc))
            }
            None => CompressedSample::delta(data, pts_us),
        };
        pipeline
            .process_sample(sample)
            .with_context(|| format!("writing {}", output.display()))?;
    }

    let (_, stats) = pipeline
        .finish()
        .with_context(|| format!("closing {}", output.display()))?;

    println!(
        "{} samples -> {} ({} NAL units, {} parameter sets, {} bytes)",
        stats.samples,
        output.display(),
        stats.units_written,
        stats.parameter_set_records,
        stats.bytes_written
    );
    if stats.truncated_samples > 0 {
        tracing::warn!("{} samples ended in a truncated record", stats.truncated_samples);
    }

    if args.verify {
        let written = read(&output)?;
        for (i, unit) in split_annex_b(&written).iter().enumerate() {
            let kind = match NalKind::classify(args.codec, unit) {
                NalKind::ParameterSet(kind) => kind.name(),
                NalKind::Coded => "coded",
            };
            println!("  [{:>4}] {:<5} {} bytes", i, kind, unit.len());
        }
    }

    Ok(())
}
