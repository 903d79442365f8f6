//! Record a synthetic test pattern through VideoToolbox to an Annex B file.
//!
//! Usage:
//!   annexb-record [options]
//!
//! Options:
//!   --codec <h264|hevc>     Codec (default: hevc)
//!   --width <px>            Frame width (default: 1280)
//!   --height <px>           Frame height (default: 720)
//!   --fps <n>               Capture rate (default: 30)
//!   --keyframe-interval <n> Maximum frames between keyframes (default: 10)
//!   --output <file>         Output path (default: temp.h265 / temp.h264 in the temp dir)
//!   --duration <seconds>    Stop after N seconds (default: Ctrl+C)

#[cfg(target_os = "macos")]
mod app {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use anyhow::Result;
    use annexb_recorder::codec::{Codec, PixelFormat, RawFrame};
    use annexb_recorder::{Controller, RecorderConfig, VtEncoderFactory};
    use tokio_util::sync::CancellationToken;

    struct Args {
        codec: Codec,
        width: u32,
        height: u32,
        fps: u32,
        keyframe_interval: u32,
        output: Option<PathBuf>,
        duration_secs: Option<u64>,
    }

    fn parse_args() -> Result<Args> {
        let args: Vec<String> = std::env::args().collect();
        let mut parsed = Args {
            codec: Codec::Hevc,
            width: 1280,
            height: 720,
            fps: 30,
            keyframe_interval: 10,
            output: None,
            duration_secs: None,
        };

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--codec" if i + 1 < args.len() => {
                    parsed.codec = args[i + 1].parse()?;
                    i += 2;
                }
                "--width" if i + 1 < args.len() => {
                    parsed.width = args[i + 1].parse()?;
                    i += 2;
                }
                "--height" if i + 1 < args.len() => {
                    parsed.height = args[i + 1].parse()?;
                    i += 2;
                }
                "--fps" if i + 1 < args.len() => {
                    parsed.fps = args[i + 1].parse::<u32>()?.max(1);
                    i += 2;
                }
                "--keyframe-interval" if i + 1 < args.len() => {
                    parsed.keyframe_interval = args[i + 1].parse()?;
                    i += 2;
                }
                "--output" if i + 1 < args.len() => {
                    parsed.output = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                }
                "--duration" if i + 1 < args.len() => {
                    parsed.duration_secs = args[i + 1].parse().ok();
                    i += 2;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => {
                    i += 1;
                }
            }
        }
        Ok(parsed)
    }

    fn print_usage() {
        println!("Record a synthetic test pattern to a raw Annex B elementary stream");
        println!();
        println!("Usage: annexb-record [options]");
        println!();
        println!("Options:");
        println!("  --codec <h264|hevc>     Codec (default: hevc)");
        println!("  --width <px>            Frame width (default: 1280)");
        println!("  --height <px>           Frame height (default: 720)");
        println!("  --fps <n>               Capture rate (default: 30)");
        println!("  --keyframe-interval <n> Maximum frames between keyframes (default: 10)");
        println!("  --output <file>         Output path (default: temp.h265 / temp.h264 in the temp dir)");
        println!("  --duration <seconds>    Stop after N seconds (default: Ctrl+C)");
        println!();
        println!("Examples:");
        println!("  annexb-record --duration 5");
        println!("  annexb-record --codec h264 --output capture.h264 && ffplay capture.h264");
    }

    /// Moving color bars, BGRA.
    fn fill_test_pattern(buf: &mut [u8], width: u32, frame_index: u64) {
        const BARS: [[u8; 4]; 8] = [
            [255, 255, 255, 255],
            [0, 255, 255, 255],
            [255, 255, 0, 255],
            [0, 255, 0, 255],
            [255, 0, 255, 255],
            [0, 0, 255, 255],
            [255, 0, 0, 255],
            [0, 0, 0, 255],
        ];
        let width = width as usize;
        let bar_width = (width / BARS.len()).max(1);
        let shift = (frame_index as usize * 4) % width.max(1);
        for (i, pixel) in buf.chunks_exact_mut(4).enumerate() {
            let x = (i % width + shift) % width;
            let bar = (x / bar_width).min(BARS.len() - 1);
            pixel.copy_from_slice(&BARS[bar]);
        }
    }

    /// Capture loop; runs on its own thread because submission blocks.
    fn capture(
        controller: &Controller<VtEncoderFactory>,
        args: &Args,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let frame_interval = Duration::from_secs(1) / args.fps;
        let mut pixels = vec![0u8; args.width as usize * args.height as usize * 4];
        let start = Instant::now();
        let mut frame_index = 0u64;

        while !cancel.is_cancelled() {
            fill_test_pattern(&mut pixels, args.width, frame_index);
            let timestamp_us = start.elapsed().as_micros() as u64;
            let frame = RawFrame::new(args.width, args.height, PixelFormat::Bgra, &pixels, timestamp_us)
                .with_duration(frame_interval.as_micros() as u64);
            controller.submit_frame(&frame)?;
            frame_index += 1;

            let next = frame_interval * frame_index as u32;
            if let Some(wait) = next.checked_sub(start.elapsed()) {
                std::thread::sleep(wait);
            }
        }
        Ok(frame_index)
    }

    #[tokio::main]
    pub async fn main() -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("annexb_recorder=info".parse()?)
                    .add_directive("annexb_record=info".parse()?)
                    .add_directive("warn".parse()?),
            )
            .init();

        let args = parse_args()?;
        let cancel = CancellationToken::new();

        // Ctrl+C handler
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Ctrl+C received, stopping...");
            cancel_clone.cancel();
        });

        // Duration timer
        if let Some(secs) = args.duration_secs {
            let cancel_clone = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                tracing::info!("Duration reached ({}s), stopping...", secs);
                cancel_clone.cancel();
            });
        }

        let output = args
            .output
            .clone()
            .unwrap_or_else(|| RecorderConfig::default_output_path(args.codec));
        let config = RecorderConfig::new(&output)
            .codec(args.codec)
            .max_keyframe_interval(args.keyframe_interval);

        println!();
        println!("========================================");
        println!("Annex B Recorder");
        println!("========================================");
        println!("Codec:      {}", args.codec.name());
        println!("Size:       {}x{} @ {} fps", args.width, args.height, args.fps);
        println!("Output:     {}", output.display());
        if let Some(d) = args.duration_secs {
            println!("Duration:   {}s", d);
        } else {
            println!("Duration:   until Ctrl+C");
        }
        println!("========================================");
        println!();

        let controller = Arc::new(Controller::start(config, VtEncoderFactory)?);

        let capture_controller = controller.clone();
        let capture_cancel = cancel.clone();
        let capture_task = tokio::task::spawn_blocking(move || {
            let result = capture(&capture_controller, &args, &capture_cancel);
            if result.is_err() {
                capture_cancel.cancel();
            }
            result
        });

        cancel.cancelled().await;
        let frames = capture_task.await??;
        let summary = controller.stop()?;

        println!();
        println!("Captured {} frames", frames);
        println!(
            "Wrote {} samples ({} keyframes, {} NAL units) to {}",
            summary.pipeline.samples,
            summary.pipeline.keyframes,
            summary.pipeline.units_written,
            summary.output_path.display()
        );
        println!("{} bytes total", summary.pipeline.bytes_written);
        Ok(())
    }
}

#[cfg(target_os = "macos")]
fn main() -> anyhow::Result<()> {
    app::main()
}

#[cfg(not(target_os = "macos"))]
fn main() {
    eprintln!("annexb-record needs VideoToolbox and only runs on macOS");
    std::process::exit(1);
}
