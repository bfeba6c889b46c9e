mod audio;
mod cli;
mod config;
mod encode;
mod error;
mod pipeline;
mod sync;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use cli::Cli;
use encode::ffmpeg::{FfmpegRenderer, FfmpegSettings};
use encode::Renderer;
use pipeline::{Stage, SyncSettings};
use sync::segment::ImagePool;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    // Explicit --config path, or auto-detect beatcut.toml / user config
    let config_path = cli.config.clone().or_else(config::find_config);
    if let Some(ref path) = config_path {
        if let Some(cfg) = config::load_config(path) {
            log::info!("Loaded config from {}", path.display());
            // Config values apply only when CLI is at its default
            if cli.width == 1280 { cli.width = cfg.output.width; }
            if cli.height == 720 { cli.height = cfg.output.height; }
            if cli.fps == 12 { cli.fps = cfg.output.fps; }
            if cli.crf == 18 { cli.crf = cfg.output.crf; }
            if cli.codec == "libx264" { cli.codec = cfg.output.codec; }
            if cli.hop_length == 512 { cli.hop_length = cfg.analysis.hop_length; }
            if cli.tail == 0.2 { cli.tail = cfg.analysis.tail_duration; }
            if cli.dedup_epsilon == 0.0 { cli.dedup_epsilon = cfg.analysis.dedup_epsilon; }
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }

    let audio = cli.audio.as_ref().context("Input audio file is required")?;
    if !audio.exists() {
        anyhow::bail!("Input file not found: {}", audio.display());
    }
    let pool = ImagePool::from_paths(&cli.images).context("Failed to collect images")?;

    log::info!("beatcut - beat-synced slideshow generator");
    log::info!("Audio: {}", audio.display());
    log::info!("Images: {}", pool.len());
    if !cli.analyze_only {
        log::info!("Output: {}", cli.output.display());
        log::info!("Resolution: {}x{} @ {}fps", cli.width, cli.height, cli.fps);
    }

    let mut settings = SyncSettings {
        frame_rate: cli.fps,
        dedup_epsilon: cli.dedup_epsilon,
        tail_duration: cli.tail,
        ..Default::default()
    };
    settings.analysis.hop_length = cli.hop_length;

    let mut renderer = FfmpegRenderer::new(FfmpegSettings {
        program: "ffmpeg".into(),
        output: cli.output.clone(),
        width: cli.width,
        height: cli.height,
        codec: cli.codec.clone(),
        pix_fmt: cli.pix_fmt.clone(),
        crf: cli.crf,
        bitrate: cli.bitrate.clone(),
    });
    let renderer: Option<&mut dyn Renderer> = if cli.analyze_only { None } else { Some(&mut renderer) };

    let total_stages = if cli.analyze_only { Stage::ALL.len() - 1 } else { Stage::ALL.len() };
    let pb = ProgressBar::new(total_stages as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} stages {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("=>-"),
    );

    let result = pipeline::run(audio, &pool, renderer, &settings, |stage| {
        pb.inc(1);
        pb.set_message(format!("{} done", stage));
    });
    pb.finish_and_clear();
    let (report, artifact) = result?;

    log::info!(
        "Detected {} beat moments ({} onsets, {} beats, tempo {:.1} BPM) over {:.1}s",
        report.timeline.len(),
        report.onset_count,
        report.beat_count,
        report.tempo_bpm,
        report.duration
    );

    if let Some(ref path) = cli.timeline_json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize timeline")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write timeline to {}", path.display()))?;
        log::info!("Timeline written to {}", path.display());
    }

    match artifact {
        Some(video) => log::info!(
            "Done! Output: {} ({} frames, {:.1}s)",
            video.path.display(),
            video.frames,
            video.duration
        ),
        None => {
            for t in report.timeline.as_slice() {
                println!("{:.3}", t);
            }
        }
    }
    Ok(())
}
