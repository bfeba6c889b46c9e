use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::audio::analysis;
use crate::audio::decode;
use crate::audio::features::{AnalysisParams, Detections};
use crate::encode::{Renderer, VideoArtifact};
use crate::error::SyncError;
use crate::sync::segment::{plan_segments, ImagePool, TAIL_DURATION};
use crate::sync::timeline::{fuse_frames, Timeline};

/// Pipeline stages, reported to the progress callback as each one completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Decode,
    Extract,
    Fuse,
    Plan,
    Render,
}

impl Stage {
    pub const ALL: [Stage; 5] = [Stage::Decode, Stage::Extract, Stage::Fuse, Stage::Plan, Stage::Render];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Decode => "decode",
            Stage::Extract => "beat extraction",
            Stage::Fuse => "timeline fusion",
            Stage::Plan => "segment planning",
            Stage::Render => "render",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub struct SyncSettings {
    pub analysis: AnalysisParams,
    pub dedup_epsilon: f64,
    pub tail_duration: f64,
    pub frame_rate: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            analysis: AnalysisParams::default(),
            dedup_epsilon: 0.0,
            tail_duration: TAIL_DURATION,
            frame_rate: 12,
        }
    }
}

impl SyncSettings {
    pub fn validate(&self) -> Result<(), SyncError> {
        self.analysis.validate()?;
        if self.frame_rate == 0 {
            return Err(SyncError::InvalidInput("frame rate must be positive".into()));
        }
        if self.tail_duration.is_nan() || self.tail_duration <= 0.0 {
            return Err(SyncError::InvalidInput("tail duration must be positive".into()));
        }
        if self.dedup_epsilon.is_nan() || self.dedup_epsilon < 0.0 {
            return Err(SyncError::InvalidInput("dedup epsilon must be non-negative".into()));
        }
        Ok(())
    }
}

/// Result of the analysis half of the pipeline.
#[derive(Clone, Debug, Serialize)]
pub struct SyncReport {
    pub sample_rate: u32,
    pub duration: f64,
    pub tempo_bpm: f64,
    pub onset_count: usize,
    pub beat_count: usize,
    pub timeline: Timeline,
}

fn fuse(detections: &Detections, sample_rate: u32, settings: &SyncSettings) -> Timeline {
    fuse_frames(
        &detections.onset_frames,
        &detections.beat_frames,
        sample_rate,
        settings.analysis.hop_length,
        settings.dedup_epsilon,
    )
}

/// Decode, extract, fuse, plan and render one submission.
///
/// With no renderer the run stops after planning. `on_stage` fires after
/// every completed stage. Errors carry the failing stage as context.
pub fn run(
    audio: &Path,
    pool: &ImagePool,
    renderer: Option<&mut dyn Renderer>,
    settings: &SyncSettings,
    mut on_stage: impl FnMut(Stage),
) -> Result<(SyncReport, Option<VideoArtifact>)> {
    settings.validate().context("invalid settings")?;

    let waveform = decode::decode_file(audio).with_context(|| format!("{} failed", Stage::Decode))?;
    on_stage(Stage::Decode);

    let detections = analysis::extract(&waveform, &settings.analysis)
        .with_context(|| format!("{} failed", Stage::Extract))?;
    log::debug!("Onset envelope: {} frames", detections.envelope_len);
    on_stage(Stage::Extract);

    let timeline = fuse(&detections, waveform.sample_rate, settings);
    log::info!("Detected {} beat moments", timeline.len());
    on_stage(Stage::Fuse);

    let report = SyncReport {
        sample_rate: waveform.sample_rate,
        duration: waveform.duration(),
        tempo_bpm: detections.tempo_bpm,
        onset_count: detections.onset_frames.len(),
        beat_count: detections.beat_frames.len(),
        timeline,
    };
    // The waveform is not needed past analysis.
    drop(waveform);

    let segments = plan_segments(&report.timeline, pool.images(), settings.tail_duration)
        .with_context(|| format!("{} failed", Stage::Plan))?;
    on_stage(Stage::Plan);

    let Some(renderer) = renderer else {
        return Ok((report, None));
    };

    let artifact = renderer
        .render(&segments, audio, report.sample_rate, settings.frame_rate)
        .with_context(|| format!("{} failed", Stage::Render))?;
    on_stage(Stage::Render);

    Ok((report, Some(artifact)))
}
