use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, Rgba, RgbaImage};
use rayon::prelude::*;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use super::{frame_schedule, Renderer, VideoArtifact};
use crate::error::SyncError;
use crate::sync::segment::{ImageRef, Segment};

/// Segments rasterized together before their frames are written.
const CHUNK_SEGMENTS: usize = 8;
/// Upper bound on letterboxed frames held in memory.
const CACHE_FRAMES: usize = 2 * CHUNK_SEGMENTS;

/// Encoder settings for the ffmpeg renderer.
#[derive(Clone, Debug)]
pub struct FfmpegSettings {
    /// Encoder executable, looked up on `PATH` unless absolute.
    pub program: String,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub pix_fmt: String,
    pub crf: u32,
    /// When set, uses `-b:v` instead of `-crf`.
    pub bitrate: Option<String>,
}

/// Renders segments by piping raw RGBA frames into an `ffmpeg` child that
/// muxes them with the original audio track.
pub struct FfmpegRenderer {
    settings: FfmpegSettings,
}

impl FfmpegRenderer {
    pub fn new(settings: FfmpegSettings) -> Self {
        Self { settings }
    }

    fn args(&self, audio: &Path, sample_rate: u32, frame_rate: u32) -> Vec<String> {
        let s = &self.settings;
        let mut args = vec![
            "-y".to_string(),
            "-loglevel".into(), "error".into(),
            "-f".into(), "rawvideo".into(),
            "-pixel_format".into(), "rgba".into(),
            "-video_size".into(), format!("{}x{}", s.width, s.height),
            "-framerate".into(), frame_rate.to_string(),
            "-i".into(), "pipe:0".into(),
            "-i".into(), audio.to_string_lossy().into_owned(),
            "-c:v".into(), s.codec.clone(),
            "-pix_fmt".into(), s.pix_fmt.clone(),
        ];

        if let Some(ref br) = s.bitrate {
            args.extend(["-b:v".to_string(), br.clone()]);
        } else {
            args.extend(["-crf".to_string(), s.crf.to_string()]);
            args.extend(["-preset".to_string(), "medium".to_string()]);
        }

        args.extend([
            "-c:a".into(), "aac".into(),
            "-b:a".into(), "192k".into(),
            "-ar".into(), sample_rate.to_string(),
            "-shortest".into(),
            s.output.to_string_lossy().into_owned(),
        ]);
        args
    }

    fn spawn(&self, args: &[String]) -> Result<Child, SyncError> {
        Command::new(&self.settings.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                SyncError::Render(format!(
                    "failed to spawn {} ({}). Is ffmpeg installed?",
                    self.settings.program, e
                ))
            })
    }

    /// Drop a partially written output so a failed run leaves nothing behind.
    fn discard_output(&self) {
        if self.settings.output.exists() {
            if let Err(e) = std::fs::remove_file(&self.settings.output) {
                log::warn!("Failed to remove partial output {}: {}", self.settings.output.display(), e);
            }
        }
    }
}

impl Renderer for FfmpegRenderer {
    fn render(
        &mut self,
        segments: &[Segment<'_>],
        audio: &Path,
        sample_rate: u32,
        frame_rate: u32,
    ) -> Result<VideoArtifact, SyncError> {
        if frame_rate == 0 {
            return Err(SyncError::InvalidInput("frame rate must be positive".into()));
        }
        let (width, height) = (self.settings.width, self.settings.height);
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(SyncError::Render(format!(
                "unsupported frame size {}x{} (dimensions must be even and non-zero)",
                width, height
            )));
        }

        let counts = frame_schedule(segments, frame_rate);
        let args = self.args(audio, sample_rate, frame_rate);
        let mut child = self.spawn(&args)?;
        log::info!(
            "FFmpeg encoder started: {}x{} @ {}fps, codec={}, audio {}Hz",
            width, height, frame_rate, self.settings.codec, sample_rate
        );

        let mut cache = FrameCache::new(width, height, CACHE_FRAMES);
        let mut written = 0u64;
        let write_result = (|| -> Result<(), SyncError> {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| SyncError::Render("ffmpeg stdin not available".into()))?;
            for (chunk, chunk_counts) in segments.chunks(CHUNK_SEGMENTS).zip(counts.chunks(CHUNK_SEGMENTS)) {
                cache.prepare(chunk)?;
                for (seg, &count) in chunk.iter().zip(chunk_counts) {
                    let pixels = cache
                        .get(&seg.image.path)
                        .ok_or_else(|| SyncError::Render(format!("no frame prepared for {}", seg.image.name)))?;
                    for _ in 0..count {
                        stdin.write_all(pixels).map_err(|e| {
                            SyncError::Render(format!("failed to write frame {} to ffmpeg: {}", written, e))
                        })?;
                        written += 1;
                    }
                }
            }
            Ok(())
        })();

        if write_result.is_err() {
            if let Err(e) = child.kill() {
                log::debug!("ffmpeg already exited: {}", e);
            }
        }
        // Close stdin to signal EOF
        drop(child.stdin.take());
        let output = child
            .wait_with_output()
            .map_err(|e| SyncError::Render(format!("failed to wait for ffmpeg: {}", e)))?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if let Err(e) = write_result {
            self.discard_output();
            return Err(match e {
                SyncError::Render(msg) if !stderr.trim().is_empty() => {
                    SyncError::Render(format!("{}\n{}", msg, stderr.trim()))
                }
                other => other,
            });
        }
        if !output.status.success() {
            self.discard_output();
            return Err(SyncError::Render(format!(
                "ffmpeg exited with {}:\n{}",
                output.status,
                stderr.trim()
            )));
        }

        log::info!(
            "FFmpeg encoding complete: {} frames, {} image decodes",
            written,
            cache.loads
        );
        Ok(VideoArtifact {
            path: self.settings.output.clone(),
            frames: written,
            duration: written as f64 / frame_rate as f64,
        })
    }
}

/// Letterboxed frames for the images of the current and recent segments.
///
/// Holds at most `capacity` frames. When a chunk needs more room, frames not
/// used by that chunk are evicted, so a small pool cycling through many
/// segments is decoded only once.
struct FrameCache<'a> {
    width: u32,
    height: u32,
    capacity: usize,
    frames: HashMap<&'a Path, Vec<u8>>,
    loads: usize,
}

impl<'a> FrameCache<'a> {
    fn new(width: u32, height: u32, capacity: usize) -> Self {
        Self {
            width,
            height,
            capacity,
            frames: HashMap::new(),
            loads: 0,
        }
    }

    /// Make sure every image in `chunk` has a frame, decoding the missing
    /// ones in parallel.
    fn prepare(&mut self, chunk: &[Segment<'a>]) -> Result<(), SyncError> {
        let mut missing: Vec<&'a ImageRef> = Vec::new();
        for seg in chunk {
            let path = seg.image.path.as_path();
            if !self.frames.contains_key(path) && !missing.iter().any(|img| img.path == seg.image.path) {
                missing.push(seg.image);
            }
        }
        if missing.is_empty() {
            return Ok(());
        }

        if self.frames.len() + missing.len() > self.capacity {
            self.frames
                .retain(|path, _| chunk.iter().any(|seg| seg.image.path.as_path() == *path));
        }

        let (width, height) = (self.width, self.height);
        let fresh: Vec<(&'a Path, Vec<u8>)> = missing
            .par_iter()
            .map(|&img| {
                let decoded = load_image(&img.path)?;
                Ok((img.path.as_path(), letterbox(&decoded, width, height)))
            })
            .collect::<Result<_, SyncError>>()?;

        log::debug!("Rasterized {} images at {}x{}", fresh.len(), width, height);
        self.loads += fresh.len();
        self.frames.extend(fresh);
        Ok(())
    }

    fn get(&self, path: &Path) -> Option<&[u8]> {
        self.frames.get(path).map(Vec::as_slice)
    }
}

fn load_image(path: &Path) -> Result<DynamicImage, SyncError> {
    ImageReader::open(path)
        .map_err(|source| SyncError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .with_guessed_format()
        .map_err(|source| SyncError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .decode()
        .map_err(|e| SyncError::Render(format!("failed to decode image {}: {}", path.display(), e)))
}

/// Scale to fit inside `width`x`height` keeping aspect ratio, centred on black.
pub fn letterbox(img: &DynamicImage, width: u32, height: u32) -> Vec<u8> {
    let fitted = img.resize(width, height, FilterType::Triangle).to_rgba8();
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));
    let x = (width.saturating_sub(fitted.width())) / 2;
    let y = (height.saturating_sub(fitted.height())) / 2;
    image::imageops::overlay(&mut canvas, &fitted, x as i64, y as i64);
    canvas.into_raw()
}
