pub mod ffmpeg;

use std::path::{Path, PathBuf};

use crate::error::SyncError;
use crate::sync::segment::Segment;

/// A finished, playable video.
#[derive(Clone, Debug)]
pub struct VideoArtifact {
    pub path: PathBuf,
    pub frames: u64,
    pub duration: f64,
}

/// Turns planned segments plus the source audio into a video.
///
/// `sample_rate` is the rate the audio was analyzed at; implementations must
/// keep the audio track at that rate so cuts stay aligned with the analysis.
pub trait Renderer {
    fn render(
        &mut self,
        segments: &[Segment<'_>],
        audio: &Path,
        sample_rate: u32,
        frame_rate: u32,
    ) -> Result<VideoArtifact, SyncError>;
}

/// Output frame counts per segment. Segment `i` covers frames
/// `[round(start_i * fps), round(end_i * fps))`, except that the first one also
/// covers everything from frame 0 so the video starts with the audio.
pub fn frame_schedule(segments: &[Segment<'_>], frame_rate: u32) -> Vec<u64> {
    let fps = frame_rate as f64;
    let boundary = |t: f64| (t.max(0.0) * fps).round() as u64;

    let mut counts = Vec::with_capacity(segments.len());
    let mut cursor = 0u64;
    for seg in segments {
        let end = boundary(seg.end()).max(cursor);
        counts.push(end - cursor);
        cursor = end;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::segment::{plan_segments, ImageRef, TAIL_DURATION};
    use crate::sync::timeline::Timeline;

    #[test]
    fn schedule_matches_cut_points() {
        let images = vec![ImageRef::new("a.png"), ImageRef::new("b.png")];
        let timeline = Timeline::from(vec![0.5, 1.0, 1.5, 2.0]);
        let segments = plan_segments(&timeline, &images, TAIL_DURATION).unwrap();

        // 12 fps: lead-in plus first segment fill frames 0..12, then cuts at
        // 12, 18, 24 and the tail ends at 26.4 -> 26
        let counts = frame_schedule(&segments, 12);
        assert_eq!(counts, vec![12, 6, 6, 2]);
        assert_eq!(counts.iter().sum::<u64>(), 26);
    }

    #[test]
    fn short_segments_may_get_no_frames() {
        let images = vec![ImageRef::new("a.png")];
        let timeline = Timeline::from(vec![1.0, 1.5, 1.51, 2.0]);
        let segments = plan_segments(&timeline, &images, TAIL_DURATION).unwrap();
        let counts = frame_schedule(&segments, 10);
        assert_eq!(counts, vec![15, 0, 5, 2]);
    }
}
