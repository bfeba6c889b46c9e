use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "beatcut", about = "Cut a slideshow of still images on the beats of a music track")]
pub struct Cli {
    /// Input audio file (MP3, WAV, FLAC, OGG, AAC)
    pub audio: Option<PathBuf>,

    /// Image files or directories of jpg/jpeg/png images
    #[arg(short, long, num_args = 1..)]
    pub images: Vec<PathBuf>,

    /// Output video file
    #[arg(short, long, default_value = "beat_synced_video.mp4")]
    pub output: PathBuf,

    /// Video width in pixels
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    /// Video height in pixels
    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// Frames per second
    #[arg(long, default_value_t = 12)]
    pub fps: u32,

    /// H.264 CRF quality (0-51, lower = better). Ignored when --bitrate is set.
    #[arg(long, default_value_t = 18)]
    pub crf: u32,

    /// Video bitrate (e.g. 2400k, 5M). When set, uses -b:v instead of -crf.
    #[arg(short, long)]
    pub bitrate: Option<String>,

    /// FFmpeg video codec
    #[arg(long, default_value = "libx264")]
    pub codec: String,

    /// FFmpeg pixel format
    #[arg(long, default_value = "yuv420p")]
    pub pix_fmt: String,

    /// Analysis hop length in samples
    #[arg(long, default_value_t = 512)]
    pub hop_length: usize,

    /// Duration of the last image, in seconds
    #[arg(long, default_value_t = 0.2)]
    pub tail: f64,

    /// Merge timestamps closer than this many seconds (0 = exact duplicates only)
    #[arg(long, default_value_t = 0.0)]
    pub dedup_epsilon: f64,

    /// Write the fused timeline and detection counts as JSON
    #[arg(long)]
    pub timeline_json: Option<PathBuf>,

    /// Stop after beat analysis and planning; do not render
    #[arg(long)]
    pub analyze_only: bool,

    /// Config file (defaults to ./beatcut.toml or the user config dir)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_images_and_defaults() {
        let cli = Cli::parse_from(["beatcut", "song.mp3", "-i", "a.png", "b.jpg", "--fps", "24"]);
        assert_eq!(cli.audio, Some(PathBuf::from("song.mp3")));
        assert_eq!(cli.images, vec![PathBuf::from("a.png"), PathBuf::from("b.jpg")]);
        assert_eq!(cli.fps, 24);
        assert_eq!(cli.tail, 0.2);
        assert_eq!(cli.output, PathBuf::from("beat_synced_video.mp4"));
        assert!(!cli.analyze_only);
    }
}
