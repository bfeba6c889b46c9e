use std::path::{Path, PathBuf};

use super::timeline::Timeline;
use crate::error::SyncError;

/// Duration given to the final segment, which has no following timestamp.
pub const TAIL_DURATION: f64 = 0.2;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// An opaque still image, identified by its file name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    pub name: String,
    pub path: PathBuf,
}

impl ImageRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { name, path }
    }
}

/// Non-empty, name-sorted collection of images, indexed cyclically.
#[derive(Clone, Debug)]
pub struct ImagePool {
    images: Vec<ImageRef>,
}

impl ImagePool {
    pub fn new(mut images: Vec<ImageRef>) -> Result<Self, SyncError> {
        if images.is_empty() {
            return Err(SyncError::EmptyPool);
        }
        images.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
        Ok(Self { images })
    }

    /// Collect images from a mix of files and directories. Directories
    /// contribute their jpg/jpeg/png entries (not recursively).
    pub fn from_paths(inputs: &[PathBuf]) -> Result<Self, SyncError> {
        let mut images = Vec::new();
        for input in inputs {
            if input.is_dir() {
                let entries = std::fs::read_dir(input).map_err(|source| SyncError::Io {
                    path: input.clone(),
                    source,
                })?;
                for entry in entries {
                    let entry = entry.map_err(|source| SyncError::Io {
                        path: input.clone(),
                        source,
                    })?;
                    let path = entry.path();
                    if path.is_file() && is_image(&path) {
                        images.push(ImageRef::new(path));
                    }
                }
            } else if input.is_file() {
                images.push(ImageRef::new(input.clone()));
            } else {
                return Err(SyncError::Io {
                    path: input.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
                });
            }
        }
        log::info!("Image pool: {} images", images.len());
        Self::new(images)
    }

    pub fn images(&self) -> &[ImageRef] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Always false once constructed.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// One still shown from `start` for `duration` seconds.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment<'a> {
    pub image: &'a ImageRef,
    pub start: f64,
    pub duration: f64,
}

impl Segment<'_> {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Map each timestamp to a segment. Image `i` is `images[i % len]`; each
/// duration runs to the next timestamp and the last one lasts `tail` seconds.
pub fn plan_segments<'a>(
    timeline: &Timeline,
    images: &'a [ImageRef],
    tail: f64,
) -> Result<Vec<Segment<'a>>, SyncError> {
    if images.is_empty() {
        return Err(SyncError::EmptyPool);
    }
    if tail.is_nan() || tail <= 0.0 {
        return Err(SyncError::InvalidInput(format!(
            "tail duration must be positive, got {}",
            tail
        )));
    }
    let times = timeline.as_slice();
    if times.is_empty() {
        return Err(SyncError::NoBeatsDetected);
    }

    let segments: Vec<Segment<'a>> = times
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let duration = times.get(i + 1).map_or(tail, |&next| next - start);
            Segment {
                image: &images[i % images.len()],
                start,
                duration,
            }
        })
        .collect();

    log::info!(
        "Planned {} segments over {:.2}s using {} images",
        segments.len(),
        timeline.span() + tail,
        images.len()
    );
    Ok(segments)
}
