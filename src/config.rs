use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_crf")]
    pub crf: u32,
    #[serde(default = "default_codec")]
    pub codec: String,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_hop_length")]
    pub hop_length: usize,
    #[serde(default = "default_tail_duration")]
    pub tail_duration: f64,
    #[serde(default)]
    pub dedup_epsilon: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            crf: default_crf(),
            codec: default_codec(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            hop_length: default_hop_length(),
            tail_duration: default_tail_duration(),
            dedup_epsilon: 0.0,
        }
    }
}

fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_fps() -> u32 { 12 }
fn default_crf() -> u32 { 18 }
fn default_codec() -> String { "libx264".into() }
fn default_hop_length() -> usize { 512 }
fn default_tail_duration() -> f64 { 0.2 }

/// `./beatcut.toml`, then `<config dir>/beatcut/config.toml`.
pub fn find_config() -> Option<PathBuf> {
    let local = PathBuf::from("beatcut.toml");
    if local.exists() {
        return Some(local);
    }
    let global = dirs::config_dir()?.join("beatcut").join("config.toml");
    global.exists().then_some(global)
}

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            log::warn!("Invalid config {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [output]
            fps = 24

            [analysis]
            dedup_epsilon = 0.01
            "#,
        )
        .unwrap();
        assert_eq!(cfg.output.fps, 24);
        assert_eq!(cfg.output.width, 1280);
        assert_eq!(cfg.output.codec, "libx264");
        assert_eq!(cfg.analysis.hop_length, 512);
        assert_eq!(cfg.analysis.tail_duration, 0.2);
        assert_eq!(cfg.analysis.dedup_epsilon, 0.01);
    }

    #[test]
    fn empty_config_is_default() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.output.height, 720);
        assert_eq!(cfg.analysis.dedup_epsilon, 0.0);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beatcut.toml");
        std::fs::write(&path, "[output]\ncrf = 23\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.output.crf, 23);

        std::fs::write(&path, "[output\n").unwrap();
        assert!(load_config(&path).is_none());
    }
}
