use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::{
    consumer::{LinkSettings, rps::RpsTuning, simon::SimonTuning},
    pipeline::{
        camera::{CameraConstraints, Facing, Resolution},
        recognizer::{ModelSource, ModelSources, NoiseFilter},
    },
    supervisor::ProcessSpec,
};

pub const CONFIG_ENV: &str = "GESTURE_ARCADE_CONFIG";

const HANDPOSE_MODEL_FILENAME: &str = "handpose_estimation_mediapipe_2023feb.onnx";
const HANDPOSE_MODEL_URL: &str = "https://raw.githubusercontent.com/214zzl995/gesture-universe/refs/heads/main/models/handpose_estimation_mediapipe_2023feb.onnx";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraConfig,
    pub model: ModelConfig,
    pub session: SessionConfig,
    pub rps: RpsConfig,
    pub simon: SimonConfig,
    /// Process id → executable launched by the supervisor.
    pub processes: BTreeMap<String, ProcessSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub resolution: Resolution,
    pub facing: Facing,
    pub device: Option<u32>,
    pub settle_ms: u64,
    pub video_ready_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::Hd720,
            facing: Facing::Front,
            device: None,
            settle_ms: 500,
            video_ready_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub primary_url: String,
    pub cache_path: PathBuf,
    pub fallback_path: PathBuf,
    pub init_timeout_secs: u64,
    /// Regex patterns for per-frame errors that are known noise.
    pub benign_errors: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            primary_url: HANDPOSE_MODEL_URL.to_string(),
            cache_path: PathBuf::from("models").join(HANDPOSE_MODEL_FILENAME),
            fallback_path: PathBuf::from("assets")
                .join("models")
                .join(HANDPOSE_MODEL_FILENAME),
            init_timeout_secs: 30,
            benign_errors: vec![
                "(?i)resource temporarily unavailable".to_string(),
                "(?i)interrupted system call".to_string(),
                "(?i)would block".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub tick_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { tick_ms: 16 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpsConfig {
    pub countdown_from: u8,
    pub play_window_ms: u64,
    pub min_confidence: u8,
}

impl Default for RpsConfig {
    fn default() -> Self {
        Self {
            countdown_from: 3,
            play_window_ms: 3_000,
            min_confidence: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimonConfig {
    pub min_confidence: u8,
    pub reveal_ms: u64,
    pub gap_ms: u64,
    pub countdown_from: u8,
    pub input_cooldown_ms: u64,
    pub advance_delay_ms: u64,
    pub allow_adjacent_repeats: bool,
}

impl Default for SimonConfig {
    fn default() -> Self {
        Self {
            min_confidence: 75,
            reveal_ms: 1_500,
            gap_ms: 500,
            countdown_from: 3,
            input_cooldown_ms: 800,
            advance_delay_ms: 2_500,
            allow_adjacent_repeats: false,
        }
    }
}

impl AppConfig {
    /// Reads the config from `path`, else from `$GESTURE_ARCADE_CONFIG`,
    /// else falls back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        let cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.tick_ms == 0 {
            bail!("session.tick_ms must be greater than zero");
        }
        if self.model.init_timeout_secs == 0 {
            bail!("model.init_timeout_secs must be greater than zero");
        }
        if self.simon.min_confidence > 100 || self.rps.min_confidence > 100 {
            bail!("confidence thresholds are percentages and must be at most 100");
        }
        if self.rps.countdown_from == 0 || self.simon.countdown_from == 0 {
            bail!("countdowns must start above zero");
        }
        // gap_ms and settle_ms may be zero; they only add pauses
        let phases = [
            ("rps.play_window_ms", self.rps.play_window_ms),
            ("simon.reveal_ms", self.simon.reveal_ms),
            ("simon.input_cooldown_ms", self.simon.input_cooldown_ms),
            ("simon.advance_delay_ms", self.simon.advance_delay_ms),
            ("camera.video_ready_timeout_ms", self.camera.video_ready_timeout_ms),
        ];
        if let Some((key, _)) = phases.iter().find(|(_, ms)| *ms == 0) {
            bail!("{key} must be greater than zero");
        }
        for pattern in &self.model.benign_errors {
            regex::Regex::new(pattern)
                .with_context(|| format!("invalid model.benign_errors pattern `{pattern}`"))?;
        }
        Ok(())
    }

    pub fn camera_constraints(&self) -> CameraConstraints {
        CameraConstraints {
            resolution: self.camera.resolution,
            facing: self.camera.facing,
            device: self.camera.device,
        }
    }

    pub fn model_sources(&self) -> ModelSources {
        ModelSources {
            primary: ModelSource::Remote {
                url: self.model.primary_url.clone(),
                cache_path: self.model.cache_path.clone(),
            },
            fallback: ModelSource::Local(self.model.fallback_path.clone()),
        }
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.model.init_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.session.tick_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.camera.settle_ms)
    }

    pub fn video_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.camera.video_ready_timeout_ms)
    }

    pub fn noise_filter(&self) -> Result<NoiseFilter> {
        NoiseFilter::new(&self.model.benign_errors).context("invalid model.benign_errors")
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            constraints: self.camera_constraints(),
            video_ready_timeout: self.video_ready_timeout(),
            // the adapter gives up on its own after init_timeout
            init_wait: self.init_timeout() + Duration::from_secs(1),
        }
    }
}

impl From<&RpsConfig> for RpsTuning {
    fn from(cfg: &RpsConfig) -> Self {
        RpsTuning {
            countdown_from: cfg.countdown_from,
            countdown_step: Duration::from_secs(1),
            play_window: Duration::from_millis(cfg.play_window_ms),
            min_confidence: cfg.min_confidence,
        }
    }
}

impl From<&SimonConfig> for SimonTuning {
    fn from(cfg: &SimonConfig) -> Self {
        SimonTuning {
            min_confidence: cfg.min_confidence,
            reveal: Duration::from_millis(cfg.reveal_ms),
            gap: Duration::from_millis(cfg.gap_ms),
            countdown_from: cfg.countdown_from,
            countdown_step: Duration::from_secs(1),
            input_cooldown: Duration::from_millis(cfg.input_cooldown_ms),
            advance_delay: Duration::from_millis(cfg.advance_delay_ms),
            allow_adjacent_repeats: cfg.allow_adjacent_repeats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_tuning() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.simon.min_confidence, 75);
        assert_eq!(cfg.simon.input_cooldown_ms, 800);
        assert_eq!(cfg.camera.settle_ms, 500);
        assert_eq!(cfg.init_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.camera.resolution, Resolution::Hd720);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[camera]\nresolution = \"1080p\"\n\n[simon]\nmin_confidence = 80\n\n[processes]\nvolume = \"bin/volume-control\""
        )
        .unwrap();

        let cfg = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.camera.resolution, Resolution::Hd1080);
        assert_eq!(cfg.camera.settle_ms, 500);
        assert_eq!(cfg.simon.min_confidence, 80);
        assert_eq!(cfg.simon.reveal_ms, 1_500);
        assert_eq!(
            cfg.processes.get("volume").map(ProcessSpec::program),
            Some(Path::new("bin/volume-control"))
        );
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let cfg = AppConfig::from_toml("[simon]\nmin_confidence = 120").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_phase_durations() {
        for toml in [
            "[simon]\ninput_cooldown_ms = 0",
            "[simon]\nadvance_delay_ms = 0",
            "[camera]\nvideo_ready_timeout_ms = 0",
        ] {
            let cfg = AppConfig::from_toml(toml).unwrap();
            let err = cfg.validate().unwrap_err().to_string();
            assert!(err.contains("must be greater than zero"), "{toml}: {err}");
        }

        let cfg = AppConfig::from_toml("[simon]\ngap_ms = 0\n\n[camera]\nsettle_ms = 0").unwrap();
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_unknown_resolution_tier() {
        assert!(AppConfig::from_toml("[camera]\nresolution = \"4k\"").is_err());
    }

    #[test]
    fn rejects_invalid_noise_pattern() {
        let cfg = AppConfig::from_toml("[model]\nbenign_errors = [\"(unclosed\"]").unwrap();
        assert!(cfg.validate().is_err());
    }
}
