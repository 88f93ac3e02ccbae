use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{BackendRegistry, SharedBackend, COCO_PERSON, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::pipeline::{PipelineConfig, DEFAULT_SAMPLING_STRIDE, DEFAULT_YIELD_EVERY};
use crate::progress::DEFAULT_PROGRESS_INTERVAL;

const DEFAULT_BACKEND: &str = "noop";
const DEFAULT_MODEL_INPUT: u32 = 640;
const KNOWN_BACKENDS: &[&str] = &["noop", "tract"];

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct VidmarkConfigFile {
    pipeline: Option<PipelineConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    sampling_stride: Option<u64>,
    yield_every: Option<u64>,
    progress_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    subject_class: Option<u32>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VidmarkConfig {
    pub pipeline: PipelineSettings,
    pub detector: DetectorSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub sampling_stride: u64,
    pub yield_every: u64,
    pub progress_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub subject_class: u32,
    pub input_width: u32,
    pub input_height: u32,
}

impl Default for VidmarkConfig {
    fn default() -> Self {
        Self::from_file(VidmarkConfigFile::default())
    }
}

impl VidmarkConfig {
    /// Defaults, then the file named by `VIDMARK_CONFIG`, then `VIDMARK_*`
    /// overrides.
    pub fn load() -> Result<Self> {
        Self::load_with(None)
    }

    /// Like `load`, with an explicit config file taking precedence over
    /// `VIDMARK_CONFIG`.
    pub fn load_with(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("VIDMARK_CONFIG").ok().map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => read_config_file(&path)?,
            None => VidmarkConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: VidmarkConfigFile = toml::from_str(raw).context("invalid config")?;
        let cfg = Self::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: VidmarkConfigFile) -> Self {
        let pipeline = file.pipeline.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        Self {
            pipeline: PipelineSettings {
                sampling_stride: pipeline.sampling_stride.unwrap_or(DEFAULT_SAMPLING_STRIDE),
                yield_every: pipeline.yield_every.unwrap_or(DEFAULT_YIELD_EVERY),
                progress_interval: pipeline
                    .progress_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_PROGRESS_INTERVAL),
            },
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                model_path: detector.model_path,
                confidence_threshold: detector
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                subject_class: detector.subject_class.unwrap_or(COCO_PERSON),
                input_width: detector.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
                input_height: detector.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(backend) = std::env::var("VIDMARK_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("VIDMARK_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(stride) = std::env::var("VIDMARK_STRIDE") {
            self.pipeline.sampling_stride = stride
                .trim()
                .parse()
                .map_err(|_| anyhow!("VIDMARK_STRIDE must be a positive integer"))?;
        }
        if let Ok(threshold) = std::env::var("VIDMARK_THRESHOLD") {
            self.detector.confidence_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("VIDMARK_THRESHOLD must be a number within [0, 1]"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.sampling_stride == 0 {
            return Err(anyhow!("pipeline.sampling_stride must be >= 1"));
        }
        if self.pipeline.yield_every == 0 {
            return Err(anyhow!("pipeline.yield_every must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(anyhow!("detector.confidence_threshold must be within [0, 1]"));
        }
        if !KNOWN_BACKENDS.contains(&self.detector.backend.as_str()) {
            return Err(anyhow!(
                "unknown detector backend '{}' (expected one of: {})",
                self.detector.backend,
                KNOWN_BACKENDS.join(", ")
            ));
        }
        if self.detector.backend == "tract" && self.detector.model_path.is_none() {
            return Err(anyhow!("detector backend 'tract' requires detector.model_path"));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input dimensions must be non-zero"));
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            sampling_stride: self.pipeline.sampling_stride,
            yield_every: self.pipeline.yield_every,
            progress_interval: self.pipeline.progress_interval,
            confidence_threshold: self.detector.confidence_threshold,
            subject_class: self.detector.subject_class,
        }
    }

    /// Registry with `noop` plus the configured backend, which is made the default.
    pub fn backend_registry(&self) -> Result<BackendRegistry> {
        let mut registry = BackendRegistry::with_noop();
        if self.detector.backend == "tract" {
            self.register_tract(&mut registry)?;
        }
        registry.set_default(&self.detector.backend)?;
        Ok(registry)
    }

    /// Shared handle to the configured backend.
    pub fn detector_backend(&self) -> Result<SharedBackend> {
        let registry = self.backend_registry()?;
        registry
            .default_backend()
            .with_context(|| format!("detector backend '{}' unavailable", self.detector.backend))
    }

    #[cfg(feature = "backend-tract")]
    fn register_tract(&self, registry: &mut BackendRegistry) -> Result<()> {
        let model_path = self
            .detector
            .model_path
            .as_ref()
            .context("detector backend 'tract' requires detector.model_path")?;
        let backend = crate::detect::TractBackend::new(
            model_path,
            self.detector.input_width,
            self.detector.input_height,
        )?;
        registry.register(backend);
        Ok(())
    }

    #[cfg(not(feature = "backend-tract"))]
    fn register_tract(&self, _registry: &mut BackendRegistry) -> Result<()> {
        Err(anyhow!(
            "detector backend 'tract' requires building with --features backend-tract"
        ))
    }
}

fn read_config_file(path: &Path) -> Result<VidmarkConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
