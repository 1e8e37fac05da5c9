//! Project configuration loaded from TOML.
//!
//! One file describes the class list, the mask region, how consensus masks
//! are encoded and scored, and the interactive classifier settings. Users can
//! override classifier settings under `[users.<id>.ai_model]`; resolve those
//! with [`ProjectConfig::user_config`]. Components receive the resolved
//! values explicitly, nothing reads global state.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mask::{EncodingMode, MaskShape, Palette};
use crate::ml::metrics::ScoreMetric;

mod defaults;

use defaults::*;

/// Errors that may occur while loading or validating a project configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Aggregate project settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: String,
    /// Project root; relative paths resolve against the config file's folder.
    #[serde(default = "default_project_path")]
    pub path: PathBuf,
    pub classes: Vec<ClassSpec>,
    pub segmentation: SegmentationSettings,
    /// Per-user classifier overrides keyed by user id.
    #[serde(default)]
    pub users: BTreeMap<String, UserOverrides>,
}

/// One annotation class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// RGB or RGBA; a missing alpha means opaque.
    pub colour: Vec<u8>,
}

impl ClassSpec {
    pub fn rgba(&self) -> [u8; 4] {
        let mut out = [0, 0, 0, 255];
        for (slot, value) in out.iter_mut().zip(&self.colour) {
            *slot = *value;
        }
        out
    }
}

/// Segmentation settings shared by every user of the project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationSettings {
    /// Current-consensus path template relative to the project root; `{id}` is the image id.
    #[serde(default = "default_consensus_path")]
    pub path: String,
    #[serde(default = "default_mask_encoding")]
    pub mask_encoding: EncodingMode,
    /// Pixel-space region `[xmin, ymin, xmax, ymax]` covered by masks.
    pub mask_area: [u32; 4],
    /// Mask `[width, height]`; derived from `mask_area` when omitted.
    #[serde(default)]
    pub mask_shape: Option<[u32; 2]>,
    #[serde(default)]
    pub score: ScoreMetric,
    /// Consensus with at most this many contributors stays unverified.
    #[serde(default = "default_unverified_threshold")]
    pub unverified_threshold: usize,
    #[serde(default)]
    pub ai_model: AiModelSettings,
}

impl SegmentationSettings {
    /// Mask grid dimensions.
    pub fn mask_shape(&self) -> MaskShape {
        match self.mask_shape {
            Some([width, height]) => MaskShape::new(height as usize, width as usize),
            None => {
                let [xmin, ymin, xmax, ymax] = self.mask_area;
                MaskShape::new(
                    ymax.saturating_sub(ymin) as usize,
                    xmax.saturating_sub(xmin) as usize,
                )
            }
        }
    }

    /// Mask region as a [`MaskArea`].
    pub fn area(&self) -> MaskArea {
        let [xmin, ymin, xmax, ymax] = self.mask_area;
        MaskArea {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }
}

/// Pixel-space region of the source image that masks cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskArea {
    pub xmin: u32,
    pub ymin: u32,
    pub xmax: u32,
    pub ymax: u32,
}

impl MaskArea {
    pub fn width(&self) -> u32 {
        self.xmax.saturating_sub(self.xmin)
    }

    pub fn height(&self) -> u32 {
        self.ymax.saturating_sub(self.ymin)
    }
}

/// Interactive classifier and post-processing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiModelSettings {
    /// Ordered band names fed to the feature extractor.
    #[serde(default)]
    pub bands: Vec<String>,
    #[serde(default = "default_true")]
    pub use_edge_filter: bool,
    #[serde(default)]
    pub use_meshgrid: bool,
    #[serde(default = "default_meshgrid_cells")]
    pub meshgrid_cells: GridCells,
    #[serde(default)]
    pub use_superpixels: bool,
    #[serde(default = "default_n_leaves")]
    pub n_leaves: usize,
    /// Maximum tree depth; `0` leaves depth unbounded.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    /// Worker threads for one training request.
    #[serde(default = "default_n_jobs")]
    pub n_jobs: usize,
    /// Percentage of non-default neighbours required to keep a prediction; `0` disables.
    #[serde(default)]
    pub suppression_threshold: f32,
    #[serde(default = "default_suppression_filter_size")]
    pub suppression_filter_size: usize,
    #[serde(default)]
    pub suppression_default_class: u8,
}

impl Default for AiModelSettings {
    fn default() -> Self {
        Self {
            bands: Vec::new(),
            use_edge_filter: true,
            use_meshgrid: false,
            meshgrid_cells: default_meshgrid_cells(),
            use_superpixels: false,
            n_leaves: default_n_leaves(),
            max_depth: default_max_depth(),
            n_estimators: default_n_estimators(),
            n_jobs: default_n_jobs(),
            suppression_threshold: 0.0,
            suppression_filter_size: default_suppression_filter_size(),
            suppression_default_class: 0,
        }
    }
}

/// Partial `ai_model` table for a single user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserOverrides {
    #[serde(default)]
    pub ai_model: AiModelOverrides,
}

/// Every field optional; present fields replace the project value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiModelOverrides {
    pub bands: Option<Vec<String>>,
    pub use_edge_filter: Option<bool>,
    pub use_meshgrid: Option<bool>,
    pub meshgrid_cells: Option<GridCells>,
    pub use_superpixels: Option<bool>,
    pub n_leaves: Option<usize>,
    pub max_depth: Option<usize>,
    pub n_estimators: Option<usize>,
    pub n_jobs: Option<usize>,
    pub suppression_threshold: Option<f32>,
    pub suppression_filter_size: Option<usize>,
    pub suppression_default_class: Option<u8>,
}

impl AiModelOverrides {
    fn apply(&self, base: &mut AiModelSettings) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
        set(&mut base.bands, &self.bands);
        set(&mut base.use_edge_filter, &self.use_edge_filter);
        set(&mut base.use_meshgrid, &self.use_meshgrid);
        set(&mut base.meshgrid_cells, &self.meshgrid_cells);
        set(&mut base.use_superpixels, &self.use_superpixels);
        set(&mut base.n_leaves, &self.n_leaves);
        set(&mut base.max_depth, &self.max_depth);
        set(&mut base.n_estimators, &self.n_estimators);
        set(&mut base.n_jobs, &self.n_jobs);
        set(&mut base.suppression_threshold, &self.suppression_threshold);
        set(&mut base.suppression_filter_size, &self.suppression_filter_size);
        set(
            &mut base.suppression_default_class,
            &self.suppression_default_class,
        );
    }
}

/// Spatial feature resolution: full pixel coordinates or a coarse grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GridCells {
    Pixelwise,
    /// ROI split into `rows × cols` cells.
    Cells { rows: usize, cols: usize },
}

impl fmt::Display for GridCells {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pixelwise => f.write_str("pixelwise"),
            Self::Cells { rows, cols } => write!(f, "{rows}x{cols}"),
        }
    }
}

impl FromStr for GridCells {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value == "pixelwise" {
            return Ok(Self::Pixelwise);
        }
        let (rows, cols) = value
            .split_once('x')
            .ok_or_else(|| format!("Grid size {value:?} is neither \"pixelwise\" nor \"RxC\""))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| format!("Grid size {value:?} needs positive integers"))
        };
        Ok(Self::Cells {
            rows: parse(rows)?,
            cols: parse(cols)?,
        })
    }
}

impl TryFrom<String> for GridCells {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GridCells> for String {
    fn from(value: GridCells) -> Self {
        value.to_string()
    }
}

impl ProjectConfig {
    /// Parse a configuration from TOML text without touching the filesystem.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::ParseToml {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Class colours indexed by class id.
    pub fn palette(&self) -> Palette {
        Palette::new(self.classes.iter().map(ClassSpec::rgba).collect())
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Segmentation settings with `user_id`'s classifier overrides applied.
    pub fn user_config(&self, user_id: &str) -> SegmentationSettings {
        let mut settings = self.segmentation.clone();
        if let Some(overrides) = self.users.get(user_id) {
            overrides.ai_model.apply(&mut settings.ai_model);
        }
        settings
    }

    /// Check structural invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.classes.is_empty() {
            return invalid("at least one class is required".into());
        }
        if self.classes.len() > usize::from(u8::MAX) {
            return invalid(format!("{} classes exceed the 255 class limit", self.classes.len()));
        }
        for class in &self.classes {
            if !(3..=4).contains(&class.colour.len()) {
                return invalid(format!(
                    "class {:?} colour must have 3 or 4 components",
                    class.name
                ));
            }
        }
        let seg = &self.segmentation;
        let area = seg.area();
        if area.width() == 0 || area.height() == 0 {
            return invalid(format!("mask_area {:?} is empty", seg.mask_area));
        }
        let shape = seg.mask_shape();
        if shape.width != area.width() as usize || shape.height != area.height() as usize {
            return invalid(format!(
                "mask_shape {}x{} does not match mask_area {}x{}",
                shape.width,
                shape.height,
                area.width(),
                area.height()
            ));
        }
        validate_ai_model(&seg.ai_model, self.classes.len(), "segmentation.ai_model")?;
        for user_id in self.users.keys() {
            validate_ai_model(
                &self.user_config(user_id).ai_model,
                self.classes.len(),
                &format!("users.{user_id}.ai_model"),
            )?;
        }
        Ok(())
    }
}

fn validate_ai_model(model: &AiModelSettings, classes: usize, scope: &str) -> Result<(), ConfigError> {
    let size = model.suppression_filter_size;
    if size < 3 || size % 2 == 0 {
        return Err(ConfigError::Invalid(format!(
            "{scope}.suppression_filter_size must be odd and at least 3, got {size}"
        )));
    }
    if usize::from(model.suppression_default_class) >= classes {
        return Err(ConfigError::Invalid(format!(
            "{scope}.suppression_default_class {} is not a configured class",
            model.suppression_default_class
        )));
    }
    if !(0.0..=100.0).contains(&model.suppression_threshold) {
        return Err(ConfigError::Invalid(format!(
            "{scope}.suppression_threshold must be a percentage"
        )));
    }
    if model.n_leaves < 2 || model.n_estimators == 0 {
        return Err(ConfigError::Invalid(format!(
            "{scope} needs n_leaves >= 2 and n_estimators >= 1"
        )));
    }
    Ok(())
}

/// Load and validate a project configuration file.
///
/// A relative `path` inside the file is resolved against the file's directory.
pub fn load_from_path(path: &Path) -> Result<ProjectConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = ProjectConfig::from_toml_str(&text, path)?;
    if config.path.is_relative() {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.path = base.join(&config.path);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
name = "coastline"
path = "data"

[[classes]]
name = "land"
colour = [0, 255, 0]

[[classes]]
name = "water"
colour = [0, 0, 255, 128]

[segmentation]
path = "masks/{id}.png"
mask_encoding = "rgb"
mask_area = [10, 20, 74, 52]
score = "jaccard"
unverified_threshold = 2

[segmentation.ai_model]
bands = ["B2", "B3", "B4"]
use_meshgrid = true
meshgrid_cells = "4x8"
n_estimators = 50

[users.alice.ai_model]
n_leaves = 8
meshgrid_cells = "pixelwise"
"#;

    fn sample() -> ProjectConfig {
        ProjectConfig::from_toml_str(SAMPLE, Path::new("project.toml")).unwrap()
    }

    #[test]
    fn parses_sample_project() {
        let config = sample();
        assert_eq!(config.class_count(), 2);
        assert_eq!(config.segmentation.mask_encoding, EncodingMode::Rgb);
        assert_eq!(config.segmentation.score, ScoreMetric::Jaccard);
        assert_eq!(config.segmentation.mask_shape(), MaskShape::new(32, 64));
        assert_eq!(
            config.segmentation.ai_model.meshgrid_cells,
            GridCells::Cells { rows: 4, cols: 8 }
        );
        assert_eq!(config.palette().colour(0), Some([0, 255, 0, 255]));
        assert_eq!(config.palette().colour(1), Some([0, 0, 255, 128]));
    }

    #[test]
    fn user_overrides_replace_only_present_fields() {
        let config = sample();
        let alice = config.user_config("alice");
        assert_eq!(alice.ai_model.n_leaves, 8);
        assert_eq!(alice.ai_model.meshgrid_cells, GridCells::Pixelwise);
        assert_eq!(alice.ai_model.n_estimators, 50);
        assert_eq!(config.user_config("bob").ai_model, config.segmentation.ai_model);
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        let text = SAMPLE.replace("mask_encoding = \"rgb\"", "mask_encoding = \"jpeg\"");
        let err = ProjectConfig::from_toml_str(&text, Path::new("p.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ParseToml { .. }));
    }

    #[test]
    fn even_suppression_window_is_invalid() {
        let text = SAMPLE.replace("n_estimators = 50", "n_estimators = 50\nsuppression_filter_size = 4");
        let err = ProjectConfig::from_toml_str(&text, Path::new("p.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn mismatched_mask_shape_is_invalid() {
        let text = SAMPLE.replace(
            "unverified_threshold = 2",
            "unverified_threshold = 2\nmask_shape = [10, 10]",
        );
        assert!(matches!(
            ProjectConfig::from_toml_str(&text, Path::new("p.toml")),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn grid_cells_parse_and_display() {
        assert_eq!("3x5".parse::<GridCells>().unwrap(), GridCells::Cells { rows: 3, cols: 5 });
        assert_eq!(GridCells::Cells { rows: 3, cols: 5 }.to_string(), "3x5");
        assert!("0x5".parse::<GridCells>().is_err());
        assert!("big".parse::<GridCells>().is_err());
    }

    #[test]
    fn load_resolves_relative_project_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("project.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = load_from_path(&path).unwrap();
        assert_eq!(config.path, dir.path().join("data"));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempdir().unwrap();
        let err = load_from_path(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
