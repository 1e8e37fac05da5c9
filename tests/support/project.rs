use std::{path::Path, sync::Arc};

use segmask::{
    config::{self, ProjectConfig},
    consensus::{AnnotationService, SqliteActions},
    mask::SENTINEL,
};
use tempfile::TempDir;

/// Scratch project on disk with a SQLite action store.
pub struct ProjectHarness {
    pub dir: TempDir,
    pub service: AnnotationService,
}

pub struct ProjectOptions<'a> {
    pub encoding: &'a str,
    pub mask_area: [u32; 4],
    pub score: &'a str,
    pub unverified_threshold: usize,
    /// Extra lines appended to `[segmentation.ai_model]`.
    pub ai_model: &'a str,
}

impl Default for ProjectOptions<'_> {
    fn default() -> Self {
        Self {
            encoding: "integer",
            mask_area: [0, 0, 4, 4],
            score: "accuracy",
            unverified_threshold: 1,
            ai_model: "",
        }
    }
}

impl ProjectHarness {
    pub fn new(options: ProjectOptions<'_>) -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        let config = write_project(dir.path(), &options);
        let actions = SqliteActions::open(&dir.path().join("data/actions.db")).expect("open db");
        let service = AnnotationService::new(config, Arc::new(actions));
        Self { dir, service }
    }
}

pub fn write_project(dir: &Path, options: &ProjectOptions<'_>) -> ProjectConfig {
    let [xmin, ymin, xmax, ymax] = options.mask_area;
    let text = format!(
        r#"
name = "fields"
path = "data"

[[classes]]
name = "background"
colour = [0, 0, 0]

[[classes]]
name = "water"
colour = [0, 0, 255]

[[classes]]
name = "forest"
colour = [0, 160, 0, 255]

[segmentation]
path = "masks/{{id}}.npy"
mask_encoding = "{encoding}"
mask_area = [{xmin}, {ymin}, {xmax}, {ymax}]
score = "{score}"
unverified_threshold = {threshold}

[segmentation.ai_model]
n_jobs = 2
{ai_model}
"#,
        encoding = options.encoding,
        score = options.score,
        threshold = options.unverified_threshold,
        ai_model = options.ai_model,
    );
    let path = dir.join("project.toml");
    std::fs::write(&path, text).expect("write project config");
    config::load_from_path(&path).expect("load project config")
}

/// Client save buffer for a mask and its provenance.
pub fn save_buffer(mask: &[u8], origin: &[u8]) -> Vec<u8> {
    let mut out = vec![SENTINEL];
    out.extend_from_slice(mask);
    out.extend_from_slice(origin);
    out.push(SENTINEL);
    out
}
