//! Where segmask keeps per-installation state, currently the run logs.
//!
//! The home is `<base>/.segmask`. `<base>` comes from the `--app-home` flag,
//! then `SEGMASK_CONFIG_HOME`, then the OS config directory.

use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use directories::BaseDirs;
use thiserror::Error;

/// Directory created under the chosen base.
pub const APP_DIR_NAME: &str = ".segmask";

/// Environment variable naming the base directory.
pub const CONFIG_HOME_ENV: &str = "SEGMASK_CONFIG_HOME";

const LOGS_DIR_NAME: &str = "logs";

static HOME_FLAG: OnceLock<PathBuf> = OnceLock::new();

#[derive(Debug, Error)]
pub enum AppDirError {
    #[error("Cannot locate a home for segmask state; pass --app-home or set SEGMASK_CONFIG_HOME")]
    NoBaseDir,
    #[error("Failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Which setting picked the base directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomeSource {
    Flag,
    Environment,
    Platform,
}

/// Resolved `.segmask` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppHome {
    pub root: PathBuf,
    pub source: HomeSource,
}

impl AppHome {
    /// Resolve the home from the flag, the environment and the platform, in that order.
    pub fn resolve() -> Result<Self, AppDirError> {
        let (base, source) = choose_base(
            HOME_FLAG.get().cloned(),
            std::env::var_os(CONFIG_HOME_ENV),
            || BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf()),
        )
        .ok_or(AppDirError::NoBaseDir)?;
        Ok(Self {
            root: base.join(APP_DIR_NAME),
            source,
        })
    }

    /// `<home>/logs`, created on demand.
    pub fn logs_dir(&self) -> Result<PathBuf, AppDirError> {
        let dir = self.root.join(LOGS_DIR_NAME);
        ensure_dir(&dir)?;
        Ok(dir)
    }
}

/// Record the `--app-home` base for this process.
///
/// Returns `false` when a base was already recorded; the first one stays.
pub fn set_home_flag(base: PathBuf) -> bool {
    HOME_FLAG.set(base).is_ok()
}

fn choose_base(
    flag: Option<PathBuf>,
    env: Option<OsString>,
    platform: impl FnOnce() -> Option<PathBuf>,
) -> Option<(PathBuf, HomeSource)> {
    if let Some(base) = flag {
        return Some((base, HomeSource::Flag));
    }
    // An empty variable counts as unset.
    if let Some(base) = env.filter(|value| !value.is_empty()) {
        return Some((PathBuf::from(base), HomeSource::Environment));
    }
    platform().map(|base| (base, HomeSource::Platform))
}

fn ensure_dir(path: &Path) -> Result<(), AppDirError> {
    fs::create_dir_all(path).map_err(|source| AppDirError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}
