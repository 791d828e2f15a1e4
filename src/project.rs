use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const PROJECT_FILE: &str = "project.ron";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSource {
    pub id: String,
    /// Standard MIDI File, relative to the project directory unless absolute.
    pub path: PathBuf,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    /// Overrides the tempo declared by the first track.
    #[serde(default)]
    pub tempo: Option<f64>,
    #[serde(default = "default_lead_in")]
    pub lead_in_secs: f64,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Restart playback from the top once every note has released.
    #[serde(default)]
    pub looping: bool,
    pub tracks: Vec<TrackSource>,
    #[serde(skip)]
    base_dir: PathBuf,
}

fn default_lead_in() -> f64 {
    0.05
}

fn default_tick_interval() -> u64 {
    2
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tempo: None,
            lead_in_secs: default_lead_in(),
            tick_interval_ms: default_tick_interval(),
            looping: false,
            tracks: Vec::new(),
            base_dir: PathBuf::new(),
        }
    }

    pub fn with_track(mut self, id: impl Into<String>, path: impl Into<PathBuf>, enabled: bool) -> Self {
        self.tracks.push(TrackSource {
            id: id.into(),
            path: path.into(),
            enabled,
        });
        self
    }

    /// Accepts either the project file itself or the directory holding
    /// `project.ron`.
    pub fn load(project_path: &Path) -> Result<Self, ConfigError> {
        let ron_path = if project_path.is_dir() {
            project_path.join(PROJECT_FILE)
        } else {
            project_path.to_path_buf()
        };
        let ron_string = fs::read_to_string(&ron_path).map_err(|source| ConfigError::Io {
            path: ron_path.clone(),
            source,
        })?;
        let mut project: Project = ron::from_str(&ron_string)?;
        project.base_dir = ron_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Ok(project)
    }

    pub fn save(&self, project_dir: &Path) -> Result<(), ConfigError> {
        fs::create_dir_all(project_dir).map_err(|source| ConfigError::Io {
            path: project_dir.to_path_buf(),
            source,
        })?;

        let ron_path = project_dir.join(PROJECT_FILE);
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(&ron_path, ron_string).map_err(|source| ConfigError::Io {
            path: ron_path,
            source,
        })?;

        Ok(())
    }

    pub fn resolve(&self, source: &TrackSource) -> PathBuf {
        if source.path.is_absolute() {
            source.path.clone()
        } else {
            self.base_dir.join(&source.path)
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}
