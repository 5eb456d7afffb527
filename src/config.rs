use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{PlayerError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Real-time speed multiplier applied to every inter-event wait.
    pub tempo_scale: f64,
    /// Start over from the first event when the song ends.
    pub repeat_on_end: bool,
    /// Substring of the output port name to connect to.
    pub port: Option<String>,
    pub loop_bars: Option<(f64, f64)>,
    pub loop_active: bool,
    pub progress_interval_ms: u64,
    pub log_filter: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            tempo_scale: 1.0,
            repeat_on_end: true,
            port: None,
            loop_bars: None,
            loop_active: false,
            progress_interval_ms: 50,
            log_filter: "info".to_string(),
        }
    }
}

impl PlayerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let ron_string = fs::read_to_string(path)?;
        Self::from_ron(&ron_string)
    }

    pub fn from_ron(ron_string: &str) -> Result<Self> {
        ron::from_str(ron_string).map_err(|e| PlayerError::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| PlayerError::Config(e.to_string()))?;
        fs::write(path, ron_string)?;
        Ok(())
    }
}
