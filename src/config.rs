//! YAML configuration and hot reload.

use crate::capture::{CaptureConfig, SourceKind};
use crate::filter::FilterParams;
use crate::pump::FilterControls;
use anyhow::{bail, Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use tracing::{error, info, warn};

/// Where the composite pass takes its mask from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskKind {
    /// Sobel edges of the frame itself
    #[default]
    Edge,
    /// A grayscale image file
    Image,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    pub mask: MaskKind,
    pub mask_image: Option<PathBuf>,
    #[serde(flatten)]
    pub params: FilterParams,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mask: MaskKind::Edge,
            mask_image: None,
            params: FilterParams::default(),
        }
    }
}

impl FilterConfig {
    /// Pushes the switch and parameters to a running pump.
    pub fn apply(&self, controls: &FilterControls) {
        controls.set_enabled(self.enabled);
        controls.request_params(self.params);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub title: String,
    /// RGBA colour of the bars around the fitted image
    pub clear_color: [f32; 4],
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            title: "silkcam".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub filter: FilterConfig,
    pub display: DisplayConfig,
}

impl Config {
    /// Reads and validates a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| format!("failed to read config {:?}", path))?;
        let config = Self::from_yaml(&content).with_context(|| format!("invalid config {:?}", path))?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let capture = &self.capture;
        if capture.width == 0 || capture.height == 0 {
            bail!("capture size must be non-zero, got {}x{}", capture.width, capture.height);
        }
        if capture.fps == 0 {
            bail!("capture fps must be positive");
        }
        if capture.source == SourceKind::Image && capture.image.is_none() {
            bail!("capture.source is `image` but capture.image is not set");
        }
        self.filter.params.validate()?;
        if self.filter.mask == MaskKind::Image && self.filter.mask_image.is_none() {
            bail!("filter.mask is `image` but filter.mask_image is not set");
        }
        if self.display.clear_color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            bail!("display.clear_color components must lie in [0, 1]");
        }
        Ok(())
    }
}

/// Watches the config file and reports changes to the filter section.
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    rx: Receiver<std::result::Result<Event, notify::Error>>,
    current: Config,
}

impl ConfigWatcher {
    /// Starts watching `path`. `current` is the configuration in effect,
    /// including command-line overrides.
    pub fn new(path: &Path, current: Config) -> Result<Self> {
        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(tx, notify::Config::default())?;
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {:?}", path))?;
        info!("Watching config file {:?} for changes", path);
        Ok(Self {
            path: path.to_path_buf(),
            _watcher: watcher,
            rx,
            current,
        })
    }

    /// Drains file events and returns the new filter section if it changed.
    pub fn check_for_changes(&mut self) -> Option<FilterConfig> {
        let mut needs_reload = false;
        while let Ok(res) = self.rx.try_recv() {
            match res {
                Ok(event) if matches!(event.kind, notify::EventKind::Modify(_) | notify::EventKind::Create(_)) => {
                    needs_reload = true;
                }
                Ok(_) => {}
                Err(e) => warn!("Config watcher error: {}", e),
            }
        }
        if !needs_reload {
            return None;
        }

        info!("Config file changed, checking for updates...");
        match Config::load(&self.path) {
            Ok(new_config) => self.apply(new_config),
            Err(e) => {
                error!("Keeping previous configuration: {:#}", e);
                None
            }
        }
    }

    /// Records `new_config` and returns the parts that can change live.
    fn apply(&mut self, mut new_config: Config) -> Option<FilterConfig> {
        if new_config.capture != self.current.capture {
            warn!("Capture settings changed; restart to apply them");
        }
        if new_config.display != self.current.display {
            warn!("Display settings changed; restart to apply them");
        }
        if (new_config.filter.mask, &new_config.filter.mask_image)
            != (self.current.filter.mask, &self.current.filter.mask_image)
        {
            warn!("Mask settings changed; restart to apply them");
            new_config.filter.mask = self.current.filter.mask;
            new_config.filter.mask_image = self.current.filter.mask_image.clone();
        }

        let changed = new_config.filter != self.current.filter;
        let filter = new_config.filter.clone();
        // Sections that need a restart stay as they were, so later reloads
        // keep warning about them.
        self.current.filter = new_config.filter;
        changed.then_some(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
capture:
  source: image
  image: face.png
  width: 1280
  height: 720
filter:
  enabled: false
  blur_sigma: 3.5
  whitening: 0.25
display:
  clear_color: [0.1, 0.1, 0.1, 1.0]
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.capture.source, SourceKind::Image);
        assert_eq!(config.capture.image, Some(PathBuf::from("face.png")));
        assert_eq!((config.capture.width, config.capture.height, config.capture.fps), (1280, 720, 30));
        assert!(!config.filter.enabled);
        assert_eq!(config.filter.params.blur_sigma, 3.5);
        assert_eq!(config.filter.params.edge_sigma, 1.0);
        assert_eq!(config.filter.params.whitening, 0.25);
        assert_eq!(config.filter.mask, MaskKind::Edge);
        assert_eq!(config.display.title, "silkcam");
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.filter.enabled);
    }

    #[test]
    fn test_validation_errors() {
        assert!(Config::from_yaml("filter:\n  blur_sigma: 40.0\n").is_err());
        assert!(Config::from_yaml("filter:\n  mask: image\n").is_err());
        assert!(Config::from_yaml("capture:\n  source: image\n").is_err());
        assert!(Config::from_yaml("capture:\n  fps: 0\n").is_err());
        assert!(Config::from_yaml("display:\n  clear_color: [2.0, 0.0, 0.0, 1.0]\n").is_err());
        assert!(Config::from_yaml("capture:\n  source: tape\n").is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let missing = Path::new("/nonexistent/silkcam.yaml");
        let err = Config::load(missing).unwrap_err();
        assert!(format!("{:#}", err).contains("silkcam.yaml"));
    }

    #[test]
    fn test_filter_changes_are_reported_once() {
        let path = std::env::temp_dir().join(format!("silkcam-config-{}.yaml", std::process::id()));
        fs::write(&path, "{}").unwrap();
        let mut watcher = ConfigWatcher::new(&path, Config::default()).unwrap();

        let mut changed = Config::default();
        changed.filter.params.whitening = 0.5;
        let update = watcher.apply(changed.clone()).unwrap();
        assert_eq!(update.params.whitening, 0.5);
        assert!(watcher.apply(changed).is_none());

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_mask_changes_are_not_applied_live() {
        let path = std::env::temp_dir().join(format!("silkcam-mask-{}.yaml", std::process::id()));
        fs::write(&path, "{}").unwrap();
        let mut watcher = ConfigWatcher::new(&path, Config::default()).unwrap();

        let mut changed = Config::default();
        changed.filter.mask = MaskKind::Image;
        changed.filter.mask_image = Some(PathBuf::from("mask.png"));
        assert!(watcher.apply(changed).is_none());
        assert_eq!(watcher.current.filter.mask, MaskKind::Edge);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_filter_section_applies_to_controls() {
        let controls = FilterControls::new(true);
        let filter = FilterConfig {
            enabled: false,
            ..Default::default()
        };
        filter.apply(&controls);
        assert!(!controls.is_enabled());
    }
}
