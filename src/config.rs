use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use dotmatrix_core::ppu::{self, Palette};

pub const DEFAULT_FRAMES: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PalettePreset {
    #[default]
    ClassicGreen,
    Grayscale,
}

impl PalettePreset {
    pub fn palette(self) -> Palette {
        match self {
            Self::ClassicGreen => ppu::CLASSIC_GREEN,
            Self::Grayscale => ppu::GRAYSCALE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub boot_rom: Option<PathBuf>,
    /// Directory for battery saves. Defaults to the ROM's directory.
    pub save_dir: Option<PathBuf>,
    pub strict_opcodes: bool,
    pub palette: PalettePreset,
    pub frames: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            boot_rom: None,
            save_dir: None,
            strict_opcodes: false,
            palette: PalettePreset::default(),
            frames: DEFAULT_FRAMES,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("dotmatrix").join("config.toml");
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("dotmatrix").join("config.toml");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("dotmatrix")
            .join("config.toml");
    }

    PathBuf::from("config.toml")
}

pub fn load_from_file(path: &Path) -> HostConfig {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return HostConfig::default(),
    };

    match toml::from_str::<HostConfig>(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(
                "Failed to parse config {}: {e}; using defaults",
                path.display()
            );
            HostConfig::default()
        }
    }
}

pub fn save_to_file(path: &Path, cfg: &HostConfig) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let text = toml::to_string_pretty(cfg).map_err(std::io::Error::other)?;
    std::fs::write(path, text)
}
