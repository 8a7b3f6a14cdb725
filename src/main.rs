use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use dotmatrix::config::{self, HostConfig};
use dotmatrix::screenshot;
use dotmatrix::session;
use dotmatrix::sinks::{LogAudio, LogDisplay};
use dotmatrix::storage::FileStorage;
use dotmatrix_core::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};
use dotmatrix_core::{Config, GameBoy};
use log::{error, info, warn};

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to ROM file
    rom: PathBuf,

    /// Path to boot ROM file
    #[arg(long)]
    boot_rom: Option<PathBuf>,

    /// Number of frames to run
    #[arg(long)]
    frames: Option<u32>,

    /// Write the final screen to this PNG file
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Stop on illegal opcodes instead of skipping them
    #[arg(long)]
    strict: bool,

    /// Directory for battery saves
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Config file to read instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn apply(&self, cfg: &mut HostConfig) {
        if let Some(path) = &self.boot_rom {
            cfg.boot_rom = Some(path.clone());
        }
        if let Some(frames) = self.frames {
            cfg.frames = frames;
        }
        if self.strict {
            cfg.strict_opcodes = true;
        }
        if let Some(dir) = &self.save_dir {
            cfg.save_dir = Some(dir.clone());
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let mut cfg = config::load_from_file(&config_path);
    args.apply(&mut cfg);

    let rom = std::fs::read(&args.rom).map_err(|e| {
        error!("Failed to load ROM {}: {e}", args.rom.display());
        e
    })?;

    let boot_rom = cfg
        .boot_rom
        .as_ref()
        .and_then(|path| match std::fs::read(path) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!("Failed to load boot ROM {}: {e}", path.display());
                None
            }
        });

    let save_dir = cfg
        .save_dir
        .clone()
        .or_else(|| args.rom.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));

    let storage = FileStorage::new(save_dir);
    info!("Battery saves go to {}", storage.dir().display());

    let mut gb = GameBoy::with_host(
        Config {
            strict_opcodes: cfg.strict_opcodes,
            palette: cfg.palette.palette(),
            boot_rom,
        },
        Box::new(LogDisplay),
        Box::new(LogAudio),
        Box::new(storage),
    );
    gb.load_rom(rom)?;
    if let Some(cart) = gb.cartridge() {
        info!("Loaded \"{}\"", cart.save_key());
    }

    let result = session::run_frames(&mut gb, cfg.frames);
    if let Err(e) = gb.save_ram() {
        error!("Failed to write save RAM: {e}");
    }
    let frames = result.map_err(|e| {
        error!("Emulation stopped: {e} ({})", gb.cpu.debug_state());
        e
    })?;
    info!("Ran {frames} frames");

    if let Some(path) = &args.screenshot {
        screenshot::write_png(
            path,
            SCREEN_WIDTH as u32,
            SCREEN_HEIGHT as u32,
            gb.screen(),
        )?;
        info!("Wrote {}", path.display());
    }

    Ok(())
}
