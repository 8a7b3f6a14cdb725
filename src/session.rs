use dotmatrix_core::{GameBoy, Result};
use log::debug;

/// Run `frames` frames, logging CPU state once a second of emulated time.
/// Returns the number of frames run.
pub fn run_frames(gb: &mut GameBoy, frames: u32) -> Result<u32> {
    for frame in 0..frames {
        gb.run_frame()?;
        if frame % 60 == 0 {
            debug!("frame {frame}: {}", gb.cpu.debug_state());
        }
    }
    Ok(frames)
}
