use dotmatrix_core::apu::AudioEvent;
use dotmatrix_core::host::{AudioSink, DisplaySink, Frame};
use log::{debug, trace};

/// Audio sink for headless runs: every event goes to the log.
#[derive(Debug, Default)]
pub struct LogAudio;

impl AudioSink for LogAudio {
    fn on_event(&mut self, event: AudioEvent) {
        match &event {
            AudioEvent::Start {
                channel,
                frequency,
                volume,
                ..
            } => debug!("ch{channel} start {frequency:.1} Hz vol {volume:.2}"),
            AudioEvent::Stop { channel } => debug!("ch{channel} stop"),
            other => debug!("{other:?}"),
        }
    }
}

#[derive(Debug, Default)]
pub struct LogDisplay;

impl DisplaySink for LogDisplay {
    fn present(&mut self, frame: &Frame<'_>) {
        trace!("frame {}", frame.number);
    }
}
