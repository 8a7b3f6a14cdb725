//! Four-channel sound unit.
//!
//! The unit does not produce samples. It tracks each channel's state machine
//! (length, envelope, sweep) and tells the [`AudioSink`] what to play:
//! which waveform, at what frequency, at what volume, and when to stop.

use std::f32::consts::TAU;
use std::sync::{Arc, LazyLock};

use crate::error::{CoreError, Result};
use crate::host::AudioSink;
use crate::mmu::IoDevice;

#[cfg(feature = "apu-trace")]
macro_rules! apu_trace {
    ($($arg:tt)*) => {
        log::trace!(target: "apu", $($arg)*);
    };
}
#[cfg(not(feature = "apu-trace"))]
macro_rules! apu_trace {
    ($($arg:tt)*) => {};
}

pub const NR10: u16 = 0xFF10;
pub const NR11: u16 = 0xFF11;
pub const NR12: u16 = 0xFF12;
pub const NR13: u16 = 0xFF13;
pub const NR14: u16 = 0xFF14;
pub const NR21: u16 = 0xFF16;
pub const NR22: u16 = 0xFF17;
pub const NR23: u16 = 0xFF18;
pub const NR24: u16 = 0xFF19;
pub const NR30: u16 = 0xFF1A;
pub const NR31: u16 = 0xFF1B;
pub const NR32: u16 = 0xFF1C;
pub const NR33: u16 = 0xFF1D;
pub const NR34: u16 = 0xFF1E;
pub const NR41: u16 = 0xFF20;
pub const NR42: u16 = 0xFF21;
pub const NR43: u16 = 0xFF22;
pub const NR44: u16 = 0xFF23;
pub const NR50: u16 = 0xFF24;
pub const NR51: u16 = 0xFF25;
pub const NR52: u16 = 0xFF26;
pub const WAVE_RAM: u16 = 0xFF30;
pub const WAVE_RAM_END: u16 = 0xFF3F;

pub const CHANNELS: usize = 4;
const WAVE_CHANNEL: usize = 2;
const NOISE_CHANNEL: usize = 3;

// 512 Hz frame sequencer tick
pub const FRAME_SEQUENCER_PERIOD: u32 = 8192;

const DUTY_FRACTIONS: [f32; 4] = [0.125, 0.25, 0.5, 0.75];
// NR32 output level: mute, 100%, 50%, 25%
const WAVE_LEVELS: [f32; 4] = [0.0, 1.0, 0.5, 0.25];
const WAVE_OVERSAMPLE: usize = 4;

/// Bits that read back as 1 regardless of what was written.
fn read_mask(addr: u16) -> u8 {
    match addr {
        NR10 => 0x80,
        NR11 | NR21 => 0x3F,
        NR13 | NR23 | NR33 | NR31 | NR41 => 0xFF,
        NR14 | NR24 | NR34 | NR44 => 0xBF,
        NR30 => 0x7F,
        NR32 => 0x9F,
        _ => 0x00,
    }
}

/// Waveform handed to the sink when a channel starts.
#[derive(Debug, Clone, PartialEq)]
pub enum Waveform {
    /// Square wave; `duty` is the fraction of the period spent high.
    Pulse { duty: f32 },
    /// Fourier coefficients of one period of the wave table.
    Periodic(PeriodicWave),
    /// One full LFSR period as ±1 samples, meant to be looped at the
    /// channel frequency (one sample per LFSR clock).
    Noise(Arc<[f32]>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PeriodicWave {
    pub real: Vec<f32>,
    pub imag: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    Start {
        channel: usize,
        waveform: Waveform,
        frequency: f32,
        volume: f32,
    },
    Stop {
        channel: usize,
    },
    Frequency {
        channel: usize,
        frequency: f32,
    },
    Volume {
        channel: usize,
        volume: f32,
    },
    Waveform {
        channel: usize,
        waveform: Waveform,
    },
    /// NR50/NR51 changed. Volumes are 0-7, `panning` is the raw NR51 value.
    Mixer {
        left_volume: u8,
        right_volume: u8,
        panning: u8,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Envelope {
    volume: u8,
    period: u8,
    add: bool,
    timer: u8,
}

impl Envelope {
    fn reset(&mut self, val: u8) {
        self.volume = val >> 4;
        self.period = val & 0x07;
        self.add = val & 0x08 != 0;
        self.timer = self.period;
    }

    /// Returns true when the volume changed.
    fn clock(&mut self) -> bool {
        if self.period == 0 {
            return false;
        }
        self.timer = self.timer.saturating_sub(1);
        if self.timer > 0 {
            return false;
        }
        self.timer = self.period;
        match self.add {
            true if self.volume < 15 => self.volume += 1,
            false if self.volume > 0 => self.volume -= 1,
            _ => return false,
        }
        true
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Channel {
    /// Connected to the mixer.
    pub active: bool,
    pub length: u16,
    pub length_enable: bool,
    /// Cycle count at the most recent trigger.
    pub started_at: u64,
    envelope: Envelope,
    sweep_timer: u8,
}

impl Channel {
    /// Envelope volume, 0-15.
    pub fn volume(&self) -> u8 {
        self.envelope.volume
    }
}

const fn register_base(index: usize) -> usize {
    index * 5
}

const fn length_limits(index: usize) -> (u16, u8) {
    if index == WAVE_CHANNEL {
        (256, 0xFF)
    } else {
        (64, 0x3F)
    }
}

pub fn pulse_hz(freq: u16) -> f32 {
    131_072.0 / (2048 - (freq & 0x07FF)) as f32
}

pub fn wave_hz(freq: u16) -> f32 {
    65_536.0 / (2048 - (freq & 0x07FF)) as f32
}

/// LFSR clock rate for an NR43 value.
pub fn noise_hz(nr43: u8) -> f32 {
    let shift = (nr43 >> 4) as i32;
    let divisor = match nr43 & 0x07 {
        0 => 0.5,
        r => r as f32,
    };
    524_288.0 / divisor / 2f32.powi(shift + 1)
}

fn lfsr_sequence(width7: bool) -> Arc<[f32]> {
    let period = if width7 { 127 } else { 32_767 };
    let mut lfsr: u16 = 0x7FFF;
    (0..period)
        .map(|_| {
            let bit = (lfsr ^ (lfsr >> 1)) & 1;
            lfsr = (lfsr >> 1) | (bit << 14);
            if width7 {
                lfsr = (lfsr & !0x40) | (bit << 6);
            }
            if lfsr & 1 == 0 { 1.0 } else { -1.0 }
        })
        .collect()
}

static NOISE_LONG: LazyLock<Arc<[f32]>> = LazyLock::new(|| lfsr_sequence(false));
static NOISE_SHORT: LazyLock<Arc<[f32]>> = LazyLock::new(|| lfsr_sequence(true));

pub fn noise_buffer(width7: bool) -> Arc<[f32]> {
    if width7 {
        Arc::clone(&NOISE_SHORT)
    } else {
        Arc::clone(&NOISE_LONG)
    }
}

/// Decompose the 32 nibbles of wave RAM, each held for `WAVE_OVERSAMPLE`
/// samples, into cosine (`real`) and sine (`imag`) harmonic amplitudes.
pub fn periodic_wave(ram: &[u8; 16]) -> PeriodicWave {
    let samples: Vec<f32> = ram
        .iter()
        .flat_map(|b| [b >> 4, b & 0x0F])
        .flat_map(|n| std::iter::repeat_n(n as f32 / 7.5 - 1.0, WAVE_OVERSAMPLE))
        .collect();
    let n = samples.len();
    let harmonics = n / 2;
    let mut wave = PeriodicWave {
        real: vec![0.0; harmonics],
        imag: vec![0.0; harmonics],
    };
    for k in 1..harmonics {
        let (mut re, mut im) = (0.0f32, 0.0f32);
        for (i, &x) in samples.iter().enumerate() {
            let phase = TAU * (k * i) as f32 / n as f32;
            re += x * phase.cos();
            im += x * phase.sin();
        }
        wave.real[k] = re * 2.0 / n as f32;
        wave.imag[k] = im * 2.0 / n as f32;
    }
    wave
}

pub struct Apu {
    /// Shadows of NR10-NR51, indexed from 0xFF10.
    regs: [u8; 0x16],
    wave_ram: [u8; 16],
    channels: [Channel; CHANNELS],
    powered: bool,
    sequencer_cycles: u32,
    sequencer_step: u8,
    cycles: u64,
    sink: Box<dyn AudioSink>,
}

impl Apu {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            regs: [0; 0x16],
            wave_ram: [0; 16],
            channels: Default::default(),
            powered: true,
            sequencer_cycles: 0,
            sequencer_step: 0,
            cycles: 0,
            sink,
        }
    }

    pub fn channel(&self, index: usize) -> Result<&Channel> {
        self.channels
            .get(index)
            .ok_or(CoreError::InvalidChannelIndex { index })
    }

    fn channel_mut(&mut self, index: usize) -> Result<&mut Channel> {
        self.channels
            .get_mut(index)
            .ok_or(CoreError::InvalidChannelIndex { index })
    }

    pub fn powered(&self) -> bool {
        self.powered
    }

    pub fn sequencer_step(&self) -> u8 {
        self.sequencer_step
    }

    pub fn wave_ram(&self) -> &[u8; 16] {
        &self.wave_ram
    }

    fn reg(&self, addr: u16) -> u8 {
        self.regs[(addr - NR10) as usize]
    }

    /// 11-bit frequency register of a tone channel.
    pub fn frequency_register(&self, index: usize) -> Result<u16> {
        if index >= NOISE_CHANNEL {
            return Err(CoreError::InvalidChannelIndex { index });
        }
        let base = register_base(index);
        Ok(self.regs[base + 3] as u16 | ((self.regs[base + 4] as u16 & 0x07) << 8))
    }

    fn set_frequency_register(&mut self, index: usize, freq: u16) {
        let base = register_base(index);
        self.regs[base + 3] = freq as u8;
        self.regs[base + 4] = (self.regs[base + 4] & !0x07) | ((freq >> 8) as u8 & 0x07);
    }

    /// Output frequency in Hz the sink should play for `index`.
    pub fn frequency_hz(&self, index: usize) -> Result<f32> {
        match index {
            0 | 1 => Ok(pulse_hz(self.frequency_register(index)?)),
            WAVE_CHANNEL => Ok(wave_hz(self.frequency_register(index)?)),
            NOISE_CHANNEL => Ok(noise_hz(self.reg(NR43))),
            _ => Err(CoreError::InvalidChannelIndex { index }),
        }
    }

    /// Output volume in 0.0-1.0.
    pub fn volume(&self, index: usize) -> Result<f32> {
        let channel = self.channel(index)?;
        Ok(if index == WAVE_CHANNEL {
            WAVE_LEVELS[((self.reg(NR32) >> 5) & 0x03) as usize]
        } else {
            channel.envelope.volume as f32 / 15.0
        })
    }

    pub fn waveform(&self, index: usize) -> Result<Waveform> {
        match index {
            0 | 1 => {
                let duty = self.regs[register_base(index) + 1] >> 6;
                Ok(Waveform::Pulse {
                    duty: DUTY_FRACTIONS[duty as usize],
                })
            }
            WAVE_CHANNEL => Ok(Waveform::Periodic(periodic_wave(&self.wave_ram))),
            NOISE_CHANNEL => Ok(Waveform::Noise(noise_buffer(self.reg(NR43) & 0x08 != 0))),
            _ => Err(CoreError::InvalidChannelIndex { index }),
        }
    }

    fn dac_enabled(&self, index: usize) -> bool {
        if index == WAVE_CHANNEL {
            self.reg(NR30) & 0x80 != 0
        } else {
            self.regs[register_base(index) + 2] & 0xF8 != 0
        }
    }

    fn emit(&mut self, event: AudioEvent) {
        apu_trace!("{event:?}");
        self.sink.on_event(event);
    }

    fn trigger(&mut self, index: usize) -> Result<()> {
        if !self.dac_enabled(index) {
            return Ok(());
        }
        let (max, mask) = length_limits(index);
        let base = register_base(index);
        let length_reg = self.regs[base + 1];
        let envelope_reg = self.regs[base + 2];
        let sweep_period = (self.reg(NR10) >> 4) & 0x07;
        let now = self.cycles;

        let channel = self.channel_mut(index)?;
        channel.started_at = now;
        if channel.length == 0 {
            channel.length = max - (length_reg & mask) as u16;
        }
        if index != WAVE_CHANNEL {
            channel.envelope.reset(envelope_reg);
        }
        if index == 0 {
            channel.sweep_timer = sweep_period;
        }
        channel.active = true;

        let event = AudioEvent::Start {
            channel: index,
            waveform: self.waveform(index)?,
            frequency: self.frequency_hz(index)?,
            volume: self.volume(index)?,
        };
        self.emit(event);
        Ok(())
    }

    fn stop(&mut self, index: usize) -> Result<()> {
        let channel = self.channel_mut(index)?;
        if channel.active {
            channel.active = false;
            self.emit(AudioEvent::Stop { channel: index });
        }
        Ok(())
    }

    fn emit_frequency(&mut self, index: usize) -> Result<()> {
        if self.channel(index)?.active {
            let frequency = self.frequency_hz(index)?;
            self.emit(AudioEvent::Frequency {
                channel: index,
                frequency,
            });
        }
        Ok(())
    }

    fn emit_volume(&mut self, index: usize) -> Result<()> {
        let volume = self.volume(index)?;
        self.emit(AudioEvent::Volume {
            channel: index,
            volume,
        });
        Ok(())
    }

    fn emit_mixer(&mut self) {
        let nr50 = self.reg(NR50);
        self.emit(AudioEvent::Mixer {
            left_volume: (nr50 >> 4) & 0x07,
            right_volume: nr50 & 0x07,
            panning: self.reg(NR51),
        });
    }

    fn write_channel(&mut self, index: usize, reg: usize, val: u8) -> Result<()> {
        match (index, reg) {
            (0, 0) => {}
            (_, 1) => {
                let (max, mask) = length_limits(index);
                let channel = self.channel_mut(index)?;
                channel.length = max - (val & mask) as u16;
                if index < WAVE_CHANNEL && channel.active {
                    let waveform = self.waveform(index)?;
                    self.emit(AudioEvent::Waveform {
                        channel: index,
                        waveform,
                    });
                }
            }
            (WAVE_CHANNEL, 0) => {
                if !self.dac_enabled(index) {
                    self.stop(index)?;
                }
            }
            (WAVE_CHANNEL, 2) => {
                if self.channel(index)?.active {
                    self.emit_volume(index)?;
                }
            }
            (_, 2) => {
                if !self.dac_enabled(index) {
                    self.stop(index)?;
                }
            }
            (NOISE_CHANNEL, 3) => {
                if self.channel(index)?.active {
                    let waveform = self.waveform(index)?;
                    self.emit(AudioEvent::Waveform {
                        channel: index,
                        waveform,
                    });
                    self.emit_frequency(index)?;
                }
            }
            (_, 3) => self.emit_frequency(index)?,
            (_, 4) => {
                let channel = self.channel_mut(index)?;
                channel.length_enable = val & 0x40 != 0;
                let active = channel.active;
                if val & 0x80 != 0 {
                    if !active {
                        self.trigger(index)?;
                    } else if index != NOISE_CHANNEL {
                        self.emit_frequency(index)?;
                    }
                } else if active {
                    self.stop(index)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn power_off(&mut self) -> Result<()> {
        for index in 0..CHANNELS {
            self.stop(index)?;
        }
        self.regs = [0; 0x16];
        self.channels = Default::default();
        self.powered = false;
        Ok(())
    }

    /// Store a register value without any of the side effects of a write.
    /// Used to seed post-boot register contents.
    pub fn preload(&mut self, addr: u16, val: u8) {
        match addr {
            NR10..=NR51 => self.regs[(addr - NR10) as usize] = val,
            NR52 => self.powered = val & 0x80 != 0,
            WAVE_RAM..=WAVE_RAM_END => self.wave_ram[(addr - WAVE_RAM) as usize] = val,
            _ => {}
        }
    }

    fn clock_lengths(&mut self) -> Result<()> {
        for index in 0..CHANNELS {
            let channel = &mut self.channels[index];
            if !channel.active || !channel.length_enable || channel.length == 0 {
                continue;
            }
            channel.length -= 1;
            if channel.length == 0 {
                self.stop(index)?;
            }
        }
        Ok(())
    }

    fn clock_sweep(&mut self) -> Result<()> {
        let nr10 = self.reg(NR10);
        let period = (nr10 >> 4) & 0x07;
        let channel = &mut self.channels[0];
        if !channel.active || period == 0 {
            return Ok(());
        }
        channel.sweep_timer = channel.sweep_timer.saturating_sub(1);
        if channel.sweep_timer > 0 {
            return Ok(());
        }
        channel.sweep_timer = period;

        let shift = nr10 & 0x07;
        let current = self.frequency_register(0)?;
        let delta = current >> shift;
        let next = if nr10 & 0x08 != 0 {
            current.wrapping_sub(delta)
        } else {
            current + delta
        };
        if next > 2047 {
            return self.stop(0);
        }
        if shift != 0 {
            self.set_frequency_register(0, next);
            self.emit_frequency(0)?;
        }
        Ok(())
    }

    fn clock_envelopes(&mut self) -> Result<()> {
        for index in [0, 1, NOISE_CHANNEL] {
            let channel = &mut self.channels[index];
            if channel.active && channel.envelope.clock() {
                self.emit_volume(index)?;
            }
        }
        Ok(())
    }

    fn clock_frame_sequencer(&mut self) -> Result<()> {
        let step = self.sequencer_step;
        if step % 2 == 0 {
            self.clock_lengths()?;
        }
        if step % 4 == 2 {
            self.clock_sweep()?;
        }
        if step == 7 {
            self.clock_envelopes()?;
        }
        self.sequencer_step = (step + 1) & 7;
        Ok(())
    }

    /// Advance the frame sequencer by `cycles` clock cycles.
    pub fn step(&mut self, cycles: u32) -> Result<()> {
        self.cycles += cycles as u64;
        if !self.powered {
            return Ok(());
        }
        self.sequencer_cycles += cycles;
        while self.sequencer_cycles >= FRAME_SEQUENCER_PERIOD {
            self.sequencer_cycles -= FRAME_SEQUENCER_PERIOD;
            self.clock_frame_sequencer()?;
        }
        Ok(())
    }
}

impl IoDevice for Apu {
    fn name(&self) -> &'static str {
        "audio unit"
    }

    fn read_reg(&self, addr: u16) -> Result<u8> {
        match addr {
            0xFF15 | 0xFF1F | 0xFF27..=0xFF2F => Ok(0),
            NR52 => {
                let active = self
                    .channels
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.active)
                    .fold(0u8, |acc, (i, _)| acc | 1 << i);
                Ok(u8::from(self.powered) << 7 | 0x70 | active)
            }
            NR10..=NR51 => Ok(self.reg(addr) | read_mask(addr)),
            WAVE_RAM..=WAVE_RAM_END => Ok(self.wave_ram[(addr - WAVE_RAM) as usize]),
            _ => Err(CoreError::UnmappedRegister {
                address: addr,
                device: self.name(),
            }),
        }
    }

    fn write_reg(&mut self, addr: u16, val: u8, _if_reg: &mut u8) -> Result<()> {
        match addr {
            WAVE_RAM..=WAVE_RAM_END => {
                self.wave_ram[(addr - WAVE_RAM) as usize] = val;
                if self.channel(WAVE_CHANNEL)?.active {
                    let waveform = self.waveform(WAVE_CHANNEL)?;
                    self.emit(AudioEvent::Waveform {
                        channel: WAVE_CHANNEL,
                        waveform,
                    });
                }
                return Ok(());
            }
            NR52 => {
                let on = val & 0x80 != 0;
                if self.powered && !on {
                    self.power_off()?;
                } else if !self.powered && on {
                    self.powered = true;
                    self.sequencer_step = 0;
                    self.sequencer_cycles = 0;
                }
                return Ok(());
            }
            0xFF15 | 0xFF1F | 0xFF27..=0xFF2F => return Ok(()),
            NR10..=NR51 => {}
            _ => {
                return Err(CoreError::UnmappedRegister {
                    address: addr,
                    device: self.name(),
                });
            }
        }
        if !self.powered {
            return Ok(());
        }
        self.regs[(addr - NR10) as usize] = val;
        match addr {
            NR50 | NR51 => {
                self.emit_mixer();
                Ok(())
            }
            _ => {
                let offset = (addr - NR10) as usize;
                self.write_channel(offset / 5, offset % 5, val)
            }
        }
    }

    fn advance(&mut self, cycles: u32, _if_reg: &mut u8) {
        if let Err(err) = self.step(cycles) {
            log::error!("audio unit: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<AudioEvent>>>);

    impl AudioSink for Recorder {
        fn on_event(&mut self, event: AudioEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<AudioEvent> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    fn apu() -> (Apu, Recorder) {
        let rec = Recorder::default();
        (Apu::new(Box::new(rec.clone())), rec)
    }

    fn write(apu: &mut Apu, addr: u16, val: u8) {
        let mut if_reg = 0;
        apu.write_reg(addr, val, &mut if_reg).unwrap();
    }

    #[test]
    fn trigger_reloads_empty_length_counter() {
        let (mut apu, _) = apu();
        write(&mut apu, NR12, 0xF0);
        write(&mut apu, NR14, 0x80);
        assert!(apu.channel(0).unwrap().active);
        assert_eq!(apu.channel(0).unwrap().length, 64);

        write(&mut apu, NR30, 0x80);
        write(&mut apu, NR34, 0x80);
        assert_eq!(apu.channel(2).unwrap().length, 256);
    }

    #[test]
    fn length_expiry_stops_channel() {
        let (mut apu, rec) = apu();
        write(&mut apu, NR21, 0x3C); // length 4
        write(&mut apu, NR22, 0xF0);
        write(&mut apu, NR24, 0xC0);
        assert_eq!(apu.channel(1).unwrap().length, 4);
        // Length ticks land on every other sequencer step.
        apu.step(FRAME_SEQUENCER_PERIOD * 6).unwrap();
        assert!(apu.channel(1).unwrap().active);
        apu.step(FRAME_SEQUENCER_PERIOD).unwrap();
        assert!(!apu.channel(1).unwrap().active);
        assert_eq!(rec.take().last(), Some(&AudioEvent::Stop { channel: 1 }));
    }

    #[test]
    fn length_only_counts_when_enabled() {
        let (mut apu, _) = apu();
        write(&mut apu, NR21, 0x3F);
        write(&mut apu, NR22, 0xF0);
        write(&mut apu, NR24, 0x80);
        apu.step(FRAME_SEQUENCER_PERIOD * 16).unwrap();
        assert!(apu.channel(1).unwrap().active);
        assert_eq!(apu.channel(1).unwrap().length, 1);
    }

    #[test]
    fn start_event_carries_pulse_parameters() {
        let (mut apu, rec) = apu();
        write(&mut apu, NR11, 0x80);
        write(&mut apu, NR12, 0xF0);
        write(&mut apu, NR13, 0x00);
        write(&mut apu, NR14, 0x87);
        let events = rec.take();
        assert_eq!(
            events,
            vec![AudioEvent::Start {
                channel: 0,
                waveform: Waveform::Pulse { duty: 0.5 },
                frequency: 131_072.0 / 256.0,
                volume: 1.0,
            }]
        );
    }

    #[test]
    fn write_without_trigger_bit_stops_active_channel() {
        let (mut apu, rec) = apu();
        write(&mut apu, NR22, 0xF0);
        write(&mut apu, NR24, 0x80);
        rec.take();
        write(&mut apu, NR24, 0x00);
        assert!(!apu.channel(1).unwrap().active);
        assert_eq!(rec.take(), vec![AudioEvent::Stop { channel: 1 }]);
    }

    #[test]
    fn wave_ram_write_while_playing_updates_waveform() {
        let (mut apu, rec) = apu();
        write(&mut apu, WAVE_RAM, 0x12);
        assert!(rec.take().is_empty());

        write(&mut apu, NR30, 0x80);
        write(&mut apu, NR34, 0x80);
        rec.take();
        write(&mut apu, WAVE_RAM + 1, 0xF0);
        assert_eq!(
            rec.take(),
            vec![AudioEvent::Waveform {
                channel: 2,
                waveform: Waveform::Periodic(periodic_wave(apu.wave_ram())),
            }]
        );
    }

    #[test]
    fn dac_off_blocks_trigger() {
        let (mut apu, rec) = apu();
        write(&mut apu, NR12, 0x00);
        write(&mut apu, NR14, 0x80);
        assert!(!apu.channel(0).unwrap().active);
        assert!(rec.take().is_empty());
    }

    #[test]
    fn envelope_steps_volume_every_eighth_tick() {
        let (mut apu, rec) = apu();
        write(&mut apu, NR42, 0xF1); // volume 15, decrease, period 1
        write(&mut apu, NR44, 0x80);
        rec.take();
        apu.step(FRAME_SEQUENCER_PERIOD * 8).unwrap();
        assert_eq!(apu.channel(3).unwrap().volume(), 14);
        assert_eq!(
            rec.take(),
            vec![AudioEvent::Volume {
                channel: 3,
                volume: 14.0 / 15.0
            }]
        );
    }

    #[test]
    fn sweep_overflow_disables_channel_one() {
        let (mut apu, _) = apu();
        write(&mut apu, NR10, 0x11); // period 1, add, shift 1
        write(&mut apu, NR12, 0xF0);
        write(&mut apu, NR13, 0xFF);
        write(&mut apu, NR14, 0x86); // freq 0x6FF, trigger
        apu.step(FRAME_SEQUENCER_PERIOD * 3).unwrap();
        // 0x6FF + 0x37F = 0xA7E > 2047
        assert!(!apu.channel(0).unwrap().active);
    }

    #[test]
    fn sweep_writes_frequency_back() {
        let (mut apu, rec) = apu();
        write(&mut apu, NR10, 0x12); // period 1, add, shift 2
        write(&mut apu, NR12, 0xF0);
        write(&mut apu, NR13, 0x00);
        write(&mut apu, NR14, 0x81); // freq 0x100
        rec.take();
        apu.step(FRAME_SEQUENCER_PERIOD * 3).unwrap();
        assert_eq!(apu.frequency_register(0), Ok(0x140));
        assert_eq!(
            rec.take(),
            vec![AudioEvent::Frequency {
                channel: 0,
                frequency: pulse_hz(0x140)
            }]
        );
    }

    #[test]
    fn power_off_clears_registers_and_stops_channels() {
        let (mut apu, _) = apu();
        write(&mut apu, NR50, 0x77);
        write(&mut apu, NR22, 0xF0);
        write(&mut apu, NR24, 0x80);
        assert_eq!(apu.read_reg(NR52), Ok(0xF2));
        write(&mut apu, NR52, 0x00);
        assert_eq!(apu.read_reg(NR52), Ok(0x70));
        assert_eq!(apu.read_reg(NR50), Ok(0x00));
        write(&mut apu, NR50, 0x77);
        assert_eq!(apu.read_reg(NR50), Ok(0x00));
    }

    #[test]
    fn unmapped_block_addresses_read_zero() {
        let (mut apu, _) = apu();
        write(&mut apu, 0xFF27, 0xAB);
        assert_eq!(apu.read_reg(0xFF27), Ok(0));
        assert_eq!(apu.read_reg(0xFF15), Ok(0));
        assert_eq!(apu.read_reg(NR11), Ok(0x3F));
    }

    #[test]
    fn channel_index_is_checked() {
        let (apu, _) = apu();
        assert_eq!(
            apu.channel(4).unwrap_err(),
            CoreError::InvalidChannelIndex { index: 4 }
        );
        assert!(apu.frequency_register(3).is_err());
    }

    #[test]
    fn noise_frequency_and_buffer() {
        assert_eq!(noise_hz(0x00), 524_288.0);
        assert_eq!(noise_hz(0x12), 524_288.0 / 2.0 / 4.0);
        let short = noise_buffer(true);
        assert_eq!(short.len(), 127);
        assert!(short.contains(&1.0) && short.contains(&-1.0));
        assert_eq!(noise_buffer(false).len(), 32_767);
    }

    #[test]
    fn square_wave_table_is_mostly_fundamental() {
        let mut ram = [0u8; 16];
        ram[..8].fill(0xFF);
        let wave = periodic_wave(&ram);
        assert!(wave.imag[1] > 1.0);
        assert!(wave.imag[1] > 10.0 * wave.real[1].abs());
        assert!(wave.imag[2].abs() < 0.05);

        let flat = periodic_wave(&[0x77; 16]);
        assert!(flat.real.iter().chain(&flat.imag).all(|c| c.abs() < 1e-3));
    }
}
