//! Processing settings shared between the host, the backend, and the
//! feature/options plumbing.

/// System and/or configuration settings for the execution process.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Sample rate in Hz.
    pub sample_rate: f32,
    /// Audio buffer length in frames.
    pub block_length: u32,
    /// MIDI buffer size in bytes.
    pub midi_buf_size: u32,
    /// Communication ring size in bytes.
    pub ring_size: u32,
    /// Frequency of UI updates in Hz.
    pub ui_update_hz: f32,
    /// UI scale factor.
    pub ui_scale_factor: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            block_length: 4096,
            midi_buf_size: 1024,
            ring_size: 0,
            ui_update_hz: 0.0,
            ui_scale_factor: 0.0,
        }
    }
}

impl Settings {
    /// Frames between UI updates at the current rate.
    pub fn update_frames(&self) -> u32 {
        if self.ui_update_hz <= 0.0 {
            0
        } else {
            (self.sample_rate / self.ui_update_hz) as u32
        }
    }
}
