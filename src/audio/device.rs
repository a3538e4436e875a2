use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Audio input source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioSource {
    /// Default microphone input
    Microphone,
}

/// Container format written to the output file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Raw MPEG audio frame stream
    Mp3,
}

impl OutputFormat {
    /// File extension used for recordings in this container
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
        }
    }
}

/// Sample encoding inside the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioEncoder {
    /// MPEG-1/2 Audio Layer III, constant bitrate (lossy)
    Mp3,
}

/// The single encoding profile every session records with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingProfile {
    pub source: AudioSource,
    pub format: OutputFormat,
    pub encoder: AudioEncoder,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: u16,
}

impl EncodingProfile {
    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }
}

impl Default for EncodingProfile {
    fn default() -> Self {
        Self {
            source: AudioSource::Microphone,
            format: OutputFormat::Mp3,
            encoder: AudioEncoder::Mp3,
            sample_rate: 16000, // 16kHz, speech
            channels: 1,        // Mono
        }
    }
}

/// Steps of the capture device protocol, in the order they must be called
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceStep {
    Construct,
    SetSource,
    SetFormat,
    SetEncoder,
    SetOutput,
    Prepare,
    Start,
    Stop,
    Release,
}

impl DeviceStep {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceStep::Construct => "construct",
            DeviceStep::SetSource => "set_audio_source",
            DeviceStep::SetFormat => "set_output_format",
            DeviceStep::SetEncoder => "set_audio_encoder",
            DeviceStep::SetOutput => "set_output_file",
            DeviceStep::Prepare => "prepare",
            DeviceStep::Start => "start",
            DeviceStep::Stop => "stop",
            DeviceStep::Release => "release",
        }
    }
}

impl fmt::Display for DeviceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A capture device step failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("capture device {step} failed: {message}")]
pub struct DeviceError {
    pub step: DeviceStep,
    pub message: String,
}

impl DeviceError {
    pub fn new(step: DeviceStep, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
        }
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Platform capture handle
///
/// Implementations wrap the exclusive OS microphone resource. Calls arrive in protocol
/// order (see [`DeviceStep`]); ordering is enforced by [`super::DeviceHandle`], not here.
/// All calls are blocking.
pub trait CaptureDevice: Send {
    fn set_audio_source(&mut self, source: AudioSource) -> DeviceResult<()>;

    fn set_output_format(&mut self, format: OutputFormat) -> DeviceResult<()>;

    fn set_audio_encoder(&mut self, encoder: AudioEncoder) -> DeviceResult<()>;

    fn set_output_file(&mut self, path: &Path) -> DeviceResult<()>;

    /// Acquire the input and open the output file
    fn prepare(&mut self) -> DeviceResult<()>;

    fn start(&mut self) -> DeviceResult<()>;

    /// Stop capturing and finalize the output file
    ///
    /// May fail if the device was already stopped by someone else.
    fn stop(&mut self) -> DeviceResult<()>;

    /// Give the underlying resource back to the OS
    fn release(&mut self);

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Creates fresh platform handles, one per session
pub trait DeviceFactory: Send {
    fn construct(&mut self, profile: &EncodingProfile) -> DeviceResult<Box<dyn CaptureDevice>>;
}

impl<F> DeviceFactory for F
where
    F: FnMut(&EncodingProfile) -> DeviceResult<Box<dyn CaptureDevice>> + Send,
{
    fn construct(&mut self, profile: &EncodingProfile) -> DeviceResult<Box<dyn CaptureDevice>> {
        self(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_is_mono_mp3() {
        let profile = EncodingProfile::default();
        assert_eq!(profile.source, AudioSource::Microphone);
        assert_eq!(profile.extension(), "mp3");
        assert_eq!(profile.encoder, AudioEncoder::Mp3);
        assert_eq!(profile.channels, 1);
    }

    #[test]
    fn test_device_error_names_step() {
        let err = DeviceError::new(DeviceStep::Prepare, "microphone busy");
        assert_eq!(err.to_string(), "capture device prepare failed: microphone busy");
    }

    #[test]
    fn test_steps_are_ordered() {
        assert!(DeviceStep::Construct < DeviceStep::SetSource);
        assert!(DeviceStep::SetOutput < DeviceStep::Prepare);
        assert!(DeviceStep::Stop < DeviceStep::Release);
    }
}
