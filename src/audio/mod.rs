pub mod device;
pub mod handle;

#[cfg(feature = "microphone")]
pub mod microphone;

pub use device::{
    AudioEncoder, AudioSource, CaptureDevice, DeviceError, DeviceFactory, DeviceResult,
    DeviceStep, EncodingProfile, OutputFormat,
};
pub use handle::{DeviceHandle, HandlePhase};

#[cfg(feature = "microphone")]
pub use microphone::MicrophoneDevice;
