use std::path::Path;
use tracing::{debug, warn};

use super::device::{
    AudioEncoder, AudioSource, CaptureDevice, DeviceError, DeviceResult, DeviceStep, OutputFormat,
};

/// Where a handle is in the device protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlePhase {
    Initial,
    SourceSet,
    FormatSet,
    EncoderSet,
    OutputSet,
    Prepared,
    Recording,
    Stopped,
    Released,
}

/// Owned wrapper around one platform capture handle
///
/// Enforces the call order construct → source → format → encoder → output → prepare →
/// start → stop → release. Out-of-order calls fail without reaching the platform.
/// `release` runs the platform release at most once; a handle dropped unreleased is
/// released on drop.
pub struct DeviceHandle {
    device: Box<dyn CaptureDevice>,
    phase: HandlePhase,
}

impl DeviceHandle {
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        debug!("Capture handle constructed: {}", device.name());
        Self {
            device,
            phase: HandlePhase::Initial,
        }
    }

    pub fn phase(&self) -> HandlePhase {
        self.phase
    }

    pub fn name(&self) -> &str {
        self.device.name()
    }

    pub fn is_released(&self) -> bool {
        self.phase == HandlePhase::Released
    }

    fn require(&self, step: DeviceStep, expected: HandlePhase) -> DeviceResult<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(DeviceError::new(
                step,
                format!("called out of order (handle is {:?}, expected {:?})", self.phase, expected),
            ))
        }
    }

    pub fn set_audio_source(&mut self, source: AudioSource) -> DeviceResult<()> {
        self.require(DeviceStep::SetSource, HandlePhase::Initial)?;
        self.device.set_audio_source(source)?;
        self.phase = HandlePhase::SourceSet;
        Ok(())
    }

    pub fn set_output_format(&mut self, format: OutputFormat) -> DeviceResult<()> {
        self.require(DeviceStep::SetFormat, HandlePhase::SourceSet)?;
        self.device.set_output_format(format)?;
        self.phase = HandlePhase::FormatSet;
        Ok(())
    }

    pub fn set_audio_encoder(&mut self, encoder: AudioEncoder) -> DeviceResult<()> {
        self.require(DeviceStep::SetEncoder, HandlePhase::FormatSet)?;
        self.device.set_audio_encoder(encoder)?;
        self.phase = HandlePhase::EncoderSet;
        Ok(())
    }

    pub fn set_output_file(&mut self, path: &Path) -> DeviceResult<()> {
        self.require(DeviceStep::SetOutput, HandlePhase::EncoderSet)?;
        self.device.set_output_file(path)?;
        self.phase = HandlePhase::OutputSet;
        Ok(())
    }

    pub fn prepare(&mut self) -> DeviceResult<()> {
        self.require(DeviceStep::Prepare, HandlePhase::OutputSet)?;
        self.device.prepare()?;
        self.phase = HandlePhase::Prepared;
        Ok(())
    }

    pub fn start(&mut self) -> DeviceResult<()> {
        self.require(DeviceStep::Start, HandlePhase::Prepared)?;
        self.device.start()?;
        self.phase = HandlePhase::Recording;
        Ok(())
    }

    /// Stop capture. The handle counts as stopped afterwards even if the platform
    /// call failed, so the only legal next step is `release`.
    pub fn stop(&mut self) -> DeviceResult<()> {
        self.require(DeviceStep::Stop, HandlePhase::Recording)?;
        let result = self.device.stop();
        self.phase = HandlePhase::Stopped;
        result
    }

    /// Release the platform resource. Returns false if it was already released.
    pub fn release(&mut self) -> bool {
        if self.phase == HandlePhase::Released {
            return false;
        }
        self.device.release();
        self.phase = HandlePhase::Released;
        debug!("Capture handle released: {}", self.device.name());
        true
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if self.phase != HandlePhase::Released {
            warn!(
                "Capture handle {} dropped while {:?}; releasing",
                self.device.name(),
                self.phase
            );
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingDevice {
        releases: Arc<AtomicUsize>,
        fail_stop: bool,
    }

    impl CaptureDevice for CountingDevice {
        fn set_audio_source(&mut self, _: AudioSource) -> DeviceResult<()> {
            Ok(())
        }
        fn set_output_format(&mut self, _: OutputFormat) -> DeviceResult<()> {
            Ok(())
        }
        fn set_audio_encoder(&mut self, _: AudioEncoder) -> DeviceResult<()> {
            Ok(())
        }
        fn set_output_file(&mut self, _: &Path) -> DeviceResult<()> {
            Ok(())
        }
        fn prepare(&mut self) -> DeviceResult<()> {
            Ok(())
        }
        fn start(&mut self) -> DeviceResult<()> {
            Ok(())
        }
        fn stop(&mut self) -> DeviceResult<()> {
            if self.fail_stop {
                Err(DeviceError::new(DeviceStep::Stop, "already stopped"))
            } else {
                Ok(())
            }
        }
        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
        fn name(&self) -> &str {
            "counting"
        }
    }

    fn handle(fail_stop: bool) -> (DeviceHandle, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let device = CountingDevice {
            releases: Arc::clone(&releases),
            fail_stop,
        };
        (DeviceHandle::new(Box::new(device)), releases)
    }

    fn run_to_recording(h: &mut DeviceHandle) {
        h.set_audio_source(AudioSource::Microphone).unwrap();
        h.set_output_format(OutputFormat::Mp3).unwrap();
        h.set_audio_encoder(AudioEncoder::Mp3).unwrap();
        h.set_output_file(Path::new("/tmp/x.mp3")).unwrap();
        h.prepare().unwrap();
        h.start().unwrap();
    }

    #[test]
    fn test_out_of_order_call_is_rejected() {
        let (mut h, _) = handle(false);
        let err = h.prepare().unwrap_err();
        assert_eq!(err.step, DeviceStep::Prepare);
        assert_eq!(h.phase(), HandlePhase::Initial);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (mut h, releases) = handle(false);
        assert!(h.release());
        assert!(!h.release());
        drop(h);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_unreleased_handle() {
        let (mut h, releases) = handle(false);
        run_to_recording(&mut h);
        drop(h);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_stop_still_moves_to_stopped() {
        let (mut h, releases) = handle(true);
        run_to_recording(&mut h);
        assert!(h.stop().is_err());
        assert_eq!(h.phase(), HandlePhase::Stopped);
        assert!(h.stop().is_err(), "second stop is out of order");
        h.release();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
