// Shared test rig: a scripted capture device that records every protocol call
// and can be told to fail at any step.

#![allow(dead_code)]

use loqa_recorder::audio::{
    AudioEncoder, AudioSource, CaptureDevice, DeviceError, DeviceResult, DeviceStep,
    EncodingProfile, OutputFormat,
};
use loqa_recorder::session::{
    EventSink, EventTag, MemorySink, SessionConfig, SessionState, SessionStateMachine,
};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// How the next constructed device behaves
#[derive(Debug, Clone)]
pub struct Script {
    /// Step that returns an error
    pub fail_at: Option<DeviceStep>,
    /// Bytes appended to the output file on a successful stop
    pub payload: usize,
    /// Never touch the output file
    pub skip_file: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            fail_at: None,
            payload: 4096,
            skip_file: false,
        }
    }
}

impl Script {
    pub fn failing_at(step: DeviceStep) -> Self {
        Self {
            fail_at: Some(step),
            ..Self::default()
        }
    }
}

/// Every device call made across all sessions, in order
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<DeviceStep>>>,
}

impl CallLog {
    fn record(&self, step: DeviceStep) {
        self.calls.lock().unwrap().push(step);
    }

    pub fn calls(&self) -> Vec<DeviceStep> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, step: DeviceStep) -> usize {
        self.calls().iter().filter(|&&s| s == step).count()
    }

    /// Constructed handles that have not been released yet
    pub fn live_handles(&self) -> usize {
        self.count(DeviceStep::Construct) - self.count(DeviceStep::Release)
    }
}

pub struct ScriptedDevice {
    script: Script,
    device_log: CallLog,
    output: Option<PathBuf>,
}

impl ScriptedDevice {
    fn step(&self, step: DeviceStep) -> DeviceResult<()> {
        self.device_log.record(step);
        if self.script.fail_at == Some(step) {
            Err(DeviceError::new(step, "scripted failure"))
        } else {
            Ok(())
        }
    }
}

impl CaptureDevice for ScriptedDevice {
    fn set_audio_source(&mut self, _: AudioSource) -> DeviceResult<()> {
        self.step(DeviceStep::SetSource)
    }

    fn set_output_format(&mut self, _: OutputFormat) -> DeviceResult<()> {
        self.step(DeviceStep::SetFormat)
    }

    fn set_audio_encoder(&mut self, _: AudioEncoder) -> DeviceResult<()> {
        self.step(DeviceStep::SetEncoder)
    }

    fn set_output_file(&mut self, path: &Path) -> DeviceResult<()> {
        self.step(DeviceStep::SetOutput)?;
        self.output = Some(path.to_path_buf());
        Ok(())
    }

    fn prepare(&mut self) -> DeviceResult<()> {
        self.step(DeviceStep::Prepare)?;
        if let (false, Some(path)) = (self.script.skip_file, &self.output) {
            fs::File::create(path).map_err(|e| DeviceError::new(DeviceStep::Prepare, e.to_string()))?;
        }
        Ok(())
    }

    fn start(&mut self) -> DeviceResult<()> {
        self.step(DeviceStep::Start)
    }

    fn stop(&mut self) -> DeviceResult<()> {
        self.step(DeviceStep::Stop)?;
        if let (false, Some(path)) = (self.script.skip_file, &self.output) {
            let mut file = OpenOptions::new()
                .append(true)
                .open(path)
                .map_err(|e| DeviceError::new(DeviceStep::Stop, e.to_string()))?;
            file.write_all(&vec![0u8; self.script.payload])
                .map_err(|e| DeviceError::new(DeviceStep::Stop, e.to_string()))?;
        }
        Ok(())
    }

    fn release(&mut self) {
        self.device_log.record(DeviceStep::Release);
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// State machine wired to a scripted device, a temp storage dir and an in-memory log
pub struct Rig {
    pub machine: SessionStateMachine,
    pub events: MemorySink,
    pub device_log: CallLog,
    pub script: Arc<Mutex<Script>>,
    pub dir: TempDir,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_script(Script::default())
    }

    pub fn with_script(script: Script) -> Self {
        let dir = TempDir::new().unwrap();
        let config = SessionConfig::new(dir.path().join("recordings"));
        Self::with_config(config, script, dir)
    }

    pub fn with_config(config: SessionConfig, script: Script, dir: TempDir) -> Self {
        let events = MemorySink::new();
        let device_log = CallLog::default();
        let script = Arc::new(Mutex::new(script));
        let sink: Arc<dyn EventSink> = Arc::new(events.clone());
        let machine = SessionStateMachine::new(
            config,
            scripted_factory(Arc::clone(&script), device_log.clone()),
            sink,
        );

        Self {
            machine,
            events,
            device_log,
            script,
            dir,
        }
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn lines(&self) -> Vec<String> {
        self.events.lines()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.lines().iter().filter(|l| l.starts_with(prefix)).count()
    }

    /// States named by `[State: X]` events, repeats collapsed
    pub fn state_changes(&self) -> Vec<SessionState> {
        let mut states: Vec<SessionState> = Vec::new();
        for event in self.events.snapshot() {
            if let EventTag::State(s) = event.tag {
                if states.last() != Some(&s) {
                    states.push(s);
                }
            }
        }
        states
    }
}

pub fn scripted_factory(
    script: Arc<Mutex<Script>>,
    device_log: CallLog,
) -> impl FnMut(&EncodingProfile) -> DeviceResult<Box<dyn CaptureDevice>> + Send + 'static {
    move |_: &EncodingProfile| {
        device_log.record(DeviceStep::Construct);
        let script = script.lock().unwrap().clone();
        if script.fail_at == Some(DeviceStep::Construct) {
            return Err(DeviceError::new(DeviceStep::Construct, "no microphone"));
        }
        Ok(Box::new(ScriptedDevice {
            script,
            device_log: device_log.clone(),
            output: None,
        }) as Box<dyn CaptureDevice>)
    }
}
