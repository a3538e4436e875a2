//! Microphone capture backend (cpal input stream → LAME MP3 encoder)
//!
//! `cpal::Stream` cannot move between threads, so each prepared device owns a small
//! capture thread that builds, plays and drops the stream on request. The audio
//! callback only converts and forwards buffers; encoding and file writes happen on
//! the capture thread.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig, SupportedStreamConfig};
use mp3lame_encoder::{Bitrate, FlushNoGap, InterleavedPcm, MonoPcm, Quality};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::device::{
    AudioEncoder, AudioSource, CaptureDevice, DeviceError, DeviceResult, DeviceStep,
    EncodingProfile, OutputFormat,
};

/// Constant bitrate of every recording
pub const MP3_BITRATE: Bitrate = Bitrate::Kbps64;

/// Buffers queued between the audio callback and the encoder
const SAMPLE_QUEUE_DEPTH: usize = 64;

/// How often the capture thread drains queued audio while idle on control
const DRAIN_INTERVAL: Duration = Duration::from_millis(20);

/// Headroom LAME asks for when flushing its last frames
const FLUSH_BUFFER_SIZE: usize = 7200;

enum Control {
    Play(SyncSender<DeviceResult<()>>),
    Stop(SyncSender<DeviceResult<()>>),
    Shutdown,
}

/// Default system microphone, recorded with a fixed [`EncodingProfile`]
pub struct MicrophoneDevice {
    profile: EncodingProfile,
    source: Option<AudioSource>,
    format: Option<OutputFormat>,
    encoder: Option<AudioEncoder>,
    output: Option<PathBuf>,
    control: Option<SyncSender<Control>>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneDevice {
    pub fn new(profile: EncodingProfile) -> DeviceResult<Self> {
        let host = cpal::default_host();
        if host.default_input_device().is_none() {
            return Err(DeviceError::new(
                DeviceStep::Construct,
                "No audio input device found",
            ));
        }

        Ok(Self {
            profile,
            source: None,
            format: None,
            encoder: None,
            output: None,
            control: None,
            thread: None,
        })
    }

    /// Factory for the session state machine
    pub fn factory() -> impl FnMut(&EncodingProfile) -> DeviceResult<Box<dyn CaptureDevice>> + Send {
        |profile: &EncodingProfile| {
            let device = MicrophoneDevice::new(*profile)?;
            Ok(Box::new(device) as Box<dyn CaptureDevice>)
        }
    }

    fn request(&self, step: DeviceStep, make: fn(SyncSender<DeviceResult<()>>) -> Control) -> DeviceResult<()> {
        let control = self
            .control
            .as_ref()
            .ok_or_else(|| DeviceError::new(step, "device is not prepared"))?;

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        control
            .send(make(reply_tx))
            .map_err(|_| DeviceError::new(step, "capture thread has exited"))?;

        reply_rx
            .recv()
            .map_err(|_| DeviceError::new(step, "capture thread has exited"))?
    }
}

impl CaptureDevice for MicrophoneDevice {
    fn set_audio_source(&mut self, source: AudioSource) -> DeviceResult<()> {
        self.source = Some(source);
        Ok(())
    }

    fn set_output_format(&mut self, format: OutputFormat) -> DeviceResult<()> {
        self.format = Some(format);
        Ok(())
    }

    fn set_audio_encoder(&mut self, encoder: AudioEncoder) -> DeviceResult<()> {
        self.encoder = Some(encoder);
        Ok(())
    }

    fn set_output_file(&mut self, path: &Path) -> DeviceResult<()> {
        self.output = Some(path.to_path_buf());
        Ok(())
    }

    fn prepare(&mut self) -> DeviceResult<()> {
        let path = self
            .output
            .clone()
            .ok_or_else(|| DeviceError::new(DeviceStep::Prepare, "output file not set"))?;

        let (control_tx, control_rx) = mpsc::sync_channel(4);
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let profile = self.profile;

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || capture_thread(path, profile, ready_tx, control_rx))
            .map_err(|e| DeviceError::new(DeviceStep::Prepare, e.to_string()))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| DeviceError::new(DeviceStep::Prepare, "capture thread exited early"))?;

        if let Err(e) = ready {
            let _ = thread.join();
            return Err(e);
        }

        self.control = Some(control_tx);
        self.thread = Some(thread);
        Ok(())
    }

    fn start(&mut self) -> DeviceResult<()> {
        self.request(DeviceStep::Start, Control::Play)
    }

    fn stop(&mut self) -> DeviceResult<()> {
        self.request(DeviceStep::Stop, Control::Stop)
    }

    fn release(&mut self) {
        if let Some(control) = self.control.take() {
            let _ = control.send(Control::Shutdown);
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Microphone capture thread panicked");
            }
        }
    }

    fn name(&self) -> &str {
        "cpal-microphone"
    }
}

impl Drop for MicrophoneDevice {
    fn drop(&mut self) {
        self.release();
    }
}

/// Encodes PCM buffers to an MP3 file
///
/// Write failures and dropped buffers are remembered rather than aborting the
/// recording, and reported once by [`Mp3Writer::finish`].
pub(crate) struct Mp3Writer {
    encoder: mp3lame_encoder::Encoder,
    file: Option<BufWriter<File>>,
    path: PathBuf,
    channels: u16,
    scratch: Vec<u8>,
    first_error: Option<String>,
    failed_writes: u64,
    dropped: Arc<AtomicU64>,
}

impl Mp3Writer {
    pub(crate) fn create(path: &Path, sample_rate: u32, channels: u16) -> DeviceResult<Self> {
        let prepare_err = |msg: String| DeviceError::new(DeviceStep::Prepare, msg);

        if !(1..=2).contains(&channels) {
            return Err(prepare_err(format!("MP3 supports 1 or 2 channels, got {}", channels)));
        }

        let mut builder = mp3lame_encoder::Builder::new()
            .ok_or_else(|| prepare_err("Failed to allocate LAME encoder".to_string()))?;
        builder
            .set_num_channels(channels as u8)
            .map_err(|e| prepare_err(format!("LAME rejected {} channels: {:?}", channels, e)))?;
        builder
            .set_sample_rate(sample_rate)
            .map_err(|e| prepare_err(format!("LAME rejected {} Hz: {:?}", sample_rate, e)))?;
        builder
            .set_brate(MP3_BITRATE)
            .map_err(|e| prepare_err(format!("LAME rejected bitrate: {:?}", e)))?;
        builder
            .set_quality(Quality::Good)
            .map_err(|e| prepare_err(format!("LAME rejected quality: {:?}", e)))?;
        let encoder = builder
            .build()
            .map_err(|e| prepare_err(format!("Failed to initialize LAME encoder: {:?}", e)))?;

        let file = File::create(path).map_err(|e| {
            prepare_err(format!("Failed to create MP3 file {}: {}", path.display(), e))
        })?;

        Ok(Self {
            encoder,
            file: Some(BufWriter::new(file)),
            path: path.to_path_buf(),
            channels,
            scratch: Vec::new(),
            first_error: None,
            failed_writes: 0,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Counter the audio callback bumps when the queue is full
    pub(crate) fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    /// Encode one interleaved buffer
    pub(crate) fn write(&mut self, samples: &[i16]) {
        if self.file.is_none() || samples.is_empty() {
            return;
        }

        self.scratch.clear();
        self.scratch
            .reserve(mp3lame_encoder::max_required_buffer_size(samples.len()));
        let encoded = if self.channels == 1 {
            self.encoder.encode_to_vec(MonoPcm(samples), &mut self.scratch)
        } else {
            self.encoder.encode_to_vec(InterleavedPcm(samples), &mut self.scratch)
        };

        let result = match encoded {
            Ok(_) => self.write_scratch(),
            Err(e) => Err(format!("MP3 encode failed: {:?}", e)),
        };
        if let Err(e) = result {
            self.record_failure(e);
        }
    }

    fn write_scratch(&mut self) -> Result<(), String> {
        match self.file.as_mut() {
            Some(file) => file
                .write_all(&self.scratch)
                .map_err(|e| format!("write to {} failed: {}", self.path.display(), e)),
            None => Ok(()),
        }
    }

    fn record_failure(&mut self, message: String) {
        self.failed_writes += 1;
        if self.first_error.is_none() {
            warn!("Recording write error: {}", message);
            self.first_error = Some(message);
        }
    }

    /// Flush the encoder and close the file. Calling it again is a no-op.
    ///
    /// Fails if any buffer was lost along the way, even though the file is complete.
    pub(crate) fn finish(&mut self) -> DeviceResult<()> {
        if self.file.is_none() {
            return Ok(());
        }

        self.scratch.clear();
        self.scratch.reserve(FLUSH_BUFFER_SIZE);
        let flushed = match self.encoder.flush_to_vec::<FlushNoGap>(&mut self.scratch) {
            Ok(_) => self.write_scratch(),
            Err(e) => Err(format!("MP3 flush failed: {:?}", e)),
        };
        if let Err(e) = flushed {
            self.record_failure(e);
        }

        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                self.record_failure(format!("flush of {} failed: {}", self.path.display(), e));
            }
        }

        let dropped = self.dropped.load(Ordering::Relaxed);
        match (&self.first_error, dropped) {
            (Some(first), _) => Err(DeviceError::new(
                DeviceStep::Stop,
                format!(
                    "{} write error(s), {} dropped buffer(s); first: {}",
                    self.failed_writes, dropped, first
                ),
            )),
            (None, 0) => Ok(()),
            (None, n) => Err(DeviceError::new(
                DeviceStep::Stop,
                format!("{} audio buffer(s) dropped, encoder fell behind", n),
            )),
        }
    }
}

fn capture_thread(
    path: PathBuf,
    profile: EncodingProfile,
    ready: SyncSender<DeviceResult<()>>,
    control: Receiver<Control>,
) {
    let (stream, samples, mut writer) = match open_stream(&path, &profile) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut stream = Some(stream);

    loop {
        let command = match control.recv_timeout(DRAIN_INTERVAL) {
            Ok(command) => command,
            Err(RecvTimeoutError::Timeout) => {
                drain(&samples, &mut writer);
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match command {
            Control::Play(reply) => {
                let result = match &stream {
                    Some(s) => s
                        .play()
                        .map_err(|e| DeviceError::new(DeviceStep::Start, e.to_string())),
                    None => Err(DeviceError::new(DeviceStep::Start, "stream already closed")),
                };
                let _ = reply.send(result);
            }
            Control::Stop(reply) => {
                let result = match stream.take() {
                    Some(s) => {
                        if let Err(e) = s.pause() {
                            debug!("Pausing input stream failed: {}", e);
                        }
                        drop(s);
                        drain(&samples, &mut writer);
                        writer.finish()
                    }
                    None => Err(DeviceError::new(DeviceStep::Stop, "not recording")),
                };
                let _ = reply.send(result);
            }
            Control::Shutdown => break,
        }
    }

    drop(stream);
    drain(&samples, &mut writer);
    if let Err(e) = writer.finish() {
        warn!("Recording finalized on release with losses: {}", e);
    }
}

fn drain(samples: &Receiver<Vec<i16>>, writer: &mut Mp3Writer) {
    for buffer in samples.try_iter() {
        writer.write(&buffer);
    }
}

fn open_stream(
    path: &Path,
    profile: &EncodingProfile,
) -> DeviceResult<(Stream, Receiver<Vec<i16>>, Mp3Writer)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| DeviceError::new(DeviceStep::Prepare, "No audio input device found"))?;

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using audio input device: {}", device_name);

    let supported = pick_config(&device, profile)?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();

    // Extra device channels are dropped, MP3 carries at most two
    let out_channels = config.channels.min(2);
    info!(
        "Device config: {} Hz, {} channels ({} recorded), {:?}",
        config.sample_rate.0, config.channels, out_channels, sample_format
    );

    let writer = Mp3Writer::create(path, config.sample_rate.0, out_channels)?;
    let (tx, rx) = mpsc::sync_channel(SAMPLE_QUEUE_DEPTH);
    let feed = Feed {
        tx,
        dropped: writer.dropped_counter(),
        in_channels: config.channels as usize,
        out_channels: out_channels as usize,
    };

    let stream = match sample_format {
        SampleFormat::I16 => build_stream::<i16>(&device, &config, feed)?,
        SampleFormat::F32 => build_stream::<f32>(&device, &config, feed)?,
        other => {
            return Err(DeviceError::new(
                DeviceStep::Prepare,
                format!("unsupported sample format {:?}", other),
            ))
        }
    };

    Ok((stream, rx, writer))
}

fn pick_config(device: &cpal::Device, profile: &EncodingProfile) -> DeviceResult<SupportedStreamConfig> {
    let wanted = cpal::SampleRate(profile.sample_rate);

    let matching = device
        .supported_input_configs()
        .map_err(|e| DeviceError::new(DeviceStep::Prepare, e.to_string()))?
        .filter(|c| c.channels() == profile.channels)
        .filter(|c| matches!(c.sample_format(), SampleFormat::I16 | SampleFormat::F32))
        .find(|c| c.min_sample_rate() <= wanted && wanted <= c.max_sample_rate())
        .map(|c| c.with_sample_rate(wanted));

    match matching {
        Some(config) => Ok(config),
        None => {
            warn!(
                "Device does not support {} Hz / {} channels, using its default input config",
                profile.sample_rate, profile.channels
            );
            device
                .default_input_config()
                .map_err(|e| DeviceError::new(DeviceStep::Prepare, e.to_string()))
        }
    }
}

/// Audio-thread side of the sample queue
struct Feed {
    tx: SyncSender<Vec<i16>>,
    dropped: Arc<AtomicU64>,
    in_channels: usize,
    out_channels: usize,
}

impl Feed {
    fn push<T>(&self, data: &[T])
    where
        T: SizedSample,
        i16: FromSample<T>,
    {
        let pcm: Vec<i16> = if self.in_channels == self.out_channels {
            data.iter().map(|s| s.to_sample::<i16>()).collect()
        } else {
            data.chunks(self.in_channels)
                .flat_map(|frame| frame.iter().take(self.out_channels))
                .map(|s| s.to_sample::<i16>())
                .collect()
        };

        // try_send: never block the audio thread
        if self.tx.try_send(pcm).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn build_stream<T>(device: &cpal::Device, config: &StreamConfig, feed: Feed) -> DeviceResult<Stream>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| feed.push(data),
            move |err| {
                error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| DeviceError::new(DeviceStep::Prepare, format!("Failed to build audio stream: {}", e)))
}
