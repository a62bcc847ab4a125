use std::collections::VecDeque;
use std::sync::{mpsc as std_mpsc, Arc, Mutex};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::{AudioFrame, LocalAudio, MediaError, MediaSource};

/// Frame length handed to the peer link.
pub const FRAME_MS: u32 = 20;

/// Upper bound on queued playback, in seconds. Older audio is dropped so
/// latency cannot grow without bound.
const MAX_PLAYBACK_BUFFER_SECS: usize = 1;

/// Shared sample queue read by an output stream callback.
pub(crate) type SampleQueue = Arc<Mutex<VecDeque<f32>>>;

/// Microphone capture on the default input device.
///
/// cpal streams are not `Send` on every platform, so each capture runs on
/// its own thread that owns the stream until the capture is released.
#[derive(Debug, Default, Clone)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaSource for CpalMicrophone {
    async fn acquire_audio(&self) -> Result<LocalAudio, MediaError> {
        let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(64);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), MediaError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("hearth-mic".into())
            .spawn(move || match open_input(frame_tx) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Returns on stop or when the LocalAudio is dropped.
                    let _ = stop_rx.recv();
                    drop(stream);
                    debug!("Microphone released");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| MediaError::Device(e.to_string()))?;

        ready_rx
            .await
            .map_err(|_| MediaError::Device("capture thread exited".into()))??;

        Ok(LocalAudio::new(frame_rx, move || {
            let _ = stop_tx.send(());
        }))
    }
}

fn open_input(frame_tx: mpsc::Sender<AudioFrame>) -> Result<cpal::Stream, MediaError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| MediaError::AccessDenied("no microphone available".into()))?;

    info!(device = ?device.name(), "Using input device");

    let supported = device
        .default_input_config()
        .map_err(|e| MediaError::AccessDenied(e.to_string()))?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_input::<f32>(&device, &config, frame_tx),
        cpal::SampleFormat::I16 => build_input::<i16>(&device, &config, frame_tx),
        cpal::SampleFormat::U16 => build_input::<u16>(&device, &config, frame_tx),
        other => {
            return Err(MediaError::Device(format!(
                "unsupported input format {other:?}"
            )))
        }
    }
    .map_err(|e| match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            MediaError::AccessDenied("microphone not available".into())
        }
        other => MediaError::Device(other.to_string()),
    })?;

    stream
        .play()
        .map_err(|e| MediaError::AccessDenied(e.to_string()))?;

    debug!(rate = config.sample_rate.0, channels = config.channels, "Audio capture started");
    Ok(stream)
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    let sample_rate = config.sample_rate.0;
    let frame_size = (sample_rate * FRAME_MS / 1000) as usize;
    let mut buffer: Vec<f32> = Vec::with_capacity(frame_size * 2);

    device.build_input_stream(
        config,
        move |data: &[T], _info: &cpal::InputCallbackInfo| {
            // Downmix interleaved channels to mono.
            for chunk in data.chunks(channels) {
                let sum: f32 = chunk.iter().map(|&s| f32::from_sample(s)).sum();
                buffer.push(sum / chunk.len() as f32);
            }
            while buffer.len() >= frame_size {
                let samples: Vec<f32> = buffer.drain(..frame_size).collect();
                let frame = AudioFrame {
                    samples,
                    sample_rate,
                };
                if let Err(TrySendError::Full(_)) = frame_tx.try_send(frame) {
                    warn!("Audio frame channel full, dropping frame");
                }
            }
        },
        move |err| {
            error!("Audio input error: {err}");
        },
        None,
    )
}

/// Open the default output device and play whatever is pushed into the
/// returned queue. Returns the stream (which must be kept alive), the queue
/// and the device sample rate.
pub(crate) fn open_output() -> Result<(cpal::Stream, SampleQueue, u32), MediaError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| MediaError::Device("no output device available".into()))?;

    let supported = device
        .default_output_config()
        .map_err(|e| MediaError::Device(e.to_string()))?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let queue: SampleQueue = Arc::new(Mutex::new(VecDeque::new()));

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_output::<f32>(&device, &config, queue.clone()),
        cpal::SampleFormat::I16 => build_output::<i16>(&device, &config, queue.clone()),
        cpal::SampleFormat::U16 => build_output::<u16>(&device, &config, queue.clone()),
        other => {
            return Err(MediaError::Device(format!(
                "unsupported output format {other:?}"
            )))
        }
    }
    .map_err(|e| MediaError::Device(e.to_string()))?;

    stream
        .play()
        .map_err(|e| MediaError::Device(e.to_string()))?;

    Ok((stream, queue, config.sample_rate.0))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: SampleQueue,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels.max(1));

    device.build_output_stream(
        config,
        move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
            let mut queue = match queue.lock() {
                Ok(queue) => queue,
                Err(poisoned) => poisoned.into_inner(),
            };
            for frame in data.chunks_mut(channels) {
                let value = T::from_sample(queue.pop_front().unwrap_or(0.0));
                for sample in frame.iter_mut() {
                    *sample = value;
                }
            }
        },
        move |err| {
            error!("Audio output error: {err}");
        },
        None,
    )
}

/// Remote audio playback on the default output device.
///
/// Frames sent through [`Speaker::sender`] are resampled to the device rate
/// and queued. Dropping every sender ends playback and releases the device.
pub struct Speaker {
    tx: std_mpsc::Sender<AudioFrame>,
}

impl Speaker {
    pub fn spawn() -> Result<Self, MediaError> {
        let (tx, rx) = std_mpsc::channel::<AudioFrame>();

        std::thread::Builder::new()
            .name("hearth-speaker".into())
            .spawn(move || {
                let (stream, queue, device_rate) = match open_output() {
                    Ok(output) => output,
                    Err(e) => {
                        // Keep draining so senders never block on a missing device.
                        warn!(error = %e, "Remote audio playback unavailable");
                        while rx.recv().is_ok() {}
                        return;
                    }
                };

                let max_len = device_rate as usize * MAX_PLAYBACK_BUFFER_SECS;
                while let Ok(frame) = rx.recv() {
                    let samples = crate::codec::resample(&frame.samples, frame.sample_rate, device_rate);
                    let mut queue = match queue.lock() {
                        Ok(queue) => queue,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    queue.extend(samples);
                    let excess = queue.len().saturating_sub(max_len);
                    queue.drain(..excess);
                }

                drop(stream);
                debug!("Remote audio playback stopped");
            })
            .map_err(|e| MediaError::Device(e.to_string()))?;

        Ok(Self { tx })
    }

    pub fn sender(&self) -> std_mpsc::Sender<AudioFrame> {
        self.tx.clone()
    }
}
