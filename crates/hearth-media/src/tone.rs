//! Short notification tone for new messages and incoming calls.

use std::f32::consts::PI;
use std::time::Duration;

use tracing::debug;

use crate::audio::open_output;

/// Something that can make a short "you have something new" sound.
///
/// `play` returns immediately. Failures are swallowed.
pub trait Chime: Send + Sync {
    fn play(&self);
}

/// Does nothing. For headless runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentChime;

impl Chime for SilentChime {
    fn play(&self) {}
}

/// A sine tone on the default output device.
#[derive(Debug, Clone)]
pub struct ToneChime {
    pub frequency_hz: f32,
    pub duration: Duration,
    pub volume: f32,
}

impl Default for ToneChime {
    fn default() -> Self {
        Self {
            frequency_hz: 880.0,
            duration: Duration::from_millis(200),
            volume: 0.3,
        }
    }
}

impl Chime for ToneChime {
    fn play(&self) {
        let tone = self.clone();
        let spawned = std::thread::Builder::new()
            .name("hearth-chime".into())
            .spawn(move || {
                let (stream, queue, sample_rate) = match open_output() {
                    Ok(output) => output,
                    Err(e) => {
                        debug!(error = %e, "Chime unavailable");
                        return;
                    }
                };

                let samples = synthesize_tone(sample_rate, tone.frequency_hz, tone.duration, tone.volume);
                match queue.lock() {
                    Ok(mut queue) => queue.extend(samples),
                    Err(_) => return,
                }

                // Let the device drain before the stream is dropped.
                std::thread::sleep(tone.duration + Duration::from_millis(100));
                drop(stream);
            });

        if let Err(e) = spawned {
            debug!(error = %e, "Chime thread failed to start");
        }
    }
}

/// Sine samples with a short linear fade at both ends to avoid clicks.
pub fn synthesize_tone(sample_rate: u32, frequency_hz: f32, duration: Duration, volume: f32) -> Vec<f32> {
    let total = (sample_rate as f32 * duration.as_secs_f32()) as usize;
    let fade = (sample_rate as usize / 100).min(total / 2).max(1);

    (0..total)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let envelope = if i < fade {
                i as f32 / fade as f32
            } else if i >= total - fade {
                (total - 1 - i) as f32 / fade as f32
            } else {
                1.0
            };
            (2.0 * PI * frequency_hz * t).sin() * volume * envelope
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_has_expected_length_and_level() {
        let samples = synthesize_tone(48_000, 880.0, Duration::from_millis(200), 0.3);
        assert_eq!(samples.len(), 9600);
        assert!(samples.iter().all(|s| s.abs() <= 0.3 + f32::EPSILON));
        assert!(samples.iter().any(|s| s.abs() > 0.25));
    }

    #[test]
    fn tone_fades_in_and_out() {
        let samples = synthesize_tone(8_000, 440.0, Duration::from_millis(100), 1.0);
        assert_eq!(samples[0], 0.0);
        assert_eq!(*samples.last().unwrap(), 0.0);
    }

    #[test]
    fn empty_duration_yields_nothing() {
        assert!(synthesize_tone(48_000, 880.0, Duration::ZERO, 0.3).is_empty());
    }

    #[test]
    fn silent_chime_is_a_no_op() {
        SilentChime.play();
    }
}
