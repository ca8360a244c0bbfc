//! The audio pipeline: capture-side frame encoding and playback-side
//! scheduling.
//!
//! Wire contract: outbound microphone audio is 16-bit PCM mono at 16 kHz,
//! inbound synthesized audio is 16-bit PCM mono at 24 kHz. The capture
//! side quantizes floating-point samples into fixed-duration frames; the
//! playback side places decoded chunks on a monotonically advancing
//! virtual timeline so sequential chunks play back-to-back regardless of
//! network jitter in their arrival.

use base64::Engine;
use std::collections::BTreeMap;

/// Sample rate of outbound capture audio, fixed by protocol contract.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of inbound playback audio, fixed by protocol contract.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;
/// Duration of one outbound frame. Smaller frames lower the latency of
/// user speech reaching the model at higher per-frame overhead.
pub const FRAME_DURATION_MS: u32 = 20;
/// Samples per outbound frame at the capture rate.
pub const FRAME_SAMPLES: usize = (CAPTURE_SAMPLE_RATE as usize / 1000) * FRAME_DURATION_MS as usize;

/// Converts a slice of f32 samples in [-1.0, 1.0] to i16 PCM.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16
        })
        .collect()
}

/// Converts i16 PCM samples to normalized f32.
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|&sample| (sample as f32 / 32768.0).clamp(-1.0, 1.0))
        .collect()
}

/// Decodes little-endian PCM16 bytes to i16 samples. A trailing odd byte
/// is discarded.
pub fn pcm16_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encodes i16 samples as little-endian PCM16 bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| sample.to_le_bytes())
        .collect()
}

/// Encodes f32 samples as base64 PCM16 for the JSON transports.
pub fn encode_base64_pcm16(samples: &[f32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm16_to_bytes(&f32_to_i16(samples)))
}

/// Decodes base64 PCM16 into f32 samples. A chunk that fails to decode
/// yields no samples; one bad chunk must not take the session down.
pub fn decode_base64_pcm16(data: &str) -> Vec<f32> {
    match base64::engine::general_purpose::STANDARD.decode(data) {
        Ok(bytes) => i16_to_f32(&pcm16_from_bytes(&bytes)),
        Err(_) => {
            tracing::error!("failed to decode base64 audio chunk, dropping it");
            Vec::new()
        }
    }
}

/// Accumulates raw capture samples and emits fixed-size PCM16 frames.
///
/// The push path does no allocation beyond the emitted frames and no
/// waiting, so it is safe to call from a capture callback that must
/// return before the next buffer arrives.
#[derive(Default)]
pub struct FrameEncoder {
    pending: Vec<i16>,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quantizes `samples` and returns every complete frame now
    /// available. Leftover samples stay buffered for the next push.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<u8>> {
        self.pending.extend(f32_to_i16(samples));
        let mut frames = Vec::new();
        while self.pending.len() >= FRAME_SAMPLES {
            let rest = self.pending.split_off(FRAME_SAMPLES);
            let frame = std::mem::replace(&mut self.pending, rest);
            frames.push(pcm16_to_bytes(&frame));
        }
        frames
    }

    /// Emits the buffered partial frame, if any. Called when capture
    /// stops so the tail of an utterance is not lost.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(pcm16_to_bytes(&std::mem::take(&mut self.pending)))
        }
    }
}

/// A chunk placed on the playback timeline. Times are in seconds on the
/// session's audio clock.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledChunk {
    pub seq: u64,
    pub start: f64,
    pub duration: f64,
}

impl ScheduledChunk {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Gapless playback scheduling over a virtual timeline.
///
/// Chunks are submitted tagged with their sequence number and may arrive
/// out of order; they are released to the timeline strictly in sequence
/// order. Each released chunk starts at `max(now, horizon)` where the
/// horizon is the previous chunk's end time, so playback is contiguous
/// with no gap and no overlap. The registry of currently scheduled
/// chunks supports immediate cancellation; chunks whose end time has
/// passed are removed by [`reap`](Self::reap).
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    horizon: f64,
    next_seq: u64,
    waiting: BTreeMap<u64, f64>,
    scheduled: Vec<ScheduledChunk>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duration in seconds of a chunk of `len` playback-rate samples.
    pub fn chunk_duration(len: usize) -> f64 {
        len as f64 / PLAYBACK_SAMPLE_RATE as f64
    }

    /// Submits a chunk by sequence number and returns every chunk that
    /// became schedulable, in sequence order. A chunk ahead of its
    /// predecessors waits; a duplicate sequence number is ignored.
    pub fn submit(&mut self, seq: u64, duration: f64, now: f64) -> Vec<ScheduledChunk> {
        if seq < self.next_seq {
            return Vec::new();
        }
        self.waiting.entry(seq).or_insert(duration);

        let mut released = Vec::new();
        while let Some(duration) = self.waiting.remove(&self.next_seq) {
            let start = now.max(self.horizon);
            let chunk = ScheduledChunk {
                seq: self.next_seq,
                start,
                duration,
            };
            self.horizon = chunk.end();
            self.scheduled.push(chunk.clone());
            released.push(chunk);
            self.next_seq += 1;
        }
        released
    }

    /// Drops registry entries whose playback has completed.
    pub fn reap(&mut self, now: f64) {
        self.scheduled.retain(|chunk| chunk.end() > now);
    }

    /// Halts everything: clears the registry and the reorder buffer and
    /// rewinds the horizon. Returns how many scheduled chunks were cut
    /// off.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.scheduled.len();
        self.scheduled.clear();
        self.waiting.clear();
        self.horizon = 0.0;
        cancelled
    }

    /// Chunks currently on the timeline, oldest first.
    pub fn scheduled(&self) -> &[ScheduledChunk] {
        &self.scheduled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn quantization_clamps_out_of_range_samples() {
        let out = f32_to_i16(&[0.0, 0.5, 2.0, -2.0]);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], 16384);
        assert_eq!(out[2], i16::MAX);
        assert_eq!(out[3], i16::MIN);
    }

    #[test]
    fn dequantization_normalizes_known_values() {
        let out = i16_to_f32(&[16384, -32768, 0]);
        assert_abs_diff_eq!(out[0], 0.5, epsilon = 1e-4);
        assert_abs_diff_eq!(out[1], -1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(out[2], 0.0, epsilon = 1e-4);
    }

    #[test]
    fn base64_decode_tolerates_garbage() {
        assert!(decode_base64_pcm16("not base64!").is_empty());
        assert!(decode_base64_pcm16("").is_empty());
    }

    #[test]
    fn base64_known_value_decodes() {
        // 16384 little-endian = [0x00, 0x40]
        let encoded = base64::engine::general_purpose::STANDARD.encode([0x00u8, 0x40u8]);
        let samples = decode_base64_pcm16(&encoded);
        assert_eq!(samples.len(), 1);
        assert_abs_diff_eq!(samples[0], 0.5, epsilon = 1e-4);
    }

    #[test]
    fn odd_trailing_byte_is_discarded() {
        assert!(pcm16_from_bytes(&[0x01]).is_empty());
        assert_eq!(pcm16_from_bytes(&[0x00, 0x40, 0x7f]).len(), 1);
    }

    #[test]
    fn frame_encoder_emits_fixed_size_frames() {
        let mut encoder = FrameEncoder::new();

        // Half a frame: nothing complete yet.
        let frames = encoder.push(&vec![0.1; FRAME_SAMPLES / 2]);
        assert!(frames.is_empty());

        // Another full frame's worth: exactly one frame emitted, half
        // remains buffered.
        let frames = encoder.push(&vec![0.1; FRAME_SAMPLES]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), FRAME_SAMPLES * 2);

        let tail = encoder.flush().unwrap();
        assert_eq!(tail.len(), FRAME_SAMPLES); // half a frame of bytes
        assert!(encoder.flush().is_none());
    }

    #[test]
    fn frame_encoder_preserves_sample_order_across_frames() {
        let mut encoder = FrameEncoder::new();
        let ramp: Vec<f32> = (0..FRAME_SAMPLES * 2).map(|i| i as f32 / 65536.0).collect();
        let frames = encoder.push(&ramp);
        assert_eq!(frames.len(), 2);
        let first = pcm16_from_bytes(&frames[0]);
        let second = pcm16_from_bytes(&frames[1]);
        assert!(first.last().unwrap() <= second.first().unwrap());
    }

    #[test]
    fn in_order_chunks_schedule_back_to_back() {
        let mut scheduler = PlaybackScheduler::new();
        let released = scheduler.submit(0, 1.0, 0.0);
        assert_eq!(released.len(), 1);
        assert_abs_diff_eq!(released[0].start, 0.0);

        let released = scheduler.submit(1, 0.5, 0.2);
        assert_abs_diff_eq!(released[0].start, 1.0);
        let released = scheduler.submit(2, 1.2, 0.3);
        assert_abs_diff_eq!(released[0].start, 1.5);
    }

    #[test]
    fn out_of_order_chunks_release_in_sequence_order_gapless() {
        let mut scheduler = PlaybackScheduler::new();

        // Durations 1.0, 0.5, 1.2 arriving as seq 1, 2, 0.
        assert!(scheduler.submit(1, 0.5, 0.0).is_empty());
        assert!(scheduler.submit(2, 1.2, 0.0).is_empty());
        let released = scheduler.submit(0, 1.0, 0.0);

        assert_eq!(released.len(), 3);
        assert_eq!(
            released.iter().map(|c| c.seq).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        // Start of chunk n equals end of chunk n-1, clock starting at 0.
        assert_abs_diff_eq!(released[0].start, 0.0);
        assert_abs_diff_eq!(released[1].start, released[0].end());
        assert_abs_diff_eq!(released[2].start, released[1].end());
        assert_abs_diff_eq!(released[2].end(), 2.7, epsilon = 1e-9);
    }

    #[test]
    fn late_arrival_starts_at_now_not_in_the_past() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.submit(0, 0.5, 0.0);
        // The first chunk ended at 0.5 but the next arrives at 2.0: it
        // must not be scheduled into the past.
        let released = scheduler.submit(1, 0.5, 2.0);
        assert_abs_diff_eq!(released[0].start, 2.0);
    }

    #[test]
    fn reap_removes_only_finished_chunks() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.submit(0, 1.0, 0.0);
        scheduler.submit(1, 1.0, 0.0);
        scheduler.reap(1.5);
        assert_eq!(scheduler.scheduled().len(), 1);
        assert_eq!(scheduler.scheduled()[0].seq, 1);
    }

    #[test]
    fn cancel_all_empties_registry_and_reorder_buffer() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.submit(0, 1.0, 0.0);
        scheduler.submit(2, 1.0, 0.0); // parked in the reorder buffer
        let cancelled = scheduler.cancel_all();
        assert_eq!(cancelled, 1);
        assert!(scheduler.scheduled().is_empty());
        // The timeline rewinds: the next released chunk starts at zero.
        assert_abs_diff_eq!(scheduler.submit(1, 1.0, 0.0)[0].start, 0.0);
    }

    #[test]
    fn duplicate_and_stale_sequence_numbers_are_ignored() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.submit(0, 1.0, 0.0);
        assert!(scheduler.submit(0, 1.0, 0.0).is_empty());
    }
}
