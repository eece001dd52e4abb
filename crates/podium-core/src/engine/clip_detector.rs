//! Clip detection on engine inputs and outputs
//!
//! Counts samples whose absolute value exceeds full scale, per channel, and
//! emits at most one clipping notification per channel per interval so a
//! sustained over doesn't flood the event plane.

use crate::buffer::BufferView;
use crate::event::queue::RtEventSink;
use crate::event::rt::{RtEvent, IMMEDIATE_PROCESS};
use crate::types::{AUDIO_CHUNK_SIZE, MAX_ENGINE_CHANNELS};

/// Full-scale threshold.
const CLIP_THRESHOLD: f32 = 1.0;

/// Per-channel clip counting with rate-limited notification.
pub struct ClipDetector {
    /// Samples between notifications per channel (default one second)
    interval: u32,
    clip_count: [u32; MAX_ENGINE_CHANNELS],
    samples_since_notification: [u32; MAX_ENGINE_CHANNELS],
    /// True when scanning engine inputs, false for outputs
    input_side: bool,
}

impl ClipDetector {
    pub fn new(sample_rate: f32, input_side: bool) -> Self {
        let mut detector = Self {
            interval: 0,
            clip_count: [0; MAX_ENGINE_CHANNELS],
            samples_since_notification: [u32::MAX; MAX_ENGINE_CHANNELS],
            input_side,
        };
        detector.set_sample_rate(sample_rate);
        detector
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.interval = sample_rate.max(1.0) as u32;
        // Allow an immediate notification after reconfiguration.
        self.samples_since_notification = [u32::MAX; MAX_ENGINE_CHANNELS];
    }

    /// Scan one chunk, emitting clipping notifications into `sink`.
    pub fn detect(&mut self, buffer: &BufferView, sink: &mut RtEventSink) {
        let channels = buffer.channel_count().min(MAX_ENGINE_CHANNELS);
        for ch in 0..channels {
            let clipped = buffer.channel(ch).iter().filter(|s| s.abs() > CLIP_THRESHOLD).count();
            if clipped > 0 {
                self.clip_count[ch] = self.clip_count[ch].saturating_add(clipped as u32);
                if self.samples_since_notification[ch] >= self.interval {
                    sink.push(RtEvent::ClippingNotification {
                        channel: ch as u16,
                        input: self.input_side,
                        time: IMMEDIATE_PROCESS,
                    });
                    self.samples_since_notification[ch] = 0;
                }
            }
            self.samples_since_notification[ch] =
                self.samples_since_notification[ch].saturating_add(AUDIO_CHUNK_SIZE as u32);
        }
    }

    /// Total clipped samples seen on a channel.
    pub fn clip_count(&self, channel: usize) -> u32 {
        self.clip_count.get(channel).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SampleBuffer;
    use crate::event::queue::default_rt_event_channel;

    const SAMPLE_RATE: f32 = 48_000.0;

    fn sink() -> (RtEventSink, crate::event::queue::RtEventConsumer) {
        let (tx, rx) = default_rt_event_channel();
        (RtEventSink::new(tx), rx)
    }

    #[test]
    fn test_no_notification_below_threshold() {
        let mut detector = ClipDetector::new(SAMPLE_RATE, false);
        let (mut events, mut rx) = sink();

        let mut buffer = SampleBuffer::new(2);
        buffer.channel_mut(0).fill(0.99);
        detector.detect(&buffer.view(2), &mut events);

        assert!(rx.pop().is_none());
        assert_eq!(detector.clip_count(0), 0);
    }

    #[test]
    fn test_one_notification_per_interval() {
        let mut detector = ClipDetector::new(SAMPLE_RATE, false);
        let (mut events, mut rx) = sink();

        let mut buffer = SampleBuffer::new(2);
        buffer.channel_mut(1).fill(1.5);

        // A second's worth of clipping chunks produces exactly one event.
        let chunks = SAMPLE_RATE as usize / AUDIO_CHUNK_SIZE;
        for _ in 0..chunks {
            detector.detect(&buffer.view(2), &mut events);
        }
        let mut notifications = 0;
        while let Some(event) = rx.pop() {
            match event {
                RtEvent::ClippingNotification { channel, input, .. } => {
                    assert_eq!(channel, 1);
                    assert!(!input);
                    notifications += 1;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(notifications, 1);
        assert_eq!(detector.clip_count(1), chunks as u32 * AUDIO_CHUNK_SIZE as u32);

        // The next interval may notify again.
        detector.detect(&buffer.view(2), &mut events);
        assert!(matches!(rx.pop(), Some(RtEvent::ClippingNotification { channel: 1, .. })));
    }

    #[test]
    fn test_input_side_flag() {
        let mut detector = ClipDetector::new(SAMPLE_RATE, true);
        let (mut events, mut rx) = sink();

        let mut buffer = SampleBuffer::new(1);
        buffer.channel_mut(0)[0] = -2.0;
        detector.detect(&buffer.view(1), &mut events);

        assert!(matches!(rx.pop(), Some(RtEvent::ClippingNotification { input: true, .. })));
    }
}
