//! Gain plugin - smoothed volume control
//!
//! The reference internal plugin: one dB-domain gain parameter with a
//! per-chunk linear ramp so value jumps don't click.

use std::sync::Arc;

use crate::buffer::{BufferView, BufferViewMut};
use crate::engine::host_control::HostControl;
use crate::event::queue::RtEventSink;
use crate::processor::parameters::{FloatParameterValue, FloatPreProcessor};
use crate::processor::{Processor, ProcessorModel};
use crate::types::AUDIO_CHUNK_SIZE;

/// Factory uid for [`GainPlugin`].
pub const GAIN_PLUGIN_UID: &str = "podium.gain";

const GAIN_MIN_DB: f32 = -120.0;
const GAIN_MAX_DB: f32 = 24.0;

/// Gain with one parameter:
/// - `gain`: level in dB (-120 to +24, default 0), pre-processed to linear
pub struct GainPlugin {
    model: Arc<ProcessorModel>,
    gain: Arc<FloatParameterValue>,
    /// Gain applied at the end of the previous chunk; ramp origin
    smoothed_gain: f32,
    _host: HostControl,
}

impl GainPlugin {
    pub fn new(name: &str, host: HostControl) -> Self {
        let mut model = ProcessorModel::new(name, "Gain");
        let gain = model
            .register_float_parameter(
                "gain",
                "Gain",
                "dB",
                0.0,
                GAIN_MIN_DB,
                GAIN_MAX_DB,
                FloatPreProcessor::DbToLinear,
            )
            .expect("empty registry");
        Self { model: Arc::new(model), gain, smoothed_gain: 1.0, _host: host }
    }
}

impl Processor for GainPlugin {
    fn model(&self) -> &Arc<ProcessorModel> {
        &self.model
    }

    fn init(&mut self, _sample_rate: f32) -> crate::error::ProcessorResult<()> {
        self.smoothed_gain = self.gain.processed_value();
        Ok(())
    }

    fn process_audio(
        &mut self,
        input: &BufferView,
        output: &mut BufferViewMut,
        _out_events: &mut RtEventSink,
    ) {
        let target = self.gain.processed_value();
        let start = self.smoothed_gain;
        let step = (target - start) / AUDIO_CHUNK_SIZE as f32;

        let channels = output.channel_count().min(input.channel_count());
        for ch in 0..channels {
            let src = input.channel(ch);
            let dst = output.channel_mut(ch);
            let mut gain = start;
            for (d, s) in dst.iter_mut().zip(src.iter()) {
                gain += step;
                *d = *s * gain;
            }
        }
        for ch in channels..output.channel_count() {
            output.channel_mut(ch).fill(0.0);
        }
        self.smoothed_gain = target;
    }
}
