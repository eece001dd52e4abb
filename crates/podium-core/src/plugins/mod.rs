//! Internal plugins
//!
//! Plugins that ship with the engine and are registered into every new
//! instance. External formats (VST/LV2/CLAP wrappers) register through the
//! same factory interface from their own crates.

mod gain;

pub use gain::{GainPlugin, GAIN_PLUGIN_UID};

use crate::engine::AudioEngine;

/// Register the built-in plugin factories on a freshly constructed engine.
pub(crate) fn register_internal_plugins(engine: &mut AudioEngine) {
    engine.register_plugin(
        GAIN_PLUGIN_UID,
        Box::new(|name, host| Box::new(GainPlugin::new(name, host))),
    );
}
