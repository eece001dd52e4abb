//! Serializable processor state snapshots

use serde::{Deserialize, Serialize};

use crate::types::ObjectId;

/// A point-in-time snapshot of a processor's observable state: bypass,
/// automatable parameters (normalized) and string properties.
///
/// Snapshots round-trip through `save_state` / `set_state`; the wire format
/// is whatever the chosen serde backend produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessorState {
    /// Bypass flag; `None` leaves the current value untouched
    pub bypassed: Option<bool>,
    /// `(parameter id, normalized value)` pairs
    pub parameters: Vec<(ObjectId, f32)>,
    /// `(property id, value)` pairs
    pub properties: Vec<(ObjectId, String)>,
}

impl ProcessorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bypassed(&mut self, bypassed: bool) {
        self.bypassed = Some(bypassed);
    }

    pub fn add_parameter_change(&mut self, parameter: ObjectId, normalized: f32) {
        self.parameters.push((parameter, normalized));
    }

    pub fn add_property_change(&mut self, property: ObjectId, value: impl Into<String>) {
        self.properties.push((property, value.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_round_trip() {
        let mut state = ProcessorState::new();
        state.set_bypassed(true);
        state.add_parameter_change(10, 0.25);
        state.add_parameter_change(11, 0.75);
        state.add_property_change(12, "sample.wav");

        let json = serde_json::to_string(&state).unwrap();
        let decoded: ProcessorState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, decoded);
    }
}
