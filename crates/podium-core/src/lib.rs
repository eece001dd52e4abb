//! podium-core - headless real-time audio engine
//!
//! A chunk-based audio processing engine for DAW hosts: tracks of chained
//! processors, a dual-queue event plane with strict real-time allocation
//! discipline, musical transport, CV/gate routing and optional multi-core
//! track dispatch. Driver integration (JACK/ALSA/offline), MIDI front-ends
//! and plugin-format wrappers live in separate crates and talk to the
//! engine through the interfaces defined here.

pub mod buffer;
pub mod engine;
pub mod error;
pub mod event;
pub mod plugins;
pub mod processor;
pub mod track;
pub mod transport;
pub mod types;

pub use buffer::{BufferView, BufferViewMut, SampleBuffer};
pub use engine::{AudioEngine, RealtimeState};
pub use error::{DispatcherStatus, EngineError, EngineResult, ProcessorError, ProcessorResult};
pub use event::rt::{RtEvent, IMMEDIATE_PROCESS};
pub use event::{Event, EventKind, KeyboardEvent, KeyboardEventKind};
pub use processor::{Processor, ProcessorModel};
pub use track::Track;
pub use transport::{Transport, TransportView};
pub use types::*;
