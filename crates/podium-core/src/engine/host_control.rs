//! Host services handed to every processor
//!
//! Processors never see the engine directly; they get a [`HostControl`]
//! with a posting handle for the dispatcher (non-RT use) and the shared
//! transport view (safe to read from the audio thread).

use std::sync::Arc;

use crate::engine::dispatcher::EventDispatcherHandle;
use crate::event::Event;
use crate::transport::TransportView;

/// Cheap, cloneable handle giving a processor access to its host.
#[derive(Clone)]
pub struct HostControl {
    dispatcher: EventDispatcherHandle,
    transport: Arc<TransportView>,
}

impl HostControl {
    pub fn new(dispatcher: EventDispatcherHandle, transport: Arc<TransportView>) -> Self {
        Self { dispatcher, transport }
    }

    /// Post an event to the dispatcher. Non-RT threads only.
    pub fn post_event(&self, event: Event) {
        self.dispatcher.post_event(event);
    }

    /// Transport state as of the current chunk. Readable anywhere,
    /// including the audio thread.
    pub fn transport(&self) -> &TransportView {
        &self.transport
    }
}
