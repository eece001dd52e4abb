//! Processor and track registry
//!
//! The container is the non-RT bookkeeping side of the graph: who exists,
//! under which name, on which track, and whether the DSP object currently
//! lives on the audio thread or is parked here. Three maps, each behind its
//! own mutex, always locked in the fixed order id -> name -> track.
//!
//! The audio thread never touches the container.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{EngineError, EngineResult};
use crate::processor::{Processor, ProcessorModel};
use crate::types::ObjectId;

struct Entry {
    model: Arc<ProcessorModel>,
    /// DSP half, present while the processor is not in the RT graph
    dsp: Option<Box<dyn Processor>>,
    is_track: bool,
    /// True once the RT side has acknowledged the object as inserted
    live: bool,
}

/// Name- and id-indexed registry with stable shared ownership of every
/// processor's model.
#[derive(Default)]
pub struct ProcessorContainer {
    by_id: Mutex<HashMap<ObjectId, Entry>>,
    by_name: Mutex<HashMap<String, ObjectId>>,
    by_track: Mutex<HashMap<ObjectId, Vec<ObjectId>>>,
}

impl ProcessorContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor, taking ownership of its DSP half. Fails on a
    /// global name collision.
    pub fn add_processor(
        &self,
        model: Arc<ProcessorModel>,
        dsp: Box<dyn Processor>,
    ) -> EngineResult<()> {
        self.add_entry(model, Some(dsp), false)
    }

    /// Register a track. The track object itself lives in the audio graph;
    /// the container records its model and membership list.
    pub fn add_track(&self, model: Arc<ProcessorModel>) -> EngineResult<()> {
        let id = model.id();
        self.add_entry(model, None, true)?;
        self.by_track.lock().unwrap().insert(id, Vec::new());
        Ok(())
    }

    fn add_entry(
        &self,
        model: Arc<ProcessorModel>,
        dsp: Option<Box<dyn Processor>>,
        is_track: bool,
    ) -> EngineResult<()> {
        let id = model.id();
        let name = model.name().to_string();
        let mut by_id = self.by_id.lock().unwrap();
        let mut by_name = self.by_name.lock().unwrap();
        if by_name.contains_key(&name) || by_id.contains_key(&id) {
            return Err(if is_track { EngineError::InvalidTrack } else { EngineError::InvalidProcessor });
        }
        by_id.insert(id, Entry { model, dsp, is_track, live: false });
        by_name.insert(name, id);
        Ok(())
    }

    /// Remove a processor or track entirely. Fails while the object is
    /// still bound to a track or still live on the audio thread.
    pub fn remove(&self, id: ObjectId) -> EngineResult<()> {
        let mut by_id = self.by_id.lock().unwrap();
        let mut by_name = self.by_name.lock().unwrap();
        let mut by_track = self.by_track.lock().unwrap();

        let entry = by_id.get(&id).ok_or(EngineError::InvalidProcessor)?;
        if entry.live {
            return Err(EngineError::RealtimeActive);
        }
        if !entry.is_track && by_track.values().any(|members| members.contains(&id)) {
            return Err(EngineError::InvalidProcessor);
        }

        let entry = by_id.remove(&id).ok_or(EngineError::InvalidProcessor)?;
        by_name.remove(entry.model.name());
        if entry.is_track {
            by_track.remove(&id);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // DSP custody
    // ─────────────────────────────────────────────────────────────

    /// Take the parked DSP half for handoff to the audio thread.
    pub fn take_dsp(&self, id: ObjectId) -> Option<Box<dyn Processor>> {
        self.by_id.lock().unwrap().get_mut(&id).and_then(|entry| entry.dsp.take())
    }

    /// Park a DSP half returned from the audio thread.
    pub fn restore_dsp(&self, id: ObjectId, dsp: Box<dyn Processor>) {
        if let Some(entry) = self.by_id.lock().unwrap().get_mut(&id) {
            entry.dsp = Some(dsp);
            entry.live = false;
        } else {
            log::warn!("returned processor {} is no longer registered", id);
        }
    }

    /// Flip the liveness flag once the audio thread acknowledges an insert
    /// or removal.
    pub fn set_live(&self, id: ObjectId, live: bool) {
        if let Some(entry) = self.by_id.lock().unwrap().get_mut(&id) {
            entry.live = live;
        }
    }

    pub fn is_live(&self, id: ObjectId) -> bool {
        self.by_id.lock().unwrap().get(&id).map(|entry| entry.live).unwrap_or(false)
    }

    // ─────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────

    pub fn processor_exists(&self, id: ObjectId) -> bool {
        self.by_id.lock().unwrap().contains_key(&id)
    }

    pub fn processor_exists_by_name(&self, name: &str) -> bool {
        self.by_name.lock().unwrap().contains_key(name)
    }

    pub fn processor(&self, id: ObjectId) -> Option<Arc<ProcessorModel>> {
        self.by_id.lock().unwrap().get(&id).map(|entry| Arc::clone(&entry.model))
    }

    pub fn processor_by_name(&self, name: &str) -> Option<Arc<ProcessorModel>> {
        let id = *self.by_name.lock().unwrap().get(name)?;
        self.processor(id)
    }

    pub fn track(&self, id: ObjectId) -> Option<Arc<ProcessorModel>> {
        self.by_id
            .lock()
            .unwrap()
            .get(&id)
            .filter(|entry| entry.is_track)
            .map(|entry| Arc::clone(&entry.model))
    }

    pub fn track_by_name(&self, name: &str) -> Option<Arc<ProcessorModel>> {
        let id = *self.by_name.lock().unwrap().get(name)?;
        self.track(id)
    }

    pub fn all_processors(&self) -> Vec<Arc<ProcessorModel>> {
        self.by_id.lock().unwrap().values().map(|entry| Arc::clone(&entry.model)).collect()
    }

    pub fn all_tracks(&self) -> Vec<Arc<ProcessorModel>> {
        self.by_id
            .lock()
            .unwrap()
            .values()
            .filter(|entry| entry.is_track)
            .map(|entry| Arc::clone(&entry.model))
            .collect()
    }

    // ─────────────────────────────────────────────────────────────
    // Track membership
    // ─────────────────────────────────────────────────────────────

    /// Bind a processor to a track. A processor can be bound to at most one
    /// track at a time.
    pub fn add_to_track(
        &self,
        processor_id: ObjectId,
        track_id: ObjectId,
        before: Option<ObjectId>,
    ) -> EngineResult<()> {
        let by_id = self.by_id.lock().unwrap();
        if !by_id.contains_key(&processor_id) {
            return Err(EngineError::InvalidProcessor);
        }
        drop(by_id);

        let mut by_track = self.by_track.lock().unwrap();
        if by_track.values().any(|members| members.contains(&processor_id)) {
            return Err(EngineError::InvalidProcessor);
        }
        let members = by_track.get_mut(&track_id).ok_or(EngineError::InvalidTrack)?;
        let position = match before {
            Some(before_id) => members
                .iter()
                .position(|&id| id == before_id)
                .ok_or(EngineError::InvalidProcessor)?,
            None => members.len(),
        };
        members.insert(position, processor_id);
        Ok(())
    }

    pub fn remove_from_track(&self, processor_id: ObjectId, track_id: ObjectId) -> EngineResult<()> {
        let mut by_track = self.by_track.lock().unwrap();
        let members = by_track.get_mut(&track_id).ok_or(EngineError::InvalidTrack)?;
        let position = members
            .iter()
            .position(|&id| id == processor_id)
            .ok_or(EngineError::InvalidProcessor)?;
        members.remove(position);
        Ok(())
    }

    pub fn is_on_any_track(&self, processor_id: ObjectId) -> bool {
        self.by_track.lock().unwrap().values().any(|members| members.contains(&processor_id))
    }

    /// Processors bound to a track, in processing order.
    pub fn processors_on_track(&self, track_id: ObjectId) -> Vec<Arc<ProcessorModel>> {
        let members = match self.by_track.lock().unwrap().get(&track_id) {
            Some(members) => members.clone(),
            None => return Vec::new(),
        };
        let by_id = self.by_id.lock().unwrap();
        members
            .iter()
            .filter_map(|id| by_id.get(id).map(|entry| Arc::clone(&entry.model)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::test_support::PassthroughProcessor;

    fn boxed(name: &str) -> (Arc<ProcessorModel>, Box<dyn Processor>) {
        let processor = PassthroughProcessor::new(name);
        (Arc::clone(processor.model()), Box::new(processor))
    }

    fn track_model(name: &str) -> Arc<ProcessorModel> {
        Arc::new(ProcessorModel::new(name, "Track"))
    }

    #[test]
    fn test_add_and_query() {
        let container = ProcessorContainer::new();
        let (model, dsp) = boxed("one");
        let id = model.id();
        container.add_processor(model, dsp).unwrap();

        assert!(container.processor_exists(id));
        assert!(container.processor_exists_by_name("one"));
        assert_eq!(container.processor_by_name("one").unwrap().id(), id);
        assert!(container.track(id).is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let container = ProcessorContainer::new();
        let (model_a, dsp_a) = boxed("dup");
        let (model_b, dsp_b) = boxed("dup");
        container.add_processor(model_a, dsp_a).unwrap();
        assert_eq!(container.add_processor(model_b, dsp_b), Err(EngineError::InvalidProcessor));
    }

    #[test]
    fn test_remove_clears_all_maps() {
        let container = ProcessorContainer::new();
        let (model, dsp) = boxed("gone");
        let id = model.id();
        container.add_processor(model, dsp).unwrap();
        container.remove(id).unwrap();

        assert!(!container.processor_exists(id));
        assert!(!container.processor_exists_by_name("gone"));
        assert_eq!(container.remove(id), Err(EngineError::InvalidProcessor));
    }

    #[test]
    fn test_track_membership_is_exclusive() {
        let container = ProcessorContainer::new();
        let track_a = track_model("a");
        let track_b = track_model("b");
        let (model, dsp) = boxed("fx");
        let processor_id = model.id();

        container.add_track(Arc::clone(&track_a)).unwrap();
        container.add_track(Arc::clone(&track_b)).unwrap();
        container.add_processor(model, dsp).unwrap();

        container.add_to_track(processor_id, track_a.id(), None).unwrap();
        assert_eq!(
            container.add_to_track(processor_id, track_b.id(), None),
            Err(EngineError::InvalidProcessor)
        );

        // Removal from the bound track frees it up again.
        container.remove_from_track(processor_id, track_a.id()).unwrap();
        container.add_to_track(processor_id, track_b.id(), None).unwrap();
        assert!(container.is_on_any_track(processor_id));
    }

    #[test]
    fn test_bound_processor_cannot_be_removed() {
        let container = ProcessorContainer::new();
        let track = track_model("t");
        let (model, dsp) = boxed("bound");
        let processor_id = model.id();

        container.add_track(Arc::clone(&track)).unwrap();
        container.add_processor(model, dsp).unwrap();
        container.add_to_track(processor_id, track.id(), None).unwrap();

        assert_eq!(container.remove(processor_id), Err(EngineError::InvalidProcessor));
    }

    #[test]
    fn test_insert_before_preserves_order() {
        let container = ProcessorContainer::new();
        let track = track_model("t");
        container.add_track(Arc::clone(&track)).unwrap();

        let (model_a, dsp_a) = boxed("fx_a");
        let (model_b, dsp_b) = boxed("fx_b");
        let a = model_a.id();
        let b = model_b.id();
        container.add_processor(model_a, dsp_a).unwrap();
        container.add_processor(model_b, dsp_b).unwrap();

        container.add_to_track(a, track.id(), None).unwrap();
        container.add_to_track(b, track.id(), Some(a)).unwrap();

        let order: Vec<_> =
            container.processors_on_track(track.id()).iter().map(|m| m.id()).collect();
        assert_eq!(order, vec![b, a]);
    }

    #[test]
    fn test_dsp_custody() {
        let container = ProcessorContainer::new();
        let (model, dsp) = boxed("custody");
        let id = model.id();
        container.add_processor(model, dsp).unwrap();

        let taken = container.take_dsp(id).unwrap();
        assert!(container.take_dsp(id).is_none());
        container.set_live(id, true);
        assert!(container.is_live(id));

        container.restore_dsp(id, taken);
        assert!(!container.is_live(id));
        assert!(container.take_dsp(id).is_some());
    }
}
