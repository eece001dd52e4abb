//! Event dispatcher
//!
//! A background thread bridging the non-RT control world and the audio
//! thread. Control code posts [`Event`]s; each tick (1 ms) the dispatcher:
//!
//! 1. moves due scheduled events into the inbox,
//! 2. drains the outbound RT queue — materialising notifications for
//!    subscribers, returning boxed processors and tracks to the container,
//!    resolving graph-edit acknowledgements and freeing returned string and
//!    blob payloads,
//! 3. drains the inbox — converting RT-bound events and pushing them to the
//!    inbound queue (with bounded backoff, never dropping), running async
//!    work, delivering poster-addressed events and firing completion
//!    callbacks,
//! 4. sleeps until the next tick.
//!
//! `stop()` is cooperative: set the flag, wake the thread, drain, join.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::engine::container::ProcessorContainer;
use crate::error::DispatcherStatus;
use crate::event::queue::{RtEventConsumer, RtEventProducer};
use crate::event::rt::RtEvent;
use crate::event::{Event, EventKind, EventStatus, KeyboardEvent, KeyboardEventKind};
use crate::types::ObjectId;

/// Dispatcher tick period.
const TICK: Duration = Duration::from_millis(1);

/// Backoff applied while the inbound RT queue is full.
const PUSH_BACKOFF: Duration = Duration::from_micros(100);

/// Receiver of dispatched events; control front-ends implement this.
pub trait EventPoster: Send + Sync {
    /// Unique id used for registration and addressing.
    fn poster_id(&self) -> ObjectId;

    /// Deliver one event. Called on the dispatcher thread.
    fn process_event(&self, event: &Event);
}

/// A graph edit in flight, waiting for the audio thread's acknowledgement.
#[derive(Debug, Clone, Copy)]
pub enum PendingOp {
    InsertProcessor { processor: ObjectId },
    RemoveProcessor { processor: ObjectId },
    InsertTrack { track: ObjectId },
    RemoveTrack { track: ObjectId },
}

/// Shared registry of in-flight graph edits, keyed by op id.
pub type PendingOps = Arc<Mutex<HashMap<u64, PendingOp>>>;

enum DispatcherMsg {
    Post(Event),
    PostAt(Event, Instant),
    Stop,
}

/// Cloneable posting handle; safe from any non-RT thread.
#[derive(Clone)]
pub struct EventDispatcherHandle {
    tx: Sender<DispatcherMsg>,
}

impl EventDispatcherHandle {
    /// Queue an event for the next dispatcher iteration.
    pub fn post_event(&self, event: Event) {
        let _ = self.tx.send(DispatcherMsg::Post(event));
    }

    /// Queue an event for delivery at (or shortly after) `at`.
    pub fn post_event_at(&self, event: Event, at: Instant) {
        let _ = self.tx.send(DispatcherMsg::PostAt(event, at));
    }
}

struct Registries {
    posters: Mutex<HashMap<ObjectId, Arc<dyn EventPoster>>>,
    keyboard: Mutex<Vec<ObjectId>>,
    parameter: Mutex<Vec<ObjectId>>,
    notification: Mutex<Vec<ObjectId>>,
}

/// The background dispatcher thread and its control surface.
pub struct EventDispatcher {
    handle: EventDispatcherHandle,
    thread: Option<thread::JoinHandle<()>>,
    registries: Arc<Registries>,
    running: Arc<AtomicBool>,
}

impl EventDispatcher {
    /// Spawn the dispatcher thread.
    ///
    /// `rt_in` is the shared producer of the engine's inbound queue (the
    /// engine's non-RT side holds the other reference); `rt_out` is the
    /// sole consumer of the outbound queue.
    pub fn new(
        container: Arc<ProcessorContainer>,
        rt_in: Arc<Mutex<RtEventProducer>>,
        rt_out: RtEventConsumer,
        pending_ops: PendingOps,
    ) -> Self {
        let (tx, rx) = unbounded();
        let registries = Arc::new(Registries {
            posters: Mutex::new(HashMap::new()),
            keyboard: Mutex::new(Vec::new()),
            parameter: Mutex::new(Vec::new()),
            notification: Mutex::new(Vec::new()),
        });
        let running = Arc::new(AtomicBool::new(true));

        let worker = Worker {
            rx,
            container,
            rt_in,
            rt_out,
            pending_ops,
            registries: Arc::clone(&registries),
            running: Arc::clone(&running),
            scheduled: BinaryHeap::new(),
        };
        let thread = thread::Builder::new()
            .name("event-dispatcher".to_string())
            .spawn(move || worker.run())
            .ok();
        if thread.is_none() {
            log::error!("failed to spawn event dispatcher thread");
        }

        Self { handle: EventDispatcherHandle { tx }, thread, registries, running }
    }

    /// Cloneable posting handle.
    pub fn handle(&self) -> EventDispatcherHandle {
        self.handle.clone()
    }

    pub fn post_event(&self, event: Event) {
        self.handle.post_event(event);
    }

    pub fn post_event_at(&self, event: Event, at: Instant) {
        self.handle.post_event_at(event, at);
    }

    // ─────────────────────────────────────────────────────────────
    // Subscriber registration
    // ─────────────────────────────────────────────────────────────

    pub fn register_poster(&self, poster: Arc<dyn EventPoster>) -> DispatcherStatus {
        let mut posters = self.registries.posters.lock().unwrap();
        if posters.contains_key(&poster.poster_id()) {
            return DispatcherStatus::AlreadySubscribed;
        }
        posters.insert(poster.poster_id(), poster);
        DispatcherStatus::Ok
    }

    pub fn deregister_poster(&self, id: ObjectId) -> DispatcherStatus {
        let mut posters = self.registries.posters.lock().unwrap();
        if posters.remove(&id).is_none() {
            return DispatcherStatus::UnknownPoster;
        }
        self.registries.keyboard.lock().unwrap().retain(|&p| p != id);
        self.registries.parameter.lock().unwrap().retain(|&p| p != id);
        self.registries.notification.lock().unwrap().retain(|&p| p != id);
        DispatcherStatus::Ok
    }

    pub fn subscribe_to_keyboard_events(&self, id: ObjectId) -> DispatcherStatus {
        self.subscribe(&self.registries.keyboard, id)
    }

    pub fn unsubscribe_from_keyboard_events(&self, id: ObjectId) -> DispatcherStatus {
        self.unsubscribe(&self.registries.keyboard, id)
    }

    pub fn subscribe_to_parameter_change_notifications(&self, id: ObjectId) -> DispatcherStatus {
        self.subscribe(&self.registries.parameter, id)
    }

    pub fn unsubscribe_from_parameter_change_notifications(&self, id: ObjectId) -> DispatcherStatus {
        self.unsubscribe(&self.registries.parameter, id)
    }

    pub fn subscribe_to_engine_notifications(&self, id: ObjectId) -> DispatcherStatus {
        self.subscribe(&self.registries.notification, id)
    }

    pub fn unsubscribe_from_engine_notifications(&self, id: ObjectId) -> DispatcherStatus {
        self.unsubscribe(&self.registries.notification, id)
    }

    fn subscribe(&self, list: &Mutex<Vec<ObjectId>>, id: ObjectId) -> DispatcherStatus {
        if !self.registries.posters.lock().unwrap().contains_key(&id) {
            return DispatcherStatus::UnknownPoster;
        }
        let mut list = list.lock().unwrap();
        if list.contains(&id) {
            return DispatcherStatus::AlreadySubscribed;
        }
        list.push(id);
        DispatcherStatus::Ok
    }

    fn unsubscribe(&self, list: &Mutex<Vec<ObjectId>>, id: ObjectId) -> DispatcherStatus {
        let mut list = list.lock().unwrap();
        match list.iter().position(|&p| p == id) {
            Some(position) => {
                list.remove(position);
                DispatcherStatus::Ok
            }
            None => DispatcherStatus::UnknownPoster,
        }
    }

    /// Fan an event out to parameter-change subscribers from the calling
    /// thread. Used for notification bursts that do not originate on the
    /// audio thread (for example state snapshot application).
    pub fn notify_parameter_subscribers(&self, event: &Event) {
        let ids = self.registries.parameter.lock().unwrap().clone();
        let posters = self.registries.posters.lock().unwrap();
        for id in ids {
            if let Some(poster) = posters.get(&id) {
                poster.process_event(event);
            }
        }
    }

    /// Stop the dispatcher: pending events are drained and dropped, the
    /// thread joined.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.handle.tx.send(DispatcherMsg::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

struct ScheduledEvent {
    at: Instant,
    event: Event,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}
impl Eq for ScheduledEvent {}
impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at.cmp(&other.at)
    }
}

struct Worker {
    rx: Receiver<DispatcherMsg>,
    container: Arc<ProcessorContainer>,
    rt_in: Arc<Mutex<RtEventProducer>>,
    rt_out: RtEventConsumer,
    pending_ops: PendingOps,
    registries: Arc<Registries>,
    running: Arc<AtomicBool>,
    scheduled: BinaryHeap<Reverse<ScheduledEvent>>,
}

impl Worker {
    fn run(mut self) {
        log::info!("event dispatcher started");
        let mut inbox: Vec<Event> = Vec::new();

        while self.running.load(Ordering::Acquire) {
            let deadline = Instant::now() + TICK;

            // Collect messages until the tick deadline.
            loop {
                match self.rx.recv_deadline(deadline) {
                    Ok(DispatcherMsg::Post(event)) => inbox.push(event),
                    Ok(DispatcherMsg::PostAt(event, at)) => {
                        self.scheduled.push(Reverse(ScheduledEvent { at, event }));
                    }
                    Ok(DispatcherMsg::Stop) | Err(RecvTimeoutError::Disconnected) => {
                        self.running.store(false, Ordering::Release);
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) => break,
                }
            }

            // 1. Due scheduled events join the inbox.
            let now = Instant::now();
            while let Some(Reverse(next)) = self.scheduled.peek() {
                if next.at > now {
                    break;
                }
                if let Some(Reverse(scheduled)) = self.scheduled.pop() {
                    inbox.push(scheduled.event);
                }
            }

            // 2. Outbound RT queue.
            while let Some(event) = self.rt_out.pop() {
                self.handle_outbound(event);
            }

            // 3. Inbox.
            for event in inbox.drain(..) {
                self.dispatch(event);
            }
        }

        // Cooperative shutdown: drop whatever is still queued.
        while let Ok(message) = self.rx.try_recv() {
            drop(message);
        }
        self.scheduled.clear();
        log::info!("event dispatcher stopped");
    }

    /// Materialise an RT event from the audio thread into notifications,
    /// ownership returns and op resolutions.
    fn handle_outbound(&self, event: RtEvent) {
        match event {
            RtEvent::NoteOn { processor, channel, note, velocity, .. } => {
                self.fan_out_keyboard(processor, KeyboardEventKind::NoteOn, channel, note, velocity);
            }
            RtEvent::NoteOff { processor, channel, note, velocity, .. } => {
                self.fan_out_keyboard(processor, KeyboardEventKind::NoteOff, channel, note, velocity);
            }
            RtEvent::NoteAftertouch { processor, channel, note, value, .. } => {
                self.fan_out_keyboard(processor, KeyboardEventKind::NoteAftertouch, channel, note, value);
            }
            RtEvent::PitchBend { processor, channel, value, .. } => {
                self.fan_out_keyboard(processor, KeyboardEventKind::PitchBend, channel, 0, value);
            }
            RtEvent::Modulation { processor, channel, value, .. } => {
                self.fan_out_keyboard(processor, KeyboardEventKind::Modulation, channel, 0, value);
            }
            RtEvent::Aftertouch { processor, channel, value, .. } => {
                self.fan_out_keyboard(processor, KeyboardEventKind::Aftertouch, channel, 0, value);
            }
            RtEvent::WrappedMidi { processor, data, .. } => {
                self.fan_out_keyboard(processor, KeyboardEventKind::WrappedMidi(data), 0, 0, 0.0);
            }
            RtEvent::ParameterChangeNotification { processor, parameter, normalized, domain, .. } => {
                let event = Event::new(EventKind::ParameterChangeNotification {
                    parameter,
                    normalized,
                    domain,
                })
                .with_receiver(processor);
                self.fan_out(&self.registries.parameter, &event);
            }
            RtEvent::ClippingNotification { channel, input, .. } => {
                let event = Event::new(EventKind::ClippingNotification {
                    channel: channel as usize,
                    input,
                });
                self.fan_out(&self.registries.notification, &event);
            }
            RtEvent::StringDelete { value } => drop(value),
            RtEvent::DataDelete { value } => drop(value),
            RtEvent::ProcessorReturned { processor, op } => {
                // The returned box is the acknowledgement itself, for both
                // completed removals and rejected inserts.
                let id = processor.model().id();
                self.container.restore_dsp(id, processor);
                self.pending_ops.lock().unwrap().remove(&op);
            }
            RtEvent::TrackReturned { track, op } => {
                let id = track.id();
                drop(track);
                self.container.set_live(id, false);
                if let Err(error) = self.container.remove(id) {
                    log::warn!("returned track {} could not be deregistered: {}", id, error);
                }
                self.resolve_op(op, true);
            }
            RtEvent::OpCompleted { op, success } => {
                self.resolve_op(op, success);
            }
            other => {
                log::debug!("unhandled outbound event {:?}", other);
            }
        }
    }

    fn resolve_op(&self, op: u64, success: bool) {
        let pending = self.pending_ops.lock().unwrap().remove(&op);
        match pending {
            Some(PendingOp::InsertProcessor { processor }) if success => {
                self.container.set_live(processor, true);
            }
            Some(PendingOp::InsertTrack { track }) if success => {
                self.container.set_live(track, true);
            }
            Some(PendingOp::RemoveProcessor { processor }) if success => {
                self.container.set_live(processor, false);
            }
            Some(PendingOp::RemoveTrack { .. }) => {
                // Container entry was dropped when the track came back.
            }
            Some(pending) => {
                log::warn!("graph edit {:?} rejected by the audio thread", pending);
            }
            None => {
                log::debug!("acknowledgement for unknown op {}", op);
            }
        }
    }

    fn fan_out_keyboard(
        &self,
        processor: ObjectId,
        kind: KeyboardEventKind,
        channel: u8,
        note: u8,
        value: f32,
    ) {
        let event = Event::new(EventKind::Keyboard(KeyboardEvent { kind, channel, note, value }))
            .with_receiver(processor);
        self.fan_out(&self.registries.keyboard, &event);
    }

    fn fan_out(&self, subscribers: &Mutex<Vec<ObjectId>>, event: &Event) {
        let ids = subscribers.lock().unwrap().clone();
        let posters = self.registries.posters.lock().unwrap();
        for id in ids {
            if let Some(poster) = posters.get(&id) {
                poster.process_event(event);
            }
        }
    }

    /// Deliver one inbox event.
    fn dispatch(&self, mut event: Event) {
        let completion = event.take_completion();
        let status = if event.maps_to_rt_event() {
            match event.to_rt_event() {
                Some(rt_event) => {
                    self.push_inbound(rt_event);
                    EventStatus::Handled
                }
                None => EventStatus::UnknownReceiver,
            }
        } else {
            self.deliver_locally(event)
        };

        if let Some(completion) = completion {
            completion(status);
        }
    }

    fn deliver_locally(&self, event: Event) -> EventStatus {
        if let EventKind::AsyncWork { .. } = event.kind() {
            let receiver = event.receiver();
            if let EventKind::AsyncWork { work_id, callback } = event.into_kind() {
                let status = callback();
                if let Some(processor) = receiver {
                    self.push_inbound(RtEvent::AsyncWorkCompletion {
                        processor,
                        work_id,
                        status,
                        time: crate::event::rt::IMMEDIATE_PROCESS,
                    });
                }
            }
            return EventStatus::Handled;
        }

        match event.receiver() {
            Some(receiver) => {
                let posters = self.registries.posters.lock().unwrap();
                match posters.get(&receiver) {
                    Some(poster) => {
                        poster.process_event(&event);
                        EventStatus::Handled
                    }
                    None => {
                        log::warn!("event for unknown poster {}", receiver);
                        EventStatus::UnknownReceiver
                    }
                }
            }
            None => {
                log::debug!("dropping unaddressed event {:?}", event.kind());
                EventStatus::UnknownReceiver
            }
        }
    }

    /// Push to the inbound RT queue, backing off while it is full. Events
    /// are delayed under pressure, never dropped.
    fn push_inbound(&self, event: RtEvent) {
        let mut event = event;
        loop {
            let result = self.rt_in.lock().unwrap().push(event);
            match result {
                Ok(()) => return,
                Err((_, returned)) => {
                    if !self.running.load(Ordering::Acquire) {
                        log::warn!("dispatcher stopping; inbound event dropped");
                        return;
                    }
                    event = returned;
                    thread::sleep(PUSH_BACKOFF);
                }
            }
        }
    }
}
