//! In-memory [`MediaDocument`], used to embed the probe without a browser
//! and to drive it from tests.
//!
//! Cloning a `MemoryDocument` yields another handle on the same document, so
//! a test can keep one handle while the probe owns the other.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::document::{
    Affordance, ElementId, ElementState, EventSender, MediaDocument, MediaEvent, MediaEventKind,
    PageMetadata, Subscription,
};
use crate::errors::BridgeError;

#[derive(Default)]
struct Inner {
    url: String,
    title: String,
    /// Attached elements, in document order.
    elements: Vec<(ElementId, ElementState)>,
    listeners: HashMap<ElementId, Vec<(u64, EventSender)>>,
    metadata: PageMetadata,
    affordances: HashSet<Affordance>,
    activations: Vec<Affordance>,
    play_refused: Option<String>,
    next_element: u64,
    next_listener: u64,
}

impl Inner {
    fn state_mut(&mut self, element: ElementId) -> Option<&mut ElementState> {
        self.elements
            .iter_mut()
            .find(|(id, _)| *id == element)
            .map(|(_, state)| state)
    }

    fn fire(&mut self, element: ElementId, kind: MediaEventKind) {
        if let Some(listeners) = self.listeners.get_mut(&element) {
            listeners.retain(|(_, tx)| tx.send(MediaEvent { element, kind }).is_ok());
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryDocument {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDocument {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        let doc = Self::default();
        {
            let mut inner = doc.inner.lock();
            inner.url = url.into();
            inner.title = title.into();
        }
        doc
    }

    /// Appends a media element at the end of the document.
    pub fn add_media(&self, state: ElementState) -> ElementId {
        let mut inner = self.inner.lock();
        inner.next_element += 1;
        let id = ElementId(inner.next_element);
        inner.elements.push((id, state));
        id
    }

    /// Detaches an element. Its listeners stay registered until the
    /// probe drops its subscription, like a detached DOM node.
    pub fn remove_media(&self, element: ElementId) {
        self.inner.lock().elements.retain(|(id, _)| *id != element);
    }

    /// Mutates an element's state without firing any event.
    pub fn update(&self, element: ElementId, f: impl FnOnce(&mut ElementState)) {
        if let Some(state) = self.inner.lock().state_mut(element) {
            f(state);
        }
    }

    pub fn fire(&self, element: ElementId, kind: MediaEventKind) {
        self.inner.lock().fire(element, kind);
    }

    pub fn state(&self, element: ElementId) -> Option<ElementState> {
        self.element_state(element)
    }

    pub fn set_title(&self, title: impl Into<String>) {
        self.inner.lock().title = title.into();
    }

    pub fn set_metadata(&self, metadata: PageMetadata) {
        self.inner.lock().metadata = metadata;
    }

    pub fn enable_affordance(&self, affordance: Affordance) {
        self.inner.lock().affordances.insert(affordance);
    }

    /// Page controls activated so far, oldest first.
    pub fn activations(&self) -> Vec<Affordance> {
        self.inner.lock().activations.clone()
    }

    pub fn listener_count(&self, element: ElementId) -> usize {
        self.inner
            .lock()
            .listeners
            .get(&element)
            .map_or(0, |listeners| listeners.len())
    }

    /// Makes every later `play` fail with `reason`, or succeed again with `None`.
    pub fn set_play_refused(&self, reason: Option<&str>) {
        self.inner.lock().play_refused = reason.map(str::to_string);
    }
}

impl MediaDocument for MemoryDocument {
    fn url(&self) -> String {
        self.inner.lock().url.clone()
    }

    fn title(&self) -> String {
        self.inner.lock().title.clone()
    }

    fn find_media(&self) -> Vec<ElementId> {
        self.inner.lock().elements.iter().map(|(id, _)| *id).collect()
    }

    fn contains(&self, element: ElementId) -> bool {
        self.inner.lock().elements.iter().any(|(id, _)| *id == element)
    }

    fn element_state(&self, element: ElementId) -> Option<ElementState> {
        self.inner
            .lock()
            .elements
            .iter()
            .find(|(id, _)| *id == element)
            .map(|(_, state)| *state)
    }

    fn metadata(&self) -> PageMetadata {
        self.inner.lock().metadata.clone()
    }

    fn subscribe(&mut self, element: ElementId, events: EventSender) -> Subscription {
        let key = {
            let mut inner = self.inner.lock();
            inner.next_listener += 1;
            let key = inner.next_listener;
            inner.listeners.entry(element).or_default().push((key, events));
            key
        };

        let inner = Arc::clone(&self.inner);
        Subscription::new(move || {
            let mut inner = inner.lock();
            if let Some(listeners) = inner.listeners.get_mut(&element) {
                listeners.retain(|(k, _)| *k != key);
                if listeners.is_empty() {
                    inner.listeners.remove(&element);
                }
            }
        })
    }

    fn play(&mut self, element: ElementId) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock();
        if let Some(reason) = inner.play_refused.clone() {
            return Err(BridgeError::media_refused("play", reason));
        }
        let Some(state) = inner.state_mut(element) else {
            return Ok(());
        };
        if state.paused {
            state.paused = false;
            inner.fire(element, MediaEventKind::Play);
        }
        Ok(())
    }

    fn pause(&mut self, element: ElementId) {
        let mut inner = self.inner.lock();
        let Some(state) = inner.state_mut(element) else {
            return;
        };
        if !state.paused {
            state.paused = true;
            inner.fire(element, MediaEventKind::Pause);
        }
    }

    fn seek(&mut self, element: ElementId, position: f64) {
        let mut inner = self.inner.lock();
        let Some(state) = inner.state_mut(element) else {
            return;
        };
        state.current_time = position;
        inner.fire(element, MediaEventKind::TimeUpdate);
    }

    fn activate(&mut self, affordance: Affordance) -> bool {
        let mut inner = self.inner.lock();
        if !inner.affordances.contains(&affordance) {
            return false;
        }
        trace!(?affordance, "Activating page control");
        inner.activations.push(affordance);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_subscription_drop_removes_listener() {
        let mut doc = MemoryDocument::new("https://a.example", "A");
        let element = doc.add_media(ElementState::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let subscription = doc.subscribe(element, tx);
        assert_eq!(doc.listener_count(element), 1);

        doc.fire(element, MediaEventKind::Ended);
        assert_eq!(
            rx.try_recv().unwrap(),
            MediaEvent {
                element,
                kind: MediaEventKind::Ended
            }
        );

        drop(subscription);
        assert_eq!(doc.listener_count(element), 0);
        doc.fire(element, MediaEventKind::Ended);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_play_and_pause_fire_events_on_change_only() {
        let mut doc = MemoryDocument::new("https://a.example", "A");
        let element = doc.add_media(ElementState::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = doc.subscribe(element, tx);

        doc.play(element).unwrap();
        doc.play(element).unwrap();
        doc.pause(element);

        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).map(|e| e.kind).collect();
        assert_eq!(kinds, vec![MediaEventKind::Play, MediaEventKind::Pause]);
    }

    #[test]
    fn test_refused_play_leaves_element_paused() {
        let mut doc = MemoryDocument::new("https://a.example", "A");
        let element = doc.add_media(ElementState::default());
        doc.set_play_refused(Some("autoplay blocked"));

        assert!(matches!(doc.play(element), Err(BridgeError::MediaRefused(_, _))));
        assert!(doc.state(element).unwrap().paused);
    }

    #[test]
    fn test_affordances() {
        let mut doc = MemoryDocument::new("https://a.example", "A");
        assert!(!doc.activate(Affordance::Next));
        doc.enable_affordance(Affordance::Next);
        assert!(doc.activate(Affordance::Next));
        assert_eq!(doc.activations(), vec![Affordance::Next]);
    }
}
