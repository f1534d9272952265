//! # Event
//!
//! Cross-cutting notification side-channel. Hooks that exist only to
//! broadcast a host lifecycle event translate the intercepted call into an
//! `emit` and forward to the original unchanged; peripheral modules
//! subscribe here instead of owning hooks of their own.

use std::sync::Mutex;

/// A subscribed callback.
type Listener<E> = Box<dyn Fn(&E) + Send + Sync>;

/// In-process publish/subscribe bus for one event type.
///
/// Constructed explicitly during bootstrap and shared by reference with
/// the hooks that publish and the modules that subscribe.
pub struct EventBus<E> {
    /// Listeners in subscription order
    listeners: Mutex<Vec<Listener<E>>>,
}

impl<E> EventBus<E> {
    /// An empty bus.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Registers a listener; it stays subscribed for the bus's lifetime.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.listeners.lock().unwrap().push(Box::new(listener));
    }

    /// Delivers `event` to every listener in subscription order.
    ///
    /// The bus lock is held during delivery, so listeners must not
    /// subscribe from within a callback.
    pub fn emit(&self, event: &E) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener(event);
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Eq)]
    enum HostEvent {
        UiCompleted,
        HomeButtonPressed,
        PageIndexChanged(i32),
    }

    #[test]
    fn delivers_to_every_listener() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let seen = seen.clone();
            bus.subscribe(move |event: &HostEvent| {
                if *event == HostEvent::UiCompleted {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        bus.emit(&HostEvent::UiCompleted);
        bus.emit(&HostEvent::HomeButtonPressed);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listeners_observe_payloads() {
        let bus = EventBus::new();
        let last = Arc::new(AtomicUsize::new(usize::MAX));
        let observer = last.clone();
        bus.subscribe(move |event: &HostEvent| {
            if let HostEvent::PageIndexChanged(index) = event {
                observer.store(*index as usize, Ordering::SeqCst);
            }
        });

        bus.emit(&HostEvent::PageIndexChanged(3));
        assert_eq!(last.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn emit_without_listeners_is_a_no_op() {
        let bus: EventBus<HostEvent> = EventBus::new();
        bus.emit(&HostEvent::UiCompleted);
    }
}
