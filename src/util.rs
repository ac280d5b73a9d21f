use std::collections::HashSet;
use std::sync;

type Listener<E> = Box<dyn FnMut(&E) + Send>;

struct Registry<E> {
    next_id: u64,
    listeners: Vec<(u64, Listener<E>)>,

    /* Listeners are taken out of the registry while an event is being
     * delivered, so cancellations that arrive in the meantime are recorded
     * here and applied once delivery finishes. */
    emitting: bool,
    cancelled: HashSet<u64>,
}

/// Synchronous callback registry. Every listener sees every emitted event, in
/// subscription order, before `emit` returns.
pub struct Emitter<E> {
    registry: sync::Arc<parking_lot::Mutex<Registry<E>>>,
}

/// Handle to a listener registered with an [Emitter]. Cancelling is idempotent,
/// and dropping the handle cancels it.
pub struct Subscription<E> {
    id: u64,
    registry: Option<sync::Weak<parking_lot::Mutex<Registry<E>>>>,
}

impl<E> Emitter<E> {
    pub fn new() -> Emitter<E> {
        Emitter {
            registry: sync::Arc::new(parking_lot::Mutex::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
                emitting: false,
                cancelled: HashSet::new(),
            })),
        }
    }

    pub fn subscribe<F: FnMut(&E) + Send + 'static>(&self, listener: F) -> Subscription<E> {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id+= 1;
        registry.listeners.push((id, Box::new(listener)));

        Subscription {
            id,
            registry: Some(sync::Arc::downgrade(&self.registry)),
        }
    }

    pub fn emit(&self, event: &E) {
        let mut listeners = {
            let mut registry = self.registry.lock();
            registry.emitting = true;
            std::mem::take(&mut registry.listeners)
        };

        for (_, listener) in listeners.iter_mut() {
            listener(event);
        }

        let mut registry = self.registry.lock();
        let cancelled = std::mem::take(&mut registry.cancelled);
        listeners.retain(|(id, _)| !cancelled.contains(id));

        /* anything subscribed during delivery goes after the existing listeners */
        listeners.append(&mut registry.listeners);
        registry.listeners = listeners;
        registry.emitting = false;
    }

    pub fn listener_count(&self) -> usize {
        self.registry.lock().listeners.len()
    }
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

impl<E> Subscription<E> {
    pub fn is_active(&self) -> bool {
        self.registry.as_ref().map_or(false, |weak| weak.strong_count() > 0)
    }

    pub fn cancel(&mut self) {
        let Some(registry) = self.registry.take().and_then(|weak| weak.upgrade()) else {
            return;
        };

        let mut registry = registry.lock();
        let before = registry.listeners.len();
        registry.listeners.retain(|(id, _)| *id != self.id);

        if registry.listeners.len() == before && registry.emitting {
            registry.cancelled.insert(self.id);
        }
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<E> std::fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
