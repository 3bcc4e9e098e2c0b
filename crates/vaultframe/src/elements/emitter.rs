//! In-frame event emitter.
//!
//! Used for events that never leave a frame: a field notifying its widget,
//! or a host element notifying the page's handlers.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Callback<P> = Arc<dyn Fn(&P) + Send + Sync>;

struct Entry<K, P> {
    id: u64,
    key: K,
    callback: Callback<P>,
}

struct State<K, P> {
    entries: Vec<Entry<K, P>>,
    next_id: u64,
}

pub struct EventEmitter<K, P> {
    state: Arc<Mutex<State<K, P>>>,
}

impl<K, P> Default for EventEmitter<K, P> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                entries: Vec::new(),
                next_id: 0,
            })),
        }
    }
}

impl<K, P> Clone for EventEmitter<K, P> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

fn lock<K, P>(state: &Mutex<State<K, P>>) -> MutexGuard<'_, State<K, P>> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl<K, P> EventEmitter<K, P>
where
    K: PartialEq + Send + 'static,
    P: 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn add<F>(&self, key: K, callback: F, first: bool) -> ListenerHandle
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        let mut state = lock(&self.state);
        let id = state.next_id;
        state.next_id += 1;
        let entry = Entry {
            id,
            key,
            callback: Arc::new(callback),
        };
        if first {
            state.entries.insert(0, entry);
        } else {
            state.entries.push(entry);
        }
        let weak: Weak<Mutex<State<K, P>>> = Arc::downgrade(&self.state);
        ListenerHandle {
            remove: Some(Box::new(move || {
                if let Some(state) = weak.upgrade() {
                    lock(&state).entries.retain(|e| e.id != id);
                }
            })),
        }
    }

    #[must_use = "dropping the handle removes the listener"]
    pub fn on<F>(&self, key: K, callback: F) -> ListenerHandle
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.add(key, callback, false)
    }

    /// Like `on`, but runs ahead of every listener registered so far.
    #[must_use = "dropping the handle removes the listener"]
    pub fn on_first<F>(&self, key: K, callback: F) -> ListenerHandle
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.add(key, callback, true)
    }

    pub fn emit(&self, key: &K, payload: &P) {
        let callbacks: Vec<Callback<P>> = lock(&self.state)
            .entries
            .iter()
            .filter(|e| e.key == *key)
            .map(|e| e.callback.clone())
            .collect();
        for callback in callbacks {
            callback(payload);
        }
    }

    pub fn has_listeners(&self, key: &K) -> bool {
        lock(&self.state).entries.iter().any(|e| e.key == *key)
    }

    /// Drop every listener. Outstanding handles become no-ops.
    pub fn reset(&self) {
        lock(&self.state).entries.clear();
    }
}

/// Registration handle; dropping it removes the listener.
pub struct ListenerHandle {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerHandle {
    pub fn off(self) {}
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ListenerHandle")
    }
}
