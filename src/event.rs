//! Multi-listener event dispatch.
//!
//! Connections, flows, and the manager each expose a small number of named
//! events; [`ListenerSet`] is the shared registration machinery behind them.
//! Listeners run in registration order. Dispatch iterates a snapshot of the
//! list taken when the emit starts, so a listener may add or remove listeners
//! (including itself) mid-dispatch: additions take effect on the next emit,
//! removals drop the entry but an already-snapshotted listener still runs in
//! the current round.
//!
//! The set is single-threaded; handles are cheap clones sharing the same
//! underlying list.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Handle returned by registration, used to remove a listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry<F: ?Sized> {
    id: u64,
    callback: Rc<RefCell<F>>,
}

/// An ordered set of callbacks for one event.
///
/// `F` is the unsized callable type of the listeners, e.g.
/// `dyn FnMut(&PacketEvent<'_>)`. The set itself is signature-agnostic;
/// invocation happens through [`ListenerSet::dispatch`] at the emit site.
pub struct ListenerSet<F: ?Sized> {
    entries: Rc<RefCell<Vec<Entry<F>>>>,
    next_id: Rc<Cell<u64>>,
}

impl<F: ?Sized> Clone for ListenerSet<F> {
    fn clone(&self) -> Self {
        Self {
            entries: Rc::clone(&self.entries),
            next_id: Rc::clone(&self.next_id),
        }
    }
}

impl<F: ?Sized> Default for ListenerSet<F> {
    fn default() -> Self {
        Self {
            entries: Rc::new(RefCell::new(Vec::new())),
            next_id: Rc::new(Cell::new(0)),
        }
    }
}

impl<F: ?Sized> ListenerSet<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; it will be invoked after all currently registered
    /// listeners.
    pub fn add(&self, callback: Rc<RefCell<F>>) -> ListenerId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.entries.borrow_mut().push(Entry { id, callback });
        ListenerId(id)
    }

    /// Remove a previously registered listener. Returns false if the id is
    /// unknown (already removed).
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|entry| entry.id != id.0);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Invoke every listener registered at the start of the call, in
    /// registration order. A listener whose cell is already borrowed
    /// (re-entrant emit of the same listener) is skipped.
    pub fn dispatch(&self, mut invoke: impl FnMut(&mut F)) {
        let snapshot: Vec<Rc<RefCell<F>>> = self
            .entries
            .borrow()
            .iter()
            .map(|entry| Rc::clone(&entry.callback))
            .collect();
        for callback in snapshot {
            if let Ok(mut callback) = callback.try_borrow_mut() {
                invoke(&mut callback);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Counter = dyn FnMut(&u32);

    fn add_fn(set: &ListenerSet<Counter>, f: impl FnMut(&u32) + 'static) -> ListenerId {
        set.add(Rc::new(RefCell::new(f)))
    }

    #[test]
    fn test_registration_order() {
        let set: ListenerSet<Counter> = ListenerSet::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let o = Rc::clone(&order);
        add_fn(&set, move |_| o.borrow_mut().push(1));
        let o = Rc::clone(&order);
        add_fn(&set, move |_| o.borrow_mut().push(2));
        let o = Rc::clone(&order);
        add_fn(&set, move |_| o.borrow_mut().push(3));

        set.dispatch(|cb| cb(&0));
        assert_eq!(*order.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_remove() {
        let set: ListenerSet<Counter> = ListenerSet::new();
        let hits = Rc::new(Cell::new(0));

        let h = Rc::clone(&hits);
        let id = add_fn(&set, move |_| h.set(h.get() + 1));

        set.dispatch(|cb| cb(&0));
        assert!(set.remove(id));
        assert!(!set.remove(id));
        set.dispatch(|cb| cb(&0));

        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_add_during_dispatch_takes_effect_next_round() {
        let set: ListenerSet<Counter> = ListenerSet::new();
        let hits = Rc::new(Cell::new(0));

        let inner_hits = Rc::clone(&hits);
        let set_handle = set.clone();
        add_fn(&set, move |_| {
            let h = Rc::clone(&inner_hits);
            set_handle.add(Rc::new(RefCell::new(move |_: &u32| h.set(h.get() + 1))));
        });

        set.dispatch(|cb| cb(&0));
        assert_eq!(hits.get(), 0, "listener added mid-dispatch must not run this round");
        assert_eq!(set.len(), 2);

        set.dispatch(|cb| cb(&0));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_remove_during_dispatch_still_runs_snapshot() {
        let set: ListenerSet<Counter> = ListenerSet::new();
        let hits = Rc::new(Cell::new(0));

        // First listener removes the second; the second still runs this round
        // because it was snapshotted before removal.
        let ids: Rc<RefCell<Vec<ListenerId>>> = Rc::new(RefCell::new(Vec::new()));
        let set_handle = set.clone();
        let ids_handle = Rc::clone(&ids);
        add_fn(&set, move |_| {
            if let Some(&victim) = ids_handle.borrow().first() {
                set_handle.remove(victim);
            }
        });
        let h = Rc::clone(&hits);
        let id = add_fn(&set, move |_| h.set(h.get() + 1));
        ids.borrow_mut().push(id);

        set.dispatch(|cb| cb(&0));
        assert_eq!(hits.get(), 1);
        assert_eq!(set.len(), 1);

        set.dispatch(|cb| cb(&0));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_listener_removing_itself() {
        let set: ListenerSet<Counter> = ListenerSet::new();
        let hits = Rc::new(Cell::new(0));

        let id_cell: Rc<Cell<Option<ListenerId>>> = Rc::new(Cell::new(None));
        let set_handle = set.clone();
        let h = Rc::clone(&hits);
        let id_handle = Rc::clone(&id_cell);
        let id = add_fn(&set, move |_| {
            h.set(h.get() + 1);
            if let Some(id) = id_handle.get() {
                set_handle.remove(id);
            }
        });
        id_cell.set(Some(id));

        set.dispatch(|cb| cb(&0));
        set.dispatch(|cb| cb(&0));
        assert_eq!(hits.get(), 1);
        assert!(set.is_empty());
    }
}
