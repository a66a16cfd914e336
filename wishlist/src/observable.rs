use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

// Callback registered against an event source.
pub type Observer<A> = Box<dyn Fn(&A)>;

struct Subscribers<A> {
    next_id: u64,
    entries: Vec<(u64, Rc<dyn Fn(&A)>)>,
}

// Single-threaded signal/slot. Clones share the same subscriber list, so
// an event source owned by one object can be emitted into from another.
pub struct Observable<A> {
    subscribers: Rc<RefCell<Subscribers<A>>>,
}

impl<A: 'static> Observable<A> {

    pub fn new() -> Self {
        Self::default()
    }

    // Registers an observer. Dropping the returned handle unsubscribes.
    pub fn observe(&self, observer: Observer<A>) -> ObserverHandle {
        let id = {
            let mut subs = self.subscribers.borrow_mut();
            let id = subs.next_id;
            subs.next_id += 1;
            subs.entries.push((id, Rc::from(observer)));
            id
        };
        let weak = Rc::downgrade(&self.subscribers);
        ObserverHandle::new(move || unsubscribe(&weak, id))
    }

    // Invokes every live observer in subscription order.
    pub fn emit(&self, payload: &A) {
        // Snapshot so observers may subscribe or unsubscribe mid-emit.
        let entries: Vec<Rc<dyn Fn(&A)>> = self
            .subscribers
            .borrow()
            .entries
            .iter()
            .map(|(_, observer)| Rc::clone(observer))
            .collect();
        for observer in entries {
            observer(payload);
        }
    }
}

impl<A> Clone for Observable<A> {
    fn clone(&self) -> Self {
        Self { subscribers: Rc::clone(&self.subscribers) }
    }
}

impl<A> Default for Observable<A> {
    fn default() -> Self {
        Self {
            subscribers: Rc::new(RefCell::new(Subscribers {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

fn unsubscribe<A>(subscribers: &Weak<RefCell<Subscribers<A>>>, id: u64) {
    if let Some(subscribers) = subscribers.upgrade() {
        subscribers.borrow_mut().entries.retain(|(entry_id, _)| *entry_id != id);
    }
}

// Erased subscription. Dropping it removes the observer; outliving the
// observable is harmless.
pub struct ObserverHandle(Option<Box<dyn FnOnce()>>);

impl ObserverHandle {
    fn new(unsubscribe: impl FnOnce() + 'static) -> Self {
        Self(Some(Box::new(unsubscribe)))
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.0.take() {
            unsubscribe();
        }
    }
}
