//! Single-slot hand-off channels between adjacent pipeline stages.

use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::generator::Generator;

/// How a pipe that still holds an unconsumed value treats the next push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// The producer blocks until the consumer drains the slot. Every value
    /// pushed is popped exactly once.
    Wait,
    /// The producer replaces unconsumed data. The consumer sees an ordered
    /// subsequence of what was pushed.
    Overwrite,
}

type PushHook = Box<dyn Fn() + Send>;

/// A channel holding at most one value, shared by exactly one producer
/// stage and one consumer stage (plus external callers at the pipeline's
/// head and tail).
///
/// Two structural variants exist behind the same surface: the ordinary slot
/// pipe, and the spring pipe wired in front of generator-driven source
/// stages, which synthesises a fresh value on every pop and ignores pushes.
pub struct Pipe<T> {
    inner: Inner<T>,
}

enum Inner<T> {
    Slot(Slot<T>),
    Spring(Box<dyn Fn() -> T + Send + Sync>),
}

struct Slot<T> {
    elem: Mutex<Option<T>>,
    /// Mirror of `elem.is_some()`, kept so `size` needs no lock.
    valid: AtomicBool,
    enabled: AtomicBool,
    wait_for_downstream: AtomicBool,
    /// Signalled when a value lands or the pipe is disabled.
    readable: Condvar,
    /// Signalled when the slot drains, is reset, or the pipe is disabled.
    writable: Condvar,
    on_push: Mutex<Option<PushHook>>,
}

impl<T: Send + 'static> Pipe<T> {
    pub fn new(discipline: Discipline) -> Self {
        Pipe {
            inner: Inner::Slot(Slot {
                elem: Mutex::new(None),
                valid: AtomicBool::new(false),
                enabled: AtomicBool::new(true),
                wait_for_downstream: AtomicBool::new(discipline == Discipline::Wait),
                readable: Condvar::new(),
                writable: Condvar::new(),
                on_push: Mutex::new(None),
            }),
        }
    }

    /// An infinite spring: `produce` conjures the value for every pop.
    pub(crate) fn spring(produce: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Pipe {
            inner: Inner::Spring(Box::new(produce)),
        }
    }

    /// The pipe in front of a pipeline's first stage: a spring for generator
    /// tokens, an ordinary overwriting slot for anything else. `lanes` is
    /// the fan-out width of the consuming filter, so a fanned-out source
    /// stage receives one token per lane.
    pub(crate) fn head(lanes: usize) -> Self {
        if TypeId::of::<T>() == TypeId::of::<Generator>() {
            Pipe::spring(|| conjure(Generator))
        } else if TypeId::of::<T>() == TypeId::of::<Vec<Generator>>() {
            Pipe::spring(move || conjure(vec![Generator; lanes]))
        } else {
            Pipe::new(Discipline::Overwrite)
        }
    }

    /// Store a value. Under [`Discipline::Wait`] this blocks while the slot
    /// still holds an unconsumed value; under [`Discipline::Overwrite`] it
    /// replaces whatever is there. On a disabled pipe it is a silent no-op.
    /// The push hook runs after a successful store.
    pub fn push(&self, value: T) {
        let slot = match &self.inner {
            Inner::Slot(slot) => slot,
            // Source pipes have no upstream; nothing to store.
            Inner::Spring(_) => return,
        };
        {
            let mut elem = slot.elem.lock();
            while slot.wait_for_downstream.load(Ordering::Relaxed)
                && elem.is_some()
                && slot.enabled.load(Ordering::Relaxed)
            {
                slot.writable.wait(&mut elem);
            }
            if !slot.enabled.load(Ordering::Relaxed) {
                return;
            }
            // Publication order: a concurrent size() sees the old value or
            // nothing, never a half-stored one.
            slot.valid.store(false, Ordering::Release);
            *elem = Some(value);
            slot.valid.store(true, Ordering::Release);
            slot.readable.notify_one();
        }
        if let Some(hook) = &*slot.on_push.lock() {
            hook();
        }
    }

    /// Take the stored value, or `T::default()` when the slot is empty.
    pub fn pop(&self) -> T
    where
        T: Default,
    {
        match &self.inner {
            Inner::Spring(produce) => produce(),
            Inner::Slot(slot) => {
                let mut elem = slot.elem.lock();
                slot.valid.store(false, Ordering::Release);
                let value = elem.take();
                slot.writable.notify_one();
                drop(elem);
                value.unwrap_or_default()
            }
        }
    }

    /// Like [`Pipe::pop`], but parks until a value arrives. A disabled pipe
    /// unblocks immediately and yields whatever the slot holds.
    pub fn blocking_pop(&self) -> T
    where
        T: Default,
    {
        match &self.inner {
            Inner::Spring(produce) => produce(),
            Inner::Slot(_) => self.wait_pop().unwrap_or_default(),
        }
    }

    /// Waiting pop that reports a disabled, empty pipe as `None` instead of
    /// a default value. Stage workers use this to tell a shutdown wake-up
    /// apart from real data.
    pub(crate) fn wait_pop(&self) -> Option<T> {
        match &self.inner {
            Inner::Spring(produce) => Some(produce()),
            Inner::Slot(slot) => {
                let mut elem = slot.elem.lock();
                while elem.is_none() && slot.enabled.load(Ordering::Relaxed) {
                    slot.readable.wait(&mut elem);
                }
                slot.valid.store(false, Ordering::Release);
                let value = elem.take();
                slot.writable.notify_one();
                value
            }
        }
    }

    /// 1 while a value is stored, 0 otherwise. Springs always report 1.
    pub fn size(&self) -> usize {
        match &self.inner {
            Inner::Spring(_) => 1,
            Inner::Slot(slot) => slot.valid.load(Ordering::Acquire) as usize,
        }
    }

    pub fn enable(&self) {
        if let Inner::Slot(slot) = &self.inner {
            slot.enabled.store(true, Ordering::Release);
        }
    }

    /// Stop accepting pushes and wake every parked producer and consumer so
    /// they can observe the flag.
    pub fn disable(&self) {
        if let Inner::Slot(slot) = &self.inner {
            slot.enabled.store(false, Ordering::Release);
            let _elem = slot.elem.lock();
            slot.readable.notify_all();
            slot.writable.notify_all();
        }
    }

    /// Drop the stored value, if any. Leaves the enabled flag untouched.
    pub fn reset(&self) {
        if let Inner::Slot(slot) = &self.inner {
            let mut elem = slot.elem.lock();
            slot.valid.store(false, Ordering::Release);
            *elem = None;
            slot.writable.notify_all();
        }
    }

    /// Switch the discipline at runtime. Producers parked by the old
    /// waiting discipline re-check the flag when it turns off.
    pub fn set_wait_for_slowest_filter(&self, wait: bool) {
        if let Inner::Slot(slot) = &self.inner {
            slot.wait_for_downstream.store(wait, Ordering::Release);
            if !wait {
                let _elem = slot.elem.lock();
                slot.writable.notify_all();
            }
        }
    }

    /// Install the hook run after every successful push, replacing any
    /// previous one.
    pub fn register_push_callback(&self, hook: impl Fn() + Send + 'static) {
        if let Inner::Slot(slot) = &self.inner {
            *slot.on_push.lock() = Some(Box::new(hook));
        }
    }
}

/// Route a concretely-typed value through `dyn Any` into the pipe's own
/// type. Callers have matched the `TypeId`s beforehand.
fn conjure<S: 'static, T: 'static>(value: S) -> T {
    match (Box::new(value) as Box<dyn Any>).downcast::<T>() {
        Ok(value) => *value,
        Err(_) => unreachable!("spring conjured a value of the wrong type"),
    }
}
