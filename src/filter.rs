//! The filter contract and the shared handle the pipeline runs it through.

use std::any::{self, TypeId};
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::listener::FilterListener;

/// A per-stage transform: consume one `In`, produce one `Out`.
///
/// Implementations may keep state; the surrounding stage guarantees at most
/// one in-flight `process` call per instance, so they never need to be
/// thread-safe themselves.
pub trait Filter: Send + 'static {
    type In: Send + 'static;
    type Out: Send + 'static;

    /// The transform. The input is moved in; consume it, do not retain it
    /// past the call.
    fn process(&mut self, input: Self::In) -> Self::Out;

    /// Restore the filter to its just-created state. Called only while no
    /// `process` runs on this instance.
    fn reset(&mut self) {}

    /// True for stages that fan out over a vector input.
    fn fan_out(&self) -> bool {
        false
    }

    /// Number of parallel lanes a fan-out stage runs; 1 otherwise.
    fn lanes(&self) -> usize {
        1
    }
}

/// Shared, lockable owner of a filter plus its observation hook.
///
/// Clones share the same instance, so state a filter writes during a run
/// stays visible to the caller afterwards. The mutex also makes sharing one
/// instance across pipelines merely contended instead of unsound; inside a
/// single pipeline its stage is the only caller.
pub struct FilterHandle<F: Filter> {
    core: Arc<FilterCore<F>>,
}

struct FilterCore<F> {
    filter: Mutex<F>,
    listener: Mutex<Option<Arc<dyn FilterListener>>>,
}

impl<F: Filter> Clone for FilterHandle<F> {
    fn clone(&self) -> Self {
        FilterHandle {
            core: self.core.clone(),
        }
    }
}

impl<F: Filter> FilterHandle<F> {
    pub fn new(filter: F) -> Self {
        FilterHandle {
            core: Arc::new(FilterCore {
                filter: Mutex::new(filter),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Run one datum through the filter, bracketed by the listener hooks.
    pub fn process(&self, input: F::In) -> F::Out {
        let listener = self.core.listener.lock().clone();
        let mut filter = self.core.filter.lock();
        if let Some(listener) = &listener {
            observe(|| listener.pre_process(&input));
        }
        let output = filter.process(input);
        if let Some(listener) = &listener {
            observe(|| listener.post_process(&output));
        }
        output
    }

    pub fn reset(&self) {
        self.core.filter.lock().reset();
    }

    /// Install the observation hook, replacing any previous one. Listeners
    /// compose by wrapping, not by fan-out.
    pub fn set_listener(&self, listener: Arc<dyn FilterListener>) {
        *self.core.listener.lock() = Some(listener);
    }

    /// Borrow the wrapped filter, e.g. to inspect its state after a run.
    pub fn with<R>(&self, f: impl FnOnce(&mut F) -> R) -> R {
        f(&mut self.core.filter.lock())
    }

    /// Type-erased description of the wrapped filter.
    pub fn info(&self) -> FilterInfo {
        FilterInfo::of(&*self.core.filter.lock())
    }

    pub(crate) fn lanes(&self) -> usize {
        self.core.filter.lock().lanes()
    }
}

/// Listener hooks are observation-only; a panicking hook must not take the
/// stage down with it.
fn observe(hook: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(hook)).is_err() {
        warn!("filter listener panicked; ignoring");
    }
}

/// What a pipeline knows about a composed filter without its types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterInfo {
    in_type: TypeId,
    out_type: TypeId,
    in_type_name: &'static str,
    out_type_name: &'static str,
    fan_out: bool,
    lanes: usize,
}

impl FilterInfo {
    fn of<F: Filter>(filter: &F) -> Self {
        FilterInfo {
            in_type: TypeId::of::<F::In>(),
            out_type: TypeId::of::<F::Out>(),
            in_type_name: any::type_name::<F::In>(),
            out_type_name: any::type_name::<F::Out>(),
            fan_out: filter.fan_out(),
            lanes: filter.lanes(),
        }
    }

    pub fn in_type(&self) -> TypeId {
        self.in_type
    }

    pub fn out_type(&self) -> TypeId {
        self.out_type
    }

    pub fn in_type_name(&self) -> &'static str {
        self.in_type_name
    }

    pub fn out_type_name(&self) -> &'static str {
        self.out_type_name
    }

    pub fn fan_out(&self) -> bool {
        self.fan_out
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }
}

/// Object-safe face of a [`FilterHandle`], used where filters of one
/// signature must mix (the lanes of a fan-out stage).
pub(crate) trait DynFilter<I, O>: Send + Sync {
    fn process(&self, input: I) -> O;
    fn reset(&self);
}

impl<F: Filter> DynFilter<F::In, F::Out> for FilterHandle<F> {
    fn process(&self, input: F::In) -> F::Out {
        FilterHandle::process(self, input)
    }

    fn reset(&self) {
        FilterHandle::reset(self)
    }
}

/// Right-hand sides the composition operators accept: a handle, or a bare
/// fan-out stage that still needs wrapping.
pub trait IntoFilter {
    type F: Filter;

    fn into_filter(self) -> FilterHandle<Self::F>;
}

impl<F: Filter> IntoFilter for FilterHandle<F> {
    type F = F;

    fn into_filter(self) -> FilterHandle<F> {
        self
    }
}

/// Closure-backed filter for one-off transforms.
pub struct FnFilter<I, O, F> {
    func: F,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O, F> FnFilter<I, O, F>
where
    F: FnMut(I) -> O + Send + 'static,
{
    pub fn new(func: F) -> Self {
        FnFilter {
            func,
            _types: PhantomData,
        }
    }
}

impl<I, O, F> Filter for FnFilter<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnMut(I) -> O + Send + 'static,
{
    type In = I;
    type Out = O;

    fn process(&mut self, input: I) -> O {
        (self.func)(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::Arc;

    #[test]
    fn fn_filter_runs_the_closure() {
        let mut filter = FnFilter::new(|x: i32| x + 1);
        assert_eq!(filter.process(4), 5);
    }

    #[test]
    fn clones_share_filter_state() {
        let mut total = 0;
        let handle = FilterHandle::new(FnFilter::new(move |x: i32| {
            total += x;
            total
        }));
        let twin = handle.clone();
        assert_eq!(handle.process(3), 3);
        assert_eq!(twin.process(4), 7);
    }

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl FilterListener for RecordingListener {
        fn pre_process(&self, input: &dyn Any) {
            if let Some(value) = input.downcast_ref::<i32>() {
                self.events.lock().push(format!("pre:{value}"));
            }
        }

        fn post_process(&self, output: &dyn Any) {
            if let Some(value) = output.downcast_ref::<i32>() {
                self.events.lock().push(format!("post:{value}"));
            }
        }
    }

    #[test]
    fn hooks_bracket_every_process() {
        let handle = FilterHandle::new(FnFilter::new(|x: i32| x + 1));
        let listener = Arc::new(RecordingListener::default());
        handle.set_listener(listener.clone());

        assert_eq!(handle.process(1), 2);
        assert_eq!(handle.process(2), 3);

        let events = listener.events.lock().clone();
        assert_eq!(events, ["pre:1", "post:2", "pre:2", "post:3"]);
    }

    #[test]
    fn installing_a_listener_replaces_the_old_one() {
        let handle = FilterHandle::new(FnFilter::new(|x: i32| x));
        let first = Arc::new(RecordingListener::default());
        let second = Arc::new(RecordingListener::default());

        handle.set_listener(first.clone());
        handle.set_listener(second.clone());
        handle.process(1);

        assert!(first.events.lock().is_empty());
        assert_eq!(second.events.lock().len(), 2);
    }

    struct PanickingListener;

    impl FilterListener for PanickingListener {
        fn pre_process(&self, _input: &dyn Any) {
            panic!("listener bug");
        }

        fn post_process(&self, _output: &dyn Any) {
            panic!("listener bug");
        }
    }

    #[test]
    fn panicking_listener_is_contained() {
        let handle = FilterHandle::new(FnFilter::new(|x: i32| x + 1));
        handle.set_listener(Arc::new(PanickingListener));
        assert_eq!(handle.process(1), 2);
    }

    #[test]
    fn info_reports_type_identities() {
        let handle = FilterHandle::new(FnFilter::new(|x: i32| x as f32));
        let info = handle.info();
        assert_eq!(info.in_type(), TypeId::of::<i32>());
        assert_eq!(info.out_type(), TypeId::of::<f32>());
        assert!(!info.fan_out());
        assert_eq!(info.lanes(), 1);
    }

    #[test]
    fn with_exposes_filter_state() {
        struct Remembering {
            last: i32,
        }

        impl Filter for Remembering {
            type In = i32;
            type Out = i32;

            fn process(&mut self, input: i32) -> i32 {
                self.last = input;
                input
            }
        }

        let handle = FilterHandle::new(Remembering { last: 0 });
        handle.process(7);
        assert_eq!(handle.with(|f| f.last), 7);
    }
}
