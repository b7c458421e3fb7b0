//! Observation hooks bracketing every `process` call.

use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Pre/post observation hook installed on a [`FilterHandle`].
///
/// Hooks receive the datum type-erased and by shared reference: they must
/// not mutate it and must not retain it past the call. A panicking hook is
/// swallowed by the caller, so a listener bug never crashes a stage.
///
/// [`FilterHandle`]: crate::FilterHandle
pub trait FilterListener: Send + Sync {
    fn pre_process(&self, input: &dyn Any);
    fn post_process(&self, output: &dyn Any);
}

/// Counts completed runs and accumulates the wall time spent inside
/// `process`.
///
/// Wall clock rather than CPU time: the stages run on parallel threads,
/// which makes per-run CPU time mostly meaningless.
#[derive(Default)]
pub struct ProfilingListener {
    counter: AtomicU32,
    clock: Mutex<ProfilingClock>,
}

#[derive(Default)]
struct ProfilingClock {
    wall_time: Duration,
    last_start: Option<Instant>,
}

impl ProfilingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed runs since creation or the last [`reset_metrics`].
    ///
    /// [`reset_metrics`]: ProfilingListener::reset_metrics
    pub fn counter(&self) -> u32 {
        self.counter.load(Ordering::Acquire)
    }

    /// Wall time spent inside `process` since creation or the last
    /// [`reset_metrics`].
    ///
    /// [`reset_metrics`]: ProfilingListener::reset_metrics
    pub fn wall_time(&self) -> Duration {
        self.clock.lock().wall_time
    }

    pub fn reset_metrics(&self) {
        self.counter.store(0, Ordering::Release);
        let mut clock = self.clock.lock();
        clock.wall_time = Duration::ZERO;
        clock.last_start = None;
    }
}

impl FilterListener for ProfilingListener {
    fn pre_process(&self, _input: &dyn Any) {
        self.clock.lock().last_start = Some(Instant::now());
    }

    fn post_process(&self, _output: &dyn Any) {
        let mut clock = self.clock.lock();
        if let Some(start) = clock.last_start.take() {
            clock.wall_time += start.elapsed();
        }
        self.counter.fetch_add(1, Ordering::AcqRel);
    }
}

/// Listener that keeps a copy of the most recent output and can run a
/// one-shot hook on the next one. Wraps a [`ProfilingListener`], so
/// profiling keeps working while interception is installed.
///
/// Typed over the output it intercepts; outputs of any other type pass
/// through unobserved.
pub struct InterceptingListener<T> {
    profiler: ProfilingListener,
    state: Mutex<Intercept<T>>,
}

struct Intercept<T> {
    last_out: Option<T>,
    on_next: Option<Box<dyn FnOnce(&T) + Send>>,
}

impl<T: Clone + Send + 'static> InterceptingListener<T> {
    pub fn new() -> Self {
        InterceptingListener {
            profiler: ProfilingListener::new(),
            state: Mutex::new(Intercept {
                last_out: None,
                on_next: None,
            }),
        }
    }

    /// Metrics of the wrapped profiler.
    pub fn profiler(&self) -> &ProfilingListener {
        &self.profiler
    }

    /// Run `f` over the stored copy of the last output, `None` before the
    /// first run. Holds the listener's lock for the duration of `f`.
    pub fn do_on_last_out<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let state = self.state.lock();
        f(state.last_out.as_ref())
    }

    /// Register a hook invoked exactly once, with the next output.
    pub fn do_on_next_out(&self, f: impl FnOnce(&T) + Send + 'static) {
        self.state.lock().on_next = Some(Box::new(f));
    }
}

impl<T: Clone + Send + 'static> Default for InterceptingListener<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> FilterListener for InterceptingListener<T> {
    fn pre_process(&self, input: &dyn Any) {
        self.profiler.pre_process(input);
    }

    fn post_process(&self, output: &dyn Any) {
        self.profiler.post_process(output);
        if let Some(output) = output.downcast_ref::<T>() {
            let mut state = self.state.lock();
            if let Some(hook) = state.on_next.take() {
                hook(output);
            }
            state.last_out = Some(output.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterHandle, FnFilter};
    use std::sync::Arc;
    use std::thread;

    fn delayed_passthrough(
    ) -> FilterHandle<FnFilter<i32, i32, impl FnMut(i32) -> i32 + Send + 'static>> {
        FilterHandle::new(FnFilter::new(|x: i32| {
            thread::sleep(Duration::from_millis(10));
            x
        }))
    }

    #[test]
    fn profiles_runs_and_wall_time() {
        let handle = delayed_passthrough();
        let profiler = Arc::new(ProfilingListener::new());
        handle.set_listener(profiler.clone());

        assert_eq!(handle.process(1), 1);
        assert_eq!(profiler.counter(), 1);
        let first = profiler.wall_time();
        assert!(first > Duration::ZERO);

        assert_eq!(handle.process(2), 2);
        assert_eq!(profiler.counter(), 2);
        assert!(profiler.wall_time() > first);

        profiler.reset_metrics();
        assert_eq!(profiler.counter(), 0);
        assert_eq!(profiler.wall_time(), Duration::ZERO);

        assert_eq!(handle.process(3), 3);
        assert_eq!(profiler.counter(), 1);
        assert!(profiler.wall_time() > Duration::ZERO);
    }

    #[test]
    fn intercepts_next_and_last_outputs() {
        let handle = delayed_passthrough();
        let interceptor = Arc::new(InterceptingListener::<i32>::new());
        handle.set_listener(interceptor.clone());

        interceptor.do_on_last_out(|last| assert!(last.is_none()));

        assert_eq!(handle.process(1), 1);
        interceptor.do_on_last_out(|last| assert_eq!(last, Some(&1)));

        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        interceptor.do_on_next_out(move |out| sink.lock().push(*out));

        assert_eq!(handle.process(2), 2);
        assert_eq!(handle.process(3), 3);
        // The hook saw exactly the first output after registration.
        assert_eq!(*fired.lock(), vec![2]);

        interceptor.do_on_last_out(|last| assert_eq!(last, Some(&3)));
        assert_eq!(interceptor.profiler().counter(), 3);
    }

    #[test]
    fn interception_ignores_other_types() {
        let handle = FilterHandle::new(FnFilter::new(|x: i32| x.to_string()));
        let interceptor = Arc::new(InterceptingListener::<i32>::new());
        handle.set_listener(interceptor.clone());

        assert_eq!(handle.process(1), "1");
        interceptor.do_on_last_out(|last| assert!(last.is_none()));
        // The profiler still counts runs it could not intercept.
        assert_eq!(interceptor.profiler().counter(), 1);
    }
}
