//! Fan-out stage: N sub-filters running in lockstep over positional
//! vectors.

use std::ops::BitAnd;
use std::panic;
use std::sync::Arc;
use std::thread;

use tracing::warn;

use crate::filter::{DynFilter, Filter, FilterHandle, IntoFilter};

/// A stage of N parallel sub-filters sharing one input/output signature.
///
/// Consumes `Vec<I>` and produces `Vec<O>`; position `i` of the output is
/// sub-filter `i` applied to position `i` of the input, whatever order the
/// lanes finish in. Built with the `&` operator:
///
/// ```
/// use pipeflow::{Filter, FilterHandle, FnFilter};
///
/// let halve = FilterHandle::new(FnFilter::new(|x: i32| x as f32 / 2.0));
/// let double = FilterHandle::new(FnFilter::new(|x: i32| x as f32 * 2.0));
///
/// let mut fanned = halve & double;
/// assert_eq!(fanned.process(vec![2, 2]), vec![1.0, 4.0]);
/// ```
pub struct MultiFilter<I, O> {
    filters: Vec<Arc<dyn DynFilter<I, O>>>,
}

impl<I, O> MultiFilter<I, O>
where
    I: Send + 'static,
    O: Send + Default + 'static,
{
    pub fn new<A, B>(first: FilterHandle<A>, second: FilterHandle<B>) -> Self
    where
        A: Filter<In = I, Out = O>,
        B: Filter<In = I, Out = O>,
    {
        MultiFilter {
            filters: vec![
                Arc::new(first) as Arc<dyn DynFilter<I, O>>,
                Arc::new(second),
            ],
        }
    }

    /// Build from an already-collected set of same-typed filters.
    pub fn from_vec<F>(filters: Vec<FilterHandle<F>>) -> Self
    where
        F: Filter<In = I, Out = O>,
    {
        MultiFilter {
            filters: filters
                .into_iter()
                .map(|filter| Arc::new(filter) as Arc<dyn DynFilter<I, O>>)
                .collect(),
        }
    }

    fn push_filter<B>(&mut self, filter: FilterHandle<B>)
    where
        B: Filter<In = I, Out = O>,
    {
        self.filters.push(Arc::new(filter));
    }

    /// Number of parallel lanes.
    pub fn size(&self) -> usize {
        self.filters.len()
    }
}

impl<I, O> Filter for MultiFilter<I, O>
where
    I: Send + 'static,
    O: Send + Default + 'static,
{
    type In = Vec<I>;
    type Out = Vec<O>;

    fn process(&mut self, input: Vec<I>) -> Vec<O> {
        let lanes = self.filters.len();
        if lanes == 0 {
            return Vec::new();
        }
        if input.len() < lanes {
            // Parallel sources may deliver short vectors right after
            // start-up; fail soft with defaults instead of tearing the
            // stage down.
            warn!(
                got = input.len(),
                want = lanes,
                "fan-out input shorter than lane count"
            );
            return std::iter::repeat_with(O::default).take(lanes).collect();
        }

        thread::scope(|scope| {
            let mut lanes_iter = self.filters.iter().zip(input);
            let first = lanes_iter.next();
            // Lanes 1..N run on ephemeral workers; lane 0 runs right here.
            let handles: Vec<_> = lanes_iter
                .map(|(filter, item)| scope.spawn(move || filter.process(item)))
                .collect();

            let mut outputs = Vec::with_capacity(lanes);
            if let Some((filter, item)) = first {
                outputs.push(filter.process(item));
            }
            for handle in handles {
                match handle.join() {
                    Ok(output) => outputs.push(output),
                    // A lane panicked; the others have already finished, so
                    // surface it to the owning stage.
                    Err(cause) => panic::resume_unwind(cause),
                }
            }
            outputs
        })
    }

    fn reset(&mut self) {
        for filter in &self.filters {
            filter.reset();
        }
    }

    fn fan_out(&self) -> bool {
        true
    }

    fn lanes(&self) -> usize {
        self.filters.len()
    }
}

impl<I, O> IntoFilter for MultiFilter<I, O>
where
    I: Send + 'static,
    O: Send + Default + 'static,
{
    type F = MultiFilter<I, O>;

    fn into_filter(self) -> FilterHandle<Self::F> {
        FilterHandle::new(self)
    }
}

/// Fan-out composer: `a & b` runs both filters side by side in one stage.
impl<A, R> BitAnd<R> for FilterHandle<A>
where
    A: Filter,
    A::Out: Default,
    R: IntoFilter,
    R::F: Filter<In = A::In, Out = A::Out>,
{
    type Output = MultiFilter<A::In, A::Out>;

    fn bitand(self, rhs: R) -> Self::Output {
        MultiFilter::new(self, rhs.into_filter())
    }
}

/// Appending composer: `multi & c` adds one more lane.
impl<I, O, R> BitAnd<R> for MultiFilter<I, O>
where
    I: Send + 'static,
    O: Send + Default + 'static,
    R: IntoFilter,
    R::F: Filter<In = I, Out = O>,
{
    type Output = MultiFilter<I, O>;

    fn bitand(mut self, rhs: R) -> Self::Output {
        self.push_filter(rhs.into_filter());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FnFilter;

    #[derive(Default)]
    struct Halving {
        resets: u32,
    }

    impl Filter for Halving {
        type In = i32;
        type Out = f32;

        fn process(&mut self, input: i32) -> f32 {
            input as f32 / 2.0
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    #[derive(Default)]
    struct Doubling {
        resets: u32,
    }

    impl Filter for Doubling {
        type In = i32;
        type Out = f32;

        fn process(&mut self, input: i32) -> f32 {
            input as f32 * 2.0
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    #[test]
    fn two_lanes_from_the_operator() {
        let fanned = FilterHandle::new(Halving::default()) & FilterHandle::new(Doubling::default());
        assert_eq!(fanned.size(), 2);
    }

    #[test]
    fn appending_grows_the_lane_count() {
        let fanned = FilterHandle::new(Halving::default())
            & FilterHandle::new(Doubling::default())
            & FilterHandle::new(Doubling::default());
        assert_eq!(fanned.size(), 3);
    }

    #[test]
    fn built_from_a_vector() {
        let lanes = vec![
            FilterHandle::new(Doubling::default()),
            FilterHandle::new(Doubling::default()),
            FilterHandle::new(Doubling::default()),
        ];
        let fanned = MultiFilter::from_vec(lanes);
        assert_eq!(fanned.size(), 3);
    }

    #[test]
    fn lanes_map_positionally() {
        let mut fanned =
            FilterHandle::new(Halving::default()) & FilterHandle::new(Doubling::default());
        let out = fanned.process(vec![2, 2]);
        assert_eq!(out, vec![1.0, 4.0]);
    }

    #[test]
    fn extra_inputs_are_dropped() {
        let mut fanned =
            FilterHandle::new(Halving::default()) & FilterHandle::new(Doubling::default());
        let out = fanned.process(vec![2, 2, 9, 9]);
        assert_eq!(out, vec![1.0, 4.0]);
    }

    #[test]
    fn short_input_fails_soft_with_defaults() {
        let mut fanned =
            FilterHandle::new(Halving::default()) & FilterHandle::new(Doubling::default());
        let out = fanned.process(vec![5]);
        assert_eq!(out, vec![0.0, 0.0]);
    }

    #[test]
    fn reset_reaches_every_lane() {
        let left = FilterHandle::new(Halving::default());
        let right = FilterHandle::new(Doubling::default());
        let mut fanned = left.clone() & right.clone();

        assert_eq!(left.with(|f| f.resets), 0);
        assert_eq!(right.with(|f| f.resets), 0);

        fanned.reset();
        assert_eq!(left.with(|f| f.resets), 1);
        assert_eq!(right.with(|f| f.resets), 1);

        fanned.reset();
        assert_eq!(left.with(|f| f.resets), 2);
        assert_eq!(right.with(|f| f.resets), 2);
    }

    #[test]
    fn introspection_reports_the_fan_out() {
        let fanned = FilterHandle::new(FnFilter::new(|x: i32| x))
            & FilterHandle::new(FnFilter::new(|x: i32| x + 1));
        let info = FilterHandle::new(fanned).info();
        assert!(info.fan_out());
        assert_eq!(info.lanes(), 2);
    }
}
