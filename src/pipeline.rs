//! Typed linear composition of filters into a running pipeline.

use std::ops::{BitOr, Shr};
use std::sync::Arc;

use tracing::debug;

use crate::filter::{Filter, FilterHandle, FilterInfo, IntoFilter};
use crate::multi::MultiFilter;
use crate::pipe::{Discipline, Pipe};
use crate::stage::{StageControl, StageWorker};

/// A linear chain of stages, each on its own worker thread.
///
/// Built with the composition operators — `|` wires a waiting pipe between
/// the stages, `>>` an overwriting one — and driven through
/// [`start`]/[`stop`]/[`reset`]. External code talks to it only through the
/// head pipe ([`in_pipe`]) and the tail pipe ([`out_pipe`]), both of which
/// overwrite so that an outside producer or consumer can never block the
/// chain.
///
/// ```
/// use pipeflow::{FilterHandle, FnFilter};
///
/// let double = FilterHandle::new(FnFilter::new(|x: i32| x * 2));
/// let to_text = FilterHandle::new(FnFilter::new(|x: i32| x.to_string()));
///
/// let pipeline = double | to_text;
/// pipeline.start();
/// pipeline.in_pipe().push(21);
/// assert_eq!(pipeline.out_pipe().blocking_pop(), "42");
/// pipeline.stop();
/// ```
///
/// Stages whose types do not line up refuse to compose:
///
/// ```compile_fail
/// use pipeflow::{FilterHandle, FnFilter};
///
/// let ints = FilterHandle::new(FnFilter::new(|x: i32| x * 2));
/// let words = FilterHandle::new(FnFilter::new(|s: String| s.len()));
/// let broken = ints | words; // i32 output into String input
/// ```
///
/// [`start`]: Pipeline::start
/// [`stop`]: Pipeline::stop
/// [`reset`]: Pipeline::reset
/// [`in_pipe`]: Pipeline::in_pipe
/// [`out_pipe`]: Pipeline::out_pipe
pub struct Pipeline<I, O> {
    in_pipe: Arc<Pipe<I>>,
    out_pipe: Arc<Pipe<O>>,
    stages: Vec<Box<dyn StageControl>>,
    filters: Vec<FilterInfo>,
}

impl<I, O> Pipeline<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Wire two filters together: a fresh head pipe in front of the first,
    /// an internal pipe of the given discipline between them, a fresh tail
    /// pipe behind the second. The head pipe is a generator spring when the
    /// first filter consumes generator tokens.
    pub fn compose<A, B>(
        first: FilterHandle<A>,
        second: FilterHandle<B>,
        discipline: Discipline,
    ) -> Self
    where
        A: Filter<In = I>,
        B: Filter<In = A::Out, Out = O>,
    {
        let in_pipe = Arc::new(Pipe::head(first.lanes()));
        let between = Arc::new(Pipe::new(discipline));
        let out_pipe = Arc::new(Pipe::new(Discipline::Overwrite));

        let filters = vec![first.info(), second.info()];
        let stages: Vec<Box<dyn StageControl>> = vec![
            Box::new(StageWorker::new(in_pipe.clone(), first, between.clone())),
            Box::new(StageWorker::new(between, second, out_pipe.clone())),
        ];

        debug!(stages = stages.len(), ?discipline, "assembled pipeline");
        Pipeline {
            in_pipe,
            out_pipe,
            stages,
            filters,
        }
    }

    /// Append one more stage: the current tail pipe becomes the internal
    /// pipe in front of it, switched to the requested discipline, and a
    /// fresh overwriting tail pipe is minted.
    pub fn extend<B>(mut self, filter: FilterHandle<B>, discipline: Discipline) -> Pipeline<I, B::Out>
    where
        B: Filter<In = O>,
    {
        let between = self.out_pipe;
        between.set_wait_for_slowest_filter(discipline == Discipline::Wait);
        let out_pipe = Arc::new(Pipe::new(Discipline::Overwrite));

        self.filters.push(filter.info());
        self.stages
            .push(Box::new(StageWorker::new(between, filter, out_pipe.clone())));

        debug!(stages = self.stages.len(), ?discipline, "extended pipeline");
        Pipeline {
            in_pipe: self.in_pipe,
            out_pipe,
            stages: self.stages,
            filters: self.filters,
        }
    }

    /// Start every stage, first to last.
    pub fn start(&self) {
        for stage in &self.stages {
            stage.start();
        }
    }

    /// Stop every stage, first to last. Bounded as long as the user's
    /// `process` implementations are.
    pub fn stop(&self) {
        for stage in &self.stages {
            stage.stop();
        }
    }

    /// Reset every stage, first to last. Running stages are bounced and
    /// keep producing afterwards; stopped stages only reset their filters.
    pub fn reset(&self) {
        for stage in &self.stages {
            stage.reset();
        }
    }

    /// Number of stages.
    pub fn length(&self) -> usize {
        self.stages.len()
    }

    /// The head pipe external producers push into. Always overwriting.
    pub fn in_pipe(&self) -> Arc<Pipe<I>> {
        self.in_pipe.clone()
    }

    /// The tail pipe external consumers pop from. Always overwriting.
    pub fn out_pipe(&self) -> Arc<Pipe<O>> {
        self.out_pipe.clone()
    }

    /// Type-erased view of the composed filters, in stage order.
    pub fn filters(&self) -> &[FilterInfo] {
        &self.filters
    }
}

/// Lifecycle face of a pipeline when its data types are not interesting,
/// e.g. for keeping differently-typed pipelines in one collection.
pub trait PipelineControl: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn reset(&self);
    fn length(&self) -> usize;
}

impl<I, O> PipelineControl for Pipeline<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn start(&self) {
        Pipeline::start(self)
    }

    fn stop(&self) {
        Pipeline::stop(self)
    }

    fn reset(&self) {
        Pipeline::reset(self)
    }

    fn length(&self) -> usize {
        Pipeline::length(self)
    }
}

/// Waiting composer: the upstream stage waits for the downstream one to
/// drain the shared pipe before pushing again.
impl<A, R> BitOr<R> for FilterHandle<A>
where
    A: Filter,
    R: IntoFilter,
    R::F: Filter<In = A::Out>,
{
    type Output = Pipeline<A::In, <R::F as Filter>::Out>;

    fn bitor(self, rhs: R) -> Self::Output {
        Pipeline::compose(self, rhs.into_filter(), Discipline::Wait)
    }
}

impl<I, O, R> BitOr<R> for MultiFilter<I, O>
where
    I: Send + 'static,
    O: Send + Default + 'static,
    R: IntoFilter,
    R::F: Filter<In = Vec<O>>,
{
    type Output = Pipeline<Vec<I>, <R::F as Filter>::Out>;

    fn bitor(self, rhs: R) -> Self::Output {
        Pipeline::compose(FilterHandle::new(self), rhs.into_filter(), Discipline::Wait)
    }
}

impl<I, M, R> BitOr<R> for Pipeline<I, M>
where
    I: Send + 'static,
    M: Send + 'static,
    R: IntoFilter,
    R::F: Filter<In = M>,
{
    type Output = Pipeline<I, <R::F as Filter>::Out>;

    fn bitor(self, rhs: R) -> Self::Output {
        self.extend(rhs.into_filter(), Discipline::Wait)
    }
}

/// Overwriting composer: the upstream stage overwrites unconsumed data in
/// the shared pipe instead of waiting.
impl<A, R> Shr<R> for FilterHandle<A>
where
    A: Filter,
    R: IntoFilter,
    R::F: Filter<In = A::Out>,
{
    type Output = Pipeline<A::In, <R::F as Filter>::Out>;

    fn shr(self, rhs: R) -> Self::Output {
        Pipeline::compose(self, rhs.into_filter(), Discipline::Overwrite)
    }
}

impl<I, O, R> Shr<R> for MultiFilter<I, O>
where
    I: Send + 'static,
    O: Send + Default + 'static,
    R: IntoFilter,
    R::F: Filter<In = Vec<O>>,
{
    type Output = Pipeline<Vec<I>, <R::F as Filter>::Out>;

    fn shr(self, rhs: R) -> Self::Output {
        Pipeline::compose(
            FilterHandle::new(self),
            rhs.into_filter(),
            Discipline::Overwrite,
        )
    }
}

impl<I, M, R> Shr<R> for Pipeline<I, M>
where
    I: Send + 'static,
    M: Send + 'static,
    R: IntoFilter,
    R::F: Filter<In = M>,
{
    type Output = Pipeline<I, <R::F as Filter>::Out>;

    fn shr(self, rhs: R) -> Self::Output {
        self.extend(rhs.into_filter(), Discipline::Overwrite)
    }
}
