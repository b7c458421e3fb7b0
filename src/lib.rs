//! Pipeflow - staged data-flow pipelines over single-slot pipes
//!
//! Compose user-written filters into a linear chain; every stage runs on
//! its own worker thread, and adjacent stages hand data over through pipes
//! holding at most one value. The `|` composer makes the upstream stage
//! wait for the downstream one to drain; the `>>` composer lets it
//! overwrite unconsumed data; the `&` composer fans a stage out into
//! parallel lanes. A stage whose input is [`Generator`] drives itself.

// Core modules
pub mod filter;
pub mod generator;
pub mod listener;
pub mod logging;
pub mod multi;
pub mod pipe;
pub mod pipeline;
pub mod stage;

// Re-export commonly used items
pub use filter::{Filter, FilterHandle, FilterInfo, FnFilter, IntoFilter};
pub use generator::Generator;
pub use listener::{FilterListener, InterceptingListener, ProfilingListener};
pub use logging::{init_logging, init_test_logging, LogConfig, LogFormat};
pub use multi::MultiFilter;
pub use pipe::{Discipline, Pipe};
pub use pipeline::{Pipeline, PipelineControl};
pub use stage::StageWorker;
