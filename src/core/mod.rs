//! Core engine: scanning, classification, strategy, scheduling, atomic
//! replacement, checkpointing, and observation.
//!
//! Dataflow, leaves first: the tool invoker wraps every external process;
//! the deep probe reads media structure through it; the scanner walks the
//! tree and scores suspicion; the classifier probes the suspicious subset;
//! the strategy engine picks an operation per file; the work pool executes
//! operations; the atomic replacer installs artifacts; the checkpoint store
//! records every transition while the watchdog and reporter observe.

pub mod arena;
pub mod checkpoint;
pub mod classifier;
pub mod executor;
pub mod media;
pub mod pipeline;
pub mod pool;
pub mod probe;
pub mod replace;
pub mod report;
pub mod scanner;
pub mod strategy;
pub mod watchdog;
