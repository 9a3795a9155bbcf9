//! Ready-queue structures.
//!
//! Provides the multi-level queue the kernel picks the next thread from.

pub mod mlq;

pub use mlq::{MultiLevelQueue, PriorityQueueLevel};
