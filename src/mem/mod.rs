//! Memory management for kernel stacks.

pub mod stack_pool;

pub use stack_pool::{Stack, StackBounds, StackPool, StackSizeClass};
