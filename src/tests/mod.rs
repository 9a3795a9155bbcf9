//! Cross-module scenario tests driving the kernel end to end.

mod helpers;
