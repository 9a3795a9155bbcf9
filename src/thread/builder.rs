//! Thread builder for configuring thread creation.

use super::{SchedulingPolicy, Thread, ThreadId, MAX_THREAD_NAME_LEN};
use crate::errors::SpawnError;
use crate::mem::{StackBounds, StackSizeClass};

use alloc::string::String;

/// Builder for the parameters of a new thread.
///
/// The builder only describes the thread; [`Kernel::create_thread`] allocates
/// the kernel stack, assigns the handle and makes it ready.
///
/// [`Kernel::create_thread`]: crate::kernel::Kernel::create_thread
#[derive(Debug, Clone)]
pub struct ThreadBuilder {
    name: String,
    entry_point: usize,
    argument: usize,
    policy: SchedulingPolicy,
    user_stack: Option<StackBounds>,
    kernel_stack: Option<StackSizeClass>,
    /// Byte size asked for through `kernel_stack_size`, kept for validation
    kernel_stack_bytes: Option<usize>,
    tls: usize,
}

impl ThreadBuilder {
    /// Start describing a thread that begins execution at `entry_point`.
    pub fn new(entry_point: usize) -> Self {
        Self {
            name: String::new(),
            entry_point,
            argument: 0,
            policy: SchedulingPolicy::Normal,
            user_stack: None,
            kernel_stack: None,
            kernel_stack_bytes: None,
            tls: 0,
        }
    }

    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        self.name = name.into();
        self
    }

    pub fn policy(mut self, policy: SchedulingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Value handed to the entry point.
    pub fn argument(mut self, argument: usize) -> Self {
        self.argument = argument;
        self
    }

    /// User stack of a thread that runs in user mode.
    pub fn user_stack(mut self, bounds: StackBounds) -> Self {
        self.user_stack = Some(bounds);
        self
    }

    /// Override the configured kernel stack size class.
    pub fn kernel_stack(mut self, size_class: StackSizeClass) -> Self {
        self.kernel_stack = Some(size_class);
        self.kernel_stack_bytes = None;
        self
    }

    /// Ask for a kernel stack of at least `bytes`, rounded up to the next
    /// size class.
    pub fn kernel_stack_size(mut self, bytes: usize) -> Self {
        self.kernel_stack = StackSizeClass::for_size(bytes);
        self.kernel_stack_bytes = Some(bytes);
        self
    }

    pub fn tls(mut self, tls: usize) -> Self {
        self.tls = tls;
        self
    }

    pub fn get_policy(&self) -> SchedulingPolicy {
        self.policy
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn entry_point(&self) -> usize {
        self.entry_point
    }

    pub fn get_argument(&self) -> usize {
        self.argument
    }

    pub fn kernel_stack_class(&self) -> Option<StackSizeClass> {
        self.kernel_stack
    }

    /// Check the parameters that do not depend on kernel state.
    pub fn validate(&self) -> Result<(), SpawnError> {
        if self.name.is_empty() || self.name.len() > MAX_THREAD_NAME_LEN {
            return Err(SpawnError::InvalidName);
        }
        match self.kernel_stack_bytes {
            Some(bytes) if self.kernel_stack.is_none() => Err(SpawnError::InvalidStackSize(bytes)),
            _ => Ok(()),
        }
    }

    /// Turn the description into a record without a kernel stack.
    pub(crate) fn into_thread(self, id: ThreadId) -> Thread {
        let mut thread = Thread::new(id, self.name, self.policy);
        thread.set_user_stack(self.user_stack);
        thread.set_tls(self.tls);
        thread
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadState;

    #[test]
    fn test_builder_defaults() {
        let builder = ThreadBuilder::new(0x1000).name("worker");
        assert_eq!(builder.get_policy(), SchedulingPolicy::Normal);
        assert_eq!(builder.entry_point(), 0x1000);
        assert_eq!(builder.get_argument(), 0);
        assert!(builder.kernel_stack_class().is_none());
        assert!(builder.validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_bad_names() {
        assert_eq!(ThreadBuilder::new(0x1000).validate(), Err(SpawnError::InvalidName));

        let long: String = core::iter::repeat('x').take(MAX_THREAD_NAME_LEN + 1).collect();
        assert_eq!(
            ThreadBuilder::new(0x1000).name(long).validate(),
            Err(SpawnError::InvalidName)
        );
    }

    #[test]
    fn test_kernel_stack_size_rounds_up() {
        let builder = ThreadBuilder::new(0x1000).name("big").kernel_stack_size(20_000);
        assert_eq!(builder.kernel_stack_class(), Some(StackSizeClass::Large));
        assert!(builder.validate().is_ok());

        let builder = ThreadBuilder::new(0x1000).name("huge").kernel_stack_size(1 << 20);
        assert_eq!(builder.validate(), Err(SpawnError::InvalidStackSize(1 << 20)));

        // An explicit class replaces an earlier byte request
        let builder = builder.kernel_stack(StackSizeClass::Small);
        assert!(builder.validate().is_ok());
    }

    #[test]
    fn test_into_thread_carries_attributes() {
        let id = ThreadId::new(9).unwrap();
        let thread = ThreadBuilder::new(0x1000)
            .name("user")
            .policy(SchedulingPolicy::Background)
            .user_stack(StackBounds::new(0x8000, 0x9000))
            .tls(0xdead)
            .into_thread(id);

        assert_eq!(thread.id(), id);
        assert_eq!(thread.name(), "user");
        assert_eq!(thread.policy(), SchedulingPolicy::Background);
        assert_eq!(thread.state(), ThreadState::Ready);
        assert_eq!(thread.user_stack(), Some(StackBounds::new(0x8000, 0x9000)));
        assert_eq!(thread.tls(), 0xdead);
    }
}
