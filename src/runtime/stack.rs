//! Task stack provisioning.
//!
//! The scheduler does not implement an allocator; it sizes stacks and asks
//! the platform for them, surfacing failure to the spawner. Freeing is the
//! drop of the coroutine that owns the stack.

use corosensei::stack::DefaultStack;

use crate::error::{Error, ErrorKind};

/// Stack sizing policy fixed at scheduler construction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StackPolicy {
    size: usize,
}

impl StackPolicy {
    pub(crate) const fn new(size: usize) -> Self {
        Self { size }
    }

    pub(crate) const fn size(&self) -> usize {
        self.size
    }

    /// Allocates one task stack.
    ///
    /// Failure here is the caller's problem (the spawning task), never the
    /// scheduler's: a spawner that cannot get a stack gets an error, the
    /// scheduler keeps running.
    pub(crate) fn allocate(&self) -> Result<DefaultStack, Error> {
        DefaultStack::new(self.size)
            .map_err(|io| Error::with_detail(ErrorKind::StackExhausted, io.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_configured_size() {
        let policy = StackPolicy::new(64 * 1024);
        assert_eq!(policy.size(), 64 * 1024);
        assert!(policy.allocate().is_ok());
    }
}
