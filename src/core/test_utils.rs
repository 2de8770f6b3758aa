//! Test utilities for arena-based testing.
//!
//! Unit tests that drive the legalizer need a session, and a session needs an
//! arena that outlives it. These helpers own the arena for the duration of a test.

#[cfg(test)]
pub mod test {
    use super::super::session::LegalizerSession;
    use bumpalo::Bump;

    /// Test context that manages arena lifetime for tests.
    pub struct TestContext {
        arena: Bump,
    }

    impl TestContext {
        pub fn new() -> Self {
            Self { arena: Bump::new() }
        }

        /// Create a legalizer session using this context's arena.
        ///
        /// The returned session borrows from the TestContext, so the
        /// TestContext must outlive the session.
        pub fn create_session(&self) -> LegalizerSession<'_> {
            LegalizerSession::new(&self.arena)
        }

        /// Current arena usage.
        pub fn memory_used(&self) -> usize {
            self.arena.allocated_bytes()
        }
    }

    impl Default for TestContext {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Run a test with a session backed by a temporary arena.
    pub fn with_session<F, R>(f: F) -> R
    where
        F: FnOnce(&LegalizerSession<'_>) -> R,
    {
        let ctx = TestContext::new();
        let session = ctx.create_session();
        f(&session)
    }
}
