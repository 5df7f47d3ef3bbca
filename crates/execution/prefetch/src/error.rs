use thiserror::Error;

/// Errors raised by the [`crate::TriePrefetcher`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefetchError {
    /// Work was scheduled after the prefetcher was terminated.
    #[error("prefetcher already terminated")]
    Terminated,
}
