use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The credential store must have a name.
    #[error("`control_plane.store_name` cannot be empty")]
    StoreNameEmpty,
    /// Admin writes need at least one attempt.
    #[error("`control_plane.max_write_attempts` cannot be zero")]
    MaxWriteAttemptsZero,
    /// Each downstream client needs at least one request slot.
    #[error("`downstream.max_concurrent_requests` cannot be zero")]
    MaxConcurrentRequestsZero,
    /// The request slot count must fit a semaphore.
    #[error("`downstream.max_concurrent_requests` cannot exceed {0}")]
    MaxConcurrentRequestsTooLarge(usize),
    /// Basic authentication requires a user name.
    #[error("`basic_auth.username` cannot be empty")]
    BasicAuthUsernameEmpty,
    /// Basic authentication requires a password.
    #[error("`basic_auth.password` cannot be empty")]
    BasicAuthPasswordEmpty,
}
