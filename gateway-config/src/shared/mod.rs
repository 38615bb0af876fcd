mod auth;
mod base;
mod control_plane;
mod downstream;
mod retry;
mod sentry;

pub use auth::*;
pub use base::*;
pub use control_plane::*;
pub use downstream::*;
pub use retry::*;
pub use sentry::*;
