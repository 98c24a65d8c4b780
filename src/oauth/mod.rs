pub mod classify;
pub mod endpoints;

pub use classify::RefreshFailure;
pub use endpoints::{TokenEndpoint, TokenGrant};
