//! HTTP surface: admission middleware, upstream proxy and listeners.

mod admin;
mod admission;
mod matcher;
mod proxy;
mod server;

pub use admin::{admin_router, Health};
pub use admission::{admission_middleware, panic_response, Admission, AdmissionRejection, ErrorBody};
pub use matcher::PathMatcher;
pub use proxy::{forward, UpstreamProxy};
pub use server::{gateway_router, serve_listeners, GatewayServer};
