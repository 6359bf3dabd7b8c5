//! HTTP admission layer and server.

mod client_key;
mod middleware;
mod server;

pub use client_key::{ClientKeyExtractor, DEFAULT_FORWARDED_HEADER};
pub use middleware::{Admission, TOO_MANY_REQUESTS_BODY};
pub use server::HttpServer;
