//! Resilience primitives shared by long-lived client connections.

pub mod backoff;

pub use backoff::Backoff;
