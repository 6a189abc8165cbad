//! Coordination primitives

pub mod waiter;

pub use waiter::Waiter;
