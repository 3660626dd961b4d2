//! HTTP route handlers outside the auth module.
//!
//! Resource controllers (assignments, videos, courses) live in separate
//! services and consume the guard interface re-exported from
//! [`crate::auth`]; only cross-cutting routes are hosted here.

pub mod health;
