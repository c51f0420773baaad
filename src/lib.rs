//! Warden - In-Process Request Admission Control
//!
//! This crate decides, per request, whether a client may proceed. Requests
//! are counted against moving-window limits kept in expiring in-memory
//! buckets, and clients that keep tripping those limits get their whole IP
//! range jailed.

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod jail;
pub mod ratelimit;
pub mod response;
