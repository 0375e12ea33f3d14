//! Shared utilities for the inventory export backend.
//!
//! - Bearer token validation (HS256 shared secret or RS256 key pair)

pub mod jwt;
