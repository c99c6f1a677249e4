//! # vsp-tests
//!
//! Integration tests for the VSP node and crawler.
//!
//! This crate provides:
//! - Handshake scenarios driven through the router with a recording transport
//! - Routing and observer delivery tests
//! - Crawler discovery, TTL and publish scenarios against a scripted admin
//! - Property-based tests for the wire mapping and hashing laws

pub mod generators;
pub mod harness;




#[cfg(test)]
mod property_tests;

pub use generators::*;
pub use harness::*;
