//! # idchain Testkit
//!
//! Testing utilities for idchain.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Operations with their expected canonical message and hash
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: Named identities that sign operations, and a single-node
//!   [`TestNet`] driven by a manual clock
//!
//! ## Golden Vectors
//!
//! Golden vectors pin the canonical encoding so other implementations can
//! check they hash operations identically:
//!
//! ```rust
//! use idchain_testkit::vectors::{all_vectors, verify_all_vectors};
//!
//! for vector in all_vectors() {
//!     println!("{}: {}", vector.name, vector.expected_hash);
//! }
//! assert!(verify_all_vectors().is_ok());
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use idchain_testkit::fixtures::{TestIdentity, TestNet};
//!
//! let net = TestNet::new();
//! let alice = TestIdentity::named("alice");
//! let bob = TestIdentity::named("bob");
//! let outcome = net.submit(alice.connect(&bob, None, net.now())).await;
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{countersign, sign, TestApp, TestIdentity, TestNet, GENESIS};
pub use generators::{connection_level, keypair, membership_operation};
pub use vectors::{all_vectors, verify_all_vectors, GoldenVector};
