//! # Consent Kernel Testkit
//!
//! Testing utilities for the Consent Kernel.
//!
//! ## Overview
//!
//! - **Fixtures**: a kernel wired to a [`ManualClock`], seeded parties and
//!   documents
//! - **Generators**: proptest strategies for identities, permission sets,
//!   documents and random lifecycles
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use consent_kernel_testkit::fixtures::{TestFixture, HOUR_MS};
//!
//! # async fn example() {
//! let fixture = TestFixture::new();
//! let record = fixture.granted(HOUR_MS).await;
//! fixture.clock.advance(HOUR_MS);
//! fixture.sweeper().sweep_once().await.unwrap();
//! # }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    document, identity, random_identity, ManualClock, TestFixture, GRANTOR, HOUR_MS, REQUESTER,
    START_MILLIS, STRANGER,
};
pub use generators::{Step, Who};
