// ABOUTME: Test support shared by adapter tests inside and outside this crate.
// ABOUTME: Conformance helpers check stream shape independent of the backend.

pub mod conformance;

pub use conformance::{assert_well_formed, collect_events, collect_events_with_timeout};
