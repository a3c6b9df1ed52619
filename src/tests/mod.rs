//! Crate-level tests for the session manager and the authorization flow
//!
//! Everything runs against in-memory collaborators: `MemoryStore`,
//! `MemoryNavigation`, `MockHttpClient` and a fixed clock.

pub mod support;
