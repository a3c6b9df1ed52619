//! Integration tests for vertex-session
//! These tests drive the public API end to end rather than individual units

pub mod http_client_test;
pub mod session_flow_test;
