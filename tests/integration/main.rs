//! Integration tests for Sumi-Relay
//!
//! Engine runs use an in-memory store and a scripted renderer; the HTTP
//! pieces run against wiremock servers.

mod engine_tests;
mod export_tests;
mod proxy_tests;
mod support;
