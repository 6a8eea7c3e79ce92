//! AUTOMATIC1111 Stable Diffusion WebUI client library.
//!
//! Provides the HTTP API wrapper with its retry policy, readiness polling
//! for a server that is still starting up, and model checkpoint switching.

pub mod api;
pub mod checkpoint;
pub mod readiness;
pub mod retry;
