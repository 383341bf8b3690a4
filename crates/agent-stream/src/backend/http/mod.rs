//! HTTP implementation of the run backend.
//!
//! Endpoints, relative to the configured base URL:
//! - `GET agent-run/{id}/stream`: chunked event stream, one event per line;
//! - `GET agent-run/{id}`: `{ "status": "running" | "completed" | ... }`;
//! - `POST agent-run/{id}/stop`.
mod adapter;
mod config;
mod transport;

pub use adapter::HttpRunBackend;
pub use config::HttpBackendConfig;
