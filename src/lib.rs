//! `daiv_sandbox` — remote sandbox execution broker.
//!
//! Layered as ports-and-adapters: `domain` holds pure types, `application`
//! holds use-cases expressed against `application::ports` traits, `infra`
//! fulfills those ports against real backends, and `http` is the boundary
//! that translates wire requests into application calls and domain errors
//! into status codes.

pub mod application;
pub mod archive;
pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod infra;
pub mod scripts;
