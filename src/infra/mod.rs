//! Adapters implementing `crate::application::ports` against real backends.

pub mod bollard_engine;
