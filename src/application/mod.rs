//! Use-cases and the ports they depend on. Pure orchestration — no direct
//! engine or HTTP-framework dependency.

pub mod patch_builder;
pub mod ports;
pub mod session_engine;
