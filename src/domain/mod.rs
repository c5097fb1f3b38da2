//! Pure domain types: no I/O, no engine awareness.

pub mod session;
