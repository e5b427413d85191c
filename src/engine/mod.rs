//! Core engine — the round lifecycle and the loop that drives it.

pub mod rounds;
pub mod scheduler;
