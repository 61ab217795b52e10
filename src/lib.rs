//! Onboarding agent. Walks new team members through a fixed sequence of
//! onboarding stages and mirrors each session's progress into an external
//! ticket.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod onboarding;
pub mod tickets;
