//! Ticket mirroring: keeps an external tracking ticket per session in line
//! with the session's onboarding stage.

pub mod client;
pub mod http;
pub mod local;
pub mod retry;
pub mod sync;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use client::TicketClient;
pub use http::HttpTicketClient;
pub use local::LocalTicketClient;
pub use retry::RetryPolicy;
pub use sync::{PassReport, SyncOutcome, TicketSync};
pub use worker::SyncWorker;
