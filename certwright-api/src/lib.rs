//! Certwright Challenge API
//!
//! Plain HTTP responder that answers ACME HTTP-01 validation requests from
//! the shared challenge token store.

mod handlers;
pub mod server;

pub use server::ChallengeServer;
