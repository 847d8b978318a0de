//! Durable storage for the lifecycle manager. Open positions survive a
//! restart and are re-hydrated from here before the first poll cycle.

pub mod database;

pub use database::PositionDatabase;
