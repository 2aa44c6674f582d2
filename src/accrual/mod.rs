//! Asynchronous accrual pipeline: scoring client and worker pool.

pub mod client;
pub mod worker;

pub use client::{AccrualClient, ClientError};
pub use worker::WorkerPool;
