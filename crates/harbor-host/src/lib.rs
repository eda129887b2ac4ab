pub mod app;
pub mod error;
pub mod gateway;
mod id;
pub mod pool;
pub mod protocol;
pub mod route;
pub mod rpc;
pub mod sandbox;
pub mod stream;
pub mod transport;
mod worker;

pub use id::{ExecuteId, WorkerId};
pub use worker::{ExecuteCall, Outcome, WorkerHandle};
