pub mod batch;
pub mod config;
pub mod hooks;
pub mod loops;
pub mod notify;
pub mod orchestrator;
pub mod request;
pub mod stores;
pub mod transform;

#[cfg(test)]
pub(crate) mod mock;

pub use batch::*;
pub use config::*;
pub use hooks::*;
pub use notify::*;
pub use orchestrator::*;
pub use request::*;
pub use stores::*;
