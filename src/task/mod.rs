pub mod barrier;
pub mod error;
pub mod execution;
pub mod lifecycle;
pub mod list;
pub mod manager;
pub mod modal;
pub mod policy;
pub mod retry;
pub mod scheduler;
pub mod types;


pub use barrier::*;
pub use error::SchedulerError;
pub use execution::*;
pub use lifecycle::{Task, TaskCore, TaskRef, spawn_worker};
pub use list::*;
pub use manager::*;
pub use modal::*;
pub use policy::*;
pub use retry::*;
pub use scheduler::*;
pub use types::*;
