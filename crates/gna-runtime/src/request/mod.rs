//! Request configurations, requests and their scheduling

pub mod config;
pub mod execution;
pub mod scheduler;
pub mod validator;

pub use config::RequestConfiguration;
pub use execution::{Request, RequestState, RequestStatus};
pub use scheduler::RequestScheduler;
pub use validator::BufferConfigValidator;
