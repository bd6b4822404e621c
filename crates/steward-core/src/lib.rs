pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::StewardConfig;
pub use error::{Result, StewardError};
pub use events::{DomainEvent, EventBus};
pub use types::*;
