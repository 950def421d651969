pub mod authn;
pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{AuthflowError, Result};
pub use event::{EventBus, EventPayload};
pub use traits::Services;
pub use types::*;
