pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod types;

pub use config::{ClientSettings, CredentialStore, Credentials};
pub use error::{Error, Result};
pub use session::Session;
pub use types::{ModeCommand, Operation, RequestOutcome};
