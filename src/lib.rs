// Tracker, ticket and identity records
pub mod model;

// Sealed identities (credential collaborator)
pub mod credentials;

// SQLite persistence
pub mod store;

// TOML + environment configuration
pub mod config;

pub use config::{load_config, HubConfig};
pub use credentials::{Credentials, Keyring};
pub use model::{Application, Identity, Metadata, Ticket, Tracker};
pub use store::{Repository, Store};
