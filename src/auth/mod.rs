pub mod backend;
pub mod callback;
pub mod exchange;
pub mod file_store;
pub mod flow;
pub mod keyring_store;
pub mod manager;
pub mod registry;
pub mod resolver;
pub mod scopes;
pub mod token_source;
pub mod transport;
pub mod types;

pub use backend::BackendKind;
pub use manager::{CredentialManager, LoginOptions, LoginSummary};
