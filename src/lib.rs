pub mod core;
pub mod logging;

pub use crate::core::credential::vault::CredentialVault;
pub use crate::core::git::provider::GitProvider;
pub use crate::core::git::router::ProviderRouter;
