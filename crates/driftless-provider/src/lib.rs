pub mod aws;
pub mod existing;
pub mod provider;
pub mod reconcile;

pub use provider::{default_providers, DestroyOptions, Provider, ProviderRegistry, Summary};
pub use reconcile::Discovered;
