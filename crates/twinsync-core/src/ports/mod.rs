//! Port definitions (trait interfaces for adapter crates)

pub mod remote_tree;
pub mod signal;
pub mod state_store;

pub use remote_tree::{
    DeltaPage, ProviderError, ProviderResult, RemoteTree, SubscriptionHandle, UploadSession,
};
pub use signal::ChangeSignal;
pub use state_store::StateStore;
