use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tether_core::Error),
    #[error(transparent)]
    Token(#[from] tether_core::TokenError),
    #[error(transparent)]
    Jwt(#[from] tether_core::auth::JwtError),
    #[error(transparent)]
    Network(#[from] tether_core::NetworkError),
    #[error(transparent)]
    Queue(#[from] tether_core::queue::QueueError),
    #[error(transparent)]
    Storage(#[from] tether_core::StorageError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No reachability probe configured. Set `probe.address` in the config file.")]
    ProbeNotConfigured,
    #[error("Endpoint cannot be empty")]
    EmptyEndpoint,
    #[error("Not signed in. Run `tether login --access-token <JWT> --refresh-token <TOKEN>` first.")]
    NotSignedIn,
}
