//! Error of backchannel-core

/// A wrap `Result` contains custom errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors collections in backchannel-core.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("No published identity key for peer {0}")]
    KeyNotFound(crate::peer_id::PeerId),

    #[error("Failed to decrypt message payload")]
    Decryption,

    #[error("Failed to encrypt message payload")]
    Encryption,

    #[error("Session key derivation failed")]
    KeyDerivation,

    #[error("Session key {0} is retired and past its grace window")]
    SessionKeyExpired(uuid::Uuid),

    #[error("Connection attempt to peer {0} timed out")]
    ConnectionTimeout(crate::peer_id::PeerId),

    #[error("Max connection attempts reached for peer {0}")]
    MaxRetriesExceeded(crate::peer_id::PeerId),

    #[error("Found existing connection when answering offer from remote peer")]
    AlreadyConnected,

    #[error("Should not connect to self")]
    ShouldNotConnectSelf,

    #[error("Store operation failed: {0}")]
    StoreOperation(String),

    #[error("Sled error: {0}")]
    SledError(#[from] sled::Error),

    #[error("Invalid peer id")]
    InvalidPeerId(#[from] uuid::Error),

    #[error("Identity secret is not valid hexadecimal")]
    BadIdentitySecretHex(#[from] hex::FromHexError),

    #[error("Identity secret must be exactly 32 bytes")]
    BadIdentitySecretLength(#[from] std::array::TryFromSliceError),

    #[error("Bincode serialize error")]
    BincodeSerialize(#[source] bincode::Error),

    #[error("Bincode deserialize error")]
    BincodeDeserialize(#[source] bincode::Error),

    #[error("Failed on acquire callback lock")]
    CallbackSyncLockError,

    #[error("Transport error: {0}")]
    Transport(#[from] backchannel_transport::error::Error),
}
