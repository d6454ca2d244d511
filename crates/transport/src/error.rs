#![allow(missing_docs)]

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum IceServerError {
    #[error("Invalid ICE server url: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("ICE server scheme {0} is not supported")]
    SchemeNotSupported(String),

    #[error("ICE server url carries no host")]
    UrlMissHost,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "native-webrtc")]
    #[error("WebRTC error: {0}")]
    Webrtc(#[from] webrtc::error::Error),

    #[error("Message codec error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("ICE server error: {0}")]
    IceServer(#[from] IceServerError),

    #[error("Data channel pool error: {0}")]
    DataChannelPool(String),

    #[error("Data channel did not open: {0}")]
    DataChannelOpen(String),

    #[error("Local SDP cannot be generated: {0}")]
    LocalSdpGeneration(String),

    #[error("A live connection to {0} already exists")]
    ConnectionAlreadyExists(String),

    #[error("No connection to {0}, handshake first")]
    ConnectionNotFound(String),

    #[error("Connection to {0} was released from the pool")]
    ConnectionReleased(String),
}
