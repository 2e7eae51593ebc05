use labhal_transport::TransportError;

/// Errors raised while framing or decoding a message.
#[derive(Debug, thiserror::Error)]
pub enum DatagramError {
    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The first eight bytes of an image were not the PNG signature.
    #[error("invalid png signature: {0:02X?}")]
    InvalidPngSignature(Vec<u8>),

    /// A received text message was not valid UTF-8.
    #[error("received text is not valid utf-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

pub type Result<T> = std::result::Result<T, DatagramError>;
