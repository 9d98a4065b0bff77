use thiserror::Error;

#[derive(Debug, Error)]
pub enum FirmwaveError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("payload length is not a whole number of blocks")]
    InvalidInputSize,
}

pub type Result<T> = std::result::Result<T, FirmwaveError>;

/// Latched decoder failure, readable through [`crate::Decoder::error`]
/// until the decoder is reset.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Marker mismatch after 16 sync symbols, or the carrier dropped out.
    #[error("lost synchronization")]
    Sync,

    /// Packet trailer CRC mismatch after Hamming repair.
    #[error("packet CRC mismatch")]
    Crc,

    /// The sample producer outran the consumer.
    #[error("sample FIFO overflow")]
    Overflow,

    /// Reception was cancelled through the input handle.
    #[error("reception aborted")]
    Abort,
}
