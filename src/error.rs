/// Errors reported by the protocol engine and the driver.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A value was outside of the range the protocol can represent.
    #[error("Value out of range")]
    RangeError,
    /// The checksum of a received frame did not match its content.
    #[error("Invalid checksum - calculated={calculated:04X} received={received:04X}")]
    CheckSumError { calculated: u16, received: u16 },
    /// The BMS answered with a status other than OK.
    #[error("BMS replied with error status 0x{0:02X}")]
    StatusError(u8),
    /// The byte closing a frame was not the stop marker.
    #[error("Expected stop byte, received 0x{0:02X}")]
    StopByteError(u8),
    /// A frame declared more payload than the receive buffer holds.
    #[error("Declared length {length} exceeds payload capacity {capacity}")]
    LengthError { length: u8, capacity: usize },
    /// A payload was too short for the layout of its register.
    #[error("Invalid reply size - required={required} received={received}")]
    ReplySizeError { required: usize, received: usize },
    /// An error from the underlying byte transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
