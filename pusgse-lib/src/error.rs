use crate::mib::PacketKey;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Not enough bytes; got {actual}, need at least {minimum}")]
    NotEnoughData { actual: usize, minimum: usize },

    /// Structurally invalid input, e.g., a time code of the wrong length.
    #[error("Invalid format: {0}")]
    Format(String),

    /// A bit field reaches past the end of its buffer.
    #[error("bit field out of range; offset={offset} width={width} available={available}")]
    Range {
        offset: usize,
        width: usize,
        available: usize,
    },

    #[error("CRC mismatch; expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// No MIB layout registered for the packet key.
    #[error("no packet layout for {0}")]
    UnknownPacketKey(PacketKey),

    #[error("unknown parameter {0}")]
    UnknownParameter(String),

    #[error("unsupported parameter format PTC={ptc} PFC={pfc}")]
    UnsupportedFormat { ptc: u8, pfc: u16 },

    #[error("unknown calibration signal {0}")]
    UnknownSignal(String),

    #[error("invalid calibration for {signal}: {reason}")]
    Calibration { signal: String, reason: String },

    #[error("decompressor failed: {0}")]
    Decompressor(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
