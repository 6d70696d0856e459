//! Error types for the Modbus engine
//!
//! - [`FrameError`]: the codec refused a byte sequence (fails closed)
//! - [`StoreError`]: a register bank operation was out of range
//! - [`ModbusError`]: everything a master caller or server loop can see

use thiserror::Error;

use crate::pdu::{ExceptionCode, FunctionCode};

/// Result type for Modbus engine operations
pub type ModbusResult<T> = std::result::Result<T, ModbusError>;

/// Frame validation errors raised by the codec
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame too short: {0} bytes")]
    TooShort(usize),

    #[error("Frame too long: {0} bytes")]
    TooLong(usize),

    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("Length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Invalid protocol ID: {0}")]
    InvalidProtocolId(u16),

    #[error("Unsupported function code: 0x{0:02X}")]
    UnsupportedFunction(u8),

    #[error("Byte count {byte_count} does not match {actual} payload bytes")]
    ByteCountMismatch { byte_count: usize, actual: usize },

    #[error("Ambiguous frame for FC{0:02X}: caller must supply the expected kind")]
    Ambiguous(u8),

    #[error("Frame not encodable: {0}")]
    NotEncodable(String),
}

/// Register bank errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Range {start}+{count} exceeds the 16-bit address space")]
    OutOfRange { start: u16, count: usize },

    #[error("Range {start}+{count} is not fully defined")]
    NotCovered { start: u16, count: usize },

    #[error("Empty value list")]
    Empty,
}

/// Modbus engine errors
#[derive(Debug, Error, Clone)]
pub enum ModbusError {
    /// No (or an incomplete) response before the deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Response failed CRC/length validation; treated as "peer did not reply"
    #[error("Corrupt frame: {0}")]
    FrameCorrupt(#[from] FrameError),

    /// Well-formed exception response from the peer
    #[error("Exception response for {function}: {code}")]
    Exception {
        function: FunctionCode,
        code: ExceptionCode,
    },

    /// Valid frame that does not answer the outstanding request
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Caller supplied arguments the protocol cannot carry
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                ModbusError::Timeout(err.to_string())
            },
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => ModbusError::ConnectionClosed,
            _ => ModbusError::Io(err.to_string()),
        }
    }
}

impl From<figment::Error> for ModbusError {
    fn from(err: figment::Error) -> Self {
        ModbusError::Config(err.to_string())
    }
}

#[cfg(feature = "rtu")]
impl From<tokio_serial::Error> for ModbusError {
    fn from(err: tokio_serial::Error) -> Self {
        ModbusError::Io(format!("Serial port error: {err}"))
    }
}

impl ModbusError {
    pub fn timeout(msg: impl Into<String>) -> Self {
        ModbusError::Timeout(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ModbusError::InvalidArgument(msg.into())
    }

    pub fn unexpected(msg: impl Into<String>) -> Self {
        ModbusError::UnexpectedResponse(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        ModbusError::Io(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        ModbusError::Config(msg.into())
    }

    /// True when the peer is assumed not to have replied at all
    pub fn is_timeout_like(&self) -> bool {
        matches!(self, ModbusError::Timeout(_) | ModbusError::FrameCorrupt(_))
    }

    /// Exception code carried by a peer exception response
    pub fn exception_code(&self) -> Option<ExceptionCode> {
        match self {
            ModbusError::Exception { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Check if this error indicates the link should be re-established
    pub fn needs_reconnect(&self) -> bool {
        matches!(self, ModbusError::ConnectionClosed | ModbusError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let err: ModbusError = std::io::Error::from(std::io::ErrorKind::TimedOut).into();
        assert!(err.is_timeout_like());

        let err: ModbusError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert!(matches!(err, ModbusError::ConnectionClosed));
        assert!(err.needs_reconnect());
    }

    #[test]
    fn test_frame_corrupt_is_timeout_like() {
        let err = ModbusError::from(FrameError::CrcMismatch {
            expected: 0x1234,
            actual: 0x4321,
        });
        assert!(err.is_timeout_like());
        assert_eq!(err.exception_code(), None);
        assert!(err.to_string().contains("0x1234"));
    }

    #[test]
    fn test_exception_code_accessor() {
        let err = ModbusError::Exception {
            function: FunctionCode::WriteSingleCoil,
            code: ExceptionCode::IllegalDataAddress,
        };
        assert!(!err.is_timeout_like());
        assert_eq!(err.exception_code(), Some(ExceptionCode::IllegalDataAddress));
    }
}
