use core::fmt;
use core::fmt::{Display, Formatter};

/// The type returned by driver methods.
pub type VirtIoResult<T> = Result<T, VirtIoError>;

/// The error type of the driver core.
///
/// Fatal variants leave the device with FAILED set in its status register;
/// recoverable ones reject the request and leave all device state untouched.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VirtIoError {
    /// The host cleared FEATURES_OK during the handshake. Fatal.
    NegotiationFailed,
    /// A queue advertised size zero or rejected its ring addresses. Fatal.
    QueueInitFailed,
    /// The platform allocator could not satisfy a DMA allocation. Fatal.
    OutOfMemory,
    /// A block request reaches past the end of the device. Recoverable.
    OutOfRange,
    /// A transmit payload exceeds the per-slot buffer capacity. Recoverable.
    OversizedPayload,
    /// A register or ring field held a value the device may never produce.
    TransportFault,
    /// The instance was shut down or has given up on the device.
    DeviceFailed,
    /// Not enough descriptors are free in the virtqueue, try again later.
    QueueFull,
    /// The request has not completed yet.
    NotReady,
    /// The device reported an I/O error for the request.
    IoError,
    /// The request was not supported by the device.
    Unsupported,
    /// Invalid parameter.
    InvalidParam,
}

impl Display for VirtIoError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::NegotiationFailed => write!(f, "Host rejected the offered feature set"),
            Self::QueueInitFailed => write!(f, "Virtqueue could not be brought up"),
            Self::OutOfMemory => write!(f, "Failed to allocate DMA memory"),
            Self::OutOfRange => write!(f, "Request exceeds device capacity"),
            Self::OversizedPayload => write!(f, "Payload exceeds the slot buffer size"),
            Self::TransportFault => write!(f, "Device returned an impossible value"),
            Self::DeviceFailed => write!(f, "Device instance is failed or closed"),
            Self::QueueFull => write!(f, "Virtqueue is full"),
            Self::NotReady => write!(f, "Request not completed yet"),
            Self::IoError => write!(f, "I/O error"),
            Self::Unsupported => write!(f, "Request not supported by device"),
            Self::InvalidParam => write!(f, "Invalid parameter"),
        }
    }
}
