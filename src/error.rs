use embedded_io::ErrorKind;

/// Result codes of the engine, the connection API and netconn
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Generic error, e.g. the device answered with ERROR
    Err,

    /// Invalid parameter, nothing was sent to the device
    Par,

    /// Out of memory or queue full
    Mem,

    /// Timeout while waiting for the device or a queue
    Timeout,

    /// Connection is closed or was closed while waiting
    Closed,

    /// Operation is still in progress
    InProgress,

    /// Station has no IP address yet
    NoIp,

    /// All connection slots are in use
    NoFreeConn,

    /// Joining an access point timed out
    ConnTimeout,

    /// Wrong password of the access point
    Pass,

    /// Access point not found
    NoAp,

    /// Joining the access point failed
    ConnFail,

    /// WiFi link dropped
    WifiNotConnected,

    /// Device is not present
    NoDevice,
}

impl Error {
    /// Maps the `+CWJAP:<n>` error code reported by the device
    pub(crate) fn from_join_code(code: i32) -> Self {
        match code {
            1 => Error::ConnTimeout,
            2 => Error::Pass,
            3 => Error::NoAp,
            4 => Error::ConnFail,
            _ => Error::Err,
        }
    }
}

impl embedded_io::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Par => ErrorKind::InvalidInput,
            Error::Mem => ErrorKind::OutOfMemory,
            Error::Timeout | Error::ConnTimeout => ErrorKind::TimedOut,
            Error::Closed => ErrorKind::ConnectionReset,
            Error::NoIp | Error::WifiNotConnected | Error::NoDevice => ErrorKind::NotConnected,
            Error::ConnFail | Error::NoAp => ErrorKind::ConnectionRefused,
            Error::Pass => ErrorKind::PermissionDenied,
            Error::NoFreeConn => ErrorKind::AddrInUse,
            Error::InProgress | Error::Err => ErrorKind::Other,
        }
    }
}
