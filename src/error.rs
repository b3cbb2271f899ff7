use alloc::string::String;
use core::fmt;

use axerrno::{AxError, ax_err_type};

/// Errors raised while bringing up or tearing down VMX operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmxError {
    /// The processor (or its VMX implementation) lacks a required feature.
    Unsupported(String),
    /// `IA32_FEATURE_CONTROL` is locked with VMXON disabled outside SMX.
    PermissionDenied,
    /// No physical frame was available for a VMX region.
    MemoryAllocationFailed,
    /// A VMX instruction signalled VMfailInvalid or VMfailValid.
    VmxInstructionError(String),
    /// The operation requires VMX root operation, which is not active.
    VmxNotEnabled,
    /// VMX root operation is already active on this processor.
    VmxAlreadyEnabled,
    /// A region handle does not name a live region.
    InvalidRegionHandle,
    /// A control request could not be understood.
    InvalidInput(String),
    /// A control request payload was truncated.
    BadAddress,
}

/// Coarse classification of a [`VmxError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unsupported,
    PermissionDenied,
    OutOfMemory,
    EntryFailure,
    BadState,
    InvalidInput,
    BadAddress,
}

pub type Result<T = ()> = core::result::Result<T, VmxError>;

impl VmxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::PermissionDenied => ErrorKind::PermissionDenied,
            Self::MemoryAllocationFailed => ErrorKind::OutOfMemory,
            Self::VmxInstructionError(_) => ErrorKind::EntryFailure,
            Self::VmxNotEnabled | Self::VmxAlreadyEnabled | Self::InvalidRegionHandle => {
                ErrorKind::BadState
            }
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::BadAddress => ErrorKind::BadAddress,
        }
    }

    /// The status a lifecycle hook or control request reports for this error.
    pub fn exit_code(&self) -> ExitCode {
        match self.kind() {
            ErrorKind::Unsupported => ExitCode::Unsupported,
            ErrorKind::PermissionDenied => ExitCode::PermissionDenied,
            ErrorKind::OutOfMemory => ExitCode::OutOfMemory,
            ErrorKind::EntryFailure => ExitCode::EntryFailed,
            ErrorKind::BadState | ErrorKind::InvalidInput => ExitCode::InvalidArgument,
            ErrorKind::BadAddress => ExitCode::BadAddress,
        }
    }
}

impl fmt::Display for VmxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(what) => write!(f, "unsupported: {what}"),
            Self::PermissionDenied => f.write_str("VMX disabled by firmware (IA32_FEATURE_CONTROL)"),
            Self::MemoryAllocationFailed => f.write_str("failed to allocate a VMX region"),
            Self::VmxInstructionError(msg) => f.write_str(msg),
            Self::VmxNotEnabled => f.write_str("VMX root operation is not active"),
            Self::VmxAlreadyEnabled => f.write_str("VMX root operation is already active"),
            Self::InvalidRegionHandle => f.write_str("stale or unknown region handle"),
            Self::InvalidInput(msg) => write!(f, "invalid request: {msg}"),
            Self::BadAddress => f.write_str("request payload is truncated"),
        }
    }
}

impl From<VmxError> for AxError {
    fn from(err: VmxError) -> Self {
        match err.kind() {
            ErrorKind::Unsupported => ax_err_type!(Unsupported, err),
            ErrorKind::PermissionDenied => ax_err_type!(PermissionDenied, err),
            ErrorKind::OutOfMemory => ax_err_type!(NoMemory, err),
            ErrorKind::EntryFailure => ax_err_type!(Io, err),
            ErrorKind::BadState => ax_err_type!(BadState, err),
            ErrorKind::InvalidInput => ax_err_type!(InvalidInput, err),
            ErrorKind::BadAddress => ax_err_type!(BadAddress, err),
        }
    }
}

numeric_enum_macro::numeric_enum! {
#[repr(i32)]
/// Status returned by the lifecycle hooks and the control-request entry
/// point, encoded as a negated Linux errno.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    EntryFailed = -5,
    OutOfMemory = -12,
    PermissionDenied = -13,
    BadAddress = -14,
    InvalidArgument = -22,
    Unsupported = -95,
}
}

impl ExitCode {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl<T> From<Result<T>> for ExitCode {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(err) => err.exit_code(),
        }
    }
}
