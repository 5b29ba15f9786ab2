//! Platform failure codes for advertising and scanning

use bluechat_core::BroadcastError;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Advertise Failures
// ----------------------------------------------------------------------------

/// Reasons the platform refuses to start an advertisement
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiseFailure {
    #[error("advertise data too large")]
    DataTooLarge,

    #[error("too many advertisers")]
    TooManyAdvertisers,

    #[error("advertising already started")]
    AlreadyStarted,

    #[error("internal advertise error")]
    InternalError,

    #[error("advertising feature unsupported")]
    FeatureUnsupported,

    #[error("unknown advertise failure (code {0})")]
    Unknown(i32),
}

impl AdvertiseFailure {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::DataTooLarge,
            2 => Self::TooManyAdvertisers,
            3 => Self::AlreadyStarted,
            4 => Self::InternalError,
            5 => Self::FeatureUnsupported,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::DataTooLarge => 1,
            Self::TooManyAdvertisers => 2,
            Self::AlreadyStarted => 3,
            Self::InternalError => 4,
            Self::FeatureUnsupported => 5,
            Self::Unknown(code) => *code,
        }
    }
}

/// Error text reported when an advertisement cannot be started
pub(crate) fn advertise_failure_text(err: &BroadcastError) -> String {
    match err {
        BroadcastError::AdvertiseRejected { code } => AdvertiseFailure::from_code(*code).to_string(),
        other => other.to_string(),
    }
}

impl From<AdvertiseFailure> for BroadcastError {
    fn from(failure: AdvertiseFailure) -> Self {
        BroadcastError::AdvertiseFailed(failure.to_string())
    }
}

// ----------------------------------------------------------------------------
// Scan Failures
// ----------------------------------------------------------------------------

/// Reasons a platform scan stops
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFailure {
    #[error("scan already started")]
    AlreadyStarted,

    #[error("application registration failed")]
    ApplicationRegistrationFailed,

    #[error("internal scan error")]
    InternalError,

    #[error("scan feature unsupported")]
    FeatureUnsupported,

    #[error("out of hardware resources")]
    OutOfHardwareResources,

    #[error("unknown scan failure (code {0})")]
    Unknown(i32),
}

impl ScanFailure {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::AlreadyStarted,
            2 => Self::ApplicationRegistrationFailed,
            3 => Self::InternalError,
            4 => Self::FeatureUnsupported,
            5 => Self::OutOfHardwareResources,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::AlreadyStarted => 1,
            Self::ApplicationRegistrationFailed => 2,
            Self::InternalError => 3,
            Self::FeatureUnsupported => 4,
            Self::OutOfHardwareResources => 5,
            Self::Unknown(code) => *code,
        }
    }
}

impl From<ScanFailure> for BroadcastError {
    fn from(failure: ScanFailure) -> Self {
        BroadcastError::ScanFailed(failure.to_string())
    }
}
