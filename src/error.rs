//! API Error Envelope
//!
//! Client-facing errors carry a stable `<PREFIX>.<N>` code identifying the
//! subsystem and failure. Clients derive UX from swap status events; the
//! codes only disambiguate rejected requests.

use serde::Serialize;

use crate::musig::MusigError;
use crate::store::StorageError;
use crate::swap::reverse::ReverseError;
use crate::swap::submarine::SubmarineError;

/// Wire format of a failed request
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

/// A client-facing error with HTTP status and subsystem code
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    pub code: String,
}

impl ApiError {
    pub fn new(status: u16, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: code.to_string(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(404, "SWAP.404", what.into())
    }

    pub fn bad_request(code: &str, message: impl Into<String>) -> Self {
        Self::new(400, code, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(500, "SERVER.1", message)
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.message.clone(),
            code: self.code.clone(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl From<SubmarineError> for ApiError {
    fn from(err: SubmarineError) -> Self {
        let message = err.to_string();
        match err {
            SubmarineError::InvalidInvoice(_) => Self::bad_request("SWAP.1", message),
            SubmarineError::InvoiceExpired => Self::bad_request("SWAP.2", message),
            SubmarineError::AmountOutOfBounds(_) => Self::bad_request("SWAP.3", message),
            SubmarineError::UnknownPair(_) => Self::bad_request("SWAP.4", message),
            SubmarineError::NoClaimPending(_) => Self::bad_request("SWAP.5", message),
            SubmarineError::SwapNotFound(_) => Self::not_found(message),
            SubmarineError::Musig(inner) => inner.into(),
            _ => Self::internal(message),
        }
    }
}

impl From<ReverseError> for ApiError {
    fn from(err: ReverseError) -> Self {
        let message = err.to_string();
        match err {
            ReverseError::InvalidPreimageHash => Self::bad_request("REVERSE.1", message),
            ReverseError::AmountMissing => Self::bad_request("REVERSE.2", message),
            ReverseError::AmountOutOfBounds(_) => Self::bad_request("REVERSE.3", message),
            ReverseError::UnknownPair(_) => Self::bad_request("REVERSE.4", message),
            ReverseError::Hints(inner) => inner.into(),
            ReverseError::SwapNotFound(_) => Self::not_found(message),
            ReverseError::Musig(inner) => inner.into(),
            _ => Self::internal(message),
        }
    }
}

impl From<crate::hints::HintsError> for ApiError {
    fn from(err: crate::hints::HintsError) -> Self {
        let message = err.to_string();
        match err {
            crate::hints::HintsError::InvalidAddressSignature => {
                Self::bad_request("HINTS.1", message)
            }
            crate::hints::HintsError::InvalidDescriptionHash(_) => {
                Self::bad_request("HINTS.2", message)
            }
            _ => Self::bad_request("HINTS.3", message),
        }
    }
}

impl From<MusigError> for ApiError {
    fn from(err: MusigError) -> Self {
        let message = err.to_string();
        match err {
            MusigError::NotEligibleForRefund => Self::bad_request("MUSIG.1", message),
            MusigError::PreimageMismatch => Self::bad_request("MUSIG.2", message),
            MusigError::InvoiceNotHeld => Self::bad_request("MUSIG.3", message),
            MusigError::InvalidNonce(_) => Self::bad_request("MUSIG.4", message),
            MusigError::InvalidPartialSignature(_) => Self::bad_request("MUSIG.5", message),
            MusigError::InvalidInput(_) => Self::bad_request("MUSIG.6", message),
            // The client supplies the transaction being signed
            MusigError::Htlc(_) => Self::bad_request("MUSIG.7", message),
            MusigError::SwapNotFound(_) => Self::not_found(message),
            _ => Self::internal(message),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::NotFound(what) => Self::not_found(what.clone()),
            _ => Self::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err: ApiError = MusigError::NotEligibleForRefund.into();
        assert_eq!(err.status, 400);
        assert_eq!(err.code, "MUSIG.1");

        let err: ApiError = crate::hints::HintsError::InvalidAddressSignature.into();
        assert_eq!(err.code, "HINTS.1");

        let err: ApiError = SubmarineError::SwapNotFound("swap_x".to_string()).into();
        assert_eq!(err.status, 404);
    }

    #[test]
    fn test_body_shape() {
        let err = ApiError::bad_request("SWAP.1", "bad invoice");
        let body = serde_json::to_value(err.body()).unwrap();
        assert_eq!(body["error"], "bad invoice");
        assert_eq!(body["code"], "SWAP.1");
    }
}
