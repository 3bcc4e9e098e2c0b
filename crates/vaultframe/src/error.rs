//! Error taxonomy shared by the host page and the secure frames.
//!
//! Errors cross the bus in their serialized form, so a failure raised inside
//! a secure frame reaches the host as the same variant it started as.

use serde::{Deserialize, Serialize};

/// Every failure the SDK can surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SdkError {
    // ---- validation ---------------------------------------------------------
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid element type: {0}")]
    InvalidElementType(String),

    #[error("element already exists: {0}")]
    DuplicateElement(String),

    #[error("invalid element options: {0}")]
    InvalidElementOptions(String),

    #[error("provided element selector is not valid or not found: {0}")]
    InvalidSelector(String),

    #[error("elements are not mounted: {0}")]
    ElementsNotMounted(String),

    #[error("reveal element must have a token: {0}")]
    ElementMustHaveToken(String),

    #[error("invalid event listener: {0}")]
    InvalidEventListener(String),

    #[error("sensitivity of {0} cannot be relaxed once set")]
    SensitivityDowngrade(String),

    #[error("provide complete and valid inputs: {0}")]
    IncompleteInputs(String),

    #[error("invalid element id in SOAP XML: {0}")]
    InvalidElementIdInSoapXml(String),

    #[error("element referenced more than once in SOAP response XML: {0}")]
    DuplicateElementInSoapXml(String),

    // ---- response mapping ---------------------------------------------------
    #[error("path not found in connection response: {0}")]
    ResponsePathNotFound(String),

    #[error("malformed XML: {0}")]
    Xml(String),

    // ---- protocol -----------------------------------------------------------
    #[error("frame not found: {0}")]
    FrameNotFound(String),

    #[error("client connection not established")]
    ClientNotInitialized,

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("no reply for {0}: channel closed")]
    ChannelClosed(String),

    #[error("remote error [{code}]: {description}")]
    Remote { code: u16, description: String },

    #[error("bearer token unavailable: {0}")]
    BearerToken(String),

    // ---- transport ----------------------------------------------------------
    #[error("vault request failed [{http_code}]: {message}")]
    Transport { http_code: u16, message: String },
}

/// The `{code, description}` object handed to callers and embedded in
/// per-record error lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub description: String,
}

impl SdkError {
    /// Numeric code for the error class.
    pub fn code(&self) -> u16 {
        match self {
            SdkError::InvalidInput(_)
            | SdkError::InvalidConfig(_)
            | SdkError::InvalidElementType(_)
            | SdkError::DuplicateElement(_)
            | SdkError::InvalidElementOptions(_)
            | SdkError::InvalidSelector(_)
            | SdkError::ElementsNotMounted(_)
            | SdkError::ElementMustHaveToken(_)
            | SdkError::InvalidEventListener(_)
            | SdkError::SensitivityDowngrade(_)
            | SdkError::IncompleteInputs(_)
            | SdkError::InvalidElementIdInSoapXml(_)
            | SdkError::DuplicateElementInSoapXml(_)
            | SdkError::Xml(_) => 400,
            SdkError::BearerToken(_) => 401,
            SdkError::FrameNotFound(_) | SdkError::ResponsePathNotFound(_) => 404,
            SdkError::Timeout(_) => 408,
            SdkError::ClientNotInitialized | SdkError::ChannelClosed(_) => 503,
            SdkError::Remote { code, .. } => *code,
            SdkError::Transport { http_code, .. } => *http_code,
        }
    }

    /// Human readable description, identical to the `Display` output.
    pub fn description(&self) -> String {
        self.to_string()
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            description: self.description(),
        }
    }

    /// Whether a retry could succeed without the caller changing anything.
    ///
    /// Only transport failures qualify; validation and response mapping
    /// failures are deterministic.
    pub fn is_transient(&self) -> bool {
        match self {
            SdkError::Transport { http_code, .. } => {
                *http_code == 0 || *http_code == 429 || *http_code >= 500
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(e: serde_json::Error) -> Self {
        SdkError::InvalidInput(e.to_string())
    }
}

impl From<ErrorBody> for SdkError {
    fn from(body: ErrorBody) -> Self {
        SdkError::Remote {
            code: body.code,
            description: body.description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_by_class() {
        assert_eq!(SdkError::InvalidInput("x".into()).code(), 400);
        assert_eq!(SdkError::FrameNotFound("f".into()).code(), 404);
        assert_eq!(SdkError::Timeout("ready".into()).code(), 408);
        assert_eq!(
            SdkError::Transport {
                http_code: 502,
                message: "bad gateway".into()
            }
            .code(),
            502
        );
    }

    #[test]
    fn test_error_survives_the_wire() {
        let err = SdkError::ElementsNotMounted("cvv".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "elements_not_mounted");

        let back: SdkError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);

        let transport = SdkError::Transport {
            http_code: 404,
            message: "missing".into(),
        };
        let back: SdkError =
            serde_json::from_value(serde_json::to_value(&transport).unwrap()).unwrap();
        assert_eq!(back, transport);
    }

    #[test]
    fn test_transient_classification() {
        let flaky = SdkError::Transport {
            http_code: 503,
            message: "unavailable".into(),
        };
        assert!(flaky.is_transient());
        assert!(!SdkError::InvalidInput("records".into()).is_transient());
        assert!(!SdkError::ResponsePathNotFound("a.b".into()).is_transient());
    }
}
