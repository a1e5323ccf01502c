//! The JSON report returned for each verified document.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{verify::SignatureStatus, SignatureError};

pub const NO_SIGNATURES: &str = "PDF file does not contain any signatures";

/// The verdict on one embedded signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureVerdict {
    pub signature_index: usize,
    pub is_trusted_cert: bool,
    pub signing_cert_subject: Option<String>,
    pub valid: bool,
    pub intact: bool,
    /// RFC 3339 time of signing, if known.
    pub signing_time: Option<String>,
    /// One of the `SignatureCoverageLevel.*` names.
    pub coverage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SignatureVerdict {
    pub fn verified(index: usize, status: SignatureStatus, trusted: bool) -> Self {
        Self {
            signature_index: index,
            is_trusted_cert: trusted,
            signing_cert_subject: Some(status.certificate.subject().to_owned()),
            valid: status.valid,
            intact: status.intact,
            signing_time: status.signing_time.map(|time| time.to_rfc3339()),
            coverage: Some(status.coverage.to_string()),
            error: None,
        }
    }

    /// A signature that could not be checked at all.
    pub fn failed(index: usize, error: &SignatureError) -> Self {
        Self {
            signature_index: index,
            is_trusted_cert: false,
            signing_cert_subject: None,
            valid: false,
            intact: false,
            signing_time: None,
            coverage: None,
            error: Some(format!("Failed to validate signature {index}: {error}")),
        }
    }
}

/// The verdict on a whole document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVerdict {
    pub error: Option<String>,
    pub has_signature: bool,
    pub signature_count: usize,
    pub signatures: Vec<SignatureVerdict>,
}

impl DocumentVerdict {
    pub fn signed(signatures: Vec<SignatureVerdict>) -> Self {
        Self {
            error: None,
            has_signature: !signatures.is_empty(),
            signature_count: signatures.len(),
            signatures,
        }
    }

    pub fn unsigned() -> Self {
        Self::failure(NO_SIGNATURES)
    }

    /// The bytes could not be parsed as a PDF.
    pub fn corrupted(detail: &impl Display) -> Self {
        Self::failure(format!("PDF file is corrupted or invalid: {detail}"))
    }

    /// Verification crashed or was refused.
    pub fn unexpected(detail: &impl Display) -> Self {
        Self::failure(format!(
            "Unexpected error during PDF signature validation: {detail}"
        ))
    }

    /// A verdict carrying only an error.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            has_signature: false,
            signature_count: 0,
            signatures: Vec::new(),
        }
    }
}
