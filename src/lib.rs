#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

mod ber;
pub mod cms;
pub mod config;
pub mod dispatch;
pub mod document;
pub mod locate;
pub mod server;
pub mod trust;
pub mod verdict;
pub mod verify;

use der::asn1::ObjectIdentifier;
use thiserror::Error;

pub use dispatch::Dispatcher;
pub use document::{ParseError, PdfDocument};
pub use locate::{locate, ByteRange, Coverage, EmbeddedSignature};
pub use trust::{SigningCertificate, TrustList};
pub use verdict::{DocumentVerdict, SignatureVerdict};
pub use verify::{OpenSslVerifier, SignatureStatus, SignatureVerifier};

/// Failure to verify one embedded signature.
///
/// These never abort the verification of the whole document: each one ends up
/// in the `error` field of the verdict of the signature that caused it.
#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("malformed signature dictionary: {0}")]
    Dictionary(#[from] lopdf::Error),
    #[error("invalid signature object")]
    InvalidSignatureObject,
    #[error("invalid signature range")]
    InvalidRange,
    #[error("signature coverage skips over wrong sections of the document")]
    InvalidCoverage,
    #[error("unsupported signature sub-filter {0}")]
    UnsupportedSubFilter(String),
    #[error("invalid BER encoding: {0}")]
    Ber(&'static str),
    #[error("invalid CMS structure: {0}")]
    Cms(#[from] der::Error),
    #[error("signature is not a CMS SignedData structure")]
    NotSignedData,
    #[error("signature has no signer info")]
    NoSignerInfo,
    #[error("signer certificate not found")]
    SignerCertificateNotFound,
    #[error("signed attributes have no message digest")]
    MissingMessageDigest,
    #[error("signature has no encapsulated content")]
    MissingEncapsulatedContent,
    #[error("unsupported digest algorithm {0}")]
    UnsupportedDigest(ObjectIdentifier),
    #[error("unsupported signature algorithm {0}")]
    UnsupportedSignatureAlgorithm(ObjectIdentifier),
    #[error("cryptographic error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
}

/// Runs the whole verification pipeline over one PDF document.
///
/// Never fails: document-level problems become the verdict's `error`, and
/// problems with a single signature become that signature's `error`.
pub fn verify_document(pdf_bytes: &[u8], trust_list: &TrustList) -> DocumentVerdict {
    verify_document_with(pdf_bytes, trust_list, &OpenSslVerifier)
}

/// Same as [`verify_document`], with an explicit cryptographic backend.
pub fn verify_document_with(
    pdf_bytes: &[u8],
    trust_list: &TrustList,
    verifier: &dyn SignatureVerifier,
) -> DocumentVerdict {
    let document = match PdfDocument::parse(pdf_bytes) {
        Ok(document) => document,
        Err(e) => return DocumentVerdict::corrupted(&e),
    };

    let signatures = match locate(&document) {
        Ok(signatures) => signatures,
        Err(e) => return DocumentVerdict::corrupted(&e),
    };
    if signatures.is_empty() {
        return DocumentVerdict::unsigned();
    }

    let verdicts = signatures
        .iter()
        .map(|signature| match verify::verify_signature(signature, verifier) {
            Ok(status) => {
                let trusted = trust_list.is_trusted(&status.certificate);
                SignatureVerdict::verified(signature.index, status, trusted)
            }
            Err(e) => {
                log::debug!("signature {} failed to validate: {e}", signature.index);
                SignatureVerdict::failed(signature.index, &e)
            }
        })
        .collect();

    DocumentVerdict::signed(verdicts)
}
