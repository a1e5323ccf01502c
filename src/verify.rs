//! Cryptographic verification of one embedded signature.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use der::asn1::ObjectIdentifier;
use openssl::{
    hash::{Hasher, MessageDigest},
    rsa::Padding,
    sign::{RsaPssSaltlen, Verifier},
    x509::X509,
};
use regex::Regex;

use crate::{
    cms, locate::Coverage, trust::SigningCertificate, EmbeddedSignature, SignatureError,
};

/// Digest algorithms accepted in a signature. Weak ones are accepted too:
/// the age of an algorithm is not a verification failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        Some(match oid.to_string().as_str() {
            "1.2.840.113549.2.5" => Self::Md5,
            "1.3.14.3.2.26" => Self::Sha1,
            "2.16.840.1.101.3.4.2.4" => Self::Sha224,
            "2.16.840.1.101.3.4.2.1" => Self::Sha256,
            "2.16.840.1.101.3.4.2.2" => Self::Sha384,
            "2.16.840.1.101.3.4.2.3" => Self::Sha512,
            _ => return None,
        })
    }

    /// The digest named by a combined signature algorithm identifier, such
    /// as sha256WithRSAEncryption. Some signers put these in the digest
    /// algorithm field.
    pub fn implied_by_signature_oid(oid: &ObjectIdentifier) -> Option<Self> {
        Some(match oid.to_string().as_str() {
            "1.2.840.113549.1.1.4" => Self::Md5,
            "1.2.840.113549.1.1.5" | "1.2.840.10045.4.1" | "1.2.840.10040.4.3" => Self::Sha1,
            "1.2.840.113549.1.1.14" | "1.2.840.10045.4.3.1" | "2.16.840.1.101.3.4.3.1" => {
                Self::Sha224
            }
            "1.2.840.113549.1.1.11" | "1.2.840.10045.4.3.2" | "2.16.840.1.101.3.4.3.2" => {
                Self::Sha256
            }
            "1.2.840.113549.1.1.12" | "1.2.840.10045.4.3.3" => Self::Sha384,
            "1.2.840.113549.1.1.13" | "1.2.840.10045.4.3.4" => Self::Sha512,
            _ => return None,
        })
    }

    fn message_digest(self) -> MessageDigest {
        match self {
            Self::Md5 => MessageDigest::md5(),
            Self::Sha1 => MessageDigest::sha1(),
            Self::Sha224 => MessageDigest::sha224(),
            Self::Sha256 => MessageDigest::sha256(),
            Self::Sha384 => MessageDigest::sha384(),
            Self::Sha512 => MessageDigest::sha512(),
        }
    }
}

/// Public key signature schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// RSA with PKCS #1 v1.5 padding.
    Rsa,
    RsaPss,
    Ecdsa,
    Dsa,
    Ed25519,
}

impl SignatureScheme {
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        let oid = oid.to_string();
        let scheme = match oid.as_str() {
            "1.2.840.113549.1.1.10" => Self::RsaPss,
            "1.3.101.112" => Self::Ed25519,
            "1.2.840.10040.4.1" | "1.2.840.10040.4.3" => Self::Dsa,
            "2.16.840.1.101.3.4.3.1" | "2.16.840.1.101.3.4.3.2" => Self::Dsa,
            s if s.starts_with("1.2.840.113549.1.1.") => Self::Rsa,
            s if s == "1.2.840.10045.2.1" || s.starts_with("1.2.840.10045.4.") => Self::Ecdsa,
            _ => return None,
        };
        Some(scheme)
    }
}

/// The cryptographic primitives signature verification needs.
///
/// Data is passed as a list of slices, so that the two signed ranges of a
/// document never have to be copied into one buffer.
pub trait SignatureVerifier {
    fn digest(
        &self,
        algorithm: DigestAlgorithm,
        parts: &[&[u8]],
    ) -> Result<Vec<u8>, SignatureError>;

    /// Tells if `signature` is a signature of `data` by the key of the given
    /// certificate.
    ///
    /// A signature that simply does not match is `Ok(false)`; errors are for
    /// keys or certificates that can not be used at all.
    fn verify_signature(
        &self,
        certificate_der: &[u8],
        scheme: SignatureScheme,
        digest: DigestAlgorithm,
        data: &[&[u8]],
        signature: &[u8],
    ) -> Result<bool, SignatureError>;
}

/// [`SignatureVerifier`] backed by OpenSSL.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenSslVerifier;

impl SignatureVerifier for OpenSslVerifier {
    fn digest(
        &self,
        algorithm: DigestAlgorithm,
        parts: &[&[u8]],
    ) -> Result<Vec<u8>, SignatureError> {
        let mut hasher = Hasher::new(algorithm.message_digest())?;
        for part in parts {
            hasher.update(part)?;
        }
        Ok(hasher.finish()?.to_vec())
    }

    fn verify_signature(
        &self,
        certificate_der: &[u8],
        scheme: SignatureScheme,
        digest: DigestAlgorithm,
        data: &[&[u8]],
        signature: &[u8],
    ) -> Result<bool, SignatureError> {
        let public_key = X509::from_der(certificate_der)?.public_key()?;

        let verified = if scheme == SignatureScheme::Ed25519 {
            // EdDSA can't be streamed.
            let message = data.concat();
            Verifier::new_without_digest(&public_key)?.verify_oneshot(signature, &message)
        } else {
            let mut verifier = Verifier::new(digest.message_digest(), &public_key)?;
            if scheme == SignatureScheme::RsaPss {
                verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
                verifier.set_rsa_pss_saltlen(RsaPssSaltlen::MAXIMUM_LENGTH)?;
                verifier.set_rsa_mgf1_md(digest.message_digest())?;
            }
            for part in data {
                verifier.update(part)?;
            }
            verifier.verify(signature)
        };

        Ok(verified.unwrap_or_else(|e| {
            log::debug!("signature value rejected by openssl: {e}");
            false
        }))
    }
}

/// The outcome of checking one signature.
#[derive(Debug, Clone)]
pub struct SignatureStatus {
    /// The signed bytes are unchanged.
    pub intact: bool,
    /// The signature verifies against the certificate and the signed bytes
    /// are intact.
    pub valid: bool,
    pub certificate: SigningCertificate,
    pub signing_time: Option<DateTime<FixedOffset>>,
    pub coverage: Coverage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubFilter {
    /// The signed content is the covered bytes themselves.
    Detached,
    /// The signed content is the SHA-1 of the covered bytes, encapsulated in
    /// the CMS structure.
    Sha1,
}

impl SubFilter {
    fn from_name(name: Option<&[u8]>) -> Result<Self, SignatureError> {
        match name {
            None | Some(b"adbe.pkcs7.detached") | Some(b"ETSI.CAdES.detached") => {
                Ok(Self::Detached)
            }
            Some(b"adbe.pkcs7.sha1") => Ok(Self::Sha1),
            Some(other) => Err(SignatureError::UnsupportedSubFilter(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

/// Checks the integrity and the cryptographic validity of one signature.
///
/// Only the bytes inside the signature's byte range are read from the
/// document.
pub fn verify_signature(
    signature: &EmbeddedSignature,
    verifier: &dyn SignatureVerifier,
) -> Result<SignatureStatus, SignatureError> {
    let sub_filter = SubFilter::from_name(signature.sub_filter())?;
    let range = signature.byte_range()?;
    let pdf_bytes = signature.pdf_bytes();
    let covered = range.slices(pdf_bytes);

    let signer = cms::decode_signer(signature.contents()?)?;
    let certificate = SigningCertificate::from_der(signer.certificate_der)?;

    let scheme = SignatureScheme::from_oid(&signer.signature_algorithm)
        .ok_or(SignatureError::UnsupportedSignatureAlgorithm(signer.signature_algorithm))?;
    let digest = DigestAlgorithm::from_oid(&signer.digest_algorithm)
        .or_else(|| DigestAlgorithm::implied_by_signature_oid(&signer.digest_algorithm))
        .ok_or(SignatureError::UnsupportedDigest(signer.digest_algorithm))?;

    // What the CMS structure signs, and whether it matches the document.
    let (content, content_matches): (Vec<&[u8]>, bool) = match sub_filter {
        SubFilter::Detached => (covered.to_vec(), true),
        SubFilter::Sha1 => {
            let encapsulated = signer
                .encapsulated_content
                .as_deref()
                .ok_or(SignatureError::MissingEncapsulatedContent)?;
            let covered_digest = verifier.digest(DigestAlgorithm::Sha1, &covered)?;
            (vec![encapsulated], covered_digest == encapsulated)
        }
    };

    let (intact, valid) = match &signer.signed_attributes {
        Some(signed_attributes) => {
            let message_digest = signer
                .message_digest
                .as_deref()
                .ok_or(SignatureError::MissingMessageDigest)?;
            let intact =
                content_matches && verifier.digest(digest, &content)? == message_digest;
            let verified = verifier.verify_signature(
                certificate.der(),
                scheme,
                digest,
                &[signed_attributes.as_slice()],
                &signer.signature,
            )?;
            (intact, verified && intact)
        }
        None => {
            let verified = verifier.verify_signature(
                certificate.der(),
                scheme,
                digest,
                &content,
                &signer.signature,
            )?;
            let intact = content_matches && verified;
            (intact, intact)
        }
    };

    let signing_time = signer
        .signing_time
        .map(DateTime::<FixedOffset>::from)
        .or_else(|| signature.reported_time().and_then(parse_pdf_date));

    log::debug!(
        "signature {} over {range}: intact={intact} valid={valid}",
        signature.index
    );

    Ok(SignatureStatus {
        intact,
        valid,
        certificate,
        signing_time,
        coverage: range.coverage(pdf_bytes),
    })
}

lazy_static::lazy_static! {
    static ref PDF_DATE_REGEX: Regex = Regex::new(
        r"^(?:D:)?(\d{4})(\d{2})?(\d{2})?(\d{2})?(\d{2})?(\d{2})?(?:([Zz+\-])(?:(\d{2})'?(?:(\d{2})'?)?)?)?$"
    )
    .unwrap();
}

/// Parses a PDF date string, `D:YYYYMMDDHHmmSSOHH'mm'`, where everything
/// after the year is optional. A missing offset is taken as UTC.
pub fn parse_pdf_date(raw: &[u8]) -> Option<DateTime<FixedOffset>> {
    let text = std::str::from_utf8(raw).ok()?.trim();
    let captures = PDF_DATE_REGEX.captures(text)?;
    let field = |i: usize, default: u32| -> Option<u32> {
        match captures.get(i) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(default),
        }
    };

    let year = captures.get(1)?.as_str().parse().ok()?;
    let naive = NaiveDate::from_ymd_opt(year, field(2, 1)?, field(3, 1)?)?.and_hms_opt(
        field(4, 0)?,
        field(5, 0)?,
        field(6, 0)?,
    )?;

    let offset_seconds = match captures.get(7).map(|m| m.as_str()) {
        Some(sign @ ("+" | "-")) => {
            let seconds = (field(8, 0)? * 3600 + field(9, 0)? * 60) as i32;
            if sign == "-" {
                -seconds
            } else {
                seconds
            }
        }
        _ => 0,
    };

    FixedOffset::east_opt(offset_seconds)?
        .from_local_datetime(&naive)
        .single()
}
