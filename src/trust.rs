//! Trusted certificate fingerprints.
//!
//! Trust is decided by exact match of the signing certificate's SHA-256
//! fingerprint against an operator-supplied list. There is no chain
//! building and no revocation checking.

use std::{collections::HashSet, io, path::Path};

use openssl::{
    hash::{hash, MessageDigest},
    nid::Nid,
    x509::{X509NameRef, X509},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrustListError {
    #[error("can not read trust list {path}: {source}")]
    Io { path: String, source: io::Error },
}

/// The certificate that produced a signature.
#[derive(Debug, Clone)]
pub struct SigningCertificate {
    der: Vec<u8>,
    subject: String,
    fingerprint: String,
}

impl SigningCertificate {
    pub fn from_der(der: Vec<u8>) -> Result<Self, openssl::error::ErrorStack> {
        let cert = X509::from_der(&der)?;
        let subject = human_friendly_name(cert.subject_name());
        let fingerprint = hex::encode(hash(MessageDigest::sha256(), &der)?);
        Ok(Self {
            der,
            subject,
            fingerprint,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// The subject name, as "Common Name: ..., Organization: ...".
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Lower-case hex SHA-256 of the DER encoding.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Renders a distinguished name most specific attribute first, with
/// readable attribute labels.
fn human_friendly_name(name: &X509NameRef) -> String {
    let entries: Vec<String> = name
        .entries()
        .map(|entry| {
            let nid = entry.object().nid();
            let label = match nid {
                Nid::COMMONNAME => "Common Name",
                Nid::ORGANIZATIONNAME => "Organization",
                Nid::ORGANIZATIONALUNITNAME => "Organizational Unit",
                Nid::COUNTRYNAME => "Country",
                Nid::STATEORPROVINCENAME => "State/Province",
                Nid::LOCALITYNAME => "Locality",
                Nid::PKCS9_EMAILADDRESS => "Email Address",
                Nid::SERIALNUMBER => "Serial Number",
                Nid::GIVENNAME => "Given Name",
                Nid::SURNAME => "Surname",
                Nid::TITLE => "Title",
                _ => nid.long_name().unwrap_or("Unknown"),
            };
            let value = match entry.data().as_utf8() {
                Ok(value) => value.to_string(),
                Err(_) => String::from_utf8_lossy(entry.data().as_slice()).into_owned(),
            };
            format!("{label}: {value}")
        })
        .collect();

    entries.into_iter().rev().collect::<Vec<_>>().join(", ")
}

/// The set of trusted certificate fingerprints.
///
/// Built once at startup and shared read-only between all verifications.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustList {
    fingerprints: HashSet<String>,
}

impl TrustList {
    /// A trust list that trusts nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses the trust list file format: one hex fingerprint per line, in
    /// any case, optionally colon separated. Blank lines and lines starting
    /// with `#` are ignored.
    pub fn parse(text: &str) -> Self {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect()
    }

    /// Loads a trust list file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrustListError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TrustListError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let list = Self::parse(&text);
        log::info!(
            "Loaded {} trusted SHA256 certificates from {}",
            list.len(),
            path.display()
        );
        Ok(list)
    }

    /// Loads the trust list file if one is configured.
    ///
    /// Both a missing setting and a missing file give an empty list, so that
    /// the service can still report on signatures.
    pub fn load_optional(path: Option<&Path>) -> Result<Self, TrustListError> {
        let Some(path) = path else {
            log::warn!(
                "No trusted certificate list provided, no signing certificate will be trusted"
            );
            return Ok(Self::empty());
        };
        match Self::load(path) {
            Err(TrustListError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                log::warn!("Trusted SHA256 list file not found: {}", path.display());
                Ok(Self::empty())
            }
            result => result,
        }
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Tests a hex fingerprint, in any case, against the list.
    pub fn contains(&self, fingerprint: &str) -> bool {
        self.fingerprints.contains(&normalize(fingerprint))
    }

    pub fn is_trusted(&self, certificate: &SigningCertificate) -> bool {
        self.contains(certificate.fingerprint())
    }
}

impl<S: AsRef<str>> FromIterator<S> for TrustList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let fingerprints = iter
            .into_iter()
            .map(|entry| {
                let fingerprint = normalize(entry.as_ref());
                if fingerprint.len() != 64 || !fingerprint.bytes().all(|b| b.is_ascii_hexdigit()) {
                    log::warn!("trust list entry {fingerprint:?} is not a SHA-256 fingerprint");
                }
                fingerprint
            })
            .collect();
        Self { fingerprints }
    }
}

fn normalize(fingerprint: &str) -> String {
    fingerprint
        .trim()
        .chars()
        .filter(|&c| c != ':')
        .collect::<String>()
        .to_lowercase()
}
