//! Decoding of the CMS (PKCS #7) structure stored in a signature's
//! `/Contents`.
//!
//! Only the parts needed to check the signature are extracted: the signer's
//! certificate, its algorithms, the signed attributes and the signature
//! value. No certificate chain is built.

use chrono::{DateTime, Utc};
use cms::{
    cert::{CertificateChoices, IssuerAndSerialNumber},
    content_info::ContentInfo,
    signed_data::{SignedData, SignerIdentifier, SignerInfo},
};
use der::{
    asn1::{ObjectIdentifier, OctetString},
    Any, Decode, Encode,
};
use x509_cert::{ext::pkix::SubjectKeyIdentifier, time::Time, Certificate};

use crate::{ber, SignatureError};

const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
const ID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
const ID_SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");
const ID_CE_SUBJECT_KEY_IDENTIFIER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.14");

/// Everything needed to check one signer of a CMS SignedData.
#[derive(Debug, Clone)]
pub struct SignerDetails {
    /// DER encoding of the signer's certificate.
    pub certificate_der: Vec<u8>,
    pub digest_algorithm: ObjectIdentifier,
    pub signature_algorithm: ObjectIdentifier,
    /// DER encoding of the signed attributes, as a SET OF Attribute. This is
    /// what the signature value covers when present.
    pub signed_attributes: Option<Vec<u8>>,
    /// The `messageDigest` signed attribute.
    pub message_digest: Option<Vec<u8>>,
    /// The `signingTime` signed attribute.
    pub signing_time: Option<DateTime<Utc>>,
    pub signature: Vec<u8>,
    /// Content carried inside the structure, for non-detached signatures.
    pub encapsulated_content: Option<Vec<u8>>,
}

/// Decodes the first signer of a CMS SignedData, as stored in `/Contents`.
pub fn decode_signer(contents: &[u8]) -> Result<SignerDetails, SignatureError> {
    let der = ber::first_element_as_der(contents)?;
    let content_info = ContentInfo::from_der(&der)?;
    if content_info.content_type != ID_SIGNED_DATA {
        return Err(SignatureError::NotSignedData);
    }
    let signed_data = SignedData::from_der(&content_info.content.to_der()?)?;

    if signed_data.signer_infos.0.is_empty() {
        return Err(SignatureError::NoSignerInfo);
    }
    // The decoded set is in DER order, so the first signer is taken from the
    // encoding as it was written.
    let raw_signer = first_raw_signer_info(&der)?;
    let signer = SignerInfo::from_der(raw_signer.raw)?;
    let certificate = find_signer_certificate(&signed_data, &signer.sid)
        .ok_or(SignatureError::SignerCertificateNotFound)?;

    let encapsulated_content = match &signed_data.encap_content_info.econtent {
        Some(econtent) => Some(decode_any::<OctetString>(econtent)?.as_bytes().to_vec()),
        None => None,
    };

    let (signed_attributes, message_digest, signing_time) = match &signer.signed_attrs {
        Some(_) => (
            raw_signed_attributes(raw_signer)?,
            signed_attribute::<OctetString>(&signer, ID_MESSAGE_DIGEST)?
                .map(|digest| digest.as_bytes().to_vec()),
            signed_attribute::<Time>(&signer, ID_SIGNING_TIME)?.and_then(time_to_utc),
        ),
        None => (None, None, None),
    };

    Ok(SignerDetails {
        certificate_der: certificate.to_der()?,
        digest_algorithm: signer.digest_alg.oid,
        signature_algorithm: signer.signature_algorithm.oid,
        signed_attributes,
        message_digest,
        signing_time,
        signature: signer.signature.as_bytes().to_vec(),
        encapsulated_content,
    })
}

/// The first SignerInfo of a ContentInfo{SignedData}, as encoded.
fn first_raw_signer_info(der: &[u8]) -> Result<ber::Element<'_>, SignatureError> {
    let malformed = || SignatureError::Ber("unexpected SignedData layout");

    let content_info = ber::read_element(der)?;
    let explicit_content = ber::children(content_info.content)?
        .into_iter()
        .nth(1)
        .ok_or_else(malformed)?;
    let signed_data = ber::read_element(explicit_content.content)?;
    // signerInfos is the last field of SignedData.
    let signer_infos = ber::children(signed_data.content)?
        .pop()
        .ok_or_else(malformed)?;
    ber::read_element(signer_infos.content)
}

/// The signed attributes of a SignerInfo exactly as encoded, retagged from
/// `[0] IMPLICIT` to SET OF. The signature is computed over these bytes, so
/// they are not re-encoded.
fn raw_signed_attributes(
    signer_info: ber::Element<'_>,
) -> Result<Option<Vec<u8>>, SignatureError> {
    let attributes = ber::children(signer_info.content)?
        .into_iter()
        .find(|element| element.tag == 0xa0);
    Ok(attributes.map(|element| {
        let mut set = element.raw.to_vec();
        set[0] = 0x31;
        set
    }))
}

fn find_signer_certificate<'a>(
    signed_data: &'a SignedData,
    sid: &SignerIdentifier,
) -> Option<&'a Certificate> {
    let mut certificates = signed_data
        .certificates
        .iter()
        .flat_map(|set| set.0.iter())
        .filter_map(|choice| match choice {
            CertificateChoices::Certificate(cert) => Some(cert),
            _ => None,
        });

    match sid {
        SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer,
            serial_number,
        }) => certificates.find(|cert| {
            cert.tbs_certificate.issuer == *issuer
                && cert.tbs_certificate.serial_number == *serial_number
        }),
        SignerIdentifier::SubjectKeyIdentifier(ski) => {
            certificates.find(|cert| subject_key_identifier(cert).as_ref() == Some(ski))
        }
    }
}

fn subject_key_identifier(cert: &Certificate) -> Option<SubjectKeyIdentifier> {
    cert.tbs_certificate
        .extensions
        .iter()
        .flatten()
        .find(|ext| ext.extn_id == ID_CE_SUBJECT_KEY_IDENTIFIER)
        .and_then(|ext| SubjectKeyIdentifier::from_der(ext.extn_value.as_bytes()).ok())
}

/// Decodes the first value of the signed attribute `oid`, if present.
fn signed_attribute<T>(
    signer: &SignerInfo,
    oid: ObjectIdentifier,
) -> Result<Option<T>, SignatureError>
where
    T: for<'a> Decode<'a>,
{
    let value = signer
        .signed_attrs
        .iter()
        .flat_map(|attrs| attrs.iter())
        .find(|attr| attr.oid == oid)
        .and_then(|attr| attr.values.iter().next());

    value.map(decode_any::<T>).transpose()
}

fn decode_any<T>(value: &Any) -> Result<T, SignatureError>
where
    T: for<'a> Decode<'a>,
{
    Ok(T::from_der(&value.to_der()?)?)
}

fn time_to_utc(time: Time) -> Option<DateTime<Utc>> {
    let since_epoch = time.to_unix_duration();
    DateTime::from_timestamp(i64::try_from(since_epoch.as_secs()).ok()?, 0)
}
