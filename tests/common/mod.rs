//! Builders for signed test documents.
//!
//! Documents are written byte by byte, with a fixed width `/ByteRange`
//! placeholder that is filled in before the covered bytes are signed.

#![allow(dead_code)]

use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    hash::{hash, MessageDigest},
    nid::Nid,
    pkcs7::{Pkcs7, Pkcs7Flags},
    pkey::{PKey, Private},
    rsa::Rsa,
    sign::Signer,
    stack::Stack,
    x509::{X509Builder, X509NameBuilder, X509},
};

/// Bytes reserved in `/Contents` for the CMS structure.
pub const SIGNATURE_SPACE: usize = 8192;

const BYTE_RANGE_PLACEHOLDER: &str = "0 0000000000 0000000000 0000000000";

/// A signing key with its self-signed certificate.
pub struct TestSigner {
    pub key: PKey<Private>,
    pub cert: X509,
}

impl TestSigner {
    pub fn new(common_name: &str) -> Self {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, "Example Org").unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(0x1234).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        Self {
            key,
            cert: builder.build(),
        }
    }

    /// Lower-case hex SHA-256 of the certificate.
    pub fn fingerprint(&self) -> String {
        let der = self.cert.to_der().unwrap();
        hex::encode(hash(MessageDigest::sha256(), &der).unwrap())
    }

    /// Detached PKCS #7 signature, SHA-256 with signed attributes.
    pub fn sign_detached(&self, data: &[u8]) -> Vec<u8> {
        let certs: Stack<X509> = Stack::new().unwrap();
        Pkcs7::sign(
            &self.cert,
            &self.key,
            &certs,
            data,
            Pkcs7Flags::DETACHED | Pkcs7Flags::BINARY,
        )
        .unwrap()
        .to_der()
        .unwrap()
    }

    /// Signature over the SHA-1 of `data`, encapsulated in the structure, as
    /// used by the `adbe.pkcs7.sha1` sub-filter.
    pub fn sign_sha1_digest(&self, data: &[u8]) -> Vec<u8> {
        let digest = hash(MessageDigest::sha1(), data).unwrap();
        let certs: Stack<X509> = Stack::new().unwrap();
        Pkcs7::sign(&self.cert, &self.key, &certs, &digest, Pkcs7Flags::BINARY)
            .unwrap()
            .to_der()
            .unwrap()
    }

    /// Detached CMS signature using SHA-1 throughout.
    pub fn sign_detached_sha1(&self, data: &[u8]) -> Vec<u8> {
        signed_data(&[self.sha1_signer_info(data)], &[self])
    }

    /// Like [`Self::sign_detached_sha1`], followed by a second signer
    /// without signed attributes, whose SignerInfo sorts first in DER order.
    pub fn sign_detached_sha1_cosigned(&self, cosigner: &TestSigner, data: &[u8]) -> Vec<u8> {
        let mut signer = Signer::new(MessageDigest::sha1(), &cosigner.key).unwrap();
        signer.update(data).unwrap();
        let signature = signer.sign_to_vec().unwrap();
        let cosigner_info = seq(&[
            tlv(0x02, &[1]),
            cosigner.issuer_and_serial(),
            seq(&[OID_SHA1.to_vec(), NULL.to_vec()]),
            seq(&[OID_RSA_ENCRYPTION.to_vec(), NULL.to_vec()]),
            tlv(0x04, &signature),
        ]);

        let primary_info = self.sha1_signer_info(data);
        assert!(cosigner_info < primary_info);
        signed_data(&[primary_info, cosigner_info], &[self, cosigner])
    }

    fn sha1_signer_info(&self, data: &[u8]) -> Vec<u8> {
        let digest = hash(MessageDigest::sha1(), data).unwrap();

        // Attributes in DER order.
        let attributes = [
            seq(&[OID_CONTENT_TYPE.to_vec(), tlv(0x31, OID_DATA)]),
            seq(&[
                OID_SIGNING_TIME.to_vec(),
                tlv(0x31, &tlv(0x17, b"240315103000Z")),
            ]),
            seq(&[OID_MESSAGE_DIGEST.to_vec(), tlv(0x31, &tlv(0x04, &digest))]),
        ]
        .concat();

        let mut signer = Signer::new(MessageDigest::sha1(), &self.key).unwrap();
        signer.update(&tlv(0x31, &attributes)).unwrap();
        let signature = signer.sign_to_vec().unwrap();

        seq(&[
            tlv(0x02, &[1]),
            self.issuer_and_serial(),
            seq(&[OID_SHA1.to_vec(), NULL.to_vec()]),
            tlv(0xa0, &attributes),
            seq(&[OID_RSA_ENCRYPTION.to_vec(), NULL.to_vec()]),
            tlv(0x04, &signature),
        ])
    }

    fn issuer_and_serial(&self) -> Vec<u8> {
        let issuer = self.cert.issuer_name().to_der().unwrap();
        let serial = self.cert.serial_number().to_bn().unwrap().to_vec();
        seq(&[issuer, tlv(0x02, &serial)])
    }
}

/// ContentInfo{SignedData} with detached content, SHA-1 as digest algorithm.
fn signed_data(signer_infos: &[Vec<u8>], signers: &[&TestSigner]) -> Vec<u8> {
    let certificates: Vec<Vec<u8>> = signers
        .iter()
        .map(|signer| signer.cert.to_der().unwrap())
        .collect();
    let signed_data = seq(&[
        tlv(0x02, &[1]),
        tlv(0x31, &seq(&[OID_SHA1.to_vec(), NULL.to_vec()])),
        seq(&[OID_DATA.to_vec()]),
        tlv(0xa0, &certificates.concat()),
        tlv(0x31, &signer_infos.concat()),
    ]);
    seq(&[OID_SIGNED_DATA.to_vec(), tlv(0xa0, &signed_data)])
}

const OID_SHA1: &[u8] = &[0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a];
const OID_RSA_ENCRYPTION: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01,
];
const OID_DATA: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01,
];
const OID_SIGNED_DATA: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02,
];
const OID_CONTENT_TYPE: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x03,
];
const OID_MESSAGE_DIGEST: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x04,
];
const OID_SIGNING_TIME: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x05,
];
const NULL: &[u8] = &[0x05, 0x00];

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes: Vec<u8> = len
            .to_be_bytes()
            .into_iter()
            .skip_while(|&b| b == 0)
            .collect();
        out.push(0x80 | bytes.len() as u8);
        out.extend(bytes);
    }
    out.extend_from_slice(content);
    out
}

fn seq(parts: &[Vec<u8>]) -> Vec<u8> {
    tlv(0x30, &parts.concat())
}

/// Writes the objects of one revision, followed by its xref section and
/// trailer.
pub struct PdfWriter {
    bytes: Vec<u8>,
    offsets: Vec<(u32, usize)>,
}

impl PdfWriter {
    pub fn new() -> Self {
        Self {
            bytes: b"%PDF-1.7\n".to_vec(),
            offsets: Vec::new(),
        }
    }

    /// Starts an incremental update of `previous`.
    pub fn update(previous: Vec<u8>) -> Self {
        Self {
            bytes: previous,
            offsets: Vec::new(),
        }
    }

    /// Writes an object, returning its offset.
    pub fn object(&mut self, id: u32, body: &str) -> usize {
        let offset = self.bytes.len();
        self.offsets.push((id, offset));
        self.bytes
            .extend_from_slice(format!("{id} 0 obj\n{body}\nendobj\n").as_bytes());
        offset
    }

    pub fn finish(mut self, size: u32, prev: Option<usize>) -> Vec<u8> {
        let xref_offset = self.bytes.len();

        let mut entries: Vec<(u32, String)> = self
            .offsets
            .iter()
            .map(|&(id, offset)| (id, format!("{offset:010} 00000 n \n")))
            .collect();
        if prev.is_none() {
            entries.push((0, "0000000000 65535 f \n".to_owned()));
        }
        entries.sort();

        let mut xref = String::from("xref\n");
        let mut i = 0;
        while i < entries.len() {
            let start = i;
            while i + 1 < entries.len() && entries[i + 1].0 == entries[i].0 + 1 {
                i += 1;
            }
            i += 1;
            xref += &format!("{} {}\n", entries[start].0, i - start);
            for (_, entry) in &entries[start..i] {
                xref += entry;
            }
        }

        let prev = prev.map(|p| format!(" /Prev {p}")).unwrap_or_default();
        xref += &format!(
            "trailer\n<< /Size {size} /Root 1 0 R{prev} >>\nstartxref\n{xref_offset}\n%%EOF\n"
        );
        self.bytes.extend_from_slice(xref.as_bytes());
        self.bytes
    }
}

fn signature_field(name: &str, value: &str) -> String {
    format!(
        "<< /FT /Sig /Type /Annot /Subtype /Widget /Rect [0 0 0 0] /F 132 /T ({name}) /V {value} >>"
    )
}

fn signature_dictionary(sub_filter: &str) -> String {
    format!(
        "<< /Type /Sig /Filter /Adobe.PPKLite /SubFilter /{sub_filter} \
         /M (D:20240315103000+00'00') /ByteRange [{BYTE_RANGE_PLACEHOLDER}] /Contents <{}> >>",
        "0".repeat(SIGNATURE_SPACE * 2)
    )
}

fn first_revision(acro_form: &str) -> PdfWriter {
    let mut pdf = PdfWriter::new();
    pdf.object(1, &format!("<< /Type /Catalog /Pages 2 0 R{acro_form} >>"));
    pdf.object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
    pdf.object(
        3,
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R >>",
    );
    let content = "BT /F1 12 Tf 72 712 Td (Hello, signed world) Tj ET";
    pdf.object(
        4,
        &format!(
            "<< /Length {} >>\nstream\n{content}\nendstream",
            content.len()
        ),
    );
    pdf
}

/// A valid document without any form.
pub fn unsigned_pdf() -> Vec<u8> {
    first_revision("").finish(5, None)
}

/// A document with an empty signature field.
pub fn unsigned_field_pdf() -> Vec<u8> {
    let mut pdf = first_revision(" /AcroForm << /Fields [5 0 R] >>");
    pdf.object(
        5,
        "<< /FT /Sig /Type /Annot /Subtype /Widget /Rect [0 0 0 0] /T (Signature1) >>",
    );
    pdf.finish(6, None)
}

/// A document whose only signature field, left empty, sits below `depth`
/// levels of nested fields.
pub fn deeply_nested_field_pdf(depth: u32) -> Vec<u8> {
    let mut pdf = first_revision(" /AcroForm << /Fields [5 0 R] >>");
    for id in 5..5 + depth {
        pdf.object(id, &format!("<< /Kids [{} 0 R] >>", id + 1));
    }
    pdf.object(5 + depth, "<< /FT /Sig /T (Signature1) >>");
    pdf.finish(6 + depth, None)
}

/// A document signed once with a `adbe.pkcs7.detached` signature.
pub fn signed_pdf(sign: impl FnOnce(&[u8]) -> Vec<u8>) -> Vec<u8> {
    signed_pdf_with("adbe.pkcs7.detached", sign)
}

pub fn signed_pdf_with(sub_filter: &str, sign: impl FnOnce(&[u8]) -> Vec<u8>) -> Vec<u8> {
    let mut pdf = first_revision(" /AcroForm << /Fields [5 0 R] /SigFlags 3 >>");
    pdf.object(5, &signature_field("Signature1", "6 0 R"));
    let signature_offset = pdf.object(6, &signature_dictionary(sub_filter));
    let mut bytes = pdf.finish(7, None);
    sign_in_place(&mut bytes, signature_offset, sign);
    bytes
}

/// Appends an incremental update adding a second signature, covering the
/// whole file.
pub fn add_signature(previous: Vec<u8>, sign: impl FnOnce(&[u8]) -> Vec<u8>) -> Vec<u8> {
    let (prev, size) = trailer_info(&previous);
    let (field, value) = (size, size + 1);

    let mut pdf = PdfWriter::update(previous);
    pdf.object(
        1,
        &format!(
            "<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [5 0 R {field} 0 R] /SigFlags 3 >> >>"
        ),
    );
    pdf.object(field, &signature_field("Signature2", &format!("{value} 0 R")));
    let signature_offset = pdf.object(value, &signature_dictionary("adbe.pkcs7.detached"));
    let mut bytes = pdf.finish(size + 2, Some(prev));
    sign_in_place(&mut bytes, signature_offset, sign);
    bytes
}

/// Appends an incremental update adding a second signature field whose
/// value is `value`, written as is.
pub fn add_signature_field(previous: Vec<u8>, value: &str) -> Vec<u8> {
    let (prev, size) = trailer_info(&previous);

    let mut pdf = PdfWriter::update(previous);
    pdf.object(
        1,
        &format!(
            "<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [5 0 R {size} 0 R] /SigFlags 3 >> >>"
        ),
    );
    pdf.object(size, &signature_field("Signature2", value));
    pdf.finish(size + 1, Some(prev))
}

/// Appends an incremental update holding a string object with `text`.
pub fn append_update(previous: Vec<u8>, text: &str) -> Vec<u8> {
    let (prev, size) = trailer_info(&previous);
    let mut pdf = PdfWriter::update(previous);
    pdf.object(size, &format!("({text})"));
    pdf.finish(size + 1, Some(prev))
}

/// Offset of the first byte of `needle` at or after `from`.
pub fn find(haystack: &[u8], needle: &[u8], from: usize) -> usize {
    from + haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .expect("needle not found")
}

/// Fills the byte range of the signature dictionary written at
/// `signature_offset`, then signs the covered bytes.
fn sign_in_place(
    bytes: &mut Vec<u8>,
    signature_offset: usize,
    sign: impl FnOnce(&[u8]) -> Vec<u8>,
) {
    let range_start = find(bytes, b"/ByteRange [", signature_offset) + "/ByteRange [".len();
    let gap_start = find(bytes, b"/Contents <", signature_offset) + "/Contents ".len();
    let gap_end = find(bytes, b">", gap_start) + 1;

    let range = format!(
        "0 {gap_start:010} {gap_end:010} {:010}",
        bytes.len() - gap_end
    );
    assert_eq!(range.len(), BYTE_RANGE_PLACEHOLDER.len());
    bytes[range_start..range_start + range.len()].copy_from_slice(range.as_bytes());

    let mut covered = bytes[..gap_start].to_vec();
    covered.extend_from_slice(&bytes[gap_end..]);
    let signature = hex::encode(sign(&covered));
    assert!(signature.len() <= gap_end - gap_start - 2);
    bytes[gap_start + 1..gap_start + 1 + signature.len()].copy_from_slice(signature.as_bytes());
}

/// The `startxref` offset and the `/Size` of the last revision.
fn trailer_info(pdf: &[u8]) -> (usize, u32) {
    let text = String::from_utf8_lossy(pdf);
    (
        number_after(&text, "startxref\n").parse().unwrap(),
        number_after(&text, "/Size ").parse().unwrap(),
    )
}

fn number_after(text: &str, marker: &str) -> String {
    let start = text.rfind(marker).unwrap() + marker.len();
    text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect()
}
