//! Enumeration of the signatures embedded in a PDF document.

use std::{collections::HashSet, fmt, ops::Range};

use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::{
    document::{decode_pdf_hex_string, ends_with_eof, ParseError, PdfDocument},
    SignatureError,
};

/// How much of the document a signature covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// The signature covers every byte of the file.
    EntireFile,
    /// The signature covers a whole revision, and incremental updates were
    /// appended after it.
    EntireRevision,
    /// The signature covers a block from the start of the file that does not
    /// end a revision.
    ContiguousBlockFromStart,
    Unclear,
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            Coverage::EntireFile => "ENTIRE_FILE",
            Coverage::EntireRevision => "ENTIRE_REVISION",
            Coverage::ContiguousBlockFromStart => "CONTIGUOUS_BLOCK_FROM_START",
            Coverage::Unclear => "UNCLEAR",
        };
        write!(f, "SignatureCoverageLevel.{level}")
    }
}

/// The two byte ranges of the file that were hashed and signed. The gap
/// between them holds the signature itself, as a hex encoded PDF string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRange {
    pub signed: [Range<usize>; 2],
}

impl ByteRange {
    /// Validates a `/ByteRange` array against the size of the file.
    pub fn new(values: [i64; 4], file_len: usize) -> Result<Self, SignatureError> {
        let mut checked = [0usize; 4];
        for (dst, &value) in checked.iter_mut().zip(values.iter()) {
            *dst = usize::try_from(value).map_err(|_| SignatureError::InvalidRange)?;
        }
        let [start1, len1, start2, len2] = checked;

        let end1 = start1.checked_add(len1).ok_or(SignatureError::InvalidRange)?;
        let end2 = start2.checked_add(len2).ok_or(SignatureError::InvalidRange)?;
        if end1 > start2 || end2 > file_len {
            return Err(SignatureError::InvalidRange);
        }

        Ok(Self {
            signed: [start1..end1, start2..end2],
        })
    }

    /// Offset just past the last signed byte.
    pub fn end(&self) -> usize {
        self.signed[1].end
    }

    /// The bytes skipped between the two signed ranges.
    pub fn gap(&self) -> Range<usize> {
        self.signed[0].end..self.signed[1].start
    }

    pub fn slices<'b>(&self, pdf_bytes: &'b [u8]) -> [&'b [u8]; 2] {
        [
            &pdf_bytes[self.signed[0].clone()],
            &pdf_bytes[self.signed[1].clone()],
        ]
    }

    pub fn coverage(&self, pdf_bytes: &[u8]) -> Coverage {
        if self.signed[0].start != 0 {
            Coverage::Unclear
        } else if self.end() == pdf_bytes.len() {
            Coverage::EntireFile
        } else if ends_with_eof(&pdf_bytes[..self.end()]) {
            Coverage::EntireRevision
        } else {
            Coverage::ContiguousBlockFromStart
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {} {} {}]",
            self.signed[0].start,
            self.signed[0].len(),
            self.signed[1].start,
            self.signed[1].len()
        )
    }
}

struct ExactArrayOrNone<T, const N: usize>(Option<[T; N]>);

impl<T, const N: usize> FromIterator<T> for ExactArrayOrNone<T, N> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut iter = iter.into_iter();
        let result = array_init::from_iter(&mut iter);
        let result = if iter.next().is_none() { result } else { None };
        ExactArrayOrNone(result)
    }
}

/// A filled signature field found in the document.
///
/// Nothing has been verified yet. Accessors validate the signature
/// dictionary lazily, so that one malformed signature only fails itself.
pub struct EmbeddedSignature<'d> {
    /// Position among the document's signatures, oldest revision first.
    pub index: usize,
    value: &'d Object,
    doc: &'d Document,
    pdf_bytes: &'d [u8],
}

impl<'d> EmbeddedSignature<'d> {
    pub fn pdf_bytes(&self) -> &'d [u8] {
        self.pdf_bytes
    }

    /// The signature dictionary, i.e. the field's `/V` value.
    pub fn dictionary(&self) -> Result<&'d Dictionary, SignatureError> {
        self.value
            .as_dict()
            .map_err(|_| SignatureError::InvalidSignatureObject)
    }

    /// The raw `/Contents` of the signature: a CMS structure followed by
    /// zero padding.
    pub fn contents(&self) -> Result<&'d [u8], SignatureError> {
        Ok(self
            .dictionary()?
            .get_deref(b"Contents", self.doc)?
            .as_str()?)
    }

    pub fn sub_filter(&self) -> Option<&'d [u8]> {
        let dict = self.dictionary().ok()?;
        dict.get_deref(b"SubFilter", self.doc)
            .and_then(Object::as_name)
            .ok()
    }

    /// The signing time claimed by the signature dictionary (`/M`), as a raw
    /// PDF date string.
    pub fn reported_time(&self) -> Option<&'d [u8]> {
        let dict = self.dictionary().ok()?;
        dict.get_deref(b"M", self.doc).and_then(Object::as_str).ok()
    }

    /// The validated byte range covered by this signature.
    ///
    /// The gap between the two signed ranges must be exactly the hex string
    /// stored in `/Contents`, otherwise some unsigned bytes could be hiding
    /// in it.
    pub fn byte_range(&self) -> Result<ByteRange, SignatureError> {
        let doc = self.doc;
        let values = self
            .dictionary()?
            .get_deref(b"ByteRange", doc)?
            .as_array()?
            .iter()
            .map(|r| doc.dereference(r).and_then(|(_, r)| r.as_i64()))
            .collect::<lopdf::Result<ExactArrayOrNone<i64, 4>>>()?
            .0
            .ok_or(SignatureError::InvalidRange)?;
        let range = ByteRange::new(values, self.pdf_bytes.len())?;

        let skipped_bytes = decode_pdf_hex_string(&self.pdf_bytes[range.gap()])
            .ok_or(SignatureError::InvalidCoverage)?;
        if self.contents()? != skipped_bytes {
            return Err(SignatureError::InvalidCoverage);
        }

        Ok(range)
    }
}

/// Finds every filled signature field of the document.
///
/// The signatures are returned in the order they were applied, i.e. by
/// increasing end of their covered range. A document without a form has no
/// signatures, which is not an error.
pub fn locate<'d>(
    document: &'d PdfDocument<'_>,
) -> Result<Vec<EmbeddedSignature<'d>>, ParseError> {
    let doc = document.objects();

    let acro_form = match document.catalog()?.get(b"AcroForm") {
        Ok(acro_form) => doc.dereference(acro_form)?.1.as_dict()?,
        Err(_) => return Ok(Vec::new()),
    };
    let fields = match acro_form.get(b"Fields") {
        Ok(fields) => doc.dereference(fields)?.1.as_array()?,
        Err(_) => return Ok(Vec::new()),
    };

    let found = walk_fields(doc, fields)?;

    let mut signatures: Vec<_> = found
        .into_iter()
        .map(|value| EmbeddedSignature {
            index: 0,
            value,
            doc,
            pdf_bytes: document.bytes(),
        })
        .collect();

    // Stable, so signatures sharing a revision keep their field order.
    signatures.sort_by_cached_key(|s| s.byte_range().map_or(usize::MAX, |r| r.end()));
    for (index, signature) in signatures.iter_mut().enumerate() {
        signature.index = index;
    }

    log::debug!("located {} signature(s)", signatures.len());
    Ok(signatures)
}

/// Collects the `/V` of every signature field, in depth-first field order.
fn walk_fields<'d>(
    doc: &'d Document,
    fields: &'d [Object],
) -> Result<Vec<&'d Object>, ParseError> {
    let mut found = Vec::new();
    let mut visited = HashSet::new();
    // Fields still to be looked at, with the field type they inherit.
    let mut pending: Vec<(&'d Object, Option<&'d [u8]>)> =
        fields.iter().rev().map(|field| (field, None)).collect();

    while let Some((field, inherited_type)) = pending.pop() {
        let (id, field) = doc.dereference(field)?;
        if let Some(id) = id {
            // Fields shared between several parents are only looked at once,
            // which also stops reference cycles.
            if !visited.insert(id) {
                continue;
            }
        }
        let field = field.as_dict()?;

        let field_type = field
            .get(b"FT")
            .and_then(Object::as_name)
            .ok()
            .or(inherited_type);

        if field_type == Some(b"Sig".as_slice()) {
            if let Ok(value) = field.get(b"V") {
                let value = match doc.dereference(value) {
                    Ok((_, value)) => value,
                    // Left as the reference, it fails on its own when verified.
                    Err(e) => {
                        log::debug!("unresolvable signature value: {e}");
                        value
                    }
                };
                if !matches!(value, Object::Null) {
                    found.push(value);
                }
            }
        }

        if let Ok(kids) = field.get(b"Kids") {
            let kids = doc.dereference(kids)?.1.as_array()?;
            pending.extend(kids.iter().rev().map(|kid| (kid, field_type)));
        }
    }

    Ok(found)
}
