//! The PDF container: raw bytes and their parsed object structure.

use lopdf::{Dictionary, Document};
use regex::bytes::Regex;
use thiserror::Error;

/// The bytes could not be read as a PDF document.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{0}")]
    Pdf(#[from] lopdf::Error),
    #[error("trailer does not reference a document catalog")]
    MissingCatalog,
}

/// A parsed PDF document, together with the bytes it was parsed from.
///
/// Signatures are verified against the raw bytes, so both must be kept
/// around for as long as the document is inspected.
pub struct PdfDocument<'a> {
    doc: Document,
    pdf_bytes: &'a [u8],
}

impl<'a> PdfDocument<'a> {
    /// Parses a PDF document from memory.
    ///
    /// Fails if the cross-reference table, the trailer or the catalog can
    /// not be read.
    pub fn parse(pdf_bytes: &'a [u8]) -> Result<Self, ParseError> {
        let doc = Document::load_mem(pdf_bytes)?;
        if doc.catalog().is_err() {
            return Err(ParseError::MissingCatalog);
        }
        Ok(Self { doc, pdf_bytes })
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.pdf_bytes
    }

    pub fn objects(&self) -> &Document {
        &self.doc
    }

    pub fn catalog(&self) -> Result<&Dictionary, ParseError> {
        self.doc.catalog().map_err(|_| ParseError::MissingCatalog)
    }
}

/// Decodes a PDF hex string, including the delimiters '<' and '>', skipping
/// whitespace.
///
/// Returns None if any other character is not a valid hex digit.
pub(crate) fn decode_pdf_hex_string(hex_input: &[u8]) -> Option<Vec<u8>> {
    if hex_input.first() != Some(&b'<') || hex_input.last() != Some(&b'>') {
        return None;
    }
    let hex_input = &hex_input[1..hex_input.len() - 1];

    let mut bytes = Vec::with_capacity(hex_input.len() / 2);
    let mut hex_iter = hex_input.iter().filter_map(|&b| {
        let c = b as char;
        if c.is_ascii_whitespace() {
            None
        } else {
            Some(c.to_digit(16))
        }
    });

    while let Some(first) = hex_iter.next() {
        let first = first? as u8;
        // An odd number of digits is completed with a 0.
        let second = hex_iter.next().unwrap_or(Some(0))? as u8;
        bytes.push(first << 4 | second);
    }

    Some(bytes)
}

lazy_static::lazy_static! {
    static ref EOF_REGEX: Regex = Regex::new(r"(?:\r\n|\r|\n)%%EOF[ \t]*(?:\r\n|\r|\n)?$").unwrap();
}

/// Tests if the bytes end with the %%EOF marker, i.e. they end a revision.
pub(crate) fn ends_with_eof(pdf_bytes: &[u8]) -> bool {
    EOF_REGEX.is_match(pdf_bytes)
}
