//! Normalization of the BER encoded signatures some signers produce, and
//! raw access to DER elements.

use crate::SignatureError;

/// Tag, length and offsets of one encoded element.
struct Header {
    /// End of the identifier octets.
    tag_end: usize,
    /// `None` for the indefinite form.
    length: Option<usize>,
    content_start: usize,
}

fn read_header(input: &[u8], start: usize) -> Result<Header, SignatureError> {
    let mut pos = start;

    let tag_byte = *input.get(pos).ok_or(SignatureError::Ber("truncated tag"))?;
    pos += 1;
    if tag_byte & 0x1f == 0x1f {
        // High tag number, continued while the top bit is set.
        loop {
            let b = *input.get(pos).ok_or(SignatureError::Ber("truncated tag"))?;
            pos += 1;
            if b & 0x80 == 0 {
                break;
            }
        }
    }
    let tag_end = pos;

    let length_byte = *input
        .get(pos)
        .ok_or(SignatureError::Ber("truncated length"))?;
    pos += 1;

    let length = if length_byte == 0x80 {
        None
    } else if length_byte < 0x80 {
        Some(length_byte as usize)
    } else {
        let num_bytes = (length_byte & 0x7f) as usize;
        let bytes = input
            .get(pos..pos + num_bytes)
            .filter(|_| num_bytes <= std::mem::size_of::<usize>())
            .ok_or(SignatureError::Ber("invalid length"))?;
        pos += num_bytes;
        Some(bytes.iter().fold(0usize, |len, &b| len << 8 | b as usize))
    };

    Ok(Header {
        tag_end,
        length,
        content_start: pos,
    })
}

/// Extracts the first TLV element of `input` as DER.
///
/// Anything after the element is dropped, which takes care of the zero
/// padding left in `/Contents`. Indefinite lengths are rewritten as
/// definite ones; definite-length elements are copied verbatim, so the
/// signed attributes keep the exact bytes that were signed.
pub(crate) fn first_element_as_der(input: &[u8]) -> Result<Vec<u8>, SignatureError> {
    let mut output = Vec::with_capacity(input.len());
    transcode_element(input, 0, 0, &mut output)?;
    Ok(output)
}

/// Deepest nesting of indefinite-length elements accepted.
const MAX_NESTING: usize = 64;

/// Copies one element starting at `start`, returning the offset just past it.
fn transcode_element(
    input: &[u8],
    start: usize,
    depth: usize,
    output: &mut Vec<u8>,
) -> Result<usize, SignatureError> {
    if depth > MAX_NESTING {
        return Err(SignatureError::Ber("nesting too deep"));
    }
    let header = read_header(input, start)?;
    let mut pos = header.content_start;

    let Some(content_len) = header.length else {
        let constructed = input[start] & 0x20 != 0;
        if !constructed {
            return Err(SignatureError::Ber("indefinite length on a primitive type"));
        }

        let mut content = Vec::new();
        loop {
            match input.get(pos..pos + 2) {
                Some([0, 0]) => {
                    pos += 2;
                    break;
                }
                Some(_) => pos = transcode_element(input, pos, depth + 1, &mut content)?,
                None => return Err(SignatureError::Ber("unterminated indefinite length")),
            }
        }

        output.extend_from_slice(&input[start..header.tag_end]);
        write_length(content.len(), output);
        output.extend(content);
        return Ok(pos);
    };

    let end = pos
        .checked_add(content_len)
        .filter(|&end| end <= input.len())
        .ok_or(SignatureError::Ber("content exceeds input"))?;
    output.extend_from_slice(&input[start..end]);
    Ok(end)
}

fn write_length(len: usize, output: &mut Vec<u8>) {
    if len < 0x80 {
        output.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let significant = &bytes[bytes.iter().take_while(|&&b| b == 0).count()..];
    output.push(0x80 | significant.len() as u8);
    output.extend_from_slice(significant);
}

/// One DER element, borrowed from its encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Element<'a> {
    /// First identifier octet.
    pub tag: u8,
    /// The whole encoding, header included.
    pub raw: &'a [u8],
    pub content: &'a [u8],
}

/// Reads the DER element at the start of `input`.
pub(crate) fn read_element(input: &[u8]) -> Result<Element<'_>, SignatureError> {
    let header = read_header(input, 0)?;
    let length = header
        .length
        .ok_or(SignatureError::Ber("indefinite length in DER"))?;
    let end = header
        .content_start
        .checked_add(length)
        .filter(|&end| end <= input.len())
        .ok_or(SignatureError::Ber("content exceeds input"))?;
    Ok(Element {
        tag: input[0],
        raw: &input[..end],
        content: &input[header.content_start..end],
    })
}

/// The elements inside a constructed element's content.
pub(crate) fn children(content: &[u8]) -> Result<Vec<Element<'_>>, SignatureError> {
    let mut elements = Vec::new();
    let mut rest = content;
    while !rest.is_empty() {
        let element = read_element(rest)?;
        rest = &rest[element.raw.len()..];
        elements.push(element);
    }
    Ok(elements)
}
