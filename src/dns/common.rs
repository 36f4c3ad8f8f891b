use bitstream_io::{BitWrite, BitWriter, Endianness};

use super::ParseError;

/// Upper bound on compression pointer hops while decoding one name
const MAX_POINTER_HOPS: usize = 64;

pub trait PacketComponent: Sized {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError>;

    /// Decode the component starting at `offset` of the full message buffer.
    ///
    /// Returns the component and the offset immediately after it.
    fn read_at(buf: &[u8], offset: usize) -> Result<(Self, usize), ParseError>;

    fn write_labels<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
        labels: &[String],
    ) -> Result<(), ParseError> {
        write_name(writer, labels)
    }
}

/// Write an uncompressed domain name, terminated by the root label
pub fn write_name<E: Endianness>(
    writer: &mut BitWriter<&mut Vec<u8>, E>,
    labels: &[String],
) -> Result<(), ParseError> {
    for label in labels.iter().filter(|l| !l.is_empty()) {
        if label.len() > 63 {
            return Err(ParseError::InvalidLabel);
        }
        writer.write_var::<u8>(8, label.len() as u8)?;
        writer.write_bytes(label.as_bytes())?;
    }
    writer.write_var::<u8>(8, 0)?;
    Ok(())
}

/// Encode a name into canonical (lowercase, uncompressed) wire format
pub fn canonical_name_bytes(labels: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for label in labels.iter().filter(|l| !l.is_empty()) {
        out.push(label.len() as u8);
        out.extend(label.to_ascii_lowercase().bytes());
    }
    out.push(0);
    out
}

/// Decode a possibly-compressed domain name.
///
/// Returns the labels (root label omitted) and the offset just past the name
/// at its original position, regardless of any pointers followed.
pub fn read_name(buf: &[u8], offset: usize) -> Result<(Vec<String>, usize), ParseError> {
    let mut labels = Vec::new();
    let mut pos = offset;
    let mut end = None;
    let mut hops = 0;
    let mut total_len = 0usize;

    loop {
        let len = *buf.get(pos).ok_or(ParseError::Truncated)? as usize;

        if len & 0xC0 == 0xC0 {
            let low = *buf.get(pos + 1).ok_or(ParseError::Truncated)? as usize;
            if end.is_none() {
                end = Some(pos + 2);
            }
            hops += 1;
            if hops > MAX_POINTER_HOPS {
                return Err(ParseError::CompressionLoop);
            }
            pos = ((len & 0x3F) << 8) | low;
            continue;
        }

        if len & 0xC0 != 0 {
            return Err(ParseError::InvalidLabel);
        }

        if len == 0 {
            let next = end.unwrap_or(pos + 1);
            return Ok((labels, next));
        }

        let start = pos + 1;
        let bytes = buf.get(start..start + len).ok_or(ParseError::Truncated)?;
        total_len += len + 1;
        if total_len > 255 {
            return Err(ParseError::InvalidLabel);
        }
        let label = String::from_utf8(bytes.to_vec()).map_err(|_| ParseError::InvalidLabel)?;
        labels.push(label);
        pos = start + len;
    }
}

pub fn read_u16(buf: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = buf.get(offset..offset + 2).ok_or(ParseError::Truncated)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub fn read_u32(buf: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = buf.get(offset..offset + 4).ok_or(ParseError::Truncated)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Split a zone or owner name into labels, ignoring the trailing root dot
pub fn name_to_labels(name: &str) -> Vec<String> {
    name.trim_end_matches('.')
        .split('.')
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}

/// Render labels as a fully-qualified name with a trailing dot
pub fn labels_to_name(labels: &[String]) -> String {
    if labels.is_empty() {
        return ".".to_string();
    }
    let mut name = labels.join(".");
    name.push('.');
    name
}

/// Case-insensitive comparison of two names, tolerant of the trailing dot
pub fn names_equal(a: &str, b: &str) -> bool {
    a.trim_end_matches('.')
        .eq_ignore_ascii_case(b.trim_end_matches('.'))
}
