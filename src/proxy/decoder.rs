//! Line decoder for subscription bodies
//!
//! Plain feeds carry one entry per line. Base64 feeds carry base64 blocks,
//! each of which decodes to one or more newline separated entries. Decoded
//! blocks are kept as a [`Nested`] tree and walked by [`Flatten`].

use crate::error::DecodeError;
use crate::models::SubscriptionKind;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use tracing::warn;

/// Accepts padded and unpadded input with trailing bits set
const LENIENT_CONFIG: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_decode_padding_mode(DecodePaddingMode::Indifferent)
    .with_decode_allow_trailing_bits(true);

const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT_CONFIG);

/// Decode base64 in either the standard or URL-safe alphabet, with or
/// without padding. Embedded whitespace is ignored.
pub fn decode_base64(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let normalized: String = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    LENIENT_STANDARD.decode(normalized)
}

/// Candidate entries before flattening
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nested {
    Entry(String),
    Group(Vec<Nested>),
}

impl Nested {
    /// Consume the tree into a flat iterator of entries
    pub fn flatten(self) -> Flatten {
        Flatten {
            stack: vec![vec![self].into_iter()],
        }
    }
}

/// Depth-first iterator over a [`Nested`] tree.
///
/// Uses an explicit stack so nesting depth does not grow the call stack.
#[derive(Debug)]
pub struct Flatten {
    stack: Vec<std::vec::IntoIter<Nested>>,
}

impl Iterator for Flatten {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                Some(Nested::Entry(entry)) => return Some(entry),
                Some(Nested::Group(children)) => self.stack.push(children.into_iter()),
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

/// Split a response body into lines, dropping `\r` and blank lines
pub fn split_lines(body: &[u8]) -> impl Iterator<Item = &[u8]> {
    body.split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
}

/// Decode one base64 line into its entries
pub fn decode_base64_line(line: &[u8]) -> Result<Nested, DecodeError> {
    let text = String::from_utf8(line.to_vec())?;
    let decoded = String::from_utf8(decode_base64(&text)?)?;
    let entries = decoded
        .lines()
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| Nested::Entry(entry.to_string()))
        .collect();
    Ok(Nested::Group(entries))
}

/// Decoder for a whole subscription body
pub struct LineDecoder;

impl LineDecoder {
    /// Decode `body` according to `kind`.
    ///
    /// A non UTF-8 line in a plain feed fails the whole feed. A corrupt line
    /// in a base64 feed is logged and dropped.
    pub fn decode(body: &[u8], kind: SubscriptionKind) -> Result<Flatten, DecodeError> {
        let tree = match kind {
            SubscriptionKind::Plain => Self::decode_plain(body)?,
            SubscriptionKind::Base64 => Self::decode_base64_body(body),
        };
        Ok(tree.flatten())
    }

    fn decode_plain(body: &[u8]) -> Result<Nested, DecodeError> {
        let entries = split_lines(body)
            .map(|line| {
                String::from_utf8(line.to_vec()).map(|text| Nested::Entry(text.trim().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Nested::Group(entries))
    }

    fn decode_base64_body(body: &[u8]) -> Nested {
        let blocks = split_lines(body)
            .filter_map(|line| match decode_base64_line(line) {
                Ok(block) => Some(block),
                Err(e) => {
                    warn!(line = %String::from_utf8_lossy(line), error = %e, "Failed decoding line");
                    None
                }
            })
            .collect();
        Nested::Group(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};

    #[test]
    fn test_decode_base64_variants() {
        assert_eq!(decode_base64("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(decode_base64("aGVsbG8").unwrap(), b"hello");
        assert_eq!(decode_base64(" aGVs\nbG8= ").unwrap(), b"hello");

        let bytes = [0xfbu8, 0xff, 0xfe];
        assert_eq!(decode_base64(&URL_SAFE_NO_PAD.encode(bytes)).unwrap(), bytes);
        assert!(decode_base64("!!!").is_err());
    }

    #[test]
    fn test_flatten_deep_nesting() {
        let tree = Nested::Group(vec![
            Nested::Entry("a".to_string()),
            Nested::Group(vec![
                Nested::Group(vec![Nested::Entry("b".to_string())]),
                Nested::Group(vec![]),
                Nested::Entry("c".to_string()),
            ]),
            Nested::Entry("d".to_string()),
        ]);
        let entries: Vec<String> = tree.flatten().collect();
        assert_eq!(entries, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_flatten_is_not_restartable() {
        let mut iter = Nested::Entry("only".to_string()).flatten();
        assert_eq!(iter.next().as_deref(), Some("only"));
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_plain_body() {
        let body = b"ss://a\r\n\r\nvmess://b\n  \nss://c";
        let entries: Vec<String> = LineDecoder::decode(body, SubscriptionKind::Plain)
            .unwrap()
            .collect();
        assert_eq!(entries, vec!["ss://a", "vmess://b", "ss://c"]);
    }

    #[test]
    fn test_plain_body_with_invalid_utf8_fails() {
        let body = b"ss://a\n\xff\xfe\n";
        assert!(matches!(
            LineDecoder::decode(body, SubscriptionKind::Plain),
            Err(DecodeError::Utf8(_))
        ));
    }

    #[test]
    fn test_base64_body_drops_corrupt_line() {
        let first = STANDARD.encode("ss://one\nss://two");
        let second = STANDARD.encode("ss://three");
        let corrupt = STANDARD.encode([0xffu8, 0xfe, 0xfd]);
        let body = format!("{}\n{}\n{}\n", first, corrupt, second);

        let entries: Vec<String> = LineDecoder::decode(body.as_bytes(), SubscriptionKind::Base64)
            .unwrap()
            .collect();
        assert_eq!(entries, vec!["ss://one", "ss://two", "ss://three"]);
    }

    #[test]
    fn test_base64_body_one_corrupt_two_valid() {
        let body = format!(
            "{}\n%%%not base64%%%\n{}",
            STANDARD.encode("ss://first"),
            STANDARD.encode("ss://second")
        );
        let entries: Vec<String> = LineDecoder::decode(body.as_bytes(), SubscriptionKind::Base64)
            .unwrap()
            .collect();
        assert_eq!(entries, vec!["ss://first", "ss://second"]);
    }
}
