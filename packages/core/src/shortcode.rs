//! Media shortcodes: the `BfHrDvCDuzC` part of `https://www.instagram.com/p/BfHrDvCDuzC/`.
//!
//! A shortcode is the media pk written in base 64 over the URL-safe
//! alphabet, most significant digit first.

use thiserror::Error;

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ShortcodeError {
    #[error("shortcode must not be empty")]
    Empty,

    #[error("invalid shortcode character {0:?}")]
    InvalidChar(char),

    #[error("shortcode {0:?} does not fit in a 64-bit media id")]
    Overflow(String),

    #[error("not a media link: {0:?}")]
    NotAMediaLink(String),
}

/// Decode a shortcode to its numeric media id.
pub fn media_id_from_code(code: &str) -> Result<u64, ShortcodeError> {
    if code.is_empty() {
        return Err(ShortcodeError::Empty);
    }
    code.chars().try_fold(0u64, |acc, c| {
        let digit = ALPHABET
            .iter()
            .position(|&a| char::from(a) == c)
            .ok_or(ShortcodeError::InvalidChar(c))?;
        acc.checked_mul(64)
            .and_then(|v| v.checked_add(digit as u64))
            .ok_or_else(|| ShortcodeError::Overflow(code.to_string()))
    })
}

/// Encode a numeric media id as a shortcode.
pub fn code_from_media_id(mut id: u64) -> String {
    let mut digits = Vec::new();
    loop {
        digits.push(ALPHABET[(id % 64) as usize]);
        id /= 64;
        if id == 0 {
            break;
        }
    }
    digits.iter().rev().map(|&b| char::from(b)).collect()
}

/// Extract and decode the shortcode from a post, reel or tv link.
pub fn media_id_from_link(link: &str) -> Result<u64, ShortcodeError> {
    let not_a_link = || ShortcodeError::NotAMediaLink(link.to_string());
    let path = link.split(['?', '#']).next().unwrap_or(link);
    let mut segments = path.split('/').filter(|s| !s.is_empty());

    segments
        .by_ref()
        .find(|s| matches!(*s, "p" | "reel" | "tv"))
        .ok_or_else(not_a_link)?;
    let code = segments.next().ok_or_else(not_a_link)?;
    media_id_from_code(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_link() {
        assert_eq!(
            media_id_from_link("https://www.instagram.com/p/BfHrDvCDuzC/"),
            Ok(1713527555896569026)
        );
    }

    #[test]
    fn link_with_query_and_no_trailing_slash() {
        assert_eq!(
            media_id_from_link("https://www.instagram.com/reel/BfHrDvCDuzC?igshid=abc"),
            Ok(1713527555896569026)
        );
    }

    #[test]
    fn encode_inverts_decode() {
        assert_eq!(code_from_media_id(1713527555896569026), "BfHrDvCDuzC");
        assert_eq!(code_from_media_id(0), "A");
    }

    #[test]
    fn rejects_non_links() {
        assert_eq!(
            media_id_from_link("test"),
            Err(ShortcodeError::NotAMediaLink("test".into()))
        );
        assert!(matches!(
            media_id_from_link("https://www.instagram.com/p/"),
            Err(ShortcodeError::NotAMediaLink(_))
        ));
    }

    #[test]
    fn rejects_bad_codes() {
        assert_eq!(media_id_from_code(""), Err(ShortcodeError::Empty));
        assert_eq!(media_id_from_code("ab!"), Err(ShortcodeError::InvalidChar('!')));
        assert!(matches!(
            media_id_from_code("___________________"),
            Err(ShortcodeError::Overflow(_))
        ));
    }
}
