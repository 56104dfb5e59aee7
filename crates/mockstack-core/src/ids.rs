//! Identifier synthesis.
//!
//! Identifiers are fixed-width random strings drawn from UUID v4 entropy, so
//! two calls never collide in practice and every identifier of a given kind
//! has the same shape.

/// Maximum width a single UUID can supply (32 hex digits).
const UUID_HEX_WIDTH: usize = 32;

/// A fresh UUID v4 in canonical hyphenated form.
#[must_use]
pub fn uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A fixed-width lowercase hex string of `width` characters.
///
/// # Examples
///
/// ```
/// let id = mockstack_core::ids::random_hex(12);
/// assert_eq!(id.len(), 12);
/// assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
/// ```
#[must_use]
pub fn random_hex(width: usize) -> String {
    let mut out = String::with_capacity(width);
    while out.len() < width {
        let chunk = uuid::Uuid::new_v4().simple().to_string();
        let take = (width - out.len()).min(UUID_HEX_WIDTH);
        out.push_str(&chunk[..take]);
    }
    out
}

/// A fixed-width lowercase alphanumeric string (`[0-9a-z]`).
#[must_use]
pub fn random_alnum_lower(width: usize) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = String::with_capacity(width);
    while out.len() < width {
        for byte in uuid::Uuid::new_v4().into_bytes() {
            if out.len() == width {
                break;
            }
            out.push(char::from(ALPHABET[usize::from(byte) % ALPHABET.len()]));
        }
    }
    out
}

/// A fixed-width mixed-case alphanumeric string (`[0-9A-Za-z]`).
#[must_use]
pub fn random_alnum(width: usize) -> String {
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut out = String::with_capacity(width);
    while out.len() < width {
        for byte in uuid::Uuid::new_v4().into_bytes() {
            if out.len() == width {
                break;
            }
            out.push(char::from(ALPHABET[usize::from(byte) % ALPHABET.len()]));
        }
    }
    out
}
