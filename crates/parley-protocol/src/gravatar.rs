//! Gravatar URL derivation.

use md5::{Digest, Md5};
use std::fmt::Write;

/// Base URL for gravatar images.
pub const GRAVATAR_BASE: &str = "http://www.gravatar.com/avatar/";

/// Build the gravatar URL for an email address.
///
/// Gravatar keys avatars on the MD5 of the trimmed, lowercased address.
#[must_use]
pub fn gravatar_url(email: &str) -> String {
    let normalized = email.trim().to_lowercase();
    let digest = Md5::digest(normalized.as_bytes());

    let mut url = String::with_capacity(GRAVATAR_BASE.len() + 32);
    url.push_str(GRAVATAR_BASE);
    for byte in digest.iter() {
        // Writing to a String cannot fail.
        let _ = write!(url, "{byte:02x}");
    }
    url
}
