// Term fingerprints — the content address used as the dictionary key.
//
// MD5 is not used for security here, only as a stable 128-bit content hash
// that existing term tables were keyed by.

use md5::{Digest, Md5};

/// MD5 of the UTF-8 bytes of `text`, rendered as 32 lowercase hex chars.
pub fn fingerprint(text: &str) -> String {
    hex::encode(Md5::digest(text.as_bytes()))
}
