#![deny(missing_docs)]

//! Typed hash values for the krait crates.
//!
//! Package records and match specs refer to MD5 and SHA256 digests. Instead of
//! passing hex strings around, this crate exposes the output types of the
//! [RustCrypto/hashes](https://github.com/RustCrypto/hashes) implementations
//! together with hex parsing and (optionally) serde support.

#[cfg(feature = "serde")]
pub mod serde;

use digest::{Digest, Output};

pub use digest;
pub use md5::Md5;
pub use sha2::Sha256;

/// A type alias for the output of a SHA256 hash.
pub type Sha256Hash = sha2::digest::Output<Sha256>;

/// A type alias for the output of an MD5 hash.
pub type Md5Hash = md5::digest::Output<Md5>;

/// Compute a hash of the specified bytes.
pub fn compute_bytes_digest<D: Digest + Default>(bytes: impl AsRef<[u8]>) -> Output<D> {
    let mut hasher = D::default();
    hasher.update(bytes);
    hasher.finalize()
}

/// Parses a hex encoded digest to an [`Output`] of the digest type `D`.
/// Returns `None` if the string is not a valid hex representation of the
/// digest, e.g. if it has the wrong length or contains non-hex characters.
pub fn parse_digest_from_hex<D: Digest>(str: &str) -> Option<Output<D>> {
    let mut hash = <Output<D>>::default();
    match hex::decode_to_slice(str, &mut hash) {
        Ok(_) => Some(hash),
        Err(_) => None,
    }
}
