// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fmt, io, rc::Rc};

use deku::prelude::*;
use rsa::pkcs8;
use zip::result::ZipError;

/// Common error type shared between the zipsign crates.
///
/// In general designed to avoid needing utilities like `map_err`.
#[derive(Debug, Clone)]
pub enum ZipSignError {
    /// Reading the input archive or writing the output archive failed.
    /// The operation is abandoned; retrying is up to the caller.
    Io(Rc<io::Error>),
    /// A fixed-layout ZIP record couldn't be read or written. See [DekuError].
    ByteSerialisationFailed(DekuError),
    /// `zipsign-zip` failed to create a zip file in-memory.
    ZipWritingFailed(Rc<ZipError>),
    /// The input isn't a ZIP archive this crate can work with. `offset` is the
    /// byte offset in the archive where the problem was detected.
    MalformedArchive { offset: u64, reason: &'static str },
    /// A signing block is present but can't be decoded.
    MalformedSigningBlock(BlockFormatError),
    /// The archive carries no signing block, or carries one without any
    /// signer entries this crate understands.
    NoSignature,
    /// A digest recomputed from the archive differs from the one embedded in
    /// the signing block.
    DigestMismatch { algorithm_id: u32 },
    /// A signer entry lists the same digest algorithm more than once.
    DuplicateDigestAlgorithm { algorithm_id: u32 },
    /// A signature didn't verify against its signed data.
    SignatureInvalid,
    /// The private key can't produce the requested signature algorithm, eg. an
    /// RSA key paired with an ECDSA algorithm.
    KeyAlgorithmMismatch { algorithm_id: u32 },
    /// A signing request or signer entry has no certificates.
    EmptyCertificateChain,
    /// The private key doesn't belong to the first certificate of the chain.
    CertificateKeyMismatch,
    /// The certificate at `position` can't be used: it doesn't decode, its key
    /// is unusable, it isn't issued by the next certificate, or it isn't valid
    /// at the verification instant.
    CertificateChainInvalid { position: usize },
    /// An algorithm id this crate doesn't implement was requested.
    UnsupportedAlgorithm(u32),
    /// `sign` was called with an empty list of signing requests.
    NoSigningRequests,
    /// A signing request didn't name any digest algorithm.
    NoDigestAlgorithms,
    /// The central directory would start beyond what a non-ZIP64 archive can
    /// address.
    OffsetOverflow(u64),
    /// A value doesn't fit the ZIP field that has to hold it.
    ZipFieldOverflow { field: &'static str, value: u64 },
    /// The encoded signing block kept changing size between passes, so its
    /// final position couldn't be fixed.
    ///
    /// **If you experience this, it is considered an internal bug. Please
    /// report it.**
    SigningBlockUnstable,
    /// An RSA signing operation failed, see [rsa::Error].
    RsaSigningFailed(Rc<rsa::Error>),
    /// An ECDSA signing operation failed, see [p256::ecdsa::Error].
    EcdsaSigningFailed(Rc<p256::ecdsa::Error>),
    /// The public key inside a certificate couldn't be parsed, see
    /// [pkcs8::spki::Error].
    PublicKeyParsingFailed(pkcs8::spki::Error),
    /// A certificate in a chain isn't valid DER.
    CertificateDecodingFailed(Rc<rasn::error::DecodeError>),
    /// Part of a certificate couldn't be re-encoded to DER.
    CertificateEncodingFailed(Rc<rasn::error::EncodeError>)
}

/// Structural problems found while decoding a signing block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockFormatError {
    /// A length field claims more bytes than are available.
    TruncatedBlock { offset: u64 },
    /// The 16-byte trailer isn't the signing block magic.
    BadMagic { offset: u64 },
    /// The size fields at both ends of the block disagree with each other or
    /// with the number of bytes present.
    SizeMismatch { head: u64, tail: u64 },
    /// A nested value (signer, signed data, digest, ...) failed its own checks.
    MalformedValue { offset: u64, reason: &'static str }
}

/// Result type where the error is always [ZipSignError].
pub type Result<T> = std::result::Result<T, ZipSignError>;

impl fmt::Display for ZipSignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZipSignError::Io(e) => write!(f, "I/O error: {e}"),
            ZipSignError::MalformedArchive { offset, reason } => {
                write!(f, "malformed archive at offset {offset}: {reason}")
            }
            ZipSignError::MalformedSigningBlock(e) => write!(f, "malformed signing block: {e}"),
            ZipSignError::NoSignature => write!(f, "archive is not signed"),
            ZipSignError::DigestMismatch { algorithm_id } => {
                write!(f, "digest mismatch for algorithm {algorithm_id:#06x}")
            }
            ZipSignError::DuplicateDigestAlgorithm { algorithm_id } => {
                write!(f, "digest algorithm {algorithm_id:#06x} listed twice")
            }
            ZipSignError::SignatureInvalid => write!(f, "signature is invalid"),
            ZipSignError::KeyAlgorithmMismatch { algorithm_id } => write!(
                f,
                "private key cannot be used with signature algorithm {algorithm_id:#06x}"
            ),
            ZipSignError::EmptyCertificateChain => write!(f, "certificate chain is empty"),
            ZipSignError::CertificateChainInvalid { position } => {
                write!(f, "certificate {position} of the chain is invalid")
            }
            ZipSignError::OffsetOverflow(offset) => {
                write!(f, "central directory offset {offset} needs ZIP64")
            }
            ZipSignError::ZipFieldOverflow { field, value } => {
                write!(f, "{value} does not fit the ZIP {field} field")
            }
            other => write!(f, "{other:?}")
        }
    }
}

impl fmt::Display for BlockFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockFormatError::TruncatedBlock { offset } => {
                write!(f, "length at offset {offset} runs past the end of the block")
            }
            BlockFormatError::BadMagic { offset } => write!(f, "bad magic at offset {offset}"),
            BlockFormatError::SizeMismatch { head, tail } => {
                write!(f, "head size {head} does not match tail size {tail}")
            }
            BlockFormatError::MalformedValue { offset, reason } => {
                write!(f, "{reason} (at offset {offset})")
            }
        }
    }
}

impl std::error::Error for ZipSignError {}

impl From<ZipSignError> for String {
    fn from(value: ZipSignError) -> Self {
        format!("{:?}", value)
    }
}

// Automatic conversion from other types of error to ZipSignError makes the rest of the code cleaner
impl From<io::Error> for ZipSignError {
    fn from(value: io::Error) -> Self {
        ZipSignError::Io(value.into())
    }
}

impl From<DekuError> for ZipSignError {
    fn from(value: DekuError) -> Self {
        ZipSignError::ByteSerialisationFailed(value)
    }
}

impl From<ZipError> for ZipSignError {
    fn from(value: ZipError) -> Self {
        ZipSignError::ZipWritingFailed(value.into())
    }
}

impl From<BlockFormatError> for ZipSignError {
    fn from(value: BlockFormatError) -> Self {
        ZipSignError::MalformedSigningBlock(value)
    }
}

impl From<rsa::Error> for ZipSignError {
    fn from(value: rsa::Error) -> Self {
        ZipSignError::RsaSigningFailed(value.into())
    }
}

impl From<p256::ecdsa::Error> for ZipSignError {
    fn from(value: p256::ecdsa::Error) -> Self {
        ZipSignError::EcdsaSigningFailed(value.into())
    }
}

impl From<pkcs8::spki::Error> for ZipSignError {
    fn from(value: pkcs8::spki::Error) -> Self {
        ZipSignError::PublicKeyParsingFailed(value)
    }
}

impl From<rasn::error::DecodeError> for ZipSignError {
    fn from(value: rasn::error::DecodeError) -> Self {
        ZipSignError::CertificateDecodingFailed(value.into())
    }
}

impl From<rasn::error::EncodeError> for ZipSignError {
    fn from(value: rasn::error::EncodeError) -> Self {
        ZipSignError::CertificateEncodingFailed(value.into())
    }
}
