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

//! Signs and verifies ZIP archives by placing a ZIP Signing Block between the
//! entry data and the central directory.
//!
//! Entry data is never touched. The only byte that changes outside the block
//! is the central directory offset in the EOCD (or ZIP64 EOCD) record, so
//! signed archives still open with ordinary ZIP tools.

use std::io::{Cursor, Read, Seek, Write};

use signing_block::compute_signing_block_for_layout;
use verifier::{read_signing_block_at, verify_layout};
use zip_rebuilder::rebuild_zip_with_signing_block;

pub mod block_codec;
pub mod certificate;
mod crypto;
pub mod crypto_keys;
mod hasher;
mod signed_data_block;
mod signing_block;
pub mod signing_types;
mod verifier;
mod zip_parser;
mod zip_rebuilder;

pub use crypto_keys::{PublicKey, SigningKey};
pub use signing_block::SigningRequest;
pub use signing_types::{DigestAlgorithm, SignatureAlgorithm, SigningBlock};
pub use verifier::{
    DigestedRegions, FailureReason, SignerFailure, VerificationOptions, VerificationPolicy,
    VerificationResult, VerifiedSigner
};
pub use zip_parser::{ArchiveLayout, CentralDirectoryOffsetFields};
pub use zipsign_common::{BlockFormatError, Result, ZipSignError};

/// Finds the entry data, signing block, central directory and EOCD of an archive.
pub fn locate_archive<R: Read + Seek>(archive: &mut R) -> Result<ArchiveLayout> {
    zip_parser::find_layout(archive)
}

/// Builds the signing block `sign_archive` would insert, one signer per request.
pub fn compute_signing_block<R: Read + Seek>(
    archive: &mut R,
    requests: &[SigningRequest]
) -> Result<SigningBlock> {
    let layout = zip_parser::find_layout(archive)?;
    compute_signing_block_for_layout(archive, &layout, requests)
}

/// Signs `archive` and writes the signed copy to `output`, replacing any
/// signing block already there. Returns the number of bytes written.
pub fn sign_archive<R: Read + Seek, W: Write>(
    archive: &mut R,
    output: &mut W,
    requests: &[SigningRequest]
) -> Result<u64> {
    // Read ZIP file to find the central directory
    let layout = zip_parser::find_layout(archive)?;
    if layout.signing_block.is_some() {
        log::debug!("Replacing existing signing block");
    }
    let signing_block = compute_signing_block_for_layout(archive, &layout, requests)?;
    // Build up the final zip file again
    let written = rebuild_zip_with_signing_block(archive, &layout, Some(&signing_block), output)?;
    log::info!(
        "Signed archive with {} signer(s), {written} bytes written",
        requests.len()
    );
    Ok(written)
}

/// Signs a ZIP file buffer, adding a ZIP Signing Block before its Central Directory.
pub fn sign_zip_buffer(zip_buf: &[u8], requests: &[SigningRequest]) -> Result<Vec<u8>> {
    let mut signed = Vec::with_capacity(zip_buf.len());
    sign_archive(&mut Cursor::new(zip_buf), &mut signed, requests)?;
    Ok(signed)
}

/// Verifies every signer in the archive's signing block.
///
/// An archive with no signing block, or no signer this crate understands,
/// is [ZipSignError::NoSignature]. A signed archive that fails its checks is
/// an `Ok` result with `valid` unset; see [VerificationResult::ensure_valid].
pub fn verify_archive<R: Read + Seek>(
    archive: &mut R,
    options: &VerificationOptions
) -> Result<VerificationResult> {
    let layout = zip_parser::find_layout(archive)?;
    verify_layout(archive, &layout, options)
}

/// Writes `archive` to `output` with `signing_block` in place of whatever
/// block it had. `None` removes the block.
pub fn rewrite_archive<R: Read + Seek, W: Write>(
    archive: &mut R,
    output: &mut W,
    signing_block: Option<&SigningBlock>
) -> Result<u64> {
    let layout = zip_parser::find_layout(archive)?;
    rebuild_zip_with_signing_block(archive, &layout, signing_block, output)
}

/// Writes `archive` to `output` without its signing block, restoring the
/// unsigned layout. Returns the number of bytes written.
pub fn strip_signature<R: Read + Seek, W: Write>(archive: &mut R, output: &mut W) -> Result<u64> {
    let written = rewrite_archive(archive, output, None)?;
    log::info!("Stripped signing block, {written} bytes written");
    Ok(written)
}

/// Decodes the archive's signing block without verifying anything.
pub fn read_signing_block<R: Read + Seek>(archive: &mut R) -> Result<Option<SigningBlock>> {
    let layout = zip_parser::find_layout(archive)?;
    read_signing_block_at(archive, &layout)
}
