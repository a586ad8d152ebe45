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

//! Checks every signer in a signing block against the archive around it.
//!
//! Digests are always recomputed from the archive; the ones embedded in the
//! block are only compared against. Deciding whether the terminal certificate
//! of a chain is trusted is left to the caller.

use std::io::{Read, Seek};
use std::ops::Range;

use chrono::{DateTime, Utc};
use zipsign_common::*;

use crate::{
    block_codec::{decode_signing_block, encode_signed_data},
    certificate::{check_chain_structure, public_key_from_certificate, ChainFault},
    crypto::verify_message,
    hasher::compute_composite_digests,
    signing_types::{DigestAlgorithm, SignatureAlgorithm, Signer, SigningBlock},
    zip_parser::{read_range, ArchiveLayout}
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationPolicy {
    /// Every signer entry must verify.
    #[default]
    RequireAll,
    /// At least one signer entry must verify.
    RequireAny
}

#[derive(Debug, Clone)]
pub struct VerificationOptions {
    pub policy: VerificationPolicy,
    /// Instant the certificates must be valid at
    pub at: DateTime<Utc>
}

impl Default for VerificationOptions {
    fn default() -> Self {
        VerificationOptions {
            policy: VerificationPolicy::default(),
            at: Utc::now()
        }
    }
}

impl VerificationOptions {
    pub fn with_policy(policy: VerificationPolicy) -> Self {
        VerificationOptions {
            policy,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    pub valid: bool,
    pub signers: Vec<VerifiedSigner>,
    pub failures: Vec<SignerFailure>,
    pub digested_regions: DigestedRegions
}

/// A signer entry that passed every check.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedSigner {
    /// Position among the block's signer entries
    pub index: usize,
    pub certificate_chain: Vec<Vec<u8>>
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignerFailure {
    pub index: usize,
    pub reason: FailureReason
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    EmptyCertificateChain,
    DuplicateDigestAlgorithm { algorithm_id: u32 },
    NoSupportedDigest { algorithm_ids: Vec<u32> },
    DigestMismatch { algorithm_id: u32 },
    NoSupportedSignature { algorithm_ids: Vec<u32> },
    SignatureInvalid { algorithm_id: u32 },
    MalformedCertificate { position: usize },
    /// The signer certificate's key doesn't suit the signature algorithm
    UnusableCertificateKey,
    BrokenChain { position: usize },
    CertificateNotValidAt { position: usize }
}

/// Exactly which bytes the digests were recomputed over.
#[derive(Debug, Clone, PartialEq)]
pub struct DigestedRegions {
    pub contents: Range<u64>,
    pub central_directory: Range<u64>,
    /// Hashed with its central directory offset set to `central_directory_offset`
    pub eocd: Range<u64>,
    pub central_directory_offset: u64
}

impl VerificationResult {
    /// Turns an invalid result into the typed error of its first failure.
    pub fn ensure_valid(self) -> Result<VerificationResult> {
        if self.valid {
            return Ok(self);
        }
        Err(self
            .failures
            .first()
            .map(|failure| failure.reason.to_error())
            .unwrap_or(ZipSignError::NoSignature))
    }
}

impl VerifiedSigner {
    /// The last certificate of the chain. Whether it's trusted is up to the caller.
    pub fn terminal_certificate(&self) -> Option<&[u8]> {
        self.certificate_chain.last().map(Vec::as_slice)
    }
}

impl FailureReason {
    pub fn to_error(&self) -> ZipSignError {
        match self {
            FailureReason::EmptyCertificateChain => ZipSignError::EmptyCertificateChain,
            FailureReason::DuplicateDigestAlgorithm { algorithm_id } => {
                ZipSignError::DuplicateDigestAlgorithm {
                    algorithm_id: *algorithm_id
                }
            }
            FailureReason::NoSupportedDigest { algorithm_ids }
            | FailureReason::NoSupportedSignature { algorithm_ids } => {
                ZipSignError::UnsupportedAlgorithm(algorithm_ids.first().copied().unwrap_or(0))
            }
            FailureReason::DigestMismatch { algorithm_id } => ZipSignError::DigestMismatch {
                algorithm_id: *algorithm_id
            },
            FailureReason::SignatureInvalid { .. } => ZipSignError::SignatureInvalid,
            FailureReason::UnusableCertificateKey => {
                ZipSignError::CertificateChainInvalid { position: 0 }
            }
            FailureReason::MalformedCertificate { position }
            | FailureReason::BrokenChain { position }
            | FailureReason::CertificateNotValidAt { position } => {
                ZipSignError::CertificateChainInvalid {
                    position: *position
                }
            }
        }
    }
}

impl From<ChainFault> for FailureReason {
    fn from(value: ChainFault) -> Self {
        match value {
            ChainFault::Undecodable { position } => FailureReason::MalformedCertificate { position },
            ChainFault::IssuerMismatch { position } => FailureReason::BrokenChain { position },
            ChainFault::NotValidAt { position } => FailureReason::CertificateNotValidAt { position }
        }
    }
}

/// Reads and decodes the signing block found by the locator, if there is one.
pub fn read_signing_block_at<R: Read + Seek>(
    archive: &mut R,
    layout: &ArchiveLayout
) -> Result<Option<SigningBlock>> {
    match &layout.signing_block {
        Some(range) => {
            let bytes = read_range(archive, range.clone())?;
            Ok(Some(decode_signing_block(&bytes)?))
        }
        None => Ok(None)
    }
}

pub fn verify_layout<R: Read + Seek>(
    archive: &mut R,
    layout: &ArchiveLayout,
    options: &VerificationOptions
) -> Result<VerificationResult> {
    let block = read_signing_block_at(archive, layout)?.ok_or(ZipSignError::NoSignature)?;
    let signers: Vec<&Signer> = block.signers().collect();
    if signers.is_empty() {
        return Err(ZipSignError::NoSignature);
    }

    // The archive is already in its signed layout, so the offset to digest
    // with is where the central directory actually is
    let central_directory_offset = layout.central_directory.start;
    let mut algorithms: Vec<DigestAlgorithm> = vec![];
    for digest in signers.iter().flat_map(|signer| &signer.signed_data.digests) {
        if let Some(algorithm) = DigestAlgorithm::from_id(digest.algorithm_id) {
            if !algorithms.contains(&algorithm) {
                algorithms.push(algorithm);
            }
        }
    }
    let computed =
        compute_composite_digests(archive, layout, central_directory_offset, &algorithms)?;

    let mut verified = vec![];
    let mut failures = vec![];
    for (index, signer) in signers.into_iter().enumerate() {
        match check_signer(signer, &algorithms, &computed, options.at) {
            Ok(()) => verified.push(VerifiedSigner {
                index,
                certificate_chain: signer.signed_data.certificates.clone()
            }),
            Err(reason) => {
                log::warn!("Signer {index} failed verification: {reason:?}");
                failures.push(SignerFailure { index, reason });
            }
        }
    }

    let valid = !verified.is_empty()
        && match options.policy {
            VerificationPolicy::RequireAll => failures.is_empty(),
            VerificationPolicy::RequireAny => true
        };
    log::debug!(
        "Verified {} of {} signers, valid: {valid}",
        verified.len(),
        verified.len() + failures.len()
    );

    Ok(VerificationResult {
        valid,
        signers: verified,
        failures,
        digested_regions: DigestedRegions {
            contents: layout.entry_data.clone(),
            central_directory: layout.central_directory.clone(),
            eocd: layout.eocd.clone(),
            central_directory_offset
        }
    })
}

fn check_signer(
    signer: &Signer,
    algorithms: &[DigestAlgorithm],
    computed: &[Vec<u8>],
    at: DateTime<Utc>
) -> std::result::Result<(), FailureReason> {
    let signed_data = &signer.signed_data;
    let Some(signer_certificate) = signed_data.certificates.first() else {
        return Err(FailureReason::EmptyCertificateChain);
    };

    let mut seen = vec![];
    for digest in &signed_data.digests {
        if seen.contains(&digest.algorithm_id) {
            return Err(FailureReason::DuplicateDigestAlgorithm {
                algorithm_id: digest.algorithm_id
            });
        }
        seen.push(digest.algorithm_id);
    }

    // Digests are checked before any signature
    let mut checked_digests = 0;
    for digest in &signed_data.digests {
        let Some(algorithm) = DigestAlgorithm::from_id(digest.algorithm_id) else {
            continue;
        };
        let expected = algorithms
            .iter()
            .position(|candidate| *candidate == algorithm)
            .map(|index| &computed[index]);
        if expected != Some(&digest.digest) {
            return Err(FailureReason::DigestMismatch {
                algorithm_id: digest.algorithm_id
            });
        }
        checked_digests += 1;
    }
    if checked_digests == 0 {
        return Err(FailureReason::NoSupportedDigest { algorithm_ids: seen });
    }

    let mut checked_signatures = 0;
    for signature in &signer.signatures {
        let Some(algorithm) = SignatureAlgorithm::from_id(signature.algorithm_id) else {
            continue;
        };
        let public_key = match public_key_from_certificate(signer_certificate, algorithm.key_type()) {
            Ok(public_key) => public_key,
            Err(ZipSignError::CertificateDecodingFailed(_)) => {
                return Err(FailureReason::MalformedCertificate { position: 0 })
            }
            Err(_) => return Err(FailureReason::UnusableCertificateKey)
        };
        encode_signed_data(signed_data)
            .and_then(|message| {
                verify_message(&public_key, algorithm, &message, &signature.signature)
            })
            .map_err(|_| FailureReason::SignatureInvalid {
                algorithm_id: signature.algorithm_id
            })?;
        checked_signatures += 1;
    }
    if checked_signatures == 0 {
        return Err(FailureReason::NoSupportedSignature {
            algorithm_ids: signer
                .signatures
                .iter()
                .map(|signature| signature.algorithm_id)
                .collect()
        });
    }

    check_chain_structure(&signed_data.certificates, at)?;
    Ok(())
}
