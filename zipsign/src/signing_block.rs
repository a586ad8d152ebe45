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

use std::io::{Read, Seek};

use crate::{
    block_codec::encode_signing_block,
    certificate::public_key_from_certificate,
    crypto_keys::SigningKey,
    hasher::{composite_digests, compute_contents_digests, compute_directory_digests},
    signing_types::{DigestAlgorithm, SignatureAlgorithm, SignedData, Signer, SigningBlock},
    zip_parser::ArchiveLayout
};
use zipsign_common::*;

// Every length in a block depends only on the keys and algorithms, so the
// second pass always settles it. The rest is slack.
const MAX_SIGNING_PASSES: usize = 4;

/// One signer to add to the block.
#[derive(Debug, Clone)]
pub struct SigningRequest {
    pub private_key: SigningKey,
    /// X.509 certificates (ASN.1 DER form), signer first
    pub certificate_chain: Vec<Vec<u8>>,
    pub digest_algorithms: Vec<DigestAlgorithm>,
    pub signature_algorithm: SignatureAlgorithm
}

impl SigningRequest {
    /// SHA-256 content digests, signed with the key's default algorithm.
    pub fn new(private_key: SigningKey, certificate_chain: Vec<Vec<u8>>) -> SigningRequest {
        let signature_algorithm = private_key.default_signature_algorithm();
        SigningRequest {
            private_key,
            certificate_chain,
            digest_algorithms: vec![DigestAlgorithm::Sha256],
            signature_algorithm
        }
    }

    pub fn with_digest_algorithms(mut self, digest_algorithms: Vec<DigestAlgorithm>) -> Self {
        self.digest_algorithms = digest_algorithms;
        self
    }

    pub fn with_signature_algorithm(mut self, signature_algorithm: SignatureAlgorithm) -> Self {
        self.signature_algorithm = signature_algorithm;
        self
    }

    fn validate(&self) -> Result<()> {
        let Some(signer_certificate) = self.certificate_chain.first() else {
            return Err(ZipSignError::EmptyCertificateChain);
        };
        if self.digest_algorithms.is_empty() {
            return Err(ZipSignError::NoDigestAlgorithms);
        }
        let key_type = self.private_key.key_type();
        if self.signature_algorithm.key_type() != key_type {
            return Err(ZipSignError::KeyAlgorithmMismatch {
                algorithm_id: self.signature_algorithm.id()
            });
        }
        match public_key_from_certificate(signer_certificate, key_type) {
            Ok(public_key) if public_key == self.private_key.public_key() => Ok(()),
            Err(err @ ZipSignError::CertificateDecodingFailed(_)) => Err(err),
            _ => Err(ZipSignError::CertificateKeyMismatch)
        }
    }

    fn distinct_digest_algorithms(&self) -> Vec<DigestAlgorithm> {
        distinct(self.digest_algorithms.iter().copied())
    }
}

fn distinct(algorithms: impl Iterator<Item = DigestAlgorithm>) -> Vec<DigestAlgorithm> {
    let mut seen = vec![];
    for algorithm in algorithms {
        if !seen.contains(&algorithm) {
            seen.push(algorithm);
        }
    }
    seen
}

/// Builds a signing block for the archive described by `layout`, to be
/// inserted right after its entry data.
pub fn compute_signing_block_for_layout<R: Read + Seek>(
    archive: &mut R,
    layout: &ArchiveLayout,
    requests: &[SigningRequest]
) -> Result<SigningBlock> {
    if requests.is_empty() {
        return Err(ZipSignError::NoSigningRequests);
    }
    for request in requests {
        request.validate()?;
    }

    // Each algorithm is computed once, however many signers ask for it
    let algorithms = distinct(
        requests
            .iter()
            .flat_map(|request| request.digest_algorithms.iter().copied())
    );
    let contents = compute_contents_digests(archive, layout, &algorithms)?;

    // Dry-run the block to figure out how long it will be given our keys.
    // The directory digest depends on that length through the patched
    // central directory offset.
    let placeholders: Vec<Vec<u8>> = algorithms
        .iter()
        .map(|algorithm| vec![0; algorithm.output_len()])
        .collect();
    let dry_run = assemble_block(requests, &algorithms, &placeholders)?;
    let mut block_len = encode_signing_block(&dry_run)?.len() as u64;

    for pass in 1..=MAX_SIGNING_PASSES {
        let cd_start = layout.entry_data.end + block_len;
        let directory = compute_directory_digests(archive, layout, cd_start, &algorithms)?;
        let composite = composite_digests(&algorithms, &contents, &directory);

        // Compute again using the real digests this time
        let block = assemble_block(requests, &algorithms, &composite)?;
        let encoded_len = encode_signing_block(&block)?.len() as u64;
        log::debug!(
            "Signing pass {pass}: expected {block_len} byte block, got {encoded_len} (central directory at {cd_start})"
        );
        if encoded_len == block_len {
            return Ok(block);
        }
        block_len = encoded_len;
    }

    Err(ZipSignError::SigningBlockUnstable)
}

fn assemble_block(
    requests: &[SigningRequest],
    algorithms: &[DigestAlgorithm],
    composite: &[Vec<u8>]
) -> Result<SigningBlock> {
    let signers = requests
        .iter()
        .map(|request| {
            let wanted = request.distinct_digest_algorithms();
            let digests = wanted
                .iter()
                .filter_map(|algorithm| {
                    algorithms
                        .iter()
                        .position(|candidate| candidate == algorithm)
                        .map(|index| composite[index].clone())
                })
                .collect();
            let signed_data = SignedData::new(&wanted, digests, &request.certificate_chain);
            Signer::new(signed_data, &request.private_key, request.signature_algorithm)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(SigningBlock::from_signers(signers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hasher::compute_composite_digests, zip_parser::find_layout};
    use p256::{ecdsa, pkcs8::DecodePrivateKey};
    use rcgen::{CertificateParams, KeyPair};
    use std::io::Cursor;
    use zipsign_zip::{stored_zip, File};

    fn ecdsa_request() -> SigningRequest {
        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let certificate = CertificateParams::new(vec![])
            .unwrap()
            .self_signed(&key_pair)
            .unwrap();
        let key = ecdsa::SigningKey::from_pkcs8_der(&key_pair.serialize_der()).unwrap();
        SigningRequest::new(key.into(), vec![certificate.der().to_vec()])
    }

    fn archive() -> Vec<u8> {
        stored_zip(
            &[
                File {
                    path: "plugin.json".into(),
                    data: br#"{"id":"demo"}"#.to_vec()
                },
                File {
                    path: "lib/demo.so".into(),
                    data: vec![0x7F; 4000]
                },
            ],
            b"",
            false
        )
        .unwrap()
    }

    fn sign(requests: &[SigningRequest]) -> Result<SigningBlock> {
        let zip = archive();
        let mut cursor = Cursor::new(&zip);
        let layout = find_layout(&mut cursor)?;
        compute_signing_block_for_layout(&mut cursor, &layout, requests)
    }

    #[test]
    fn rejects_bad_requests_in_order() {
        assert!(matches!(sign(&[]), Err(ZipSignError::NoSigningRequests)));

        let mut request = ecdsa_request();
        request.certificate_chain.clear();
        request.digest_algorithms.clear();
        assert!(matches!(sign(&[request]), Err(ZipSignError::EmptyCertificateChain)));

        let request = ecdsa_request().with_digest_algorithms(vec![]);
        assert!(matches!(sign(&[request]), Err(ZipSignError::NoDigestAlgorithms)));

        let request = ecdsa_request()
            .with_signature_algorithm(SignatureAlgorithm::RsaSsaPkcs1v1_5WithSha2_256);
        assert!(matches!(
            sign(&[request]),
            Err(ZipSignError::KeyAlgorithmMismatch {
                algorithm_id: 0x0103
            })
        ));
    }

    #[test]
    fn rejects_key_that_does_not_match_certificate() {
        let mut request = ecdsa_request();
        request.certificate_chain = ecdsa_request().certificate_chain;
        assert!(matches!(sign(&[request]), Err(ZipSignError::CertificateKeyMismatch)));
    }

    #[test]
    fn digests_cover_the_final_layout() {
        let zip = archive();
        let mut cursor = Cursor::new(&zip);
        let layout = find_layout(&mut cursor).unwrap();
        let request = ecdsa_request()
            .with_digest_algorithms(vec![DigestAlgorithm::Sha512, DigestAlgorithm::Sha256]);
        let block = compute_signing_block_for_layout(&mut cursor, &layout, &[request]).unwrap();

        let block_len = encode_signing_block(&block).unwrap().len() as u64;
        let algorithms = [DigestAlgorithm::Sha512, DigestAlgorithm::Sha256];
        let expected = compute_composite_digests(
            &mut cursor,
            &layout,
            layout.entry_data.end + block_len,
            &algorithms
        )
        .unwrap();

        let signer = block.signers().next().unwrap();
        let digests: Vec<_> = signer.signed_data.digests.iter().map(|d| d.digest.clone()).collect();
        assert_eq!(digests, expected);
        assert_eq!(signer.signed_data.digests[0].algorithm_id, 0x0002);
    }

    #[test]
    fn shared_algorithms_and_duplicates_collapse() {
        let first = ecdsa_request().with_digest_algorithms(vec![
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha256,
        ]);
        let second = ecdsa_request()
            .with_digest_algorithms(vec![DigestAlgorithm::Sha512, DigestAlgorithm::Sha256]);
        let block = sign(&[first, second]).unwrap();

        let signers: Vec<_> = block.signers().collect();
        assert_eq!(signers.len(), 2);
        assert_eq!(signers[0].signed_data.digests.len(), 1);
        // Same algorithm over the same archive, same composite digest
        assert_eq!(
            signers[0].signed_data.digests[0].digest,
            signers[1].signed_data.digests[1].digest
        );
    }
}
