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

use crate::{
    block_codec::{current_scheme_version, encode_signed_data},
    crypto::sign_message,
    crypto_keys::SigningKey,
    signing_types::{
        Digest, DigestAlgorithm, Signature, SignatureAlgorithm, SignedData, Signer,
        SigningBlock, SigningBlockPair
    }
};
use zipsign_common::*;

// Constructs the Signed Data for one signer.
// This is the data that gets signed by the crypto module;
// it does not, itself, contain a cryptographic signature.
impl SignedData {
    pub fn new(
        algorithms: &[DigestAlgorithm],
        composite_digests: Vec<Vec<u8>>,
        certificate_chain: &[Vec<u8>]
    ) -> SignedData {
        SignedData {
            digests: algorithms
                .iter()
                .zip(composite_digests)
                .map(|(algorithm, digest)| Digest {
                    algorithm_id: algorithm.id(),
                    digest
                })
                .collect(),
            certificates: certificate_chain.to_vec(),
            attributes: vec![current_scheme_version()]
        }
    }
}

impl Signer {
    /// Signs the serialised `signed_data`.
    /// NOTE: The signature does NOT cover the length prefix.
    pub fn new(
        signed_data: SignedData,
        key: &SigningKey,
        algorithm: SignatureAlgorithm
    ) -> Result<Signer> {
        let message = encode_signed_data(&signed_data)?;
        let signature = sign_message(key, algorithm, &message)?;
        Ok(Signer {
            signed_data,
            signatures: vec![Signature {
                algorithm_id: algorithm.id(),
                signature
            }]
        })
    }
}

impl SigningBlock {
    pub fn from_signers(signers: Vec<Signer>) -> SigningBlock {
        SigningBlock {
            pairs: signers.into_iter().map(SigningBlockPair::Signer).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block_codec::decode_signed_data, crypto::verify_message};
    use p256::ecdsa;
    use rand::thread_rng;

    #[test]
    fn signed_data_pairs_digests_with_algorithms() {
        let signed_data = SignedData::new(
            &[DigestAlgorithm::Sha256, DigestAlgorithm::Sha512],
            vec![vec![1; 32], vec![2; 64]],
            &[vec![0x30, 0x00]]
        );
        assert_eq!(signed_data.digests[0].algorithm_id, 0x0001);
        assert_eq!(signed_data.digests[1].digest, vec![2; 64]);
        assert_eq!(signed_data.scheme_version(), Some(1));
    }

    #[test]
    fn signer_signature_covers_serialised_signed_data() {
        let key = SigningKey::EcdsaP256(ecdsa::SigningKey::random(&mut thread_rng()));
        let algorithm = SignatureAlgorithm::EcdsaP256WithSha2_256;
        let signed_data = SignedData::new(&[DigestAlgorithm::Sha256], vec![vec![7; 32]], &[]);
        let signer = Signer::new(signed_data.clone(), &key, algorithm).unwrap();

        let message = encode_signed_data(&signer.signed_data).unwrap();
        assert_eq!(decode_signed_data(&message).unwrap(), signed_data);
        verify_message(
            &key.public_key(),
            algorithm,
            &message,
            &signer.signatures[0].signature
        )
        .unwrap();
    }
}
