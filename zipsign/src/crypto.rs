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

use p256::ecdsa::{
    self,
    signature::{Signer as _, Verifier as _}
};
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256, Sha512};
use zipsign_common::*;

use crate::{
    crypto_keys::{PublicKey, SigningKey},
    signing_types::SignatureAlgorithm
};

/// Signs `message` (the serialised signed data), hashing it as `algorithm` requires.
pub fn sign_message(
    key: &SigningKey,
    algorithm: SignatureAlgorithm,
    message: &[u8]
) -> Result<Vec<u8>> {
    match (key, algorithm) {
        (SigningKey::Rsa(key), SignatureAlgorithm::RsaSsaPkcs1v1_5WithSha2_256) => {
            let digest = Sha256::digest(message);
            let padding = Pkcs1v15Sign::new::<Sha256>();
            Ok(key.sign(padding, &digest)?)
        }
        (SigningKey::Rsa(key), SignatureAlgorithm::RsaSsaPkcs1v1_5WithSha2_512) => {
            let digest = Sha512::digest(message);
            let padding = Pkcs1v15Sign::new::<Sha512>();
            Ok(key.sign(padding, &digest)?)
        }
        (SigningKey::EcdsaP256(key), SignatureAlgorithm::EcdsaP256WithSha2_256) => {
            // Deterministic (RFC 6979), and always 64 bytes
            let signature: ecdsa::Signature = key.try_sign(message)?;
            Ok(signature.to_bytes().to_vec())
        }
        _ => Err(ZipSignError::KeyAlgorithmMismatch {
            algorithm_id: algorithm.id()
        })
    }
}

pub fn verify_message(
    key: &PublicKey,
    algorithm: SignatureAlgorithm,
    message: &[u8],
    signature: &[u8]
) -> Result<()> {
    let verified = match (key, algorithm) {
        (PublicKey::Rsa(key), SignatureAlgorithm::RsaSsaPkcs1v1_5WithSha2_256) => {
            let digest = Sha256::digest(message);
            key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
                .is_ok()
        }
        (PublicKey::Rsa(key), SignatureAlgorithm::RsaSsaPkcs1v1_5WithSha2_512) => {
            let digest = Sha512::digest(message);
            key.verify(Pkcs1v15Sign::new::<Sha512>(), &digest, signature)
                .is_ok()
        }
        (PublicKey::EcdsaP256(key), SignatureAlgorithm::EcdsaP256WithSha2_256) => {
            ecdsa::Signature::from_slice(signature)
                .and_then(|signature| key.verify(message, &signature))
                .is_ok()
        }
        _ => {
            return Err(ZipSignError::KeyAlgorithmMismatch {
                algorithm_id: algorithm.id()
            })
        }
    };

    if verified {
        Ok(())
    } else {
        Err(ZipSignError::SignatureInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::thread_rng;
    use rsa::RsaPrivateKey;

    #[test]
    fn ecdsa_round_trip_and_tamper() {
        let key = SigningKey::EcdsaP256(ecdsa::SigningKey::random(&mut thread_rng()));
        let algorithm = SignatureAlgorithm::EcdsaP256WithSha2_256;
        let signature = sign_message(&key, algorithm, b"signed data").unwrap();
        assert_eq!(signature.len(), 64);

        let public = key.public_key();
        verify_message(&public, algorithm, b"signed data", &signature).unwrap();
        assert!(matches!(
            verify_message(&public, algorithm, b"signed dada", &signature),
            Err(ZipSignError::SignatureInvalid)
        ));
    }

    #[test]
    fn ecdsa_is_deterministic() {
        let key = SigningKey::EcdsaP256(ecdsa::SigningKey::random(&mut thread_rng()));
        let algorithm = SignatureAlgorithm::EcdsaP256WithSha2_256;
        assert_eq!(
            sign_message(&key, algorithm, b"x").unwrap(),
            sign_message(&key, algorithm, b"x").unwrap()
        );
    }

    #[test]
    fn rsa_key_cannot_make_ecdsa_signature() {
        let key = SigningKey::Rsa(RsaPrivateKey::new(&mut thread_rng(), 1024).unwrap());
        assert!(matches!(
            sign_message(&key, SignatureAlgorithm::EcdsaP256WithSha2_256, b"x"),
            Err(ZipSignError::KeyAlgorithmMismatch {
                algorithm_id: 0x0201
            })
        ));
    }

    #[test]
    fn rsa_sha512_round_trip() {
        let key = SigningKey::Rsa(RsaPrivateKey::new(&mut thread_rng(), 1024).unwrap());
        let algorithm = SignatureAlgorithm::RsaSsaPkcs1v1_5WithSha2_512;
        let signature = sign_message(&key, algorithm, b"payload").unwrap();
        // RSA signatures are always as long as the modulus
        assert_eq!(signature.len(), 128);
        verify_message(&key.public_key(), algorithm, b"payload", &signature).unwrap();
        assert!(verify_message(
            &key.public_key(),
            SignatureAlgorithm::RsaSsaPkcs1v1_5WithSha2_256,
            b"payload",
            &signature
        )
        .is_err());
    }
}
