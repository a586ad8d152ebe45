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

use p256::ecdsa;
use rsa::{pkcs8::DecodePublicKey, RsaPrivateKey, RsaPublicKey};
use zipsign_common::*;

use crate::signing_types::{KeyType, SignatureAlgorithm};

/// A private key the caller has already loaded, eg. from a PKCS#12 or `.pem`
/// file.
#[derive(Clone)]
pub enum SigningKey {
    Rsa(RsaPrivateKey),
    /// ECDSA on the NIST P-256 (secp256r1) curve
    EcdsaP256(ecdsa::SigningKey)
}

/// The public half of a [SigningKey], as found in a certificate.
#[derive(Debug, Clone, PartialEq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    EcdsaP256(ecdsa::VerifyingKey)
}

impl SigningKey {
    pub fn key_type(&self) -> KeyType {
        match self {
            SigningKey::Rsa(_) => KeyType::Rsa,
            SigningKey::EcdsaP256(_) => KeyType::EcdsaP256
        }
    }

    /// The signature algorithm used when a request doesn't pick one.
    pub fn default_signature_algorithm(&self) -> SignatureAlgorithm {
        match self {
            SigningKey::Rsa(_) => SignatureAlgorithm::RsaSsaPkcs1v1_5WithSha2_256,
            SigningKey::EcdsaP256(_) => SignatureAlgorithm::EcdsaP256WithSha2_256
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            SigningKey::Rsa(key) => PublicKey::Rsa(RsaPublicKey::from(key)),
            SigningKey::EcdsaP256(key) => PublicKey::EcdsaP256(ecdsa::VerifyingKey::from(key))
        }
    }
}

// Private key material stays out of logs
impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningKey::{:?}", self.key_type())
    }
}

impl From<RsaPrivateKey> for SigningKey {
    fn from(value: RsaPrivateKey) -> Self {
        SigningKey::Rsa(value)
    }
}

impl From<ecdsa::SigningKey> for SigningKey {
    fn from(value: ecdsa::SigningKey) -> Self {
        SigningKey::EcdsaP256(value)
    }
}

impl PublicKey {
    /// Parses an ASN.1 DER SubjectPublicKeyInfo holding a key of `key_type`.
    pub fn from_public_key_der(der: &[u8], key_type: KeyType) -> Result<PublicKey> {
        Ok(match key_type {
            KeyType::Rsa => PublicKey::Rsa(RsaPublicKey::from_public_key_der(der)?),
            KeyType::EcdsaP256 => {
                PublicKey::EcdsaP256(ecdsa::VerifyingKey::from_public_key_der(der)?)
            }
        })
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            PublicKey::Rsa(_) => KeyType::Rsa,
            PublicKey::EcdsaP256(_) => KeyType::EcdsaP256
        }
    }
}
