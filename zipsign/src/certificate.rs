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

//! Structural checks on X.509 certificate chains.
//!
//! Nothing here decides whether a chain is *trusted*: the terminal
//! certificate is handed back to the caller, who compares it against
//! whatever roots they accept.

use chrono::{DateTime, Utc};
use rasn_pkix::{Certificate, Time};
use zipsign_common::*;

use crate::{crypto_keys::PublicKey, signing_types::KeyType};

/// Why a chain failed its structural checks. Positions index the chain,
/// signer certificate first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainFault {
    Undecodable { position: usize },
    IssuerMismatch { position: usize },
    NotValidAt { position: usize }
}

pub fn decode_certificate(der: &[u8]) -> Result<Certificate> {
    Ok(rasn::der::decode::<Certificate>(der)?)
}

/// Extracts the subject public key from an ASN.1 DER certificate.
pub fn public_key_from_certificate(der: &[u8], key_type: KeyType) -> Result<PublicKey> {
    let certificate = decode_certificate(der)?;
    let spki = rasn::der::encode(&certificate.tbs_certificate.subject_public_key_info)?;
    PublicKey::from_public_key_der(&spki, key_type)
}

/// Checks that each certificate was issued by the next one along and that
/// every certificate is valid at `at`.
pub fn check_chain_structure(chain: &[Vec<u8>], at: DateTime<Utc>) -> std::result::Result<(), ChainFault> {
    let certificates = chain
        .iter()
        .enumerate()
        .map(|(position, der)| {
            decode_certificate(der).map_err(|_| ChainFault::Undecodable { position })
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (position, certificate) in certificates.iter().enumerate() {
        let validity = &certificate.tbs_certificate.validity;
        if at < to_utc(&validity.not_before) || at > to_utc(&validity.not_after) {
            return Err(ChainFault::NotValidAt { position });
        }
    }

    for (position, pair) in certificates.windows(2).enumerate() {
        let issuer = rasn::der::encode(&pair[0].tbs_certificate.issuer);
        let next_subject = rasn::der::encode(&pair[1].tbs_certificate.subject);
        match (issuer, next_subject) {
            (Ok(issuer), Ok(subject)) if issuer == subject => {}
            _ => return Err(ChainFault::IssuerMismatch { position })
        }
    }

    Ok(())
}

fn to_utc(time: &Time) -> DateTime<Utc> {
    match time {
        Time::Utc(time) => *time,
        Time::General(time) => time.with_timezone(&Utc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{date_time_ymd, CertificateParams, DistinguishedName, DnType, KeyPair};

    fn params(common_name: &str) -> CertificateParams {
        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, common_name);
        let mut params = CertificateParams::new(vec![]).unwrap();
        params.distinguished_name = distinguished_name;
        params
    }

    // root -> intermediate -> leaf, returned leaf first
    fn chain() -> Vec<Vec<u8>> {
        let root_key = KeyPair::generate().unwrap();
        let root = params("Test Root").self_signed(&root_key).unwrap();
        let intermediate_key = KeyPair::generate().unwrap();
        let intermediate = params("Test Intermediate")
            .signed_by(&intermediate_key, &root, &root_key)
            .unwrap();
        let leaf_key = KeyPair::generate().unwrap();
        let leaf = params("Plugin Vendor")
            .signed_by(&leaf_key, &intermediate, &intermediate_key)
            .unwrap();
        vec![
            leaf.der().to_vec(),
            intermediate.der().to_vec(),
            root.der().to_vec(),
        ]
    }

    #[test]
    fn accepts_linked_chain() {
        assert_eq!(check_chain_structure(&chain(), Utc::now()), Ok(()));
    }

    #[test]
    fn rejects_out_of_order_chain() {
        let mut chain = chain();
        chain.swap(1, 2);
        assert_eq!(
            check_chain_structure(&chain, Utc::now()),
            Err(ChainFault::IssuerMismatch { position: 0 })
        );
    }

    #[test]
    fn rejects_expired_certificate() {
        let key = KeyPair::generate().unwrap();
        let mut expired = params("Old Vendor");
        expired.not_before = date_time_ymd(1999, 1, 1);
        expired.not_after = date_time_ymd(2000, 1, 1);
        let cert = expired.self_signed(&key).unwrap();
        assert_eq!(
            check_chain_structure(&[cert.der().to_vec()], Utc::now()),
            Err(ChainFault::NotValidAt { position: 0 })
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(
            check_chain_structure(&[vec![0x30, 0x00]], Utc::now()),
            Err(ChainFault::Undecodable { position: 0 })
        );
    }

    #[test]
    fn extracts_ecdsa_public_key() {
        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let cert = params("Vendor").self_signed(&key).unwrap();
        let public_key = public_key_from_certificate(cert.der(), KeyType::EcdsaP256).unwrap();
        assert_eq!(public_key.key_type(), KeyType::EcdsaP256);
        assert!(public_key_from_certificate(cert.der(), KeyType::Rsa).is_err());
    }
}
