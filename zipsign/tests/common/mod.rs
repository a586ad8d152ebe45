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

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::OnceLock;

use p256::{ecdsa, pkcs8::DecodePrivateKey};
use rcgen::{
    date_time_ymd, BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    IsCa, KeyPair
};
use rsa::{
    pkcs8::{EncodePrivateKey, LineEnding},
    RsaPrivateKey
};
use zipsign::{SigningKey, SigningRequest};
use zipsign_zip::{stored_zip, zip_files, File};

/// A private key plus the chain that certifies it, signer first.
pub struct Identity {
    pub key: SigningKey,
    pub chain: Vec<Vec<u8>>
}

impl Identity {
    pub fn request(&self) -> SigningRequest {
        SigningRequest::new(self.key.clone(), self.chain.clone())
    }
}

// 2048 bits is the smallest RSA key rcgen will certify, and slow to make
fn rsa_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap())
}

fn params(common_name: &str) -> CertificateParams {
    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, common_name);
    let mut params = CertificateParams::new(vec![]).unwrap();
    params.distinguished_name = distinguished_name;
    params
}

fn root(common_name: &str) -> (Certificate, KeyPair) {
    let key = KeyPair::generate().unwrap();
    let mut params = params(common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    (params.self_signed(&key).unwrap(), key)
}

/// RSA signer certified by an ECDSA root.
pub fn rsa_identity() -> Identity {
    let key_pair = KeyPair::from_pem(&rsa_key().to_pkcs8_pem(LineEnding::LF).unwrap()).unwrap();
    let (root, root_key) = root("Test Root");
    let leaf = params("RSA Publisher")
        .signed_by(&key_pair, &root, &root_key)
        .unwrap();
    Identity {
        key: rsa_key().clone().into(),
        chain: vec![leaf.der().to_vec(), root.der().to_vec()]
    }
}

fn ecdsa_key_pair() -> (KeyPair, SigningKey) {
    let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let key = ecdsa::SigningKey::from_pkcs8_der(&key_pair.serialize_der()).unwrap();
    (key_pair, key.into())
}

/// ECDSA signer certified by an ECDSA root.
pub fn ecdsa_identity() -> Identity {
    let (key_pair, key) = ecdsa_key_pair();
    let (root, root_key) = root("Test Root");
    let leaf = params("ECDSA Publisher")
        .signed_by(&key_pair, &root, &root_key)
        .unwrap();
    Identity {
        key,
        chain: vec![leaf.der().to_vec(), root.der().to_vec()]
    }
}

/// Self-signed, and only valid during 1999.
pub fn expired_identity() -> Identity {
    let (key_pair, key) = ecdsa_key_pair();
    let mut params = params("Old Publisher");
    params.not_before = date_time_ymd(1999, 1, 1);
    params.not_after = date_time_ymd(1999, 12, 31);
    Identity {
        key,
        chain: vec![params.self_signed(&key_pair).unwrap().der().to_vec()]
    }
}

/// Leaf followed by a root that didn't issue it.
pub fn broken_chain_identity() -> Identity {
    let mut identity = ecdsa_identity();
    let (stranger, _) = root("Some Other Root");
    identity.chain[1] = stranger.der().to_vec();
    identity
}

pub fn plugin_files() -> Vec<File> {
    vec![
        File {
            path: "META-INF/plugin.xml".into(),
            data: b"<idea-plugin><id>demo</id></idea-plugin>".to_vec()
        },
        File {
            path: "lib/demo.jar".into(),
            data: (0..5000).map(|i| (i % 13) as u8).collect()
        },
        File {
            path: "icons/logo.svg".into(),
            data: b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>".repeat(20)
        },
    ]
}

/// A deflated archive written by the `zip` crate.
pub fn plugin_archive() -> Vec<u8> {
    let mut out = Cursor::new(vec![]);
    zip_files(&plugin_files(), &mut out).unwrap();
    out.into_inner()
}

/// Stored entries only, with byte positions predictable from the inputs.
pub fn stored_archive(entries: usize, comment: &[u8], zip64: bool) -> Vec<u8> {
    let files: Vec<File> = (0..entries)
        .map(|i| File {
            path: format!("entry-{i}.txt"),
            data: format!("contents of entry {i}\n").repeat(i + 1).into_bytes()
        })
        .collect();
    stored_zip(&files, comment, zip64).unwrap()
}
