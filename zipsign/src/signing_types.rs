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

// Types carried inside the ZIP Signing Block, plus the deku records they are
// written as. All integers are little-endian; see `block_codec` for the layout.
use deku::prelude::*;
use deku::writer::Writer;
use std::io::Cursor;
use zipsign_common::*;

pub const SIGNING_BLOCK_MAGIC: &[u8; 16] = b"ZIP Sig Block 42";
/// Pair id of a signer entry in signature scheme v1. One pair per signer.
pub const SIGNATURE_SCHEME_V1_BLOCK_ID: u32 = 0x5A1B0001;
/// Attribute id reserved for the signature scheme version.
pub const SCHEME_VERSION_ATTRIBUTE_ID: u32 = 0x00000001;
pub const CURRENT_SCHEME_VERSION: u32 = 1;

// Trailing size field plus magic
pub const SIGNING_BLOCK_FOOTER_SIZE: usize = 8 + 16;
// Both size fields plus magic
pub const SIGNING_BLOCK_MIN_SIZE: usize = 8 + SIGNING_BLOCK_FOOTER_SIZE;

/// The decoded ZIP Signing Block.
///
/// On the wire it is framed by a u64 size at both ends (counting everything
/// except the leading size field) and followed by [SIGNING_BLOCK_MAGIC].
#[derive(Debug, PartialEq, Clone, Default)]
pub struct SigningBlock {
    pub pairs: Vec<SigningBlockPair>
}

#[derive(Debug, PartialEq, Clone)]
pub enum SigningBlockPair {
    Signer(Signer),
    /// Any pair this version doesn't understand, kept byte-for-byte.
    Unrecognized { id: u32, value: Vec<u8> }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Signer {
    pub signed_data: SignedData,
    pub signatures: Vec<Signature>
}

/// The payload a [Signature] is computed over.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct SignedData {
    pub digests: Vec<Digest>,
    // Array of X.509 Certificates (ASN.1 DER form), signer first
    pub certificates: Vec<Vec<u8>>,
    pub attributes: Vec<Attribute>
}

#[derive(Debug, PartialEq, Clone)]
pub struct Digest {
    pub algorithm_id: u32,
    pub digest: Vec<u8>
}

#[derive(Debug, PartialEq, Clone)]
pub struct Signature {
    pub algorithm_id: u32,
    pub signature: Vec<u8>
}

/// An additional attribute of signed data. `length` is the attribute's
/// length prefix, which counts the id.
#[derive(Debug, PartialEq, DekuRead, DekuWrite, Clone)]
#[deku(id_type = "u32", id_endian = "little", ctx = "length: u32")]
pub enum Attribute {
    #[deku(id = "SCHEME_VERSION_ATTRIBUTE_ID")]
    SchemeVersion(#[deku(endian = "little")] u32),
    /// Any attribute this version doesn't understand, kept byte-for-byte.
    #[deku(id_pat = "_")]
    Unrecognized {
        id: u32,
        #[deku(bytes_read = "length - 4")]
        value: Vec<u8>
    }
}

impl SigningBlock {
    pub fn signers(&self) -> impl Iterator<Item = &Signer> {
        self.pairs.iter().filter_map(|pair| match pair {
            SigningBlockPair::Signer(signer) => Some(signer),
            SigningBlockPair::Unrecognized { .. } => None
        })
    }

    pub fn signers_mut(&mut self) -> impl Iterator<Item = &mut Signer> {
        self.pairs.iter_mut().filter_map(|pair| match pair {
            SigningBlockPair::Signer(signer) => Some(signer),
            SigningBlockPair::Unrecognized { .. } => None
        })
    }
}

impl SigningBlockPair {
    pub fn id(&self) -> u32 {
        match self {
            SigningBlockPair::Signer(_) => SIGNATURE_SCHEME_V1_BLOCK_ID,
            SigningBlockPair::Unrecognized { id, .. } => *id
        }
    }
}

impl Attribute {
    pub fn id(&self) -> u32 {
        match self {
            Attribute::SchemeVersion(_) => SCHEME_VERSION_ATTRIBUTE_ID,
            Attribute::Unrecognized { id, .. } => *id
        }
    }
}

impl SignedData {
    pub fn scheme_version(&self) -> Option<u32> {
        self.attributes.iter().find_map(|attr| match attr {
            Attribute::SchemeVersion(version) => Some(*version),
            Attribute::Unrecognized { .. } => None
        })
    }
}

/// Hash functions usable for content digests.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512
}

impl DigestAlgorithm {
    pub fn id(self) -> u32 {
        match self {
            DigestAlgorithm::Sha256 => 0x0001,
            DigestAlgorithm::Sha512 => 0x0002
        }
    }

    pub fn from_id(id: u32) -> Option<DigestAlgorithm> {
        match id {
            0x0001 => Some(DigestAlgorithm::Sha256),
            0x0002 => Some(DigestAlgorithm::Sha512),
            _ => None
        }
    }

    pub fn output_len(self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha512 => 64
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum KeyType {
    Rsa,
    EcdsaP256
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum SignatureAlgorithm {
    RsaSsaPkcs1v1_5WithSha2_256,
    RsaSsaPkcs1v1_5WithSha2_512,
    // Fixed-size r || s encoding, not DER
    EcdsaP256WithSha2_256
}

impl SignatureAlgorithm {
    pub fn id(self) -> u32 {
        match self {
            SignatureAlgorithm::RsaSsaPkcs1v1_5WithSha2_256 => 0x0103,
            SignatureAlgorithm::RsaSsaPkcs1v1_5WithSha2_512 => 0x0104,
            SignatureAlgorithm::EcdsaP256WithSha2_256 => 0x0201
        }
    }

    pub fn from_id(id: u32) -> Option<SignatureAlgorithm> {
        match id {
            0x0103 => Some(SignatureAlgorithm::RsaSsaPkcs1v1_5WithSha2_256),
            0x0104 => Some(SignatureAlgorithm::RsaSsaPkcs1v1_5WithSha2_512),
            0x0201 => Some(SignatureAlgorithm::EcdsaP256WithSha2_256),
            _ => None
        }
    }

    pub fn key_type(self) -> KeyType {
        match self {
            SignatureAlgorithm::RsaSsaPkcs1v1_5WithSha2_256
            | SignatureAlgorithm::RsaSsaPkcs1v1_5WithSha2_512 => KeyType::Rsa,
            SignatureAlgorithm::EcdsaP256WithSha2_256 => KeyType::EcdsaP256
        }
    }
}

/// The last 24 bytes of a signing block, which is all a reader needs to find
/// where the block starts.
#[derive(Debug, PartialEq, DekuRead, DekuWrite, Clone)]
#[deku(endian = "little")]
pub struct SigningBlockFooter {
    pub size_of_block: u64,
    pub magic: [u8; 16]
}

// Wire records. Length fields are filled in by the constructors below and
// checked against their contents when a block is decoded.

#[derive(Debug, PartialEq, DekuWrite, Clone)]
pub struct SigningBlockRecord {
    // Counts everything after this field, the same as `footer.size_of_block`
    #[deku(endian = "little")]
    pub size_of_block: u64,
    pub pairs: Vec<PairRecord>,
    pub footer: SigningBlockFooter
}

#[derive(Debug, PartialEq, DekuRead, DekuWrite, Clone)]
pub struct PairRecord {
    // The id plus the value
    #[deku(endian = "little", assert = "*length >= 4")]
    pub length: u64,
    #[deku(ctx = "*length")]
    pub value: PairValue
}

#[derive(Debug, PartialEq, DekuRead, DekuWrite, Clone)]
#[deku(id_type = "u32", id_endian = "little", ctx = "length: u64")]
pub enum PairValue {
    #[deku(id = "SIGNATURE_SCHEME_V1_BLOCK_ID")]
    Signer(SignerRecord),
    #[deku(id_pat = "_")]
    Unrecognized {
        id: u32,
        #[deku(count = "length - 4")]
        value: Vec<u8>
    }
}

#[derive(Debug, PartialEq, DekuRead, DekuWrite, Clone)]
pub struct SignerRecord {
    pub signed_data: U32LengthPrefixed<SignedDataRecord>,
    pub signatures: U32LengthPrefixedSequence<U32LengthPrefixed<SignatureRecord>>
}

#[derive(Debug, PartialEq, DekuRead, DekuWrite, Clone)]
pub struct SignedDataRecord {
    pub digests: U32LengthPrefixedSequence<U32LengthPrefixed<DigestRecord>>,
    // Array of X.509 Certificates (ASN.1 DER form) as bytes
    pub certificates: U32LengthPrefixedSequence<U32LengthPrefixedBytes>,
    pub attributes: U32LengthPrefixedSequence<AttributeRecord>
}

#[derive(Debug, PartialEq, DekuRead, DekuWrite, Clone)]
pub struct DigestRecord {
    #[deku(endian = "little")]
    pub algorithm_id: u32,
    pub digest: U32LengthPrefixedBytes
}

#[derive(Debug, PartialEq, DekuRead, DekuWrite, Clone)]
pub struct SignatureRecord {
    #[deku(endian = "little")]
    pub algorithm_id: u32,
    pub signature: U32LengthPrefixedBytes
}

#[derive(Debug, PartialEq, DekuRead, DekuWrite, Clone)]
pub struct AttributeRecord {
    #[deku(endian = "little", assert = "*length >= 4")]
    pub length: u32,
    #[deku(ctx = "*length")]
    pub attribute: Attribute
}

// Helper structures

// Everything inside a pair uses u32 lengths
#[derive(Debug, PartialEq, DekuRead, DekuWrite, Clone)]
pub struct U32LengthPrefixed<T>
where
    T: DekuWriter + for<'a> DekuReader<'a>
{
    #[deku(endian = "little")]
    pub length: u32,
    pub value: T
}

#[derive(Debug, PartialEq, DekuRead, DekuWrite, Clone)]
pub struct U32LengthPrefixedSequence<T>
where
    T: DekuWriter + for<'a> DekuReader<'a>
{
    #[deku(endian = "little")]
    pub length: u32,
    #[deku(bytes_read = "length")]
    pub items: Vec<T>
}

// Read a byte at a time, so a corrupt length fails at the end of the input
// instead of allocating up front
#[derive(Debug, PartialEq, DekuRead, DekuWrite, Clone)]
pub struct U32LengthPrefixedBytes {
    #[deku(endian = "little")]
    pub length: u32,
    #[deku(bytes_read = "length")]
    pub bytes: Vec<u8>
}

// Constructs length-prefixed things
pub fn len_pfx_u32<T>(thing: T) -> Result<U32LengthPrefixed<T>>
where
    T: DekuWriter + for<'a> DekuReader<'a>
{
    Ok(U32LengthPrefixed {
        length: u32_length(encoded_len(&thing)?)?,
        value: thing
    })
}

pub fn len_pfx_seq<T>(items: Vec<T>) -> Result<U32LengthPrefixedSequence<T>>
where
    T: DekuWriter + for<'a> DekuReader<'a>
{
    Ok(U32LengthPrefixedSequence {
        length: u32_length(encoded_len(&items)?)?,
        items
    })
}

pub fn len_pfx_bytes(bytes: &[u8]) -> Result<U32LengthPrefixedBytes> {
    Ok(U32LengthPrefixedBytes {
        length: u32_length(bytes.len())?,
        bytes: bytes.to_vec()
    })
}

/// Number of bytes `thing` serialises to.
pub fn encoded_len<T: DekuWriter>(thing: &T) -> Result<usize> {
    let mut out = Cursor::new(vec![]);
    let mut writer = Writer::new(&mut out);
    thing.to_writer(&mut writer, ())?;
    writer.finalize()?;
    Ok(out.into_inner().len())
}

pub fn u32_length(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        BlockFormatError::MalformedValue {
            offset: 0,
            reason: "value longer than a u32 length prefix allows"
        }
        .into()
    })
}
