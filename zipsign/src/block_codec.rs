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

//! Byte layout of the ZIP Signing Block.
//!
//! ```text
//! block       = u64 size | pair* | u64 size | "ZIP Sig Block 42"
//! pair        = u64 len | u32 id | value[len - 4]
//! signer      = lp(signed_data) | lp(lp(signature)*)
//! signed_data = lp(lp(digest)*) | lp(lp(certificate)*) | lp(lp(attribute)*)
//! digest      = u32 algorithm | lp(bytes)
//! signature   = u32 algorithm | lp(bytes)
//! attribute   = u32 id | value
//! ```
//!
//! `lp(x)` is `x` prefixed with its u32 length. `size` counts every byte of the
//! block except the leading size field. Values with unknown ids are kept
//! verbatim so that decoding and re-encoding reproduces the input exactly.

use byteorder::{ByteOrder, LittleEndian};
use deku::prelude::*;
use zipsign_common::*;

use crate::signing_types::{
    encoded_len, len_pfx_bytes, len_pfx_seq, len_pfx_u32, u32_length, Attribute,
    AttributeRecord, Digest, DigestRecord, PairRecord, PairValue, Signature, SignatureRecord,
    SignedData, SignedDataRecord, Signer, SignerRecord, SigningBlock, SigningBlockFooter,
    SigningBlockPair, SigningBlockRecord, CURRENT_SCHEME_VERSION, SIGNING_BLOCK_FOOTER_SIZE,
    SIGNING_BLOCK_MAGIC, SIGNING_BLOCK_MIN_SIZE
};

pub fn encode_signing_block(block: &SigningBlock) -> Result<Vec<u8>> {
    let pairs = block
        .pairs
        .iter()
        .map(pair_record)
        .collect::<Result<Vec<PairRecord>>>()?;
    let pairs_len = pairs
        .iter()
        .map(|pair| pair.length + 8)
        .sum::<u64>();

    // Plus size_of_block at the tail plus magic
    let size_of_block = pairs_len + SIGNING_BLOCK_FOOTER_SIZE as u64;
    let record = SigningBlockRecord {
        size_of_block,
        pairs,
        footer: SigningBlockFooter {
            size_of_block,
            magic: *SIGNING_BLOCK_MAGIC
        }
    };
    Ok(record.to_bytes()?)
}

pub fn encode_signer(signer: &Signer) -> Result<Vec<u8>> {
    Ok(signer_record(signer)?.to_bytes()?)
}

/// Serialises signed data exactly as it is signed: without its own length prefix.
pub fn encode_signed_data(signed_data: &SignedData) -> Result<Vec<u8>> {
    Ok(signed_data_record(signed_data)?.to_bytes()?)
}

fn pair_record(pair: &SigningBlockPair) -> Result<PairRecord> {
    let (value_len, value) = match pair {
        SigningBlockPair::Signer(signer) => {
            let record = signer_record(signer)?;
            (encoded_len(&record)?, PairValue::Signer(record))
        }
        SigningBlockPair::Unrecognized { id, value } => (
            value.len(),
            PairValue::Unrecognized {
                id: *id,
                value: value.clone()
            }
        )
    };
    Ok(PairRecord {
        length: value_len as u64 + 4,
        value
    })
}

fn signer_record(signer: &Signer) -> Result<SignerRecord> {
    let signatures = signer
        .signatures
        .iter()
        .map(|signature| {
            len_pfx_u32(SignatureRecord {
                algorithm_id: signature.algorithm_id,
                signature: len_pfx_bytes(&signature.signature)?
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(SignerRecord {
        signed_data: len_pfx_u32(signed_data_record(&signer.signed_data)?)?,
        signatures: len_pfx_seq(signatures)?
    })
}

fn signed_data_record(signed_data: &SignedData) -> Result<SignedDataRecord> {
    let digests = signed_data
        .digests
        .iter()
        .map(|digest| {
            len_pfx_u32(DigestRecord {
                algorithm_id: digest.algorithm_id,
                digest: len_pfx_bytes(&digest.digest)?
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let certificates = signed_data
        .certificates
        .iter()
        .map(|certificate| len_pfx_bytes(certificate))
        .collect::<Result<Vec<_>>>()?;
    let attributes = signed_data
        .attributes
        .iter()
        .map(|attribute| {
            let value_len = match attribute {
                Attribute::SchemeVersion(_) => 4,
                Attribute::Unrecognized { value, .. } => value.len()
            };
            Ok(AttributeRecord {
                length: u32_length(value_len + 4)?,
                attribute: attribute.clone()
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SignedDataRecord {
        digests: len_pfx_seq(digests)?,
        certificates: len_pfx_seq(certificates)?,
        attributes: len_pfx_seq(attributes)?
    })
}

impl From<SignerRecord> for Signer {
    fn from(record: SignerRecord) -> Signer {
        Signer {
            signed_data: record.signed_data.value.into(),
            signatures: record
                .signatures
                .items
                .into_iter()
                .map(|entry| Signature {
                    algorithm_id: entry.value.algorithm_id,
                    signature: entry.value.signature.bytes
                })
                .collect()
        }
    }
}

impl From<SignedDataRecord> for SignedData {
    fn from(record: SignedDataRecord) -> SignedData {
        SignedData {
            digests: record
                .digests
                .items
                .into_iter()
                .map(|entry| Digest {
                    algorithm_id: entry.value.algorithm_id,
                    digest: entry.value.digest.bytes
                })
                .collect(),
            certificates: record
                .certificates
                .items
                .into_iter()
                .map(|certificate| certificate.bytes)
                .collect(),
            attributes: record
                .attributes
                .items
                .into_iter()
                .map(|entry| entry.attribute)
                .collect()
        }
    }
}

impl From<PairRecord> for SigningBlockPair {
    fn from(record: PairRecord) -> SigningBlockPair {
        match record.value {
            PairValue::Signer(signer) => SigningBlockPair::Signer(signer.into()),
            PairValue::Unrecognized { id, value } => SigningBlockPair::Unrecognized { id, value }
        }
    }
}

/// Decodes a complete signing block, size fields and magic included.
pub fn decode_signing_block(bytes: &[u8]) -> Result<SigningBlock> {
    let len = bytes.len();
    if len < SIGNING_BLOCK_MIN_SIZE {
        return Err(BlockFormatError::TruncatedBlock { offset: 0 }.into());
    }
    let footer_start = len - SIGNING_BLOCK_FOOTER_SIZE;
    let (_, footer) = SigningBlockFooter::from_bytes((&bytes[footer_start..], 0))?;
    if footer.magic != *SIGNING_BLOCK_MAGIC {
        return Err(BlockFormatError::BadMagic {
            offset: (len - 16) as u64
        }
        .into());
    }
    let head = LittleEndian::read_u64(&bytes[..8]);
    let tail = footer.size_of_block;
    if head != tail {
        return Err(BlockFormatError::SizeMismatch { head, tail }.into());
    }
    let available = (len - 8) as u64;
    if head > available {
        return Err(BlockFormatError::TruncatedBlock { offset: 0 }.into());
    }
    if head < available {
        return Err(BlockFormatError::SizeMismatch {
            head,
            tail: available
        }
        .into());
    }

    let mut pairs = vec![];
    let mut offset = 8;
    while offset < footer_start {
        let rest = &bytes[offset..footer_start];
        // A pair's length is checked against the block before anything is
        // read from it
        let pair_len = (rest.len() >= 8)
            .then(|| LittleEndian::read_u64(&rest[..8]))
            .and_then(|length| length.checked_add(8))
            .filter(|pair_len| *pair_len <= rest.len() as u64)
            .ok_or(BlockFormatError::TruncatedBlock {
                offset: offset as u64
            })? as usize;
        pairs.push(decode_pair(&rest[..pair_len], offset as u64)?);
        offset += pair_len;
    }

    Ok(SigningBlock { pairs })
}

fn decode_pair(bytes: &[u8], offset: u64) -> Result<SigningBlockPair> {
    let record: PairRecord = decode_exact(bytes, offset, "unreadable signing block pair")?;
    let pair = SigningBlockPair::from(record);
    // Lengths nested inside a signer aren't bounded by the pair, so they are
    // checked by encoding the result again
    if pair_record(&pair)?.to_bytes()? != bytes {
        return Err(inconsistent_lengths(offset));
    }
    Ok(pair)
}

pub fn decode_signed_data(bytes: &[u8]) -> Result<SignedData> {
    let record: SignedDataRecord = decode_exact(bytes, 0, "unreadable signed data")?;
    let signed_data = SignedData::from(record);
    if encode_signed_data(&signed_data)? != bytes {
        return Err(inconsistent_lengths(0));
    }
    Ok(signed_data)
}

fn decode_exact<'a, T: DekuContainerRead<'a>>(
    bytes: &'a [u8],
    offset: u64,
    reason: &'static str
) -> Result<T> {
    let ((rest, _), value) = T::from_bytes((bytes, 0))
        .map_err(|_| BlockFormatError::MalformedValue { offset, reason })?;
    if !rest.is_empty() {
        return Err(BlockFormatError::MalformedValue {
            offset: offset + (bytes.len() - rest.len()) as u64,
            reason: "trailing bytes after value"
        }
        .into());
    }
    Ok(value)
}

fn inconsistent_lengths(offset: u64) -> ZipSignError {
    BlockFormatError::MalformedValue {
        offset,
        reason: "length fields disagree with their contents"
    }
    .into()
}

/// Scheme version attribute every signer created by this crate carries.
pub fn current_scheme_version() -> Attribute {
    Attribute::SchemeVersion(CURRENT_SCHEME_VERSION)
}
