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

//! Content digests.
//!
//! Two regions are hashed, never the signing block itself:
//!
//!  - `contents`: the entry data, from the start of the archive up to where
//!    the signing block goes.
//!  - `directory`: the central directory followed by the EOCD region, with the
//!    central directory offset patched to its value in the signed archive.
//!
//! The composite digest for an algorithm `H` is `H(H(contents) || H(directory))`.

use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;

use sha2::{Digest, Sha256, Sha512};

use crate::{signing_types::DigestAlgorithm, zip_parser::ArchiveLayout};
use zipsign_common::*;

pub const BYTES_IN_1MB: usize = 1024 * 1024;

/// A piece of hashed input: either a range of the archive, streamed from the
/// reader, or bytes already in memory.
#[derive(Debug, Clone)]
pub enum DigestInput<'a> {
    Archive(Range<u64>),
    Bytes(&'a [u8])
}

enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512)
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Hasher {
        match algorithm {
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => Hasher::Sha512(Sha512::new())
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(hasher) => hasher.update(data),
            Hasher::Sha512(hasher) => hasher.update(data)
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Sha256(hasher) => hasher.finalize().to_vec(),
            Hasher::Sha512(hasher) => hasher.finalize().to_vec()
        }
    }
}

/// Hashes the concatenation of `inputs` once per algorithm, in a single
/// sequential pass over the archive. Returns digests in `algorithms` order.
pub fn digest_inputs<R: Read + Seek>(
    archive: &mut R,
    inputs: &[DigestInput],
    algorithms: &[DigestAlgorithm]
) -> Result<Vec<Vec<u8>>> {
    let mut hashers: Vec<Hasher> = algorithms.iter().map(|alg| Hasher::new(*alg)).collect();
    let mut buf = vec![];

    for input in inputs {
        match input {
            DigestInput::Archive(range) => {
                archive.seek(SeekFrom::Start(range.start))?;
                let mut remaining = range.end - range.start;
                while remaining > 0 {
                    // Each read is 1MB OR whatever's left in the range
                    let chunk_size = remaining.min(BYTES_IN_1MB as u64) as usize;
                    buf.resize(chunk_size, 0);
                    archive.read_exact(&mut buf)?;
                    for hasher in hashers.iter_mut() {
                        hasher.update(&buf);
                    }
                    remaining -= chunk_size as u64;
                }
            }
            DigestInput::Bytes(bytes) => {
                for hasher in hashers.iter_mut() {
                    hasher.update(bytes);
                }
            }
        }
    }

    Ok(hashers.into_iter().map(Hasher::finalize).collect())
}

pub fn compute_contents_digests<R: Read + Seek>(
    archive: &mut R,
    layout: &ArchiveLayout,
    algorithms: &[DigestAlgorithm]
) -> Result<Vec<Vec<u8>>> {
    digest_inputs(
        archive,
        &[DigestInput::Archive(layout.entry_data.clone())],
        algorithms
    )
}

/// Hashes the directory region as it will look once the central directory
/// starts at `cd_start`.
pub fn compute_directory_digests<R: Read + Seek>(
    archive: &mut R,
    layout: &ArchiveLayout,
    cd_start: u64,
    algorithms: &[DigestAlgorithm]
) -> Result<Vec<Vec<u8>>> {
    let eocd = layout.read_patched_eocd(archive, cd_start)?;
    digest_inputs(
        archive,
        &[
            DigestInput::Archive(layout.central_directory.clone()),
            DigestInput::Bytes(&eocd)
        ],
        algorithms
    )
}

/// `contents` always comes first.
pub fn composite_digest(algorithm: DigestAlgorithm, contents: &[u8], directory: &[u8]) -> Vec<u8> {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(contents);
    hasher.update(directory);
    hasher.finalize()
}

pub fn composite_digests(
    algorithms: &[DigestAlgorithm],
    contents: &[Vec<u8>],
    directory: &[Vec<u8>]
) -> Vec<Vec<u8>> {
    algorithms
        .iter()
        .zip(contents.iter().zip(directory))
        .map(|(alg, (contents, directory))| composite_digest(*alg, contents, directory))
        .collect()
}

/// Composite digests of an archive whose central directory starts at `cd_start`.
pub fn compute_composite_digests<R: Read + Seek>(
    archive: &mut R,
    layout: &ArchiveLayout,
    cd_start: u64,
    algorithms: &[DigestAlgorithm]
) -> Result<Vec<Vec<u8>>> {
    let contents = compute_contents_digests(archive, layout, algorithms)?;
    let directory = compute_directory_digests(archive, layout, cd_start, algorithms)?;
    Ok(composite_digests(algorithms, &contents, &directory))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip_parser::{find_layout, read_range};
    use std::io::Cursor;
    use zipsign_zip::{stored_zip, File};

    #[test]
    fn split_ranges_hash_like_one_buffer() {
        let data: Vec<u8> = (0..(3 * BYTES_IN_1MB + 17)).map(|i| (i % 251) as u8).collect();
        let mut cursor = Cursor::new(&data);
        let split = digest_inputs(
            &mut cursor,
            &[
                DigestInput::Archive(0..10),
                DigestInput::Archive(10..(2 * BYTES_IN_1MB as u64 + 3)),
                DigestInput::Archive((2 * BYTES_IN_1MB as u64 + 3)..data.len() as u64)
            ],
            &[DigestAlgorithm::Sha256]
        )
        .unwrap();
        assert_eq!(split[0], Sha256::digest(&data).to_vec());
    }

    #[test]
    fn one_pass_serves_every_algorithm() {
        let data = b"the quick brown fox".to_vec();
        let digests = digest_inputs(
            &mut Cursor::new(&data),
            &[DigestInput::Archive(0..4), DigestInput::Bytes(&data[4..])],
            &[DigestAlgorithm::Sha512, DigestAlgorithm::Sha256]
        )
        .unwrap();
        assert_eq!(digests[0], Sha512::digest(&data).to_vec());
        assert_eq!(digests[1], Sha256::digest(&data).to_vec());
        assert_eq!(digests[0].len(), DigestAlgorithm::Sha512.output_len());
    }

    #[test]
    fn short_archive_is_an_io_error() {
        let data = vec![0u8; 8];
        let result = digest_inputs(
            &mut Cursor::new(&data),
            &[DigestInput::Archive(0..64)],
            &[DigestAlgorithm::Sha256]
        );
        assert!(matches!(result, Err(ZipSignError::Io(_))));
    }

    #[test]
    fn composite_is_contents_then_directory() {
        let contents = vec![1u8; 32];
        let directory = vec![2u8; 32];
        let expected = Sha256::digest([contents.clone(), directory.clone()].concat()).to_vec();
        assert_eq!(
            composite_digest(DigestAlgorithm::Sha256, &contents, &directory),
            expected
        );
        assert_ne!(
            composite_digest(DigestAlgorithm::Sha256, &directory, &contents),
            expected
        );
    }

    #[test]
    fn directory_digest_sees_the_patched_offset() {
        let zip = stored_zip(
            &[File {
                path: "a.bin".into(),
                data: vec![9; 965]
            }],
            b"",
            false
        )
        .unwrap();
        let mut cursor = Cursor::new(&zip);
        let layout = find_layout(&mut cursor).unwrap();
        assert_eq!(layout.central_directory.start, 1000);

        let mut expected_input = read_range(&mut cursor, layout.central_directory.clone()).unwrap();
        let mut eocd = read_range(&mut cursor, layout.eocd.clone()).unwrap();
        eocd[16..20].copy_from_slice(&1240u32.to_le_bytes());
        expected_input.extend(eocd);

        let digests =
            compute_directory_digests(&mut cursor, &layout, 1240, &[DigestAlgorithm::Sha256])
                .unwrap();
        assert_eq!(digests[0], Sha256::digest(&expected_input).to_vec());
    }
}
