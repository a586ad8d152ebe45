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

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;

use zipsign_common::*;

use crate::{
    block_codec::encode_signing_block, signing_types::SigningBlock, zip_parser::ArchiveLayout
};

/// Writes the archive back out with `signing_block` (or nothing) between the
/// entry data and the central directory. Only the central directory offset
/// changes. Returns the number of bytes written.
pub fn rebuild_zip_with_signing_block<R: Read + Seek, W: Write>(
    archive: &mut R,
    layout: &ArchiveLayout,
    signing_block: Option<&SigningBlock>,
    output: &mut W
) -> Result<u64> {
    let signing_block_bytes = match signing_block {
        Some(block) => encode_signing_block(block)?,
        None => vec![]
    };
    let cd_start = layout.entry_data.end + signing_block_bytes.len() as u64;
    // Patched before anything is written, so an offset that doesn't fit
    // fails without leaving partial output behind
    let eocd = layout.read_patched_eocd(archive, cd_start)?;

    copy_range(archive, layout.entry_data.clone(), output)?;
    output.write_all(&signing_block_bytes)?;
    copy_range(archive, layout.central_directory.clone(), output)?;
    output.write_all(&eocd)?;
    output.flush()?;

    let written = cd_start + (layout.central_directory.end - layout.central_directory.start)
        + eocd.len() as u64;
    log::debug!(
        "Rebuilt archive: {} byte signing block, central directory at {cd_start}, {written} bytes",
        signing_block_bytes.len()
    );
    Ok(written)
}

fn copy_range<R: Read + Seek, W: Write>(
    archive: &mut R,
    range: Range<u64>,
    output: &mut W
) -> Result<()> {
    let len = range.end - range.start;
    archive.seek(SeekFrom::Start(range.start))?;
    let copied = io::copy(&mut (&mut *archive).take(len), output)?;
    if copied != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("archive ended {} bytes into a {len} byte region", copied)
        )
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        signing_types::SigningBlockPair,
        zip_parser::{find_layout, read_range}
    };
    use std::io::Cursor;
    use zipsign_zip::{stored_zip, File};

    fn unsigned() -> Vec<u8> {
        stored_zip(
            &[File {
                path: "a.bin".into(),
                data: vec![9; 965]
            }],
            b"comment stays",
            false
        )
        .unwrap()
    }

    fn opaque_block(value_len: usize) -> SigningBlock {
        SigningBlock {
            pairs: vec![SigningBlockPair::Unrecognized {
                id: 0x0BAD_F00D,
                value: vec![0xEE; value_len]
            }]
        }
    }

    #[test]
    fn inserts_block_and_moves_only_the_offset() {
        let zip = unsigned();
        let mut cursor = Cursor::new(&zip);
        let layout = find_layout(&mut cursor).unwrap();
        // 8 + (8 + 4 + 196) + 24 = 240 bytes
        let block = opaque_block(196);

        let mut out = vec![];
        let written =
            rebuild_zip_with_signing_block(&mut cursor, &layout, Some(&block), &mut out).unwrap();
        assert_eq!(written, out.len() as u64);
        assert_eq!(out.len(), zip.len() + 240);
        assert_eq!(out[..1000], zip[..1000]);

        let mut signed = Cursor::new(&out);
        let signed_layout = find_layout(&mut signed).unwrap();
        assert_eq!(signed_layout.signing_block, Some(1000..1240));
        assert_eq!(signed_layout.central_directory.start, 1240);
        assert_eq!(
            read_range(&mut signed, signed_layout.central_directory.clone()).unwrap(),
            read_range(&mut cursor, layout.central_directory.clone()).unwrap()
        );

        let mut original_eocd = read_range(&mut cursor, layout.eocd.clone()).unwrap();
        original_eocd[16..20].copy_from_slice(&1240u32.to_le_bytes());
        assert_eq!(
            read_range(&mut signed, signed_layout.eocd.clone()).unwrap(),
            original_eocd
        );
    }

    #[test]
    fn removing_the_block_restores_the_original() {
        let zip = unsigned();
        let mut cursor = Cursor::new(&zip);
        let layout = find_layout(&mut cursor).unwrap();
        let mut signed = vec![];
        rebuild_zip_with_signing_block(&mut cursor, &layout, Some(&opaque_block(50)), &mut signed)
            .unwrap();

        let mut signed_cursor = Cursor::new(&signed);
        let signed_layout = find_layout(&mut signed_cursor).unwrap();
        let mut stripped = vec![];
        rebuild_zip_with_signing_block(&mut signed_cursor, &signed_layout, None, &mut stripped)
            .unwrap();
        assert_eq!(stripped, zip);
    }

    #[test]
    fn nothing_is_written_when_offset_overflows() {
        let zip = unsigned();
        let mut cursor = Cursor::new(&zip);
        let mut layout = find_layout(&mut cursor).unwrap();
        layout.entry_data.end = u32::MAX as u64;

        let mut out = vec![];
        let result = rebuild_zip_with_signing_block(&mut cursor, &layout, None, &mut out);
        assert!(matches!(result, Err(ZipSignError::OffsetOverflow(_))));
        assert!(out.is_empty());
    }
}
