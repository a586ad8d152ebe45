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

use byteorder::{ByteOrder, LittleEndian};
use deku::prelude::*;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use zipsign_common::*;
use zipsign_zip::{
    CentralDirectoryHeader, EndOfCentralDirectory, Zip64EndOfCentralDirectory,
    Zip64EndOfCentralDirectoryLocator, EOCD_CD_OFFSET_FIELD, EOCD_MAGIC, EOCD_MIN_SIZE,
    MAX_COMMENT_SIZE, ZIP64_EOCD_CD_OFFSET_FIELD, ZIP64_EOCD_LOCATOR_MAGIC,
    ZIP64_EOCD_LOCATOR_SIZE, ZIP64_EOCD_MIN_SIZE, ZIP64_LOCATOR_EOCD_OFFSET_FIELD,
    ZIP64_MARKER_U32
};

use crate::signing_types::{
    SigningBlockFooter, SIGNING_BLOCK_FOOTER_SIZE, SIGNING_BLOCK_MAGIC, SIGNING_BLOCK_MIN_SIZE
};

/// Where everything is in a ZIP archive, as byte ranges from the start of the file.
///
/// The four regions are contiguous and in this order:
/// `entry_data`, `signing_block` (if any), `central_directory`, `eocd`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveLayout {
    pub archive_len: u64,
    pub entry_data: Range<u64>,
    pub signing_block: Option<Range<u64>>,
    pub central_directory: Range<u64>,
    // Starts at the ZIP64 record for ZIP64 archives, runs to the end of the file
    pub eocd: Range<u64>,
    pub entry_count: u64,
    pub offset_fields: CentralDirectoryOffsetFields
}

/// The fields that record where the central directory starts, relative to
/// `ArchiveLayout::eocd.start`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CentralDirectoryOffsetFields {
    /// u32 central directory offset in the EOCD record
    Zip32 { cd_offset_field: usize },
    /// u64 central directory offset in the ZIP64 EOCD record, and the u64
    /// pointer to that record in the ZIP64 locator. Both move together.
    ///
    /// `eocd_cd_offset_field` is the u32 offset in the classic EOCD record,
    /// only rewritten when it isn't saturated.
    Zip64 {
        cd_offset_field: usize,
        record_offset_field: usize,
        eocd_cd_offset_field: usize
    }
}

impl ArchiveLayout {
    pub fn entry_data_len(&self) -> u64 {
        self.entry_data.end - self.entry_data.start
    }

    /// Reads the EOCD region with the central directory offset rewritten as
    /// though the central directory started at `new_cd_start`. Nothing else
    /// in the region changes.
    pub fn read_patched_eocd<R: Read + Seek>(
        &self,
        archive: &mut R,
        new_cd_start: u64
    ) -> Result<Vec<u8>> {
        let mut eocd = read_range(archive, self.eocd.clone())?;
        match self.offset_fields {
            CentralDirectoryOffsetFields::Zip32 { cd_offset_field } => {
                let new_offset = u32::try_from(new_cd_start)
                    .ok()
                    .filter(|offset| *offset != ZIP64_MARKER_U32)
                    .ok_or(ZipSignError::OffsetOverflow(new_cd_start))?;
                LittleEndian::write_u32(
                    &mut eocd[cd_offset_field..(cd_offset_field + 4)],
                    new_offset
                );
            }
            CentralDirectoryOffsetFields::Zip64 {
                cd_offset_field,
                record_offset_field,
                eocd_cd_offset_field
            } => {
                // The ZIP64 record sits right after the central directory
                let cd_len = self.central_directory.end - self.central_directory.start;
                LittleEndian::write_u64(
                    &mut eocd[cd_offset_field..(cd_offset_field + 8)],
                    new_cd_start
                );
                LittleEndian::write_u64(
                    &mut eocd[record_offset_field..(record_offset_field + 8)],
                    new_cd_start + cd_len
                );
                // Writers leave this unsaturated when only the entry count
                // needs ZIP64, and readers without ZIP64 support still use it
                let eocd_field = &mut eocd[eocd_cd_offset_field..(eocd_cd_offset_field + 4)];
                if LittleEndian::read_u32(eocd_field) != ZIP64_MARKER_U32 {
                    let new_offset = u32::try_from(new_cd_start).unwrap_or(ZIP64_MARKER_U32);
                    LittleEndian::write_u32(eocd_field, new_offset);
                }
            }
        }
        Ok(eocd)
    }
}

/// Finds the End of Central Directory by scanning backwards from the end of
/// the archive, then works out where everything else is from there.
pub fn find_layout<R: Read + Seek>(archive: &mut R) -> Result<ArchiveLayout> {
    let archive_len = archive.seek(SeekFrom::End(0))?;
    if archive_len < EOCD_MIN_SIZE as u64 {
        return Err(malformed(0, "too short to be a ZIP archive"));
    }

    // The EOCD can't be further from the end than its longest possible comment
    let tail_len = archive_len.min((EOCD_MIN_SIZE + MAX_COMMENT_SIZE) as u64);
    let tail_start = archive_len - tail_len;
    let tail = read_range(archive, tail_start..archive_len)?;
    let eocd_in_tail = find_eocd(&tail).ok_or(malformed(
        tail_start,
        "end of central directory record not found"
    ))?;
    let eocd_start = tail_start + eocd_in_tail as u64;
    let eocd: EndOfCentralDirectory = parse_record(
        &tail[eocd_in_tail..],
        eocd_start,
        "unreadable end of central directory record"
    )?;
    if eocd.disk_number != 0 || eocd.central_directory_disk != 0 {
        return Err(malformed(eocd_start, "multi-disk archives are not supported"));
    }

    let (cd_start, cd_size, entry_count, eocd_region_start, offset_fields) =
        match find_zip64_record(archive, eocd_start)? {
            Some((record_start, locator_start, record)) => (
                record.central_directory_offset,
                record.central_directory_size,
                record.total_entries,
                record_start,
                CentralDirectoryOffsetFields::Zip64 {
                    cd_offset_field: ZIP64_EOCD_CD_OFFSET_FIELD,
                    record_offset_field: (locator_start - record_start) as usize
                        + ZIP64_LOCATOR_EOCD_OFFSET_FIELD,
                    eocd_cd_offset_field: (eocd_start - record_start) as usize
                        + EOCD_CD_OFFSET_FIELD
                }
            ),
            None if eocd.needs_zip64() => {
                return Err(malformed(
                    eocd_start,
                    "ZIP64 end of central directory locator missing"
                ))
            }
            None => (
                eocd.central_directory_offset as u64,
                eocd.central_directory_size as u64,
                eocd.total_entries as u64,
                eocd_start,
                CentralDirectoryOffsetFields::Zip32 {
                    cd_offset_field: EOCD_CD_OFFSET_FIELD
                }
            )
        };

    let cd_end = cd_start
        .checked_add(cd_size)
        .ok_or(malformed(eocd_start, "central directory size overflows"))?;
    if cd_end != eocd_region_start {
        return Err(malformed(
            cd_start,
            "central directory does not end where the end of central directory begins"
        ));
    }

    let signing_block = find_signing_block(archive, cd_start)?;
    let entry_data_end = signing_block
        .as_ref()
        .map_or(cd_start, |block| block.start);
    let central_directory = cd_start..cd_end;
    check_central_directory(archive, &central_directory, entry_count, entry_data_end)?;

    let layout = ArchiveLayout {
        archive_len,
        entry_data: 0..entry_data_end,
        signing_block,
        central_directory,
        eocd: eocd_region_start..archive_len,
        entry_count,
        offset_fields
    };
    log::debug!("ZIP layout: {:?}", layout);
    Ok(layout)
}

// The record's comment must run exactly to the end of the file, so magic
// bytes inside a comment aren't mistaken for the record itself.
fn find_eocd(tail: &[u8]) -> Option<usize> {
    (0..=(tail.len() - EOCD_MIN_SIZE)).rev().find(|&i| {
        let comment_len = LittleEndian::read_u16(&tail[(i + 20)..(i + 22)]) as usize;
        &tail[i..(i + 4)] == EOCD_MAGIC && i + EOCD_MIN_SIZE + comment_len == tail.len()
    })
}

fn find_zip64_record<R: Read + Seek>(
    archive: &mut R,
    eocd_start: u64
) -> Result<Option<(u64, u64, Zip64EndOfCentralDirectory)>> {
    let locator_len = ZIP64_EOCD_LOCATOR_SIZE as u64;
    if eocd_start < locator_len {
        return Ok(None);
    }
    let locator_start = eocd_start - locator_len;
    let locator_bytes = read_range(archive, locator_start..eocd_start)?;
    if &locator_bytes[..4] != ZIP64_EOCD_LOCATOR_MAGIC {
        return Ok(None);
    }
    let locator: Zip64EndOfCentralDirectoryLocator = parse_record(
        &locator_bytes,
        locator_start,
        "unreadable ZIP64 end of central directory locator"
    )?;

    let record_start = locator.zip64_eocd_offset;
    let record_end = record_start
        .checked_add(ZIP64_EOCD_MIN_SIZE as u64)
        .filter(|end| *end <= locator_start)
        .ok_or(malformed(
            locator_start,
            "ZIP64 end of central directory record lies outside the archive"
        ))?;
    let record_bytes = read_range(archive, record_start..record_end)?;
    let record: Zip64EndOfCentralDirectory = parse_record(
        &record_bytes,
        record_start,
        "ZIP64 end of central directory record not found"
    )?;
    Ok(Some((record_start, locator_start, record)))
}

/// Looks for a signing block footer immediately before the central directory.
fn find_signing_block<R: Read + Seek>(archive: &mut R, cd_start: u64) -> Result<Option<Range<u64>>> {
    if cd_start < SIGNING_BLOCK_MIN_SIZE as u64 {
        return Ok(None);
    }
    let footer_start = cd_start - SIGNING_BLOCK_FOOTER_SIZE as u64;
    let footer_bytes = read_range(archive, footer_start..cd_start)?;
    let (_, footer) = SigningBlockFooter::from_bytes((&footer_bytes[..], 0))?;
    if footer.magic != *SIGNING_BLOCK_MAGIC {
        return Ok(None);
    }

    // Anything from here on is a broken block rather than a missing one
    let tail = footer.size_of_block;
    if tail < SIGNING_BLOCK_FOOTER_SIZE as u64 {
        return Err(BlockFormatError::MalformedValue {
            offset: footer_start,
            reason: "signing block size is smaller than its own footer"
        }
        .into());
    }
    let block_start = tail
        .checked_add(8)
        .and_then(|block_len| cd_start.checked_sub(block_len))
        .ok_or(BlockFormatError::TruncatedBlock {
            offset: footer_start
        })?;
    let head_bytes = read_range(archive, block_start..(block_start + 8))?;
    let head = LittleEndian::read_u64(&head_bytes);
    if head != tail {
        return Err(BlockFormatError::SizeMismatch { head, tail }.into());
    }
    Ok(Some(block_start..cd_start))
}

fn check_central_directory<R: Read + Seek>(
    archive: &mut R,
    central_directory: &Range<u64>,
    entry_count: u64,
    entry_data_end: u64
) -> Result<()> {
    let cd = read_range(archive, central_directory.clone())?;
    let mut rest: &[u8] = &cd;
    let mut found = 0u64;
    while !rest.is_empty() {
        let offset = central_directory.start + (cd.len() - rest.len()) as u64;
        let ((next, _), header) = CentralDirectoryHeader::from_bytes((rest, 0))
            .map_err(|_| malformed(offset, "unreadable central directory file header"))?;
        // ZIP64 entries keep their real offset in an extra field
        if header.local_header_offset != ZIP64_MARKER_U32
            && header.local_header_offset as u64 >= entry_data_end
        {
            return Err(malformed(offset, "entry starts outside the entry data"));
        }
        rest = next;
        found += 1;
    }
    if found != entry_count {
        return Err(malformed(
            central_directory.start,
            "central directory entry count does not match end of central directory"
        ));
    }
    Ok(())
}

fn parse_record<'a, T: DekuContainerRead<'a>>(
    bytes: &'a [u8],
    offset: u64,
    reason: &'static str
) -> Result<T> {
    let (_, record) = T::from_bytes((bytes, 0)).map_err(|_| malformed(offset, reason))?;
    Ok(record)
}

fn malformed(offset: u64, reason: &'static str) -> ZipSignError {
    ZipSignError::MalformedArchive { offset, reason }
}

/// Reads a byte range of the archive into memory. Only used for the small
/// structural regions; entry data is always streamed.
pub fn read_range<R: Read + Seek>(archive: &mut R, range: Range<u64>) -> Result<Vec<u8>> {
    archive.seek(SeekFrom::Start(range.start))?;
    let mut buf = vec![0; (range.end - range.start) as usize];
    archive.read_exact(&mut buf)?;
    Ok(buf)
}
