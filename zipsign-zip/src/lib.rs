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

//! ZIP structures needed to find and patch an archive's central directory,
//! plus a thin wrapper around the `zip` crate for writing and reading whole
//! archives.

use deku::prelude::*;
use std::io::{Read, Seek, Write};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipArchive, ZipWriter};
use zipsign_common::*;

pub const EOCD_MAGIC: &[u8; 4] = b"PK\x05\x06";
pub const ZIP64_EOCD_LOCATOR_MAGIC: &[u8; 4] = b"PK\x06\x07";
pub const LOCAL_FILE_HEADER_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// Size of the EOCD record without its comment.
pub const EOCD_MIN_SIZE: usize = 22;
pub const MAX_COMMENT_SIZE: usize = u16::MAX as usize;
pub const ZIP64_EOCD_MIN_SIZE: usize = 56;
pub const ZIP64_EOCD_LOCATOR_SIZE: usize = 20;
pub const CENTRAL_DIRECTORY_HEADER_MIN_SIZE: usize = 46;

// Byte positions of the fields that point at the central directory,
// relative to the start of their record.
pub const EOCD_CD_OFFSET_FIELD: usize = 16;
pub const ZIP64_EOCD_CD_OFFSET_FIELD: usize = 48;
pub const ZIP64_LOCATOR_EOCD_OFFSET_FIELD: usize = 8;

/// Values that mean "look in the ZIP64 record instead".
pub const ZIP64_MARKER_U16: u16 = 0xFFFF;
pub const ZIP64_MARKER_U32: u32 = 0xFFFF_FFFF;

#[derive(Debug, PartialEq, DekuRead, DekuWrite, Clone)]
#[deku(magic = b"PK\x05\x06", endian = "little")]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub central_directory_disk: u16,
    pub entries_on_disk: u16,
    pub total_entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub comment_length: u16,
    #[deku(count = "comment_length")]
    pub comment: Vec<u8>
}

impl EndOfCentralDirectory {
    /// Whether any field is saturated, meaning the real value lives in a
    /// ZIP64 record.
    pub fn needs_zip64(&self) -> bool {
        self.entries_on_disk == ZIP64_MARKER_U16
            || self.total_entries == ZIP64_MARKER_U16
            || self.central_directory_size == ZIP64_MARKER_U32
            || self.central_directory_offset == ZIP64_MARKER_U32
    }
}

// Only the fixed part. The extensible data sector that may follow is left
// opaque and travels with the rest of the EOCD region.
#[derive(Debug, PartialEq, DekuRead, DekuWrite, Clone)]
#[deku(magic = b"PK\x06\x06", endian = "little")]
pub struct Zip64EndOfCentralDirectory {
    // Counts everything after this field
    pub size_of_record: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub central_directory_disk: u32,
    pub entries_on_disk: u64,
    pub total_entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64
}

#[derive(Debug, PartialEq, DekuRead, DekuWrite, Clone)]
#[deku(magic = b"PK\x06\x07", endian = "little")]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub zip64_eocd_disk: u32,
    pub zip64_eocd_offset: u64,
    pub total_disks: u32
}

#[derive(Debug, PartialEq, DekuRead, DekuWrite, Clone)]
#[deku(magic = b"PK\x01\x02", endian = "little")]
pub struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
    pub file_comment_length: u16,
    pub disk_number_start: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub local_header_offset: u32,
    #[deku(count = "file_name_length")]
    pub file_name: Vec<u8>,
    #[deku(count = "extra_field_length")]
    pub extra_field: Vec<u8>,
    #[deku(count = "file_comment_length")]
    pub file_comment: Vec<u8>
}

#[derive(Debug, PartialEq, DekuRead, DekuWrite, Clone)]
#[deku(magic = b"PK\x03\x04", endian = "little")]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
    #[deku(count = "file_name_length")]
    pub file_name: Vec<u8>,
    #[deku(count = "extra_field_length")]
    pub extra_field: Vec<u8>
}

#[derive(Debug, Clone, PartialEq)]
pub struct File {
    pub path: String,
    pub data: Vec<u8>
}

const UNCOMPRESSED_EXTENSIONS: &[&str] = &[".jar", ".zip", ".png"];

// Output can be a file *or* a buffer in memory
pub fn zip_files<T: Write + Seek>(files: &[File], output: T) -> Result<()> {
    let mut zip = ZipWriter::new(output);
    let compressed_options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .with_alignment(4);
    // Already-compressed payloads gain nothing from another pass
    let uncompressed_options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .with_alignment(4);

    for file in files {
        let options = if UNCOMPRESSED_EXTENSIONS
            .iter()
            .any(|ext| file.path.ends_with(ext))
        {
            uncompressed_options
        } else {
            compressed_options
        };
        zip.start_file(file.path.as_str(), options)?;
        zip.write_all(&file.data)?;
    }

    zip.finish()?;
    Ok(())
}

// 1980-01-01, the earliest date a ZIP can hold
const DOS_EPOCH_DATE: u16 = (1 << 5) | 1;
const VERSION_STORED: u16 = 10;
const VERSION_ZIP64: u16 = 45;

/// Writes an archive of uncompressed entries with no extra fields or data
/// descriptors, so every byte position is predictable from the inputs.
///
/// With `zip64` set, the ZIP64 record and locator are written and the EOCD
/// fields are saturated, whatever the archive size.
pub fn stored_zip(files: &[File], comment: &[u8], zip64: bool) -> Result<Vec<u8>> {
    let mut out = vec![];
    let mut central_directory = vec![];
    for file in files {
        let local_header_offset = zip32_u32("local header offset", out.len() as u64)?;
        let file_name = file.path.as_bytes().to_vec();
        let file_name_length = length_u16("file name length", file_name.len())?;
        let size = zip32_u32("file size", file.data.len() as u64)?;
        let crc32 = crc32fast::hash(&file.data);

        let local = LocalFileHeader {
            version_needed: VERSION_STORED,
            flags: 0,
            compression_method: 0,
            last_modified_time: 0,
            last_modified_date: DOS_EPOCH_DATE,
            crc32,
            compressed_size: size,
            uncompressed_size: size,
            file_name_length,
            extra_field_length: 0,
            file_name: file_name.clone(),
            extra_field: vec![]
        };
        out.extend(local.to_bytes()?);
        out.extend(&file.data);

        let header = CentralDirectoryHeader {
            version_made_by: VERSION_STORED,
            version_needed: VERSION_STORED,
            flags: 0,
            compression_method: 0,
            last_modified_time: 0,
            last_modified_date: DOS_EPOCH_DATE,
            crc32,
            compressed_size: size,
            uncompressed_size: size,
            file_name_length,
            extra_field_length: 0,
            file_comment_length: 0,
            disk_number_start: 0,
            internal_attributes: 0,
            external_attributes: 0,
            local_header_offset,
            file_name,
            extra_field: vec![],
            file_comment: vec![]
        };
        central_directory.extend(header.to_bytes()?);
    }

    let cd_offset = out.len() as u64;
    let cd_size = central_directory.len() as u64;
    let entries = files.len() as u64;
    out.extend(central_directory);

    let comment_length = length_u16("comment length", comment.len())?;
    let eocd = if zip64 {
        let record_offset = out.len() as u64;
        let record = Zip64EndOfCentralDirectory {
            // Fixed part of the record minus the magic and this field
            size_of_record: (ZIP64_EOCD_MIN_SIZE - 12) as u64,
            version_made_by: VERSION_ZIP64,
            version_needed: VERSION_ZIP64,
            disk_number: 0,
            central_directory_disk: 0,
            entries_on_disk: entries,
            total_entries: entries,
            central_directory_size: cd_size,
            central_directory_offset: cd_offset
        };
        out.extend(record.to_bytes()?);
        let locator = Zip64EndOfCentralDirectoryLocator {
            zip64_eocd_disk: 0,
            zip64_eocd_offset: record_offset,
            total_disks: 1
        };
        out.extend(locator.to_bytes()?);
        EndOfCentralDirectory {
            disk_number: 0,
            central_directory_disk: 0,
            entries_on_disk: ZIP64_MARKER_U16,
            total_entries: ZIP64_MARKER_U16,
            central_directory_size: ZIP64_MARKER_U32,
            central_directory_offset: ZIP64_MARKER_U32,
            comment_length,
            comment: comment.to_vec()
        }
    } else {
        EndOfCentralDirectory {
            disk_number: 0,
            central_directory_disk: 0,
            entries_on_disk: zip32_u16("entry count", entries)?,
            total_entries: zip32_u16("entry count", entries)?,
            central_directory_size: zip32_u32("central directory size", cd_size)?,
            central_directory_offset: zip32_u32("central directory offset", cd_offset)?,
            comment_length,
            comment: comment.to_vec()
        }
    };
    out.extend(eocd.to_bytes()?);
    Ok(out)
}

// Values equal to the ZIP64 marker would be misread, so they overflow too
fn zip32_u32(field: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|value| *value != ZIP64_MARKER_U32)
        .ok_or(ZipSignError::ZipFieldOverflow { field, value })
}

fn zip32_u16(field: &'static str, value: u64) -> Result<u16> {
    u16::try_from(value)
        .ok()
        .filter(|value| *value != ZIP64_MARKER_U16)
        .ok_or(ZipSignError::ZipFieldOverflow { field, value })
}

fn length_u16(field: &'static str, len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| ZipSignError::ZipFieldOverflow {
        field,
        value: len as u64
    })
}

/// Reads every file back out of an archive, in central directory order.
pub fn unzip_files<T: Read + Seek>(input: T) -> Result<Vec<File>> {
    let mut archive = ZipArchive::new(input)?;
    let mut files = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        files.push(File {
            path: entry.name().to_string(),
            data
        });
    }
    Ok(files)
}
