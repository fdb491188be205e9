//! File and filesystem information classes carried by QUERY_INFO, SET_INFO,
//! QUERY_DIRECTORY and the reparse point FSCTLs.

use {
    crate::{
        io_err,
        pdu::*,
        res,
        serialize::{Decodable, Encoder, Padding},
        utils::{filetime_to_system_time, from_utf16le, to_utf16le},
    },
    nix::sys::stat::{mode_t, SFlag},
    std::{
        io::{Cursor, Result},
        time::SystemTime,
    },
};

/// Metadata of a remote file, as returned by `stat`, `lstat` and directory
/// listings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileStat {
    /// Last path component
    pub name: String,
    pub size: u64,
    pub allocation_size: u64,
    pub attributes: FileAttributes,
    pub creation_time: SystemTime,
    pub last_access_time: SystemTime,
    pub last_write_time: SystemTime,
    pub change_time: SystemTime,
}

impl FileStat {
    pub fn from_times(name: &str, times: &FileTimes) -> FileStat {
        FileStat {
            name: name.to_owned(),
            size: times.end_of_file,
            allocation_size: times.allocation_size,
            attributes: times.file_attributes,
            creation_time: filetime_to_system_time(times.creation_time),
            last_access_time: filetime_to_system_time(times.last_access_time),
            last_write_time: filetime_to_system_time(times.last_write_time),
            change_time: filetime_to_system_time(times.change_time),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }

    pub fn is_symlink(&self) -> bool {
        self.attributes.contains(FileAttributes::REPARSE_POINT)
    }

    pub fn file_type(&self) -> SFlag {
        if self.is_symlink() {
            SFlag::S_IFLNK
        } else if self.is_dir() {
            SFlag::S_IFDIR
        } else {
            SFlag::S_IFREG
        }
    }

    /// POSIX `st_mode` synthesized from the attributes.
    ///
    /// The read-only attribute drops the write bits; directories are
    /// searchable by everyone.
    pub fn mode(&self) -> mode_t {
        let mut perm: mode_t = if self.attributes.contains(FileAttributes::READONLY) {
            0o444
        } else {
            0o666
        };
        if self.is_dir() {
            perm |= 0o111;
        }
        self.file_type().bits() | perm
    }

    pub fn modified(&self) -> SystemTime {
        self.last_write_time
    }
}

/// Decode `FileNetworkOpenInformation`.
pub fn network_open_info(name: &str, data: &[u8]) -> Result<FileStat> {
    let mut r = Cursor::new(data);
    let times = FileTimes::decode(&mut r)?;
    Ok(FileStat::from_times(name, &times))
}

/// The parts of `FileStandardInformation` the client uses.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StandardInfo {
    pub allocation_size: u64,
    pub end_of_file: u64,
    pub number_of_links: u32,
    pub delete_pending: bool,
    pub directory: bool,
}

pub fn standard_info(data: &[u8]) -> Result<StandardInfo> {
    let mut r = Cursor::new(data);
    Ok(StandardInfo {
        allocation_size: Decodable::decode(&mut r)?,
        end_of_file: Decodable::decode(&mut r)?,
        number_of_links: Decodable::decode(&mut r)?,
        delete_pending: u8::decode(&mut r)? != 0,
        directory: u8::decode(&mut r)? != 0,
    })
}

/// Capacity of the filesystem behind a share.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StatFs {
    /// Bytes per allocation unit
    pub block_size: u64,
    pub total_blocks: u64,
    /// Free units available to the caller, honouring quotas
    pub available_blocks: u64,
    pub free_blocks: u64,
}

/// Decode `FileFsFullSizeInformation`.
pub fn fs_full_size_info(data: &[u8]) -> Result<StatFs> {
    let mut r = Cursor::new(data);
    let total: u64 = Decodable::decode(&mut r)?;
    let caller_available: u64 = Decodable::decode(&mut r)?;
    let actual_available: u64 = Decodable::decode(&mut r)?;
    let sectors_per_unit: u32 = Decodable::decode(&mut r)?;
    let bytes_per_sector: u32 = Decodable::decode(&mut r)?;
    Ok(StatFs {
        block_size: u64::from(sectors_per_unit) * u64::from(bytes_per_sector),
        total_blocks: total,
        available_blocks: caller_available,
        free_blocks: actual_available,
    })
}

/// Decode a buffer of chained `FileDirectoryInformation` entries.
pub fn directory_entries(data: &[u8]) -> Result<Vec<FileStat>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        let mut r = Cursor::new(&data[pos..]);
        let next: u32 = Decodable::decode(&mut r)?;
        let _file_index: u32 = Decodable::decode(&mut r)?;
        let creation_time: u64 = Decodable::decode(&mut r)?;
        let last_access_time: u64 = Decodable::decode(&mut r)?;
        let last_write_time: u64 = Decodable::decode(&mut r)?;
        let change_time: u64 = Decodable::decode(&mut r)?;
        let end_of_file: u64 = Decodable::decode(&mut r)?;
        let allocation_size: u64 = Decodable::decode(&mut r)?;
        let attributes: u32 = Decodable::decode(&mut r)?;
        let name_len: u32 = Decodable::decode(&mut r)?;

        let start = pos + 64;
        let end = start + name_len as usize;
        if end > data.len() {
            return res!(io_err!(InvalidData, "Directory entry name outside of buffer"));
        }

        entries.push(FileStat {
            name: from_utf16le(&data[start..end])?,
            size: end_of_file,
            allocation_size,
            attributes: FileAttributes::from_bits_truncate(attributes),
            creation_time: filetime_to_system_time(creation_time),
            last_access_time: filetime_to_system_time(last_access_time),
            last_write_time: filetime_to_system_time(last_write_time),
            change_time: filetime_to_system_time(change_time),
        });

        if next == 0 {
            break;
        }
        pos += next as usize;
    }

    Ok(entries)
}

/// `FileEndOfFileInformation`
pub fn end_of_file_info(size: u64) -> Vec<u8> {
    size.to_le_bytes().to_vec()
}

/// `FileDispositionInformation`
pub fn disposition_info(delete: bool) -> Vec<u8> {
    vec![u8::from(delete)]
}

/// `FileRenameInformation` for SMB2; `target` is share-relative.
pub fn rename_info(target: &str, replace_if_exists: bool) -> Result<Vec<u8>> {
    let name = to_utf16le(target);
    let mut buf = Vec::with_capacity(20 + name.len());
    (Encoder::new(&mut buf)
        << &u8::from(replace_if_exists)
        << &Padding(7)
        << &0u64
        << &(name.len() as u32)
        << &name)
        .done()?;
    Ok(buf)
}

/// `FileBasicInformation`; zero timestamps leave the server's values as they are.
pub fn basic_info(attributes: FileAttributes) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(40);
    (Encoder::new(&mut buf)
        << &0u64
        << &0u64
        << &0u64
        << &0u64
        << &attributes.bits()
        << &0u32)
        .done()?;
    Ok(buf)
}

const NT_PATH_PREFIX: &str = r"\??\";

fn is_absolute(target: &str) -> bool {
    let b = target.as_bytes();
    target.starts_with('\\') || (b.len() >= 2 && b[1] == b':' && b[0].is_ascii_alphabetic())
}

/// Reparse data buffer describing a symbolic link to `target`.
pub fn symlink_reparse_buffer(target: &str) -> Result<Vec<u8>> {
    let (substitute, flags) = if is_absolute(target) {
        (to_utf16le(&format!("{}{}", NT_PATH_PREFIX, target)), 0)
    } else {
        (to_utf16le(target), SYMLINK_FLAG_RELATIVE)
    };
    let print = to_utf16le(target);

    let mut buf = Vec::with_capacity(20 + substitute.len() + print.len());
    (Encoder::new(&mut buf)
        << &IO_REPARSE_TAG_SYMLINK
        << &((12 + substitute.len() + print.len()) as u16)
        << &0u16
        << &0u16
        << &(substitute.len() as u16)
        << &(substitute.len() as u16)
        << &(print.len() as u16)
        << &flags
        << &substitute
        << &print)
        .done()?;
    Ok(buf)
}

/// Extract the link target of a symbolic link reparse buffer.
pub fn parse_symlink_reparse_buffer(data: &[u8]) -> Result<String> {
    let mut r = Cursor::new(data);
    let tag: u32 = Decodable::decode(&mut r)?;
    if tag != IO_REPARSE_TAG_SYMLINK {
        return res!(io_err!(InvalidData, "Not a symbolic link reparse point"));
    }
    let _data_len: u16 = Decodable::decode(&mut r)?;
    let _reserved: u16 = Decodable::decode(&mut r)?;
    let sub_offset: u16 = Decodable::decode(&mut r)?;
    let sub_len: u16 = Decodable::decode(&mut r)?;
    let print_offset: u16 = Decodable::decode(&mut r)?;
    let print_len: u16 = Decodable::decode(&mut r)?;
    let _flags: u32 = Decodable::decode(&mut r)?;

    let path_buffer = &data[20.min(data.len())..];
    let field = |offset: u16, len: u16| -> Result<String> {
        let (start, end) = (offset as usize, offset as usize + len as usize);
        match path_buffer.get(start..end) {
            Some(b) => from_utf16le(b),
            None => res!(io_err!(InvalidData, "Reparse path outside of buffer")),
        }
    };

    let print = field(print_offset, print_len)?;
    if !print.is_empty() {
        return Ok(print);
    }
    let substitute = field(sub_offset, sub_len)?;
    Ok(substitute
        .strip_prefix(NT_PATH_PREFIX)
        .map(str::to_owned)
        .unwrap_or(substitute))
}
