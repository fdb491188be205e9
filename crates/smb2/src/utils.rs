use {
    crate::error,
    std::time::{Duration, SystemTime, UNIX_EPOCH},
};

pub type Result<T> = ::std::result::Result<T, error::Error>;

#[macro_export]
macro_rules! io_err {
    ($kind:ident, $msg:expr) => {
        ::std::io::Error::new(::std::io::ErrorKind::$kind, $msg)
    };
}

#[macro_export]
macro_rules! res {
    ($err:expr) => {
        Err(From::from($err))
    };
}

/// Split `\\server\share` (either separator) into its host and share parts.
///
/// A bare share name yields an empty host.
pub fn parse_unc(arg: &str) -> Option<(&str, &str)> {
    let trimmed = arg.trim_start_matches(['\\', '/']);
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.len() == arg.len() {
        return (!trimmed.contains(['\\', '/'])).then_some(("", trimmed));
    }

    let mut split = trimmed.splitn(2, ['\\', '/']);
    let (host, share) = (split.next()?, split.next()?);
    let share = share.trim_end_matches(['\\', '/']);
    if host.is_empty() || share.is_empty() || share.contains(['\\', '/']) {
        return None;
    }

    Some((host, share))
}

/// Normalize a share-relative path to the backslash form the server expects.
///
/// `.` components are dropped and `..` pops the previous component; a `..`
/// at the share root stays at the root.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(['\\', '/']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    parts.join("\\")
}

/// Last component of a normalized path.
pub fn base_name(path: &str) -> &str {
    path.rsplit('\\').next().unwrap_or(path)
}

/// Parent of a normalized path, empty for entries directly under the root.
pub fn dir_name(path: &str) -> &str {
    path.rfind('\\').map_or("", |i| &path[..i])
}

pub fn to_utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

pub fn from_utf16le(b: &[u8]) -> std::io::Result<String> {
    if b.len() % 2 != 0 {
        return Err(io_err!(InvalidData, "Odd length UTF-16 string"));
    }
    let units: Vec<u16> = b
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| io_err!(InvalidData, "Invalid UTF-16 sequence"))
}

/// 100ns intervals between 1601-01-01 and the unix epoch.
const FILETIME_EPOCH_DELTA: u64 = 116_444_736_000_000_000;

pub fn filetime_to_system_time(ft: u64) -> SystemTime {
    if ft >= FILETIME_EPOCH_DELTA {
        let ticks = ft - FILETIME_EPOCH_DELTA;
        UNIX_EPOCH + Duration::new(ticks / 10_000_000, ((ticks % 10_000_000) * 100) as u32)
    } else {
        UNIX_EPOCH
    }
}

pub fn system_time_to_filetime(t: SystemTime) -> u64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => FILETIME_EPOCH_DELTA + d.as_secs() * 10_000_000 + u64::from(d.subsec_nanos()) / 100,
        Err(_) => FILETIME_EPOCH_DELTA,
    }
}

/// Round `n` up to the next multiple of eight.
pub fn align8(n: usize) -> usize {
    (n + 7) & !7
}
