//! Open file and directory handles.

use {
    crate::{
        error::{errno, Error},
        info::{self, FileStat},
        io_err,
        pdu::*,
        tree::{self, Share},
        utils::{base_name, Result},
    },
    futures::stream::{self, Stream, StreamExt, TryStreamExt},
    log::{debug, warn},
    nix::sys::stat::mode_t,
    std::{collections::VecDeque, io::SeekFrom},
    tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
};

/// Chunks of a single read or write kept in flight at once.
const MAX_INFLIGHT_CHUNKS: usize = 8;

/// First read size of [`File::read_to_end`]; doubles while reads come back full.
const READ_TO_END_STEP: usize = 16 * 1024;

/// Upper bound on the QUERY_DIRECTORY output buffer.
const DIR_PAGE_SIZE: u32 = 64 * 1024;

/// Entries pulled per step by [`File::entries`].
const ENTRIES_BATCH: usize = 64;

const STANDARD_INFO_SIZE: u32 = 24;
const NETWORK_OPEN_INFO_SIZE: u32 = 56;

#[derive(Debug, Default)]
struct Listing {
    pending: VecDeque<FileStat>,
    exhausted: bool,
}

/// An open file or directory on a share.
///
/// The logical offset used by [`File::read`], [`File::write`] and
/// [`File::seek`] lives on the client; `read_at` and `write_at` leave it
/// alone. Dropping an open `File` closes the handle in the background;
/// call [`File::close`] to observe the result.
pub struct File {
    share: Share,
    name: String,
    file_id: FileId,
    stat: FileStat,
    offset: u64,
    append: bool,
    closed: bool,
    listing: Listing,
}

impl File {
    pub(crate) fn new(share: Share, name: String, file_id: FileId, times: &FileTimes, append: bool) -> File {
        File {
            stat: FileStat::from_times(base_name(&name), times),
            share,
            name,
            file_id,
            offset: 0,
            append,
            closed: false,
            listing: Listing::default(),
        }
    }

    /// Share relative path this handle was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn share(&self) -> &Share {
        &self.share
    }

    /// Attributes as of the open; use [`File::stat`] for current ones.
    pub fn cached_stat(&self) -> &FileStat {
        &self.stat
    }

    pub fn is_dir(&self) -> bool {
        self.stat.is_dir()
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn check(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed("file"));
        }
        self.share.tree.check()
    }

    async fn read_chunk(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        match self.read_once(offset, len).await {
            Err(Error::No(errno::EAGAIN)) if len > CREDIT_PAYLOAD_SIZE as usize => {
                debug!("Credit window shrank, reading {} in single credit pieces", self.name);
                let mut data = Vec::with_capacity(len);
                while data.len() < len {
                    let want = (len - data.len()).min(CREDIT_PAYLOAD_SIZE as usize);
                    let piece = self.read_once(offset + data.len() as u64, want).await?;
                    let short = piece.len() < want;
                    data.extend_from_slice(&piece);
                    if short {
                        break;
                    }
                }
                Ok(data)
            }
            r => r,
        }
    }

    async fn read_once(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let body = Body::ReadRequest {
            length: len as u32,
            offset,
            file_id: self.file_id,
            minimum_count: 0,
        };
        match self.share.tree.call(body).await {
            Ok(reply) => match reply.msg.body {
                Body::ReadResponse { data, .. } => Ok(data),
                _ => Err(Error::unexpected(Command::Read)),
            },
            Err(e) if e.status() == Some(status::END_OF_FILE) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn write_chunk(&self, offset: u64, data: &[u8]) -> Result<usize> {
        match self.write_once(offset, data).await {
            Err(Error::No(errno::EAGAIN)) if data.len() > CREDIT_PAYLOAD_SIZE as usize => {
                debug!("Credit window shrank, writing {} in single credit pieces", self.name);
                let mut done = 0;
                for piece in data.chunks(CREDIT_PAYLOAD_SIZE as usize) {
                    let n = self.write_once(offset + done as u64, piece).await?;
                    done += n;
                    if n < piece.len() {
                        break;
                    }
                }
                Ok(done)
            }
            r => r,
        }
    }

    async fn write_once(&self, offset: u64, data: &[u8]) -> Result<usize> {
        let body = Body::WriteRequest {
            offset,
            file_id: self.file_id,
            data: data.to_vec(),
        };
        match self.share.tree.call(body).await?.msg.body {
            Body::WriteResponse { count } => Ok((count as usize).min(data.len())),
            _ => Err(Error::unexpected(Command::Write)),
        }
    }

    /// Read into `buf` starting at `offset`.
    ///
    /// Large buffers are split by the negotiated read size and fetched
    /// concurrently. Returns fewer bytes than requested only at end of file.
    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.check().map_err(|e| e.with_path("read", &self.name))?;
        if buf.is_empty() {
            return Ok(0);
        }

        let chunk = self.share.tree.max_payload(|p| p.max_read_size);
        let results: Vec<(usize, Result<usize>)> =
            stream::iter(buf.chunks_mut(chunk).enumerate().map(|(i, part)| {
                let at = offset + (i * chunk) as u64;
                async move {
                    let want = part.len();
                    let got = self.read_chunk(at, want).await.map(|data| {
                        let n = data.len().min(want);
                        part[..n].copy_from_slice(&data[..n]);
                        n
                    });
                    (want, got)
                }
            }))
            .buffered(MAX_INFLIGHT_CHUNKS)
            .collect()
            .await;

        let mut total = 0;
        for (want, got) in results {
            match got {
                Ok(n) => {
                    total += n;
                    if n < want {
                        break;
                    }
                }
                Err(_) if total > 0 => break,
                Err(e) => return Err(e.with_path("read", &self.name)),
            }
        }
        Ok(total)
    }

    /// Write `data` at `offset`, split by the negotiated write size.
    ///
    /// Returns the length of the prefix of `data` the server accepted.
    pub async fn write_at(&self, data: &[u8], offset: u64) -> Result<usize> {
        self.check().map_err(|e| e.with_path("write", &self.name))?;
        if data.is_empty() {
            return Ok(0);
        }

        let chunk = self.share.tree.max_payload(|p| p.max_write_size);
        let results: Vec<(usize, Result<usize>)> =
            stream::iter(data.chunks(chunk).enumerate().map(|(i, part)| {
                let at = offset + (i * chunk) as u64;
                async move { (part.len(), self.write_chunk(at, part).await) }
            }))
            .buffered(MAX_INFLIGHT_CHUNKS)
            .collect()
            .await;

        let mut total = 0;
        for (want, got) in results {
            match got {
                Ok(n) => {
                    total += n;
                    if n < want {
                        break;
                    }
                }
                Err(_) if total > 0 => break,
                Err(e) => return Err(e.with_path("write", &self.name)),
            }
        }
        Ok(total)
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.read_at(buf, self.offset).await?;
        self.offset += n as u64;
        Ok(n)
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.append {
            self.offset = self.size().await?;
        }
        let n = self.write_at(data, self.offset).await?;
        self.offset += n as u64;
        Ok(n)
    }

    /// Write all of `data`, continuing after short writes.
    pub async fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            match self.write(data).await? {
                0 => {
                    return Err(Error::Io(io_err!(WriteZero, "failed to write whole buffer"))
                        .with_path("write", &self.name));
                }
                n => data = &data[n..],
            }
        }
        Ok(())
    }

    /// Read from the current offset to end of file, appending to `buf`.
    pub async fn read_to_end(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let start = buf.len();
        let limit = self.share.tree.max_payload(|p| p.max_read_size) * MAX_INFLIGHT_CHUNKS;
        let mut step = READ_TO_END_STEP.min(limit);
        loop {
            let len = buf.len();
            buf.resize(len + step, 0);
            match self.read(&mut buf[len..]).await {
                Ok(0) => {
                    buf.truncate(len);
                    break;
                }
                Ok(n) => {
                    buf.truncate(len + n);
                    if n == step {
                        step = (step * 2).min(limit);
                    }
                }
                Err(e) => {
                    buf.truncate(len);
                    return Err(e);
                }
            }
        }
        Ok(buf.len() - start)
    }

    /// Copy everything `r` yields into the file at the current offset.
    pub async fn read_from<R>(&mut self, r: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; self.share.tree.max_payload(|p| p.max_write_size)];
        let mut total = 0u64;
        loop {
            let n = r.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            self.write_all(&buf[..n]).await?;
            total += n as u64;
        }
    }

    /// Copy the file from the current offset into `w`.
    pub async fn write_to<W>(&mut self, w: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; self.share.tree.max_payload(|p| p.max_read_size)];
        let mut total = 0u64;
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                w.flush().await?;
                return Ok(total);
            }
            w.write_all(&buf[..n]).await?;
            total += n as u64;
        }
    }

    /// Move the logical offset. `SeekFrom::End` asks the server for the
    /// current size first.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => self.size().await?.checked_add_signed(delta),
        };
        match target {
            Some(n) => {
                self.offset = n;
                Ok(n)
            }
            None => Err(Error::No(errno::EINVAL).with_path("seek", &self.name)),
        }
    }

    async fn query(&self, info_type: u8, info_class: u8, len: u32) -> Result<Vec<u8>> {
        self.check()?;
        let body = tree::query_info(self.file_id, info_type, info_class, len);
        tree::info_data(self.share.tree.call(body).await?)
    }

    async fn set(&self, info_class: u8, data: Vec<u8>) -> Result<()> {
        self.check()?;
        let body = tree::set_info(self.file_id, info_type::FILE, info_class, data);
        self.share.tree.call(body).await?;
        Ok(())
    }

    /// Current end of file as reported by the server.
    pub async fn size(&self) -> Result<u64> {
        let result = async {
            let data = self
                .query(info_type::FILE, file_info_class::STANDARD, STANDARD_INFO_SIZE)
                .await?;
            Ok::<_, Error>(info::standard_info(&data).map_err(Error::malformed)?.end_of_file)
        };
        result.await.map_err(|e| e.with_path("stat", &self.name))
    }

    pub async fn stat(&self) -> Result<FileStat> {
        let result = async {
            let data = self
                .query(info_type::FILE, file_info_class::NETWORK_OPEN, NETWORK_OPEN_INFO_SIZE)
                .await?;
            info::network_open_info(base_name(&self.name), &data).map_err(Error::malformed)
        };
        result.await.map_err(|e| e.with_path("stat", &self.name))
    }

    /// Set the file size, extending with zeros or discarding the tail.
    pub async fn truncate(&self, size: u64) -> Result<()> {
        self.set(file_info_class::END_OF_FILE, info::end_of_file_info(size))
            .await
            .map_err(|e| e.with_path("truncate", &self.name))
    }

    /// Flush server side buffers to stable storage.
    pub async fn sync(&self) -> Result<()> {
        let result = async {
            self.check()?;
            self.share
                .tree
                .call(Body::FlushRequest {
                    file_id: self.file_id,
                })
                .await
        };
        result
            .await
            .map(|_| ())
            .map_err(|e| e.with_path("sync", &self.name))
    }

    /// Toggle the read-only attribute from the owner write bit of `mode`.
    pub async fn chmod(&self, mode: mode_t) -> Result<()> {
        let current = self.stat().await?.attributes;
        let mut attributes = current;
        attributes.set(FileAttributes::READONLY, mode & 0o200 == 0);
        if attributes == current {
            return Ok(());
        }
        if attributes.is_empty() {
            attributes = FileAttributes::NORMAL;
        }
        let data = info::basic_info(attributes).map_err(Error::malformed)?;
        self.set(file_info_class::BASIC, data)
            .await
            .map_err(|e| e.with_path("chmod", &self.name))
    }

    async fn query_directory(&self) -> Result<Option<Vec<FileStat>>> {
        let len = self
            .share
            .tree
            .max_payload(|p| p.max_transact_size)
            .min(DIR_PAGE_SIZE as usize) as u32;
        let body = Body::QueryDirectoryRequest {
            info_class: file_info_class::DIRECTORY,
            flags: QueryDirectoryFlags::empty(),
            file_index: 0,
            file_id: self.file_id,
            pattern: "*".to_owned(),
            output_buffer_length: len,
        };
        match self.share.tree.call(body).await {
            Ok(reply) => match reply.msg.body {
                Body::QueryDirectoryResponse { data } => info::directory_entries(&data)
                    .map(Some)
                    .map_err(Error::malformed),
                _ => Err(Error::unexpected(Command::QueryDirectory)),
            },
            Err(e) if e.status() == Some(status::NO_MORE_FILES) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Next directory entries, skipping `.` and `..`.
    ///
    /// `None` reads until the directory is exhausted; `Some(n)` returns at
    /// most `n` entries. Listing is once-through: an empty result means
    /// there is nothing left.
    pub async fn read_dir(&mut self, count: Option<usize>) -> Result<Vec<FileStat>> {
        self.check().map_err(|e| e.with_path("readdir", &self.name))?;
        let want = count.unwrap_or(usize::MAX);
        let mut entries = Vec::new();

        while entries.len() < want {
            if let Some(entry) = self.listing.pending.pop_front() {
                entries.push(entry);
                continue;
            }
            if self.listing.exhausted {
                break;
            }
            match self
                .query_directory()
                .await
                .map_err(|e| e.with_path("readdir", &self.name))?
            {
                Some(page) if !page.is_empty() => self
                    .listing
                    .pending
                    .extend(page.into_iter().filter(|e| e.name != "." && e.name != "..")),
                _ => self.listing.exhausted = true,
            }
        }
        Ok(entries)
    }

    /// Lazy stream over the remaining directory entries.
    pub fn entries(&mut self) -> impl Stream<Item = Result<FileStat>> + '_ {
        stream::try_unfold(self, |file| async move {
            let batch = file.read_dir(Some(ENTRIES_BATCH)).await?;
            let next = (!batch.is_empty())
                .then(|| (stream::iter(batch.into_iter().map(Ok::<_, Error>)), file));
            Ok::<_, Error>(next)
        })
        .try_flatten()
    }

    /// Close the handle. Later calls on this `File` fail with `Error::Closed`.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed("file").with_path("close", &self.name));
        }
        self.closed = true;
        self.share
            .tree
            .close_handle(self.file_id)
            .await
            .map_err(|e| e.with_path("close", &self.name))
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if self.closed || self.share.is_closed() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("{} dropped outside of a runtime, handle left open", self.name);
            return;
        };
        let tree = self.share.tree.clone();
        let file_id = self.file_id;
        let name = std::mem::take(&mut self.name);
        runtime.spawn(async move {
            if let Err(e) = tree.close_handle(file_id).await {
                debug!("Closing {} on drop failed: {}", name, e);
            }
        });
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("name", &self.name)
            .field("file_id", &self.file_id)
            .field("offset", &self.offset)
            .field("closed", &self.closed)
            .finish()
    }
}
