//! Tree connections and path based filesystem operations.
//!
//! Most path operations are sent as one related compound chain (CREATE, the
//! operation itself, CLOSE) so they cost a single round trip and never leave
//! a handle open on failure.

use {
    crate::{
        conn::{NegotiatedParameters, Reply},
        error::{errno, Error},
        file::File,
        info::{self, FileStat, StatFs},
        pdu::*,
        session::Session,
        utils::{base_name, normalize_path, Result},
    },
    log::{debug, info, warn},
    nix::{fcntl::OFlag, sys::stat::mode_t},
    num_traits::FromPrimitive,
    std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// `SecurityImpersonation`
const IMPERSONATION: u32 = 2;

/// Output buffer size for the reparse point FSCTL.
const REPARSE_BUFFER_SIZE: u32 = 16 * 1024;

/// Fixed sizes of the information classes queried by path.
const NETWORK_OPEN_INFO_SIZE: u32 = 56;
const FS_FULL_SIZE_INFO_SIZE: u32 = 32;

/// Parameters of a CREATE request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct CreateSpec {
    pub access: AccessMask,
    pub attributes: FileAttributes,
    pub share_access: ShareAccess,
    pub disposition: CreateDisposition,
    pub options: CreateOptions,
}

impl CreateSpec {
    /// Open an existing object with full sharing.
    pub fn open(access: AccessMask, options: CreateOptions) -> CreateSpec {
        CreateSpec {
            access,
            attributes: FileAttributes::empty(),
            share_access: ShareAccess::all(),
            disposition: CreateDisposition::Open,
            options,
        }
    }

    /// Map POSIX open flags and permission bits.
    ///
    /// `O_APPEND` trades write access for append access plus the attribute
    /// read needed to find the end of file; a mode without the owner write
    /// bit creates the file read-only.
    pub fn from_flags(flags: OFlag, mode: mode_t) -> CreateSpec {
        let accmode = flags & OFlag::O_ACCMODE;
        let mut access = if accmode == OFlag::O_WRONLY {
            AccessMask::GENERIC_WRITE
        } else if accmode == OFlag::O_RDWR {
            AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE
        } else {
            AccessMask::GENERIC_READ
        };
        if flags.contains(OFlag::O_CREAT) {
            access |= AccessMask::GENERIC_WRITE;
        }
        if flags.contains(OFlag::O_APPEND) {
            access.remove(AccessMask::GENERIC_WRITE);
            access |= AccessMask::APPEND_DATA | AccessMask::READ_ATTRIBUTES;
        }

        let creat = flags.contains(OFlag::O_CREAT);
        let disposition = if creat && flags.contains(OFlag::O_EXCL) {
            CreateDisposition::Create
        } else if creat && flags.contains(OFlag::O_TRUNC) {
            CreateDisposition::OverwriteIf
        } else if creat {
            CreateDisposition::OpenIf
        } else if flags.contains(OFlag::O_TRUNC) {
            CreateDisposition::Overwrite
        } else {
            CreateDisposition::Open
        };

        let attributes = if mode & 0o200 == 0 {
            FileAttributes::READONLY
        } else {
            FileAttributes::NORMAL
        };

        CreateSpec {
            access,
            attributes,
            share_access: ShareAccess::READ | ShareAccess::WRITE,
            disposition,
            options: CreateOptions::SYNCHRONOUS_IO_NONALERT,
        }
    }

    pub fn request(&self, name: &str) -> Body {
        Body::CreateRequest {
            requested_oplock_level: 0,
            impersonation_level: IMPERSONATION,
            desired_access: self.access,
            file_attributes: self.attributes,
            share_access: self.share_access,
            create_disposition: self.disposition as u32,
            create_options: self.options,
            name: name.to_owned(),
        }
    }
}

pub(crate) fn query_info(file_id: FileId, info_type: u8, info_class: u8, len: u32) -> Body {
    Body::QueryInfoRequest {
        info_type,
        info_class,
        output_buffer_length: len,
        additional_information: 0,
        flags: 0,
        file_id,
    }
}

pub(crate) fn set_info(file_id: FileId, info_type: u8, info_class: u8, data: Vec<u8>) -> Body {
    Body::SetInfoRequest {
        info_type,
        info_class,
        additional_information: 0,
        file_id,
        data,
    }
}

pub(crate) fn info_data(reply: Reply) -> Result<Vec<u8>> {
    match reply.msg.body {
        Body::QueryInfoResponse { data } => Ok(data),
        _ => Err(Error::unexpected(Command::QueryInfo)),
    }
}

fn ioctl_output(reply: Reply) -> Result<Vec<u8>> {
    match reply.msg.body {
        Body::IoctlResponse { output, .. } => Ok(output),
        _ => Err(Error::unexpected(Command::Ioctl)),
    }
}

pub(crate) struct TreeState {
    session: Session,
    tree_id: u32,
    path: String,
    share_type: ShareType,
    share_flags: ShareFlags,
    capabilities: ShareCapabilities,
    maximal_access: AccessMask,
    closed: AtomicBool,
}

impl TreeState {
    pub fn tree_id(&self) -> u32 {
        self.tree_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.session.is_closed()
    }

    pub fn check(&self) -> Result<()> {
        self.session.check()?;
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed("share"));
        }
        Ok(())
    }

    fn params(&self) -> Option<&NegotiatedParameters> {
        self.session.conn().negotiated()
    }

    /// Largest payload a single request may carry given `limit` from the
    /// negotiated parameters and the credits currently granted.
    pub fn max_payload(&self, limit: fn(&NegotiatedParameters) -> u32) -> usize {
        let Some(params) = self.params() else {
            return CREDIT_PAYLOAD_SIZE as usize;
        };
        let credits = if params.dialect.supports_multi_credit() {
            self.session
                .conn()
                .credits()
                .held()
                .max(1)
                .saturating_mul(CREDIT_PAYLOAD_SIZE)
        } else {
            CREDIT_PAYLOAD_SIZE
        };
        limit(params).min(credits).max(1) as usize
    }

    pub async fn call(&self, body: Body) -> Result<Reply> {
        self.check()?;
        self.session.call(self.tree_id, body).await?.check()
    }

    pub async fn create(&self, name: &str, spec: CreateSpec) -> Result<(FileId, FileTimes)> {
        match self.call(spec.request(name)).await?.msg.body {
            Body::CreateResponse { file_id, times, .. } => Ok((file_id, times)),
            _ => Err(Error::unexpected(Command::Create)),
        }
    }

    pub async fn close_handle(&self, file_id: FileId) -> Result<()> {
        self.call(Body::CloseRequest { flags: 0, file_id }).await?;
        Ok(())
    }

    /// Credits a chain of `bodies` costs on this connection.
    fn chain_cost(&self, bodies: &[Body]) -> u32 {
        let multi_credit = self
            .params()
            .is_some_and(|p| p.dialect.supports_multi_credit());
        bodies
            .iter()
            .map(|b| {
                if multi_credit {
                    let (send, recv) = b.payload_sizes();
                    u32::from(credit_charge(send, recv))
                } else {
                    1
                }
            })
            .sum()
    }

    /// Open `name`, run `ops` against the new handle and close it, all in
    /// one compound chain. Returns the replies to `ops`.
    ///
    /// When the credit window is too small for the whole chain the requests
    /// go out one at a time instead.
    pub async fn with_handle(&self, name: &str, spec: CreateSpec, ops: Vec<Body>) -> Result<Vec<Reply>> {
        self.check()?;
        let n = ops.len();
        let mut bodies = Vec::with_capacity(n + 2);
        bodies.push(spec.request(name));
        bodies.extend(ops);
        bodies.push(Body::CloseRequest {
            flags: 0,
            file_id: FileId::RELATED,
        });

        if self.chain_cost(&bodies) > self.session.conn().credits().held() {
            return self.with_handle_sequential(name, spec, bodies).await;
        }
        let results = match self.session.call_compound(self.tree_id, bodies.clone()).await {
            Err(Error::No(errno::EAGAIN)) => {
                return self.with_handle_sequential(name, spec, bodies).await;
            }
            r => r?,
        };
        let mut results = results.into_iter();

        results.next().ok_or(Error::ConnectionLost)??.check()?;

        let mut replies = Vec::with_capacity(n);
        let mut failure = None;
        for result in results.by_ref().take(n) {
            match result.and_then(Reply::check) {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(Err(e)) = results.next().map(|r| r.and_then(Reply::check)) {
            debug!("Closing {} failed: {}", name, e);
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(replies),
        }
    }

    /// `with_handle` without compounding. `bodies` is the full chain; its
    /// related file ids are replaced by the one CREATE returns.
    async fn with_handle_sequential(&self, name: &str, spec: CreateSpec, bodies: Vec<Body>) -> Result<Vec<Reply>> {
        debug!("Sending {} requests on {} one at a time", bodies.len(), name);
        let (file_id, _) = self.create(name, spec).await?;

        // Skip the CREATE at the head and the CLOSE at the tail.
        let n = bodies.len().saturating_sub(2);
        let mut replies = Vec::with_capacity(n);
        let mut failure = None;
        for mut body in bodies.into_iter().skip(1).take(n) {
            if let Some(id) = body.file_id_mut() {
                if *id == FileId::RELATED {
                    *id = file_id;
                }
            }
            match self.call(body).await {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if let Err(e) = self.close_handle(file_id).await {
            debug!("Closing {} failed: {}", name, e);
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(replies),
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Closed("share"));
        }
        self.session
            .call(self.tree_id, Body::TreeDisconnectRequest)
            .await?
            .check()?;
        info!("Unmounted {}", self.path);
        Ok(())
    }
}

/// A mounted share.
///
/// Cloning yields another handle to the same tree connection. Files opened
/// from a share keep it alive; once the share is unmounted they fail with
/// `Error::Closed`.
#[derive(Clone)]
pub struct Share {
    pub(crate) tree: Arc<TreeState>,
}

impl Share {
    pub(crate) async fn connect(session: &Session, path: &str) -> Result<Share> {
        let reply = session
            .call(
                0,
                Body::TreeConnectRequest {
                    path: path.to_owned(),
                },
            )
            .await
            .and_then(Reply::check)
            .map_err(|e| e.with_path("mount", path))?;

        let tree_id = reply.msg.header.tree_id;
        let Body::TreeConnectResponse {
            share_type,
            share_flags,
            capabilities,
            maximal_access,
        } = reply.msg.body
        else {
            return Err(Error::unexpected(Command::TreeConnect));
        };
        let share_type = ShareType::from_u8(share_type)
            .ok_or_else(|| Error::Framing(format!("unknown share type {}", share_type)))?;

        let tree = Arc::new(TreeState {
            session: session.clone(),
            tree_id,
            path: path.to_owned(),
            share_type,
            share_flags,
            capabilities,
            maximal_access,
            closed: AtomicBool::new(false),
        });
        session.register_tree(&tree);
        info!("Mounted {} as tree {} ({:?})", path, tree_id, share_type);

        Ok(Share { tree })
    }

    /// `\\server\share` this tree is connected to.
    pub fn path(&self) -> &str {
        &self.tree.path
    }

    pub fn tree_id(&self) -> u32 {
        self.tree.tree_id
    }

    pub fn share_type(&self) -> ShareType {
        self.tree.share_type
    }

    pub fn share_flags(&self) -> ShareFlags {
        self.tree.share_flags
    }

    pub fn capabilities(&self) -> ShareCapabilities {
        self.tree.capabilities
    }

    pub fn maximal_access(&self) -> AccessMask {
        self.tree.maximal_access
    }

    pub fn session(&self) -> &Session {
        &self.tree.session
    }

    pub fn is_closed(&self) -> bool {
        self.tree.is_closed()
    }

    /// Disconnect the tree. Open files become unusable.
    pub async fn umount(&self) -> Result<()> {
        self.tree.disconnect().await
    }

    pub(crate) async fn open_with(&self, path: &str, spec: CreateSpec, append: bool) -> Result<File> {
        let name = normalize_path(path);
        let (file_id, times) = self.tree.create(&name, spec).await?;
        debug!("Opened {} as {:?}", name, file_id);
        Ok(File::new(self.clone(), name, file_id, &times, append))
    }

    /// Open `path` with POSIX style flags.
    ///
    /// ```no_run
    /// # async fn run(share: smb2::Share) -> smb2::Result<()> {
    /// use nix::fcntl::OFlag;
    /// let mut f = share
    ///     .open_file("dir/new.txt", OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_EXCL, 0o644)
    ///     .await?;
    /// f.write_all(b"hello").await?;
    /// f.close().await
    /// # }
    /// ```
    pub async fn open_file(&self, path: &str, flags: OFlag, mode: mode_t) -> Result<File> {
        let spec = CreateSpec::from_flags(flags, mode);
        self.open_with(path, spec, flags.contains(OFlag::O_APPEND))
            .await
            .map_err(|e| e.with_path("open", path))
    }

    /// Open an existing file or directory for reading.
    pub async fn open(&self, path: &str) -> Result<File> {
        self.open_file(path, OFlag::O_RDONLY, 0).await
    }

    /// Create or truncate a file for reading and writing.
    pub async fn create(&self, path: &str) -> Result<File> {
        self.open_file(path, OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_TRUNC, 0o666)
            .await
    }

    async fn open_dir(&self, path: &str) -> Result<File> {
        let spec = CreateSpec::open(
            AccessMask::READ_DATA | AccessMask::READ_ATTRIBUTES | AccessMask::SYNCHRONIZE,
            CreateOptions::DIRECTORY_FILE,
        );
        self.open_with(path, spec, false).await
    }

    /// Create a directory. A `mode` without the owner write bit makes it
    /// read-only, as with [`Share::open_file`].
    pub async fn mkdir(&self, path: &str, mode: mode_t) -> Result<()> {
        let mut attributes = FileAttributes::DIRECTORY;
        if mode & 0o200 == 0 {
            attributes |= FileAttributes::READONLY;
        }
        let spec = CreateSpec {
            access: AccessMask::WRITE_ATTRIBUTES,
            attributes,
            share_access: ShareAccess::all(),
            disposition: CreateDisposition::Create,
            options: CreateOptions::DIRECTORY_FILE,
        };
        self.tree
            .with_handle(&normalize_path(path), spec, Vec::new())
            .await
            .map(|_| ())
            .map_err(|e| e.with_path("mkdir", path))
    }

    /// Create a directory and any missing parents, each with `mode`.
    pub async fn mkdir_all(&self, path: &str, mode: mode_t) -> Result<()> {
        let name = normalize_path(path);
        match self.stat(&name).await {
            Ok(st) if st.is_dir() => return Ok(()),
            Ok(_) => return Err(Error::No(errno::ENOTDIR).with_path("mkdir", path)),
            Err(e) if !e.is_not_found() => return Err(e),
            Err(_) => {}
        }

        let mut prefix = String::with_capacity(name.len());
        for part in name.split('\\') {
            if !prefix.is_empty() {
                prefix.push('\\');
            }
            prefix.push_str(part);
            match self.mkdir(&prefix, mode).await {
                Err(e) if !e.is_exists() => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }

    /// Remove a file, symbolic link or empty directory.
    pub async fn remove(&self, path: &str) -> Result<()> {
        let name = normalize_path(path);
        let spec = CreateSpec::open(AccessMask::DELETE, CreateOptions::OPEN_REPARSE_POINT);
        let ops = vec![set_info(
            FileId::RELATED,
            info_type::FILE,
            file_info_class::DISPOSITION,
            info::disposition_info(true),
        )];
        self.tree
            .with_handle(&name, spec, ops)
            .await
            .map(|_| ())
            .map_err(|e| e.with_path("remove", path))
    }

    /// Remove `path` and everything below it. A missing path is not an error.
    pub async fn remove_all(&self, path: &str) -> Result<()> {
        let mut stack = vec![(normalize_path(path), false)];

        while let Some((name, expanded)) = stack.pop() {
            if expanded {
                self.remove(&name).await?;
                continue;
            }
            let st = match self.lstat(&name).await {
                Ok(st) => st,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            if st.is_dir() && !st.is_symlink() {
                let entries = self.read_dir(&name).await?;
                stack.push((name.clone(), true));
                for entry in entries {
                    stack.push((format!("{}\\{}", name, entry.name), false));
                }
            } else {
                match self.remove(&name).await {
                    Err(e) if !e.is_not_found() => return Err(e),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Rename `old` to `new` in a single round trip. An existing `new` is not
    /// replaced.
    pub async fn rename(&self, old: &str, new: &str) -> Result<()> {
        let data = info::rename_info(&normalize_path(new), false).map_err(Error::malformed)?;
        let spec = CreateSpec::open(
            AccessMask::DELETE | AccessMask::READ_ATTRIBUTES,
            CreateOptions::OPEN_REPARSE_POINT,
        );
        let ops = vec![set_info(
            FileId::RELATED,
            info_type::FILE,
            file_info_class::RENAME,
            data,
        )];
        self.tree
            .with_handle(&normalize_path(old), spec, ops)
            .await
            .map(|_| ())
            .map_err(|e| e.with_path("rename", old))
    }

    async fn stat_with(&self, path: &str, options: CreateOptions) -> Result<FileStat> {
        let name = normalize_path(path);
        let spec = CreateSpec::open(AccessMask::READ_ATTRIBUTES, options);
        let ops = vec![query_info(
            FileId::RELATED,
            info_type::FILE,
            file_info_class::NETWORK_OPEN,
            NETWORK_OPEN_INFO_SIZE,
        )];
        let mut replies = self.tree.with_handle(&name, spec, ops).await?;
        let reply = replies.pop().ok_or_else(|| Error::unexpected(Command::QueryInfo))?;
        info::network_open_info(base_name(&name), &info_data(reply)?).map_err(Error::malformed)
    }

    pub async fn stat(&self, path: &str) -> Result<FileStat> {
        self.stat_with(path, CreateOptions::empty())
            .await
            .map_err(|e| e.with_path("stat", path))
    }

    /// Like [`Share::stat`] but describes a symbolic link itself.
    pub async fn lstat(&self, path: &str) -> Result<FileStat> {
        self.stat_with(path, CreateOptions::OPEN_REPARSE_POINT)
            .await
            .map_err(|e| e.with_path("lstat", path))
    }

    /// Set or clear the read-only attribute from the owner write bit of `mode`.
    pub async fn chmod(&self, path: &str, mode: mode_t) -> Result<()> {
        let spec = CreateSpec::open(
            AccessMask::READ_ATTRIBUTES | AccessMask::WRITE_ATTRIBUTES,
            CreateOptions::empty(),
        );
        let result = async {
            let mut f = self.open_with(path, spec, false).await?;
            let changed = f.chmod(mode).await;
            let closed = f.close().await;
            changed.and(closed)
        };
        result.await.map_err(|e| e.with_path("chmod", path))
    }

    /// Capacity of the filesystem behind the share.
    pub async fn statfs(&self) -> Result<StatFs> {
        let spec = CreateSpec::open(AccessMask::READ_ATTRIBUTES, CreateOptions::DIRECTORY_FILE);
        let ops = vec![query_info(
            FileId::RELATED,
            info_type::FILESYSTEM,
            fs_info_class::FULL_SIZE,
            FS_FULL_SIZE_INFO_SIZE,
        )];
        let mut replies = self.tree.with_handle("", spec, ops).await?;
        let reply = replies.pop().ok_or_else(|| Error::unexpected(Command::QueryInfo))?;
        info::fs_full_size_info(&info_data(reply)?).map_err(Error::malformed)
    }

    pub async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        let spec = CreateSpec::open(AccessMask::WRITE_DATA, CreateOptions::NON_DIRECTORY_FILE);
        let ops = vec![set_info(
            FileId::RELATED,
            info_type::FILE,
            file_info_class::END_OF_FILE,
            info::end_of_file_info(size),
        )];
        self.tree
            .with_handle(&normalize_path(path), spec, ops)
            .await
            .map(|_| ())
            .map_err(|e| e.with_path("truncate", path))
    }

    /// Create a symbolic link at `link` pointing to `target`.
    ///
    /// Servers without reparse point support fail with an error for which
    /// [`Error::is_unsupported`] holds.
    pub async fn symlink(&self, target: &str, link: &str) -> Result<()> {
        let name = normalize_path(link);
        let buffer = info::symlink_reparse_buffer(&target.replace('/', "\\"))
            .map_err(Error::malformed)?;
        let spec = CreateSpec {
            access: AccessMask::WRITE_ATTRIBUTES | AccessMask::DELETE,
            attributes: FileAttributes::REPARSE_POINT,
            share_access: ShareAccess::all(),
            disposition: CreateDisposition::Create,
            options: CreateOptions::OPEN_REPARSE_POINT,
        };
        let (file_id, _) = self
            .tree
            .create(&name, spec)
            .await
            .map_err(|e| e.with_path("symlink", link))?;

        let linked = self
            .tree
            .call(Body::IoctlRequest {
                ctl_code: FSCTL_SET_REPARSE_POINT,
                file_id,
                input: buffer,
                max_output_response: 0,
                flags: SMB2_0_IOCTL_IS_FSCTL,
            })
            .await;

        if let Err(e) = linked {
            // the placeholder file must not survive a failed link
            let delete = set_info(
                file_id,
                info_type::FILE,
                file_info_class::DISPOSITION,
                info::disposition_info(true),
            );
            if let Err(e) = self.tree.call(delete).await {
                warn!("Failed to remove {} after symlink failure: {}", name, e);
            }
            if let Err(e) = self.tree.close_handle(file_id).await {
                debug!("Closing {} failed: {}", name, e);
            }
            return Err(e.with_path("symlink", link));
        }

        self.tree
            .close_handle(file_id)
            .await
            .map_err(|e| e.with_path("symlink", link))
    }

    /// Target of the symbolic link at `path`.
    pub async fn readlink(&self, path: &str) -> Result<String> {
        let spec = CreateSpec::open(AccessMask::READ_ATTRIBUTES, CreateOptions::OPEN_REPARSE_POINT);
        let ops = vec![Body::IoctlRequest {
            ctl_code: FSCTL_GET_REPARSE_POINT,
            file_id: FileId::RELATED,
            input: Vec::new(),
            max_output_response: REPARSE_BUFFER_SIZE,
            flags: SMB2_0_IOCTL_IS_FSCTL,
        }];
        let result = async {
            let mut replies = self.tree.with_handle(&normalize_path(path), spec, ops).await?;
            let reply = replies.pop().ok_or_else(|| Error::unexpected(Command::Ioctl))?;
            info::parse_symlink_reparse_buffer(&ioctl_output(reply)?).map_err(Error::malformed)
        };
        result.await.map_err(|e| e.with_path("readlink", path))
    }

    /// Entries of the directory at `path`, without `.` and `..`.
    pub async fn read_dir(&self, path: &str) -> Result<Vec<FileStat>> {
        let result = async {
            let mut dir = self.open_dir(path).await?;
            let entries = dir.read_dir(None).await;
            let closed = dir.close().await;
            let entries = entries?;
            closed.map(|()| entries)
        };
        result.await.map_err(|e| e.with_path("readdir", path))
    }

    /// Read the whole file at `path`.
    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut f = self.open(path).await?;
        let mut buf = Vec::new();
        let read = f.read_to_end(&mut buf).await;
        let closed = f.close().await;
        read.and(closed).map_err(|e| e.with_path("read", path))?;
        Ok(buf)
    }

    /// Replace the contents of `path`, creating it with `mode` if missing.
    pub async fn write_file(&self, path: &str, data: &[u8], mode: mode_t) -> Result<()> {
        let mut f = self
            .open_file(path, OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC, mode)
            .await?;
        let written = f.write_all(data).await;
        let closed = f.close().await;
        written.and(closed).map_err(|e| e.with_path("write", path))
    }
}

impl std::fmt::Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Share")
            .field("path", &self.tree.path)
            .field("tree_id", &self.tree.tree_id)
            .field("share_type", &self.tree.share_type)
            .finish()
    }
}
