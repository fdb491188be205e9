//! In-process SMB2 file server for the integration tests.
//!
//! Serves an in-memory filesystem over a `tokio::io::duplex` pipe and records
//! what it saw on the wire, so tests can check credit accounting and signing
//! from the server's side of the connection.

#![allow(dead_code)]

use {
    async_trait::async_trait,
    bytes::Bytes,
    futures::sink::SinkExt,
    num_traits::FromPrimitive,
    smb2::{
        conn::frame_codec,
        pdu::*,
        serialize::{self, Encoder},
        sign::{PreauthHash, Signer},
        utils::{align8, from_utf16le, to_utf16le},
        Dialer, Initiator, Negotiator, Session, Step,
    },
    std::{
        collections::{BTreeMap, HashMap, HashSet},
        sync::{
            atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
            Arc, Mutex, MutexGuard,
        },
        time::Duration,
    },
    tokio::{io::DuplexStream, task::JoinHandle},
    tokio_stream::StreamExt,
};

pub const SESSION_KEY: [u8; 16] = *b"0123456789abcdef";
pub const PASSWORD: &[u8] = b"secret";
pub const HOST: &str = "fileserver";
pub const SHARE: &str = "public";

/// Timestamp reported for every node
const FILETIME: u64 = 133_500_000_000_000_000;

type Status<T> = std::result::Result<T, u32>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Server behaviour knobs.
#[derive(Clone, Debug)]
pub struct Options {
    /// Highest dialect the server speaks
    pub dialect: Dialect,
    /// Answer NEGOTIATE with the 0x02FF wildcard
    pub wildcard: bool,
    pub require_signing: bool,
    /// Preferred algorithm for the 3.1.1 signing context
    pub signing_algorithm: u16,
    pub max_read_size: u32,
    pub max_write_size: u32,
    pub max_transact_size: u32,
    /// Ceiling on the credits granted by one response
    pub max_grant: u16,
    /// MORE_PROCESSING_REQUIRED rounds before the final answer
    pub auth_rounds: usize,
    pub password: Vec<u8>,
    pub guest: bool,
    pub share: String,
    pub symlinks: bool,
    /// Directory entries returned per QUERY_DIRECTORY page
    pub dir_page_entries: usize,
    /// Delay responses by message id so they complete out of order
    pub jitter: bool,
    /// Never answer ECHO
    pub stall_echo: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            dialect: Dialect::Smb311,
            wildcard: false,
            require_signing: false,
            signing_algorithm: signing_algorithm::AES_CMAC,
            max_read_size: 1 << 20,
            max_write_size: 1 << 20,
            max_transact_size: 1 << 20,
            max_grant: 64,
            auth_rounds: 1,
            password: PASSWORD.to_vec(),
            guest: false,
            share: SHARE.to_owned(),
            symlinks: true,
            dir_page_entries: 128,
            jitter: false,
            stall_echo: false,
        }
    }
}

/// What the server observed.
#[derive(Debug, Default)]
pub struct Stats {
    pub requests: AtomicU32,
    pub compound_frames: AtomicU32,
    /// Credit charges of requests received but not yet answered
    pub outstanding: AtomicU32,
    pub peak_outstanding: AtomicU32,
    /// Requests whose message id lay outside the granted window
    pub credit_violations: AtomicU32,
    pub bad_signatures: AtomicU32,
    /// Requests of a signed session that arrived without a signature
    pub unsigned_requests: AtomicU32,
    pub signed_requests: AtomicU32,
    pub max_read_len: AtomicU32,
    pub max_write_len: AtomicU32,
    pub reads: AtomicU32,
    pub writes: AtomicU32,
    /// Corrupt the signature of the next ECHO response
    pub tamper_next_echo: AtomicBool,
    /// Send the next ECHO response without signing it
    pub unsigned_next_echo: AtomicBool,
    pub granted_upto: AtomicU64,
}

/// Authenticates with a fixed password token and session key.
#[derive(Clone, Debug)]
pub struct StaticInitiator {
    pub password: Vec<u8>,
    pub key: Option<Vec<u8>>,
}

impl Default for StaticInitiator {
    fn default() -> Self {
        StaticInitiator {
            password: PASSWORD.to_vec(),
            key: Some(SESSION_KEY.to_vec()),
        }
    }
}

#[async_trait]
impl Initiator for StaticInitiator {
    async fn step(&mut self, input: Option<&[u8]>) -> smb2::Result<Step> {
        Ok(match input {
            Some(input) if input == b"done" => Step {
                token: Vec::new(),
                done: true,
            },
            _ => Step {
                token: self.password.clone(),
                done: false,
            },
        })
    }

    fn session_key(&self) -> Option<Vec<u8>> {
        self.key.clone()
    }
}

#[derive(Clone, Debug, Default)]
struct Node {
    dir: bool,
    data: Vec<u8>,
    readonly: bool,
    reparse: Option<Vec<u8>>,
    delete_pending: bool,
}

impl Node {
    fn attributes(&self) -> FileAttributes {
        let mut attrs = if self.dir {
            FileAttributes::DIRECTORY
        } else {
            FileAttributes::ARCHIVE
        };
        if self.readonly {
            attrs |= FileAttributes::READONLY;
        }
        if self.reparse.is_some() {
            attrs |= FileAttributes::REPARSE_POINT;
        }
        attrs
    }

    fn times(&self) -> FileTimes {
        let size = if self.dir { 0 } else { self.data.len() as u64 };
        FileTimes {
            creation_time: FILETIME,
            last_access_time: FILETIME,
            last_write_time: FILETIME,
            change_time: FILETIME,
            allocation_size: size.div_ceil(4096) * 4096,
            end_of_file: size,
            file_attributes: self.attributes(),
        }
    }
}

struct Handle {
    path: String,
    access: AccessMask,
    delete_on_close: bool,
    listing: Option<Vec<(String, FileTimes)>>,
}

impl Handle {
    fn can_read(&self) -> bool {
        self.access
            .intersects(AccessMask::GENERIC_READ | AccessMask::GENERIC_ALL | AccessMask::READ_DATA)
    }

    fn can_write(&self) -> bool {
        self.access.intersects(
            AccessMask::GENERIC_WRITE
                | AccessMask::GENERIC_ALL
                | AccessMask::WRITE_DATA
                | AccessMask::APPEND_DATA,
        )
    }
}

#[derive(Default)]
struct SessionEntry {
    rounds: usize,
    established: bool,
    preauth: Option<PreauthHash>,
    signer: Option<Arc<Signer>>,
}

struct State {
    dialect: Option<Dialect>,
    signing_algorithm: u16,
    preauth: Option<PreauthHash>,
    granted_upto: u64,
    sessions: HashMap<u64, SessionEntry>,
    next_session: u64,
    trees: HashSet<u32>,
    next_tree: u32,
    nodes: BTreeMap<String, Node>,
    handles: HashMap<u64, Handle>,
    next_handle: u64,
}

impl State {
    fn new() -> State {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            String::new(),
            Node {
                dir: true,
                ..Default::default()
            },
        );
        State {
            dialect: None,
            signing_algorithm: signing_algorithm::HMAC_SHA256,
            preauth: None,
            granted_upto: 1,
            sessions: HashMap::new(),
            next_session: 0x1000_0001,
            trees: HashSet::new(),
            next_tree: 1,
            nodes,
            handles: HashMap::new(),
            next_handle: 1,
        }
    }

    fn signer(&self, session_id: u64) -> Option<Arc<Signer>> {
        self.sessions
            .get(&session_id)
            .filter(|s| s.established)
            .and_then(|s| s.signer.clone())
    }

    fn require_session(&self, session_id: u64) -> Status<()> {
        match self.sessions.get(&session_id) {
            Some(s) if s.established => Ok(()),
            _ => Err(status::USER_SESSION_DELETED),
        }
    }

    fn require_tree(&self, tree_id: u32) -> Status<()> {
        if self.trees.contains(&tree_id) {
            Ok(())
        } else {
            Err(status::NETWORK_NAME_DELETED)
        }
    }

    fn handle(&self, file_id: FileId) -> Status<&Handle> {
        self.handles.get(&file_id.volatile).ok_or(status::FILE_CLOSED)
    }

    fn node_of(&self, file_id: FileId) -> Status<&Node> {
        let path = &self.handle(file_id)?.path;
        self.nodes.get(path).ok_or(status::FILE_CLOSED)
    }

    fn node_of_mut(&mut self, file_id: FileId) -> Status<&mut Node> {
        let path = self.handle(file_id)?.path.clone();
        self.nodes.get_mut(&path).ok_or(status::FILE_CLOSED)
    }

    fn children(&self, dir: &str) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|k| !k.is_empty() && parent(k) == dir)
            .cloned()
            .collect()
    }

    fn negotiate(&mut self, opts: &Options, body: &Body) -> Status<Body> {
        let Body::NegotiateRequest {
            dialects,
            contexts,
            ..
        } = body
        else {
            return Err(status::INVALID_PARAMETER);
        };

        let dialect = if opts.wildcard {
            DIALECT_WILDCARD
        } else {
            dialects
                .iter()
                .copied()
                .filter(|&d| d <= opts.dialect.revision())
                .filter_map(Dialect::from_u16)
                .max()
                .ok_or(status::NOT_SUPPORTED)?
                .revision()
        };

        let mut reply_contexts = Vec::new();
        if let Some(d) = Dialect::from_u16(dialect) {
            self.dialect = Some(d);
            self.signing_algorithm = Signer::default_algorithm(d);
            if d == Dialect::Smb311 {
                let offered = contexts.iter().find_map(|c| match c {
                    NegotiateContext::Signing { algorithms } => Some(algorithms.clone()),
                    _ => None,
                });
                if let Some(offered) = offered {
                    self.signing_algorithm = if offered.contains(&opts.signing_algorithm) {
                        opts.signing_algorithm
                    } else {
                        offered[0]
                    };
                }
                reply_contexts.push(NegotiateContext::PreauthIntegrity {
                    hash_algorithms: vec![HASH_ALGORITHM_SHA512],
                    salt: vec![7; 32],
                });
                reply_contexts.push(NegotiateContext::Signing {
                    algorithms: vec![self.signing_algorithm],
                });
            }
        }

        let mut security_mode = SecurityMode::SIGNING_ENABLED;
        if opts.require_signing {
            security_mode |= SecurityMode::SIGNING_REQUIRED;
        }
        let capabilities = if dialect >= Dialect::Smb210.revision() {
            Capabilities::LARGE_MTU
        } else {
            Capabilities::empty()
        };

        Ok(Body::NegotiateResponse {
            security_mode,
            dialect,
            server_guid: [9; 16],
            capabilities,
            max_transact_size: opts.max_transact_size,
            max_read_size: opts.max_read_size,
            max_write_size: opts.max_write_size,
            system_time: FILETIME,
            server_start_time: 0,
            security_buffer: Vec::new(),
            contexts: reply_contexts,
        })
    }

    /// Returns the session id the response belongs to alongside the result.
    fn session_setup(&mut self, opts: &Options, session_id: u64, body: &Body, raw: &[u8]) -> (u64, Status<Body>) {
        let Body::SessionSetupRequest { security_buffer, .. } = body else {
            return (session_id, Err(status::INVALID_PARAMETER));
        };

        let session_id = if session_id == 0 {
            let id = self.next_session;
            self.next_session += 1;
            self.sessions.insert(
                id,
                SessionEntry {
                    preauth: self.preauth.clone(),
                    ..Default::default()
                },
            );
            id
        } else {
            session_id
        };

        let Some(dialect) = self.dialect else {
            return (session_id, Err(status::INVALID_PARAMETER));
        };
        let algorithm = self.signing_algorithm;
        let Some(entry) = self.sessions.get_mut(&session_id) else {
            return (session_id, Err(status::USER_SESSION_DELETED));
        };
        if let Some(hash) = entry.preauth.as_mut() {
            hash.update(raw);
        }

        if entry.rounds < opts.auth_rounds {
            entry.rounds += 1;
            return (
                session_id,
                Ok(Body::SessionSetupResponse {
                    session_flags: SessionFlags::empty(),
                    security_buffer: b"challenge".to_vec(),
                }),
            );
        }

        if *security_buffer != opts.password {
            self.sessions.remove(&session_id);
            return (session_id, Err(status::LOGON_FAILURE));
        }

        entry.established = true;
        let session_flags = if opts.guest {
            SessionFlags::IS_GUEST
        } else {
            let preauth = entry.preauth.as_ref().map(|h| h.value().to_vec());
            entry.signer = Signer::for_session(dialect, algorithm, &SESSION_KEY, preauth.as_deref())
                .ok()
                .map(Arc::new);
            SessionFlags::empty()
        };

        (
            session_id,
            Ok(Body::SessionSetupResponse {
                session_flags,
                security_buffer: b"done".to_vec(),
            }),
        )
    }

    fn tree_connect(&mut self, opts: &Options, body: &Body) -> Status<(u32, Body)> {
        let Body::TreeConnectRequest { path } = body else {
            return Err(status::INVALID_PARAMETER);
        };
        let name = path.rsplit('\\').next().unwrap_or_default();
        if !path.starts_with(r"\\") || !name.eq_ignore_ascii_case(&opts.share) {
            return Err(status::BAD_NETWORK_NAME);
        }
        let tree_id = self.next_tree;
        self.next_tree += 1;
        self.trees.insert(tree_id);
        Ok((
            tree_id,
            Body::TreeConnectResponse {
                share_type: ShareType::Disk as u8,
                share_flags: ShareFlags::empty(),
                capabilities: ShareCapabilities::empty(),
                maximal_access: AccessMask::GENERIC_ALL,
            },
        ))
    }

    fn create(&mut self, body: &Body) -> Status<Body> {
        let Body::CreateRequest {
            desired_access,
            file_attributes,
            create_disposition,
            create_options,
            name,
            ..
        } = body
        else {
            return Err(status::INVALID_PARAMETER);
        };
        let disposition =
            CreateDisposition::from_u32(*create_disposition).ok_or(status::INVALID_PARAMETER)?;
        let want_dir = create_options.contains(CreateOptions::DIRECTORY_FILE);

        let mut action = 1;
        match self.nodes.get_mut(name) {
            Some(node) => {
                if node.delete_pending {
                    return Err(status::DELETE_PENDING);
                }
                if node.reparse.is_some() && !create_options.contains(CreateOptions::OPEN_REPARSE_POINT)
                {
                    return Err(status::STOPPED_ON_SYMLINK);
                }
                if disposition == CreateDisposition::Create {
                    return Err(status::OBJECT_NAME_COLLISION);
                }
                if want_dir && !node.dir {
                    return Err(status::NOT_A_DIRECTORY);
                }
                if create_options.contains(CreateOptions::NON_DIRECTORY_FILE) && node.dir {
                    return Err(status::FILE_IS_A_DIRECTORY);
                }
                let writes = desired_access.intersects(
                    AccessMask::GENERIC_WRITE
                        | AccessMask::GENERIC_ALL
                        | AccessMask::WRITE_DATA
                        | AccessMask::APPEND_DATA,
                );
                if node.readonly && writes {
                    return Err(status::ACCESS_DENIED);
                }
                if matches!(
                    disposition,
                    CreateDisposition::Overwrite
                        | CreateDisposition::OverwriteIf
                        | CreateDisposition::Supersede
                ) {
                    if node.dir {
                        return Err(status::FILE_IS_A_DIRECTORY);
                    }
                    node.data.clear();
                    action = 3;
                }
            }
            None => {
                if matches!(disposition, CreateDisposition::Open | CreateDisposition::Overwrite) {
                    return Err(status::OBJECT_NAME_NOT_FOUND);
                }
                match self.nodes.get(parent(name)) {
                    Some(p) if p.dir => {}
                    _ => return Err(status::OBJECT_PATH_NOT_FOUND),
                }
                self.nodes.insert(
                    name.clone(),
                    Node {
                        dir: want_dir,
                        readonly: file_attributes.contains(FileAttributes::READONLY),
                        ..Default::default()
                    },
                );
                action = 2;
            }
        }

        let times = self.nodes.get(name).map(Node::times).unwrap_or_default();
        let id = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(
            id,
            Handle {
                path: name.clone(),
                access: *desired_access,
                delete_on_close: create_options.contains(CreateOptions::DELETE_ON_CLOSE),
                listing: None,
            },
        );

        Ok(Body::CreateResponse {
            oplock_level: 0,
            create_action: action,
            times,
            file_id: FileId {
                persistent: id,
                volatile: id,
            },
        })
    }

    fn close(&mut self, file_id: FileId) -> Status<Body> {
        let handle = self
            .handles
            .remove(&file_id.volatile)
            .ok_or(status::FILE_CLOSED)?;
        if handle.delete_on_close {
            self.nodes.remove(&handle.path);
        }
        Ok(Body::CloseResponse {
            flags: 0,
            times: FileTimes::default(),
        })
    }

    fn read(&self, opts: &Options, stats: &Stats, file_id: FileId, length: u32, offset: u64) -> Status<Body> {
        if !self.handle(file_id)?.can_read() {
            return Err(status::ACCESS_DENIED);
        }
        if length > opts.max_read_size {
            return Err(status::INVALID_PARAMETER);
        }
        stats.reads.fetch_add(1, Ordering::SeqCst);
        stats.max_read_len.fetch_max(length, Ordering::SeqCst);

        let node = self.node_of(file_id)?;
        if node.dir {
            return Err(status::INVALID_DEVICE_REQUEST);
        }
        let len = node.data.len() as u64;
        if offset >= len {
            return Err(status::END_OF_FILE);
        }
        let end = len.min(offset + u64::from(length));
        Ok(Body::ReadResponse {
            data: node.data[offset as usize..end as usize].to_vec(),
            data_remaining: 0,
        })
    }

    fn write(&mut self, opts: &Options, stats: &Stats, file_id: FileId, offset: u64, data: &[u8]) -> Status<Body> {
        if !self.handle(file_id)?.can_write() {
            return Err(status::ACCESS_DENIED);
        }
        if data.len() > opts.max_write_size as usize {
            return Err(status::INVALID_PARAMETER);
        }
        stats.writes.fetch_add(1, Ordering::SeqCst);
        stats.max_write_len.fetch_max(data.len() as u32, Ordering::SeqCst);

        let node = self.node_of_mut(file_id)?;
        let end = offset as usize + data.len();
        if node.data.len() < end {
            node.data.resize(end, 0);
        }
        node.data[offset as usize..end].copy_from_slice(data);
        Ok(Body::WriteResponse {
            count: data.len() as u32,
        })
    }

    fn ioctl(&mut self, opts: &Options, file_id: FileId, ctl_code: u32, input: &[u8]) -> Status<Body> {
        let output = match ctl_code {
            FSCTL_SET_REPARSE_POINT => {
                if !opts.symlinks {
                    return Err(status::NOT_SUPPORTED);
                }
                smb2::info::parse_symlink_reparse_buffer(input)
                    .map_err(|_| status::INVALID_PARAMETER)?;
                self.node_of_mut(file_id)?.reparse = Some(input.to_vec());
                Vec::new()
            }
            FSCTL_GET_REPARSE_POINT => self
                .node_of(file_id)?
                .reparse
                .clone()
                .ok_or(status::NOT_A_REPARSE_POINT)?,
            _ => return Err(status::INVALID_DEVICE_REQUEST),
        };
        Ok(Body::IoctlResponse {
            ctl_code,
            file_id,
            output,
        })
    }

    fn query_directory(&mut self, opts: &Options, file_id: FileId, flags: QueryDirectoryFlags, limit: u32) -> Status<Body> {
        let path = self.handle(file_id)?.path.clone();
        let dir = self.nodes.get(&path).ok_or(status::FILE_CLOSED)?.dir;
        if !dir {
            return Err(status::INVALID_PARAMETER);
        }

        let listing = match self.handles.get(&file_id.volatile) {
            Some(h) if h.listing.is_some() && !flags.contains(QueryDirectoryFlags::RESTART_SCANS) => None,
            _ => {
                let mut entries = vec![
                    (".".to_owned(), self.nodes[&path].times()),
                    ("..".to_owned(), self.nodes[parent(&path)].times()),
                ];
                for child in self.children(&path) {
                    entries.push((base(&child).to_owned(), self.nodes[&child].times()));
                }
                Some(entries)
            }
        };
        let handle = self
            .handles
            .get_mut(&file_id.volatile)
            .ok_or(status::FILE_CLOSED)?;
        if let Some(entries) = listing {
            handle.listing = Some(entries);
        }
        let pending = handle.listing.get_or_insert_with(Vec::new);

        let mut take = 0;
        let mut size = 0;
        for (name, _) in pending.iter() {
            let len = align8(64 + 2 * name.encode_utf16().count());
            if take == opts.dir_page_entries || size + len > limit as usize {
                break;
            }
            size += len;
            take += 1;
        }
        if take == 0 {
            return Err(status::NO_MORE_FILES);
        }
        let page: Vec<_> = pending.drain(..take).collect();
        Ok(Body::QueryDirectoryResponse {
            data: directory_information(&page),
        })
    }

    fn query_info(&self, file_id: FileId, info_type: u8, info_class: u8, limit: u32) -> Status<Body> {
        let node = self.node_of(file_id)?;
        let mut data = Vec::new();
        let encoded = match (info_type, info_class) {
            (info_type::FILE, file_info_class::NETWORK_OPEN) => {
                (Encoder::new(&mut data) << &node.times() << &0u32).done()
            }
            (info_type::FILE, file_info_class::STANDARD) => {
                let times = node.times();
                (Encoder::new(&mut data)
                    << &times.allocation_size
                    << &times.end_of_file
                    << &1u32
                    << &u8::from(node.delete_pending)
                    << &u8::from(node.dir)
                    << &0u16)
                    .done()
            }
            (info_type::FILESYSTEM, fs_info_class::FULL_SIZE) => {
                (Encoder::new(&mut data) << &1000u64 << &600u64 << &700u64 << &8u32 << &512u32)
                    .done()
            }
            _ => return Err(status::NOT_SUPPORTED),
        };
        encoded.map_err(|_| status::INSUFFICIENT_RESOURCES)?;

        if data.len() > limit as usize {
            return Err(status::BUFFER_TOO_SMALL);
        }
        Ok(Body::QueryInfoResponse { data })
    }

    fn set_info(&mut self, file_id: FileId, info_type: u8, info_class: u8, data: &[u8]) -> Status<Body> {
        if info_type != info_type::FILE {
            return Err(status::NOT_SUPPORTED);
        }
        match info_class {
            file_info_class::END_OF_FILE => {
                let size = u64::from_le_bytes(
                    data.get(..8)
                        .and_then(|b| b.try_into().ok())
                        .ok_or(status::INVALID_PARAMETER)?,
                );
                let node = self.node_of_mut(file_id)?;
                if node.dir {
                    return Err(status::INVALID_PARAMETER);
                }
                node.data.resize(size as usize, 0);
            }
            file_info_class::DISPOSITION => {
                let delete = data.first().is_some_and(|&b| b != 0);
                let path = self.handle(file_id)?.path.clone();
                if delete && !self.children(&path).is_empty() {
                    return Err(status::DIRECTORY_NOT_EMPTY);
                }
                if let Some(h) = self.handles.get_mut(&file_id.volatile) {
                    h.delete_on_close = delete;
                }
                self.node_of_mut(file_id)?.delete_pending = delete;
            }
            file_info_class::RENAME => self.rename(file_id, data)?,
            file_info_class::BASIC => {
                let attrs = data
                    .get(32..36)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .ok_or(status::INVALID_PARAMETER)?;
                if attrs != 0 {
                    self.node_of_mut(file_id)?.readonly =
                        FileAttributes::from_bits_truncate(attrs).contains(FileAttributes::READONLY);
                }
            }
            _ => return Err(status::NOT_SUPPORTED),
        }
        Ok(Body::SetInfoResponse)
    }

    fn rename(&mut self, file_id: FileId, data: &[u8]) -> Status<()> {
        if data.len() < 20 {
            return Err(status::INVALID_PARAMETER);
        }
        let replace = data[0] != 0;
        let len = u32::from_le_bytes([data[16], data[17], data[18], data[19]]) as usize;
        let target = data
            .get(20..20 + len)
            .and_then(|b| from_utf16le(b).ok())
            .ok_or(status::INVALID_PARAMETER)?;
        let source = self.handle(file_id)?.path.clone();
        if target == source {
            return Ok(());
        }

        if let Some(existing) = self.nodes.get(&target) {
            if !replace {
                return Err(status::OBJECT_NAME_COLLISION);
            }
            if existing.dir {
                return Err(status::ACCESS_DENIED);
            }
        }
        match self.nodes.get(parent(&target)) {
            Some(p) if p.dir => {}
            _ => return Err(status::OBJECT_PATH_NOT_FOUND),
        }

        let prefix = format!("{}\\", source);
        let moved: Vec<String> = self
            .nodes
            .keys()
            .filter(|k| **k == source || k.starts_with(&prefix))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = self.nodes.remove(&old) {
                let new = format!("{}{}", target, &old[source.len()..]);
                self.nodes.insert(new, node);
            }
        }
        for h in self.handles.values_mut() {
            if h.path == source || h.path.starts_with(&prefix) {
                h.path = format!("{}{}", target, &h.path[source.len()..]);
            }
        }
        Ok(())
    }
}

fn parent(path: &str) -> &str {
    path.rfind('\\').map_or("", |i| &path[..i])
}

fn base(path: &str) -> &str {
    path.rsplit('\\').next().unwrap_or(path)
}

/// Encode chained `FileDirectoryInformation` entries.
fn directory_information(entries: &[(String, FileTimes)]) -> Vec<u8> {
    let mut buf = Vec::new();
    for (i, (name, t)) in entries.iter().enumerate() {
        let start = buf.len();
        let name = to_utf16le(name);
        let next = if i + 1 == entries.len() {
            0
        } else {
            align8(64 + name.len()) as u32
        };
        (Encoder::new(&mut buf)
            << &next
            << &0u32
            << &t.creation_time
            << &t.last_access_time
            << &t.last_write_time
            << &t.change_time
            << &t.end_of_file
            << &t.allocation_size
            << &t.file_attributes.bits()
            << &(name.len() as u32)
            << &name)
            .done()
            .unwrap();
        if next != 0 {
            buf.resize(start + next as usize, 0);
        }
    }
    buf
}

/// Handle most recently opened by the current compound chain.
#[derive(Default)]
struct Related {
    file_id: Option<FileId>,
    failed: Option<u32>,
}

struct Response {
    request: Header,
    status: u32,
    body: Body,
    session_id: u64,
    tree_id: u32,
    signer: Option<Arc<Signer>>,
}

struct Inner {
    opts: Options,
    stats: Arc<Stats>,
    state: Mutex<State>,
}

fn charge_of(header: &Header) -> u32 {
    u32::from(header.credit_charge.max(1))
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Account for a frame as it arrives.
    fn admit(&self, frame: &[u8]) {
        let Ok(msgs) = serialize::decode(frame) else {
            return;
        };
        if msgs.len() > 1 {
            self.stats.compound_frames.fetch_add(1, Ordering::SeqCst);
        }
        let state = self.state();
        for msg in &msgs {
            let header = &msg.header;
            if header.command() == Some(Command::Cancel) {
                continue;
            }
            self.stats.requests.fetch_add(1, Ordering::SeqCst);
            let charge = charge_of(header);
            if header.message_id + u64::from(charge) > state.granted_upto {
                self.stats.credit_violations.fetch_add(1, Ordering::SeqCst);
            }
            let now = self.stats.outstanding.fetch_add(charge, Ordering::SeqCst) + charge;
            self.stats.peak_outstanding.fetch_max(now, Ordering::SeqCst);
        }
    }

    fn delay_for(&self, frame: &[u8]) -> Option<Duration> {
        if !self.opts.jitter || frame.len() < 32 {
            return None;
        }
        let id = u64::from_le_bytes(frame[24..32].try_into().ok()?);
        Some(Duration::from_millis((id * 7) % 5))
    }

    fn handle(&self, state: &mut State, msg: &Msg, raw: &[u8], related: &mut Related) -> Option<Response> {
        let opts = &self.opts;
        let header = &msg.header;
        let command = header.command()?;
        let mut session_id = header.session_id;
        let mut tree_id = header.tree_id;
        let mut signer = state.signer(session_id);

        if signer.is_some() && command != Command::SessionSetup {
            if !header.flags.contains(HeaderFlags::SIGNED) {
                self.stats.unsigned_requests.fetch_add(1, Ordering::SeqCst);
            } else if signer.as_ref().is_some_and(|s| !s.verify(raw)) {
                self.stats.bad_signatures.fetch_add(1, Ordering::SeqCst);
            } else {
                self.stats.signed_requests.fetch_add(1, Ordering::SeqCst);
            }
        }

        let is_related = header.flags.contains(HeaderFlags::RELATED_OPERATIONS);
        let related_id = related.file_id;
        let resolve = move |fid: FileId| match related_id {
            Some(id) if fid == FileId::RELATED => id,
            _ => fid,
        };

        let result = match command {
            Command::Cancel => return None,
            Command::Echo if opts.stall_echo => return None,
            _ if is_related && related.failed.is_some() => Err(related.failed.unwrap_or_default()),
            Command::Negotiate => state.negotiate(opts, &msg.body),
            Command::SessionSetup => {
                let (id, result) = state.session_setup(opts, header.session_id, &msg.body, raw);
                session_id = id;
                signer = state.signer(id);
                result
            }
            _ => state.require_session(session_id).and_then(|()| match (command, &msg.body) {
                (Command::Logoff, _) => {
                    state.sessions.remove(&session_id);
                    Ok(Body::LogoffResponse)
                }
                (Command::Echo, _) => Ok(Body::EchoResponse),
                (Command::TreeConnect, body) => state.tree_connect(opts, body).map(|(id, body)| {
                    tree_id = id;
                    body
                }),
                (_, body) => state.require_tree(tree_id).and_then(|()| match *body {
                    Body::TreeDisconnectRequest => {
                        state.trees.remove(&tree_id);
                        Ok(Body::TreeDisconnectResponse)
                    }
                    Body::CreateRequest { .. } => {
                        let result = state.create(body);
                        match result {
                            Ok(Body::CreateResponse { file_id, .. }) => {
                                related.file_id = Some(file_id);
                                related.failed = None;
                            }
                            Err(code) => related.failed = Some(code),
                            _ => {}
                        }
                        result
                    }
                    Body::CloseRequest { file_id, .. } => state.close(resolve(file_id)),
                    Body::FlushRequest { file_id } => {
                        state.handle(resolve(file_id)).map(|_| Body::FlushResponse)
                    }
                    Body::ReadRequest {
                        length,
                        offset,
                        file_id,
                        ..
                    } => state.read(opts, &self.stats, resolve(file_id), length, offset),
                    Body::WriteRequest {
                        offset,
                        file_id,
                        ref data,
                    } => state.write(opts, &self.stats, resolve(file_id), offset, data),
                    Body::IoctlRequest {
                        ctl_code,
                        file_id,
                        ref input,
                        ..
                    } => state.ioctl(opts, resolve(file_id), ctl_code, input),
                    Body::QueryDirectoryRequest {
                        flags,
                        file_id,
                        output_buffer_length,
                        ..
                    } => state.query_directory(opts, resolve(file_id), flags, output_buffer_length),
                    Body::QueryInfoRequest {
                        info_type,
                        info_class,
                        output_buffer_length,
                        file_id,
                        ..
                    } => state.query_info(resolve(file_id), info_type, info_class, output_buffer_length),
                    Body::SetInfoRequest {
                        info_type,
                        info_class,
                        file_id,
                        ref data,
                        ..
                    } => state.set_info(resolve(file_id), info_type, info_class, data),
                    _ => Err(status::NOT_SUPPORTED),
                }),
            }),
        };

        let (status, body) = match result {
            Ok(body @ Body::SessionSetupResponse { .. }) if command == Command::SessionSetup => {
                let established = state.sessions.get(&session_id).is_some_and(|s| s.established);
                let code = if established {
                    status::SUCCESS
                } else {
                    status::MORE_PROCESSING_REQUIRED
                };
                (code, body)
            }
            Ok(body) => (status::SUCCESS, body),
            Err(code) => (
                code,
                Body::ErrorResponse {
                    error_data: Vec::new(),
                },
            ),
        };

        Some(Response {
            request: header.clone(),
            status,
            body,
            session_id,
            tree_id,
            signer,
        })
    }

    /// Run every request of `frame` and build the response frame.
    fn process(&self, frame: &[u8]) -> Option<Vec<u8>> {
        let ranges = serialize::split_compound(frame).ok()?;
        let mut state = self.state();
        let mut related = Related::default();
        let mut responses = Vec::new();
        let mut requests = Vec::new();

        for range in ranges {
            let raw = &frame[range];
            let Ok(msg) = serialize::read_msg(raw) else {
                continue;
            };
            if let Some(response) = self.handle(&mut state, &msg, raw, &mut related) {
                responses.push(response);
                requests.push(raw.to_vec());
            }
        }
        if responses.is_empty() {
            return None;
        }

        let mut elements = Vec::with_capacity(responses.len());
        for r in &responses {
            let charge = charge_of(&r.request);
            let grant = r.request.credits.max(1).min(self.opts.max_grant);
            state.granted_upto += u64::from(grant);
            self.stats.granted_upto.store(state.granted_upto, Ordering::SeqCst);
            self.stats.outstanding.fetch_sub(charge, Ordering::SeqCst);

            let header = Header {
                credit_charge: r.request.credit_charge,
                status: r.status,
                command: r.request.command,
                credits: grant,
                flags: HeaderFlags::SERVER_TO_REDIR
                    | (r.request.flags & HeaderFlags::RELATED_OPERATIONS),
                message_id: r.request.message_id,
                tree_id: r.tree_id,
                session_id: r.session_id,
                ..Default::default()
            };
            elements.push(
                serialize::write_msg(&Msg {
                    header,
                    body: r.body.clone(),
                })
                .ok()?,
            );
        }

        serialize::chain(&mut elements);
        for ((element, r), request) in elements.iter_mut().zip(&responses).zip(&requests) {
            let command = r.request.command();
            let unsigned =
                command == Some(Command::Echo) && self.stats.unsigned_next_echo.swap(false, Ordering::SeqCst);
            if let Some(signer) = r.signer.as_ref().filter(|_| !unsigned) {
                signer.sign(element);
            }
            if command == Some(Command::Echo) && self.stats.tamper_next_echo.swap(false, Ordering::SeqCst) {
                element[SIGNATURE_OFFSET] ^= 0xff;
            }
            if command == Some(Command::Negotiate) && state.dialect == Some(Dialect::Smb311) {
                let mut hash = PreauthHash::default();
                hash.update(request);
                hash.update(element);
                state.preauth = Some(hash);
            }
            if command == Some(Command::SessionSetup) && r.status == status::MORE_PROCESSING_REQUIRED {
                if let Some(hash) = state
                    .sessions
                    .get_mut(&r.session_id)
                    .and_then(|s| s.preauth.as_mut())
                {
                    hash.update(element);
                }
            }
        }

        Some(elements.concat())
    }
}

/// A running mock server.
pub struct MockServer {
    pub stats: Arc<Stats>,
    inner: Arc<Inner>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Start serving; the returned stream is the client end of the pipe.
    pub fn start(opts: Options) -> (MockServer, DuplexStream) {
        let (client, server) = tokio::io::duplex(4 << 20);
        let inner = Arc::new(Inner {
            opts,
            stats: Arc::new(Stats::default()),
            state: Mutex::new(State::new()),
        });
        let task = tokio::spawn(serve(inner.clone(), server));
        let stats = inner.stats.clone();
        (MockServer { stats, inner, task }, client)
    }

    /// Drop the connection as if the server died.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn exists(&self, path: &str) -> bool {
        self.inner.state().nodes.contains_key(path)
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.state().nodes.get(path).map(|n| n.data.clone())
    }

    pub fn open_handles(&self) -> usize {
        self.inner.state().handles.len()
    }

    pub fn trees(&self) -> usize {
        self.inner.state().trees.len()
    }

    pub fn sessions(&self) -> usize {
        self.inner.state().sessions.len()
    }
}

async fn serve(server: Arc<Inner>, stream: DuplexStream) {
    let (reader, writer) = tokio::io::split(stream);
    let mut framedread = frame_codec().new_read(reader);
    let framedwrite = Arc::new(tokio::sync::Mutex::new(frame_codec().new_write(writer)));

    while let Some(Ok(frame)) = framedread.next().await {
        server.admit(&frame);

        let server = server.clone();
        let framedwrite = framedwrite.clone();
        tokio::spawn(async move {
            if let Some(delay) = server.delay_for(&frame) {
                tokio::time::sleep(delay).await;
            }
            // responses leave in processing order
            let mut framedwrite = framedwrite.lock().await;
            if let Some(response) = server.process(&frame) {
                let _ = framedwrite.send(Bytes::from(response)).await;
            }
        });
    }
}

/// Dial a fresh server with default client settings.
pub async fn connect(opts: Options) -> (MockServer, Session) {
    let mut dialer = Dialer::new(HOST, StaticInitiator::default());
    let (server, session) = dial(opts, &mut dialer).await;
    (server, session.expect("dial"))
}

pub async fn dial(opts: Options, dialer: &mut Dialer) -> (MockServer, smb2::Result<Session>) {
    init_logging();
    let (server, stream) = MockServer::start(opts);
    let session = dialer.dial(stream).await;
    (server, session)
}

pub fn dialer(negotiator: Negotiator, max_credit_balance: u16) -> Dialer {
    let mut dialer = Dialer::new(HOST, StaticInitiator::default());
    dialer.negotiator = negotiator;
    dialer.max_credit_balance = max_credit_balance;
    dialer
}
