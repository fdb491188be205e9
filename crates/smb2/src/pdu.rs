//! SMB2 protocol data types and constants.
//!
//! # Protocol
//! SMB 2.0.2 through 3.1.1 (MS-SMB2)

use bitflags::bitflags;
use enum_primitive::*;

/// `0xFE 'S' 'M' 'B'`, the first four bytes of every SMB2 header
pub const PROTOCOL_ID: [u8; 4] = [0xfe, b'S', b'M', b'B'];

/// Size of the fixed SMB2 header in bytes
pub const HEADER_SIZE: usize = 64;

/// Offset of the signature field inside the header
pub const SIGNATURE_OFFSET: usize = 48;

/// Size of the signature field
pub const SIGNATURE_SIZE: usize = 16;

/// Direct TCP port used by SMB2
pub const SMB_PORT: u16 = 445;

/// Largest frame accepted from the transport
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024 - 1;

/// Message id used by unsolicited server notifications such as oplock breaks
pub const UNSOLICITED_MESSAGE_ID: u64 = !0;

/// Wildcard dialect a server returns to a multi-protocol negotiate
pub const DIALECT_WILDCARD: u16 = 0x02ff;

/// Payload size covered by a single credit for multi-credit requests
pub const CREDIT_PAYLOAD_SIZE: u32 = 65536;

/// Control code that reads a reparse point
pub const FSCTL_GET_REPARSE_POINT: u32 = 0x0009_00a8;

/// Control code that writes a reparse point
pub const FSCTL_SET_REPARSE_POINT: u32 = 0x0009_00a4;

/// Reparse tag for symbolic links
pub const IO_REPARSE_TAG_SYMLINK: u32 = 0xa000_000c;

/// Flag inside the symlink reparse buffer marking a relative target
pub const SYMLINK_FLAG_RELATIVE: u32 = 0x0000_0001;

/// `IOCTL` flag requesting a filesystem control
pub const SMB2_0_IOCTL_IS_FSCTL: u32 = 0x0000_0001;

/// Close flag asking the server to return attributes in the response
pub const CLOSE_FLAG_POSTQUERY_ATTRIB: u16 = 0x0001;

/// Session setup flag binding to an existing session
pub const SESSION_FLAG_BINDING: u8 = 0x01;

/// NTSTATUS values the client interprets.
pub mod status {
    pub const SUCCESS: u32 = 0x0000_0000;
    pub const PENDING: u32 = 0x0000_0103;
    pub const BUFFER_OVERFLOW: u32 = 0x8000_0005;
    pub const NO_MORE_FILES: u32 = 0x8000_0006;
    pub const STOPPED_ON_SYMLINK: u32 = 0x8000_002d;
    pub const NOT_IMPLEMENTED: u32 = 0xc000_0002;
    pub const INVALID_HANDLE: u32 = 0xc000_0008;
    pub const INVALID_PARAMETER: u32 = 0xc000_000d;
    pub const NO_SUCH_FILE: u32 = 0xc000_000f;
    pub const INVALID_DEVICE_REQUEST: u32 = 0xc000_0010;
    pub const END_OF_FILE: u32 = 0xc000_0011;
    pub const MORE_PROCESSING_REQUIRED: u32 = 0xc000_0016;
    pub const ACCESS_DENIED: u32 = 0xc000_0022;
    pub const BUFFER_TOO_SMALL: u32 = 0xc000_0023;
    pub const OBJECT_NAME_INVALID: u32 = 0xc000_0033;
    pub const OBJECT_NAME_NOT_FOUND: u32 = 0xc000_0034;
    pub const OBJECT_NAME_COLLISION: u32 = 0xc000_0035;
    pub const OBJECT_PATH_NOT_FOUND: u32 = 0xc000_003a;
    pub const OBJECT_PATH_SYNTAX_BAD: u32 = 0xc000_003b;
    pub const SHARING_VIOLATION: u32 = 0xc000_0043;
    pub const DELETE_PENDING: u32 = 0xc000_0056;
    pub const PRIVILEGE_NOT_HELD: u32 = 0xc000_0061;
    pub const LOGON_FAILURE: u32 = 0xc000_006d;
    pub const ACCOUNT_RESTRICTION: u32 = 0xc000_006e;
    pub const PASSWORD_EXPIRED: u32 = 0xc000_0071;
    pub const DISK_FULL: u32 = 0xc000_007f;
    pub const INSUFFICIENT_RESOURCES: u32 = 0xc000_009a;
    pub const FILE_IS_A_DIRECTORY: u32 = 0xc000_00ba;
    pub const NOT_SUPPORTED: u32 = 0xc000_00bb;
    pub const NETWORK_NAME_DELETED: u32 = 0xc000_00c9;
    pub const BAD_NETWORK_NAME: u32 = 0xc000_00cc;
    pub const DIRECTORY_NOT_EMPTY: u32 = 0xc000_0101;
    pub const NOT_A_DIRECTORY: u32 = 0xc000_0103;
    pub const CANCELLED: u32 = 0xc000_0120;
    pub const FILE_CLOSED: u32 = 0xc000_0128;
    pub const USER_SESSION_DELETED: u32 = 0xc000_0203;
    pub const NOT_A_REPARSE_POINT: u32 = 0xc000_0275;
    pub const IO_REPARSE_TAG_NOT_HANDLED: u32 = 0xc000_0279;
    pub const NETWORK_SESSION_EXPIRED: u32 = 0xc000_035c;

    /// Symbolic name of a status code, for diagnostics.
    pub fn name(code: u32) -> &'static str {
        match code {
            SUCCESS => "STATUS_SUCCESS",
            PENDING => "STATUS_PENDING",
            BUFFER_OVERFLOW => "STATUS_BUFFER_OVERFLOW",
            NO_MORE_FILES => "STATUS_NO_MORE_FILES",
            STOPPED_ON_SYMLINK => "STATUS_STOPPED_ON_SYMLINK",
            NOT_IMPLEMENTED => "STATUS_NOT_IMPLEMENTED",
            INVALID_HANDLE => "STATUS_INVALID_HANDLE",
            INVALID_PARAMETER => "STATUS_INVALID_PARAMETER",
            NO_SUCH_FILE => "STATUS_NO_SUCH_FILE",
            INVALID_DEVICE_REQUEST => "STATUS_INVALID_DEVICE_REQUEST",
            END_OF_FILE => "STATUS_END_OF_FILE",
            MORE_PROCESSING_REQUIRED => "STATUS_MORE_PROCESSING_REQUIRED",
            ACCESS_DENIED => "STATUS_ACCESS_DENIED",
            BUFFER_TOO_SMALL => "STATUS_BUFFER_TOO_SMALL",
            OBJECT_NAME_INVALID => "STATUS_OBJECT_NAME_INVALID",
            OBJECT_NAME_NOT_FOUND => "STATUS_OBJECT_NAME_NOT_FOUND",
            OBJECT_NAME_COLLISION => "STATUS_OBJECT_NAME_COLLISION",
            OBJECT_PATH_NOT_FOUND => "STATUS_OBJECT_PATH_NOT_FOUND",
            OBJECT_PATH_SYNTAX_BAD => "STATUS_OBJECT_PATH_SYNTAX_BAD",
            SHARING_VIOLATION => "STATUS_SHARING_VIOLATION",
            DELETE_PENDING => "STATUS_DELETE_PENDING",
            PRIVILEGE_NOT_HELD => "STATUS_PRIVILEGE_NOT_HELD",
            LOGON_FAILURE => "STATUS_LOGON_FAILURE",
            ACCOUNT_RESTRICTION => "STATUS_ACCOUNT_RESTRICTION",
            PASSWORD_EXPIRED => "STATUS_PASSWORD_EXPIRED",
            DISK_FULL => "STATUS_DISK_FULL",
            INSUFFICIENT_RESOURCES => "STATUS_INSUFFICIENT_RESOURCES",
            FILE_IS_A_DIRECTORY => "STATUS_FILE_IS_A_DIRECTORY",
            NOT_SUPPORTED => "STATUS_NOT_SUPPORTED",
            NETWORK_NAME_DELETED => "STATUS_NETWORK_NAME_DELETED",
            BAD_NETWORK_NAME => "STATUS_BAD_NETWORK_NAME",
            DIRECTORY_NOT_EMPTY => "STATUS_DIRECTORY_NOT_EMPTY",
            NOT_A_DIRECTORY => "STATUS_NOT_A_DIRECTORY",
            CANCELLED => "STATUS_CANCELLED",
            FILE_CLOSED => "STATUS_FILE_CLOSED",
            USER_SESSION_DELETED => "STATUS_USER_SESSION_DELETED",
            NOT_A_REPARSE_POINT => "STATUS_NOT_A_REPARSE_POINT",
            IO_REPARSE_TAG_NOT_HANDLED => "STATUS_IO_REPARSE_TAG_NOT_HANDLED",
            NETWORK_SESSION_EXPIRED => "STATUS_NETWORK_SESSION_EXPIRED",
            _ => "STATUS_UNKNOWN",
        }
    }

    /// Severity bits `11` mark an error; `10` is a warning that still carries data.
    pub fn is_error(code: u32) -> bool {
        code >> 30 == 0b11
    }
}

enum_from_primitive! {
    #[doc = "Command codes, SMB2 operations"]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub enum Command {
        Negotiate       = 0x0000,
        SessionSetup    = 0x0001,
        Logoff          = 0x0002,
        TreeConnect     = 0x0003,
        TreeDisconnect  = 0x0004,
        Create          = 0x0005,
        Close           = 0x0006,
        Flush           = 0x0007,
        Read            = 0x0008,
        Write           = 0x0009,
        Lock            = 0x000a,
        Ioctl           = 0x000b,
        Cancel          = 0x000c,
        Echo            = 0x000d,
        QueryDirectory  = 0x000e,
        ChangeNotify    = 0x000f,
        QueryInfo       = 0x0010,
        SetInfo         = 0x0011,
        OplockBreak     = 0x0012,
    }
}

enum_from_primitive! {
    #[doc = "Protocol dialects this client can speak"]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub enum Dialect {
        Smb202 = 0x0202,
        Smb210 = 0x0210,
        Smb300 = 0x0300,
        Smb302 = 0x0302,
        Smb311 = 0x0311,
    }
}

impl Dialect {
    /// Every supported dialect, lowest first.
    pub const ALL: [Dialect; 5] = [
        Dialect::Smb202,
        Dialect::Smb210,
        Dialect::Smb300,
        Dialect::Smb302,
        Dialect::Smb311,
    ];

    pub fn revision(self) -> u16 {
        self as u16
    }

    /// 3.x dialects derive signing keys with the SP800-108 KDF and sign with AES-CMAC.
    pub fn is_smb3(self) -> bool {
        self >= Dialect::Smb300
    }

    /// 2.0.2 does not understand multi-credit requests.
    pub fn supports_multi_credit(self) -> bool {
        self >= Dialect::Smb210
    }
}

enum_from_primitive! {
    #[doc = "Kind of resource behind a tree connection"]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub enum ShareType {
        Disk    = 0x01,
        Pipe    = 0x02,
        Print   = 0x03,
    }
}

enum_from_primitive! {
    #[doc = "How CREATE treats an existing or missing target"]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub enum CreateDisposition {
        Supersede   = 0,
        Open        = 1,
        Create      = 2,
        OpenIf      = 3,
        Overwrite   = 4,
        OverwriteIf = 5,
    }
}

/// `InfoType` of QUERY_INFO / SET_INFO
pub mod info_type {
    pub const FILE: u8 = 0x01;
    pub const FILESYSTEM: u8 = 0x02;
    pub const SECURITY: u8 = 0x03;
    pub const QUOTA: u8 = 0x04;
}

/// File information classes (MS-FSCC 2.4) used by this client
pub mod file_info_class {
    pub const DIRECTORY: u8 = 1;
    pub const BASIC: u8 = 4;
    pub const STANDARD: u8 = 5;
    pub const RENAME: u8 = 10;
    pub const DISPOSITION: u8 = 13;
    pub const END_OF_FILE: u8 = 20;
    pub const NETWORK_OPEN: u8 = 34;
}

/// Filesystem information classes (MS-FSCC 2.5) used by this client
pub mod fs_info_class {
    pub const FULL_SIZE: u8 = 7;
}

/// Negotiate context types
pub mod context_type {
    pub const PREAUTH_INTEGRITY_CAPABILITIES: u16 = 0x0001;
    pub const ENCRYPTION_CAPABILITIES: u16 = 0x0002;
    pub const SIGNING_CAPABILITIES: u16 = 0x0008;
}

/// Hash algorithm id for preauth integrity
pub const HASH_ALGORITHM_SHA512: u16 = 0x0001;

/// Signing algorithm ids of the signing capabilities context
pub mod signing_algorithm {
    pub const HMAC_SHA256: u16 = 0x0000;
    pub const AES_CMAC: u16 = 0x0001;
    pub const AES_GMAC: u16 = 0x0002;
}

bitflags! {
    /// Bits in `Header.flags`
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct HeaderFlags: u32 {
        const SERVER_TO_REDIR       = 0x0000_0001;
        const ASYNC_COMMAND         = 0x0000_0002;
        const RELATED_OPERATIONS    = 0x0000_0004;
        const SIGNED                = 0x0000_0008;
        const PRIORITY_MASK         = 0x0000_0070;
        const DFS_OPERATIONS        = 0x1000_0000;
        const REPLAY_OPERATION      = 0x2000_0000;
    }
}

bitflags! {
    /// Security mode of NEGOTIATE and SESSION_SETUP
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct SecurityMode: u16 {
        const SIGNING_ENABLED   = 0x0001;
        const SIGNING_REQUIRED  = 0x0002;
    }
}

bitflags! {
    /// Global capabilities advertised during NEGOTIATE
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Capabilities: u32 {
        const DFS                   = 0x0000_0001;
        const LEASING               = 0x0000_0002;
        const LARGE_MTU             = 0x0000_0004;
        const MULTI_CHANNEL         = 0x0000_0008;
        const PERSISTENT_HANDLES    = 0x0000_0010;
        const DIRECTORY_LEASING     = 0x0000_0020;
        const ENCRYPTION            = 0x0000_0040;
    }
}

bitflags! {
    /// `SessionFlags` of SESSION_SETUP response
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct SessionFlags: u16 {
        const IS_GUEST      = 0x0001;
        const IS_NULL       = 0x0002;
        const ENCRYPT_DATA  = 0x0004;
    }
}

bitflags! {
    /// `ShareFlags` of TREE_CONNECT response
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ShareFlags: u32 {
        const DFS                   = 0x0000_0001;
        const DFS_ROOT              = 0x0000_0002;
        const NO_CACHING            = 0x0000_0030;
        const RESTRICT_EXCLUSIVE_OPENS = 0x0000_0100;
        const FORCE_SHARED_DELETE   = 0x0000_0200;
        const ALLOW_NAMESPACE_CACHING = 0x0000_0400;
        const ACCESS_BASED_DIRECTORY_ENUM = 0x0000_0800;
        const ENCRYPT_DATA          = 0x0000_8000;
    }
}

bitflags! {
    /// `Capabilities` of TREE_CONNECT response
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ShareCapabilities: u32 {
        const DFS                       = 0x0000_0008;
        const CONTINUOUS_AVAILABILITY   = 0x0000_0010;
        const SCALEOUT                  = 0x0000_0020;
        const CLUSTER                   = 0x0000_0040;
        const ASYMMETRIC                = 0x0000_0080;
    }
}

bitflags! {
    /// Access rights requested by CREATE
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct AccessMask: u32 {
        const READ_DATA         = 0x0000_0001;
        const WRITE_DATA        = 0x0000_0002;
        const APPEND_DATA       = 0x0000_0004;
        const READ_EA           = 0x0000_0008;
        const WRITE_EA          = 0x0000_0010;
        const EXECUTE           = 0x0000_0020;
        const DELETE_CHILD      = 0x0000_0040;
        const READ_ATTRIBUTES   = 0x0000_0080;
        const WRITE_ATTRIBUTES  = 0x0000_0100;
        const DELETE            = 0x0001_0000;
        const READ_CONTROL      = 0x0002_0000;
        const WRITE_DAC         = 0x0004_0000;
        const WRITE_OWNER       = 0x0008_0000;
        const SYNCHRONIZE       = 0x0010_0000;
        const MAXIMUM_ALLOWED   = 0x0200_0000;
        const GENERIC_ALL       = 0x1000_0000;
        const GENERIC_EXECUTE   = 0x2000_0000;
        const GENERIC_WRITE     = 0x4000_0000;
        const GENERIC_READ      = 0x8000_0000;
    }
}

bitflags! {
    /// File attributes (MS-FSCC 2.6)
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct FileAttributes: u32 {
        const READONLY      = 0x0000_0001;
        const HIDDEN        = 0x0000_0002;
        const SYSTEM        = 0x0000_0004;
        const DIRECTORY     = 0x0000_0010;
        const ARCHIVE       = 0x0000_0020;
        const NORMAL        = 0x0000_0080;
        const TEMPORARY     = 0x0000_0100;
        const SPARSE_FILE   = 0x0000_0200;
        const REPARSE_POINT = 0x0000_0400;
        const COMPRESSED    = 0x0000_0800;
        const OFFLINE       = 0x0000_1000;
        const NOT_CONTENT_INDEXED = 0x0000_2000;
        const ENCRYPTED     = 0x0000_4000;
    }
}

bitflags! {
    /// Sharing mode requested by CREATE
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ShareAccess: u32 {
        const READ      = 0x0000_0001;
        const WRITE     = 0x0000_0002;
        const DELETE    = 0x0000_0004;
    }
}

bitflags! {
    /// `CreateOptions` of CREATE
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct CreateOptions: u32 {
        const DIRECTORY_FILE            = 0x0000_0001;
        const WRITE_THROUGH             = 0x0000_0002;
        const SEQUENTIAL_ONLY           = 0x0000_0004;
        const NO_INTERMEDIATE_BUFFERING = 0x0000_0008;
        const SYNCHRONOUS_IO_ALERT      = 0x0000_0010;
        const SYNCHRONOUS_IO_NONALERT   = 0x0000_0020;
        const NON_DIRECTORY_FILE        = 0x0000_0040;
        const NO_EA_KNOWLEDGE           = 0x0000_0200;
        const RANDOM_ACCESS             = 0x0000_0800;
        const DELETE_ON_CLOSE           = 0x0000_1000;
        const OPEN_REPARSE_POINT        = 0x0020_0000;
    }
}

bitflags! {
    /// Flags of QUERY_DIRECTORY
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct QueryDirectoryFlags: u8 {
        const RESTART_SCANS         = 0x01;
        const RETURN_SINGLE_ENTRY   = 0x02;
        const INDEX_SPECIFIED       = 0x04;
        const REOPEN                = 0x10;
    }
}

/// Server assigned handle of an open file
///
/// # Protocol
/// SMB2 `SMB2_FILEID`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId {
    pub persistent: u64,
    pub volatile: u64,
}

impl FileId {
    /// Placeholder used by related compound requests to refer to the handle
    /// opened earlier in the same chain
    pub const RELATED: FileId = FileId {
        persistent: !0,
        volatile: !0,
    };
}

/// 16-byte GUID in wire order
pub type Guid = [u8; 16];

/// SMB2 packet header
///
/// The sync and async header forms differ only in how bytes 32..40 are used;
/// `async_id` is meaningful when `flags` contains `ASYNC_COMMAND`, `tree_id`
/// otherwise.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub credit_charge: u16,
    /// NTSTATUS in responses, channel sequence in requests
    pub status: u32,
    pub command: u16,
    /// CreditRequest in requests, CreditResponse in responses
    pub credits: u16,
    pub flags: HeaderFlags,
    pub next_command: u32,
    pub message_id: u64,
    pub async_id: u64,
    pub tree_id: u32,
    pub session_id: u64,
    pub signature: [u8; 16],
}

impl Header {
    pub fn new(command: Command) -> Header {
        Header {
            command: command as u16,
            ..Default::default()
        }
    }

    pub fn command(&self) -> Option<Command> {
        Command::from_u16(self.command)
    }

    pub fn is_response(&self) -> bool {
        self.flags.contains(HeaderFlags::SERVER_TO_REDIR)
    }

    pub fn is_async(&self) -> bool {
        self.flags.contains(HeaderFlags::ASYNC_COMMAND)
    }
}

/// Negotiate contexts exchanged by 3.1.1
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NegotiateContext {
    PreauthIntegrity {
        hash_algorithms: Vec<u16>,
        salt: Vec<u8>,
    },
    Signing {
        algorithms: Vec<u16>,
    },
    Other {
        typ: u16,
        data: Vec<u8>,
    },
}

/// Timestamps and sizes shared by CREATE and CLOSE responses
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FileTimes {
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
    pub allocation_size: u64,
    pub end_of_file: u64,
    pub file_attributes: FileAttributes,
}

/// A data type encapsulating the SMB2 command bodies
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Body {
    NegotiateRequest {
        security_mode: SecurityMode,
        capabilities: Capabilities,
        client_guid: Guid,
        dialects: Vec<u16>,
        contexts: Vec<NegotiateContext>,
    },
    NegotiateResponse {
        security_mode: SecurityMode,
        dialect: u16,
        server_guid: Guid,
        capabilities: Capabilities,
        max_transact_size: u32,
        max_read_size: u32,
        max_write_size: u32,
        system_time: u64,
        server_start_time: u64,
        security_buffer: Vec<u8>,
        contexts: Vec<NegotiateContext>,
    },
    SessionSetupRequest {
        flags: u8,
        security_mode: SecurityMode,
        capabilities: Capabilities,
        previous_session_id: u64,
        security_buffer: Vec<u8>,
    },
    SessionSetupResponse {
        session_flags: SessionFlags,
        security_buffer: Vec<u8>,
    },
    LogoffRequest,
    LogoffResponse,
    TreeConnectRequest {
        path: String,
    },
    TreeConnectResponse {
        share_type: u8,
        share_flags: ShareFlags,
        capabilities: ShareCapabilities,
        maximal_access: AccessMask,
    },
    TreeDisconnectRequest,
    TreeDisconnectResponse,
    CreateRequest {
        requested_oplock_level: u8,
        impersonation_level: u32,
        desired_access: AccessMask,
        file_attributes: FileAttributes,
        share_access: ShareAccess,
        create_disposition: u32,
        create_options: CreateOptions,
        name: String,
    },
    CreateResponse {
        oplock_level: u8,
        create_action: u32,
        times: FileTimes,
        file_id: FileId,
    },
    CloseRequest {
        flags: u16,
        file_id: FileId,
    },
    CloseResponse {
        flags: u16,
        times: FileTimes,
    },
    FlushRequest {
        file_id: FileId,
    },
    FlushResponse,
    ReadRequest {
        length: u32,
        offset: u64,
        file_id: FileId,
        minimum_count: u32,
    },
    ReadResponse {
        data: Vec<u8>,
        data_remaining: u32,
    },
    WriteRequest {
        offset: u64,
        file_id: FileId,
        data: Vec<u8>,
    },
    WriteResponse {
        count: u32,
    },
    IoctlRequest {
        ctl_code: u32,
        file_id: FileId,
        input: Vec<u8>,
        max_output_response: u32,
        flags: u32,
    },
    IoctlResponse {
        ctl_code: u32,
        file_id: FileId,
        output: Vec<u8>,
    },
    CancelRequest,
    EchoRequest,
    EchoResponse,
    QueryDirectoryRequest {
        info_class: u8,
        flags: QueryDirectoryFlags,
        file_index: u32,
        file_id: FileId,
        pattern: String,
        output_buffer_length: u32,
    },
    QueryDirectoryResponse {
        data: Vec<u8>,
    },
    QueryInfoRequest {
        info_type: u8,
        info_class: u8,
        output_buffer_length: u32,
        additional_information: u32,
        flags: u32,
        file_id: FileId,
    },
    QueryInfoResponse {
        data: Vec<u8>,
    },
    SetInfoRequest {
        info_type: u8,
        info_class: u8,
        additional_information: u32,
        file_id: FileId,
        data: Vec<u8>,
    },
    SetInfoResponse,
    ErrorResponse {
        error_data: Vec<u8>,
    },
}

impl Body {
    /// The command code this body belongs to.
    ///
    /// The error body stands in for whatever command failed, so it has none;
    /// the header carries the code instead.
    pub fn command(&self) -> Option<Command> {
        use crate::pdu::Body::*;

        Some(match *self {
            NegotiateRequest { .. } | NegotiateResponse { .. } => Command::Negotiate,
            SessionSetupRequest { .. } | SessionSetupResponse { .. } => Command::SessionSetup,
            LogoffRequest | LogoffResponse => Command::Logoff,
            TreeConnectRequest { .. } | TreeConnectResponse { .. } => Command::TreeConnect,
            TreeDisconnectRequest | TreeDisconnectResponse => Command::TreeDisconnect,
            CreateRequest { .. } | CreateResponse { .. } => Command::Create,
            CloseRequest { .. } | CloseResponse { .. } => Command::Close,
            FlushRequest { .. } | FlushResponse => Command::Flush,
            ReadRequest { .. } | ReadResponse { .. } => Command::Read,
            WriteRequest { .. } | WriteResponse { .. } => Command::Write,
            IoctlRequest { .. } | IoctlResponse { .. } => Command::Ioctl,
            CancelRequest => Command::Cancel,
            EchoRequest | EchoResponse => Command::Echo,
            QueryDirectoryRequest { .. } | QueryDirectoryResponse { .. } => Command::QueryDirectory,
            QueryInfoRequest { .. } | QueryInfoResponse { .. } => Command::QueryInfo,
            SetInfoRequest { .. } | SetInfoResponse => Command::SetInfo,
            ErrorResponse { .. } => return None,
        })
    }

    /// Whether this is a server-to-client body.
    pub fn is_response(&self) -> bool {
        use crate::pdu::Body::*;

        matches!(
            *self,
            NegotiateResponse { .. }
                | SessionSetupResponse { .. }
                | LogoffResponse
                | TreeConnectResponse { .. }
                | TreeDisconnectResponse
                | CreateResponse { .. }
                | CloseResponse { .. }
                | FlushResponse
                | ReadResponse { .. }
                | WriteResponse { .. }
                | IoctlResponse { .. }
                | EchoResponse
                | QueryDirectoryResponse { .. }
                | QueryInfoResponse { .. }
                | SetInfoResponse
                | ErrorResponse { .. }
        )
    }

    /// Payload sizes that determine the credit charge of this request.
    ///
    /// Returns `(send, expected_response)` byte counts.
    pub fn payload_sizes(&self) -> (u32, u32) {
        use crate::pdu::Body::*;

        match *self {
            ReadRequest { length, .. } => (0, length),
            WriteRequest { ref data, .. } => (data.len() as u32, 0),
            IoctlRequest {
                ref input,
                max_output_response,
                ..
            } => (input.len() as u32, max_output_response),
            QueryDirectoryRequest {
                output_buffer_length,
                ..
            } => (0, output_buffer_length),
            QueryInfoRequest {
                output_buffer_length,
                ..
            } => (0, output_buffer_length),
            SetInfoRequest { ref data, .. } => (data.len() as u32, 0),
            _ => (0, 0),
        }
    }

    /// The file id a handle-based request refers to.
    pub fn file_id(&self) -> Option<FileId> {
        use crate::pdu::Body::*;

        match *self {
            CloseRequest { file_id, .. }
            | FlushRequest { file_id }
            | ReadRequest { file_id, .. }
            | WriteRequest { file_id, .. }
            | IoctlRequest { file_id, .. }
            | QueryDirectoryRequest { file_id, .. }
            | QueryInfoRequest { file_id, .. }
            | SetInfoRequest { file_id, .. }
            | CreateResponse { file_id, .. } => Some(file_id),
            _ => None,
        }
    }

    /// Mutable access to the file id of a handle-based request.
    pub fn file_id_mut(&mut self) -> Option<&mut FileId> {
        use crate::pdu::Body::*;

        match *self {
            CloseRequest { ref mut file_id, .. }
            | FlushRequest { ref mut file_id }
            | ReadRequest { ref mut file_id, .. }
            | WriteRequest { ref mut file_id, .. }
            | IoctlRequest { ref mut file_id, .. }
            | QueryDirectoryRequest { ref mut file_id, .. }
            | QueryInfoRequest { ref mut file_id, .. }
            | SetInfoRequest { ref mut file_id, .. } => Some(file_id),
            _ => None,
        }
    }
}

/// Envelope for one SMB2 message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Msg {
    pub header: Header,
    pub body: Body,
}

/// Credit charge of a request carrying `send` bytes and expecting `recv` bytes.
pub fn credit_charge(send: u32, recv: u32) -> u16 {
    let payload = send.max(recv);
    if payload == 0 {
        1
    } else {
        (1 + (payload - 1) / CREDIT_PAYLOAD_SIZE) as u16
    }
}
