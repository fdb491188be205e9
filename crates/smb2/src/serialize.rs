//! Serialize/deserialize SMB2 messages into/from binary.
//!
//! Variable-length buffers in SMB2 bodies are addressed by offsets relative to
//! the start of the message header, so decoding works on the complete message
//! slice rather than a plain stream.

use crate::{io_err, pdu::*, res, utils::align8};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Result};
use std::mem;
use std::ops::{Range, Shl};

macro_rules! decode {
    ($decoder:expr) => {
        Decodable::decode(&mut $decoder)?
    };

    ($typ:ident, $buf:expr) => {
        $typ::from_bits_truncate(decode!($buf))
    };
}

/// A serializing specific result to overload operators on `Result`
///
/// # Overloaded operators
/// <<, ?
pub struct SResult<T>(::std::io::Result<T>);

impl<W: WriteBytesExt> SResult<Encoder<W>> {
    /// Total bytes written by the chain, or its first error
    pub fn done(self) -> Result<usize> {
        self.0.map(|enc| enc.bytes_written())
    }
}

/// A wrapper class of WriteBytesExt to provide operator overloads
/// for serializing
///
/// Operator '<<' serializes the right hand side argument into
/// the left hand side encoder
#[derive(Clone, Debug)]
pub struct Encoder<W> {
    writer: W,
    bytes: usize,
}

impl<W: WriteBytesExt> Encoder<W> {
    pub fn new(writer: W) -> Encoder<W> {
        Encoder { writer, bytes: 0 }
    }

    /// Return total bytes written
    pub fn bytes_written(&self) -> usize {
        self.bytes
    }

    /// Encode data, equivalent to: encoder << data
    pub fn encode<T: Encodable>(&mut self, data: &T) -> Result<usize> {
        let bytes = data.encode(&mut self.writer)?;
        self.bytes += bytes;
        Ok(bytes)
    }

    /// Get inner writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for Encoder<W> {
    type Output = SResult<Encoder<W>>;
    fn shl(mut self, rhs: &'a T) -> Self::Output {
        match self.encode(rhs) {
            Ok(_) => SResult(Ok(self)),
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for SResult<Encoder<W>> {
    type Output = Self;
    fn shl(self, rhs: &'a T) -> Self::Output {
        match self.0 {
            Ok(mut encoder) => match encoder.encode(rhs) {
                Ok(_) => SResult(Ok(encoder)),
                Err(e) => SResult(Err(e)),
            },
            Err(e) => SResult(Err(e)),
        }
    }
}

/// Trait representing a type which can be serialized into binary
pub trait Encodable {
    /// Encode self to w and returns the number of bytes encoded
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize>;
}

impl Encodable for u8 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u8(*self).and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u16 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u16::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u32 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u32::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u64 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u64::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl<const N: usize> Encodable for [u8; N] {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_all(self).and(Ok(N))
    }
}

/// Raw bytes, written without a length prefix
impl Encodable for Vec<u8> {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_all(self).and(Ok(self.len()))
    }
}

/// Run of zero bytes
pub struct Padding(pub usize);

impl Encodable for Padding {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        for _ in 0..self.0 {
            w.write_u8(0)?;
        }
        Ok(self.0)
    }
}

impl Encodable for FileId {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w) << &self.persistent << &self.volatile).done()
    }
}

impl Encodable for FileTimes {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w)
            << &self.creation_time
            << &self.last_access_time
            << &self.last_write_time
            << &self.change_time
            << &self.allocation_size
            << &self.end_of_file
            << &self.file_attributes.bits())
            .done()
    }
}

impl Encodable for Header {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let buf = Encoder::new(w)
            << &PROTOCOL_ID
            << &(HEADER_SIZE as u16)
            << &self.credit_charge
            << &self.status
            << &self.command
            << &self.credits
            << &self.flags.bits()
            << &self.next_command
            << &self.message_id;

        let buf = if self.is_async() {
            buf << &self.async_id
        } else {
            buf << &0u32 << &self.tree_id
        };

        (buf << &self.session_id << &self.signature).done()
    }
}

impl Encodable for NegotiateContext {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let (typ, data) = match *self {
            NegotiateContext::PreauthIntegrity {
                ref hash_algorithms,
                ref salt,
            } => {
                let mut data = Vec::new();
                let enc = Encoder::new(&mut data)
                    << &(hash_algorithms.len() as u16)
                    << &(salt.len() as u16);
                hash_algorithms.iter().fold(enc, |acc, h| acc << h).done()?;
                data.extend_from_slice(salt);
                (context_type::PREAUTH_INTEGRITY_CAPABILITIES, data)
            }
            NegotiateContext::Signing { ref algorithms } => {
                let mut data = Vec::new();
                let enc = Encoder::new(&mut data) << &(algorithms.len() as u16);
                algorithms.iter().fold(enc, |acc, a| acc << a).done()?;
                (context_type::SIGNING_CAPABILITIES, data)
            }
            NegotiateContext::Other { typ, ref data } => (typ, data.clone()),
        };

        (Encoder::new(w) << &typ << &(data.len() as u16) << &0u32 << &data).done()
    }
}

/// Negotiate context list, each context 8-byte aligned relative to the header
struct ContextList<'a>(&'a [NegotiateContext]);

impl Encodable for ContextList<'_> {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let mut bytes = 0;
        for (i, ctx) in self.0.iter().enumerate() {
            if i > 0 {
                bytes += Padding(align8(bytes) - bytes).encode(w)?;
            }
            bytes += ctx.encode(w)?;
        }
        Ok(bytes)
    }
}

/// A single zero byte for bodies whose variable part is empty; SMB2 odd
/// structure sizes promise at least one byte of buffer.
fn pad_if_empty(buf: &[u8]) -> Padding {
    Padding(usize::from(buf.is_empty()))
}

impl Encodable for Body {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        use crate::pdu::Body::*;

        let buf = Encoder::new(w);

        let buf = match *self {
            NegotiateRequest {
                ref security_mode,
                ref capabilities,
                ref client_guid,
                ref dialects,
                ref contexts,
            } => {
                let dialects_end = HEADER_SIZE + 36 + 2 * dialects.len();
                let ctx_offset = if contexts.is_empty() {
                    0
                } else {
                    align8(dialects_end)
                };
                let buf = buf
                    << &36u16
                    << &(dialects.len() as u16)
                    << &security_mode.bits()
                    << &0u16
                    << &capabilities.bits()
                    << client_guid
                    << &(ctx_offset as u32)
                    << &(contexts.len() as u16)
                    << &0u16;
                let buf = dialects.iter().fold(buf, |acc, d| acc << d);
                if contexts.is_empty() {
                    buf
                } else {
                    buf << &Padding(ctx_offset - dialects_end) << &ContextList(contexts)
                }
            }
            NegotiateResponse {
                ref security_mode,
                ref dialect,
                ref server_guid,
                ref capabilities,
                ref max_transact_size,
                ref max_read_size,
                ref max_write_size,
                ref system_time,
                ref server_start_time,
                ref security_buffer,
                ref contexts,
            } => {
                let sec_offset = HEADER_SIZE + 64;
                let sec_end = sec_offset + security_buffer.len();
                let ctx_offset = if contexts.is_empty() {
                    0
                } else {
                    align8(sec_end)
                };
                let buf = buf
                    << &65u16
                    << &security_mode.bits()
                    << dialect
                    << &(contexts.len() as u16)
                    << server_guid
                    << &capabilities.bits()
                    << max_transact_size
                    << max_read_size
                    << max_write_size
                    << system_time
                    << server_start_time
                    << &(sec_offset as u16)
                    << &(security_buffer.len() as u16)
                    << &(ctx_offset as u32)
                    << security_buffer;
                if contexts.is_empty() {
                    buf << &pad_if_empty(security_buffer)
                } else {
                    buf << &Padding(ctx_offset - sec_end) << &ContextList(contexts)
                }
            }
            SessionSetupRequest {
                ref flags,
                ref security_mode,
                ref capabilities,
                ref previous_session_id,
                ref security_buffer,
            } => {
                buf << &25u16
                    << flags
                    << &(security_mode.bits() as u8)
                    << &capabilities.bits()
                    << &0u32
                    << &((HEADER_SIZE + 24) as u16)
                    << &(security_buffer.len() as u16)
                    << previous_session_id
                    << security_buffer
                    << &pad_if_empty(security_buffer)
            }
            SessionSetupResponse {
                ref session_flags,
                ref security_buffer,
            } => {
                buf << &9u16
                    << &session_flags.bits()
                    << &((HEADER_SIZE + 8) as u16)
                    << &(security_buffer.len() as u16)
                    << security_buffer
                    << &pad_if_empty(security_buffer)
            }
            LogoffRequest | LogoffResponse | TreeDisconnectRequest | TreeDisconnectResponse
            | FlushResponse | CancelRequest | EchoRequest | EchoResponse => {
                buf << &4u16 << &0u16
            }
            TreeConnectRequest { ref path } => {
                let path = crate::utils::to_utf16le(path);
                buf << &9u16
                    << &0u16
                    << &((HEADER_SIZE + 8) as u16)
                    << &(path.len() as u16)
                    << &path
                    << &pad_if_empty(&path)
            }
            TreeConnectResponse {
                ref share_type,
                ref share_flags,
                ref capabilities,
                ref maximal_access,
            } => {
                buf << &16u16
                    << share_type
                    << &0u8
                    << &share_flags.bits()
                    << &capabilities.bits()
                    << &maximal_access.bits()
            }
            CreateRequest {
                ref requested_oplock_level,
                ref impersonation_level,
                ref desired_access,
                ref file_attributes,
                ref share_access,
                ref create_disposition,
                ref create_options,
                ref name,
            } => {
                let name = crate::utils::to_utf16le(name);
                buf << &57u16
                    << &0u8
                    << requested_oplock_level
                    << impersonation_level
                    << &0u64
                    << &0u64
                    << &desired_access.bits()
                    << &file_attributes.bits()
                    << &share_access.bits()
                    << create_disposition
                    << &create_options.bits()
                    << &((HEADER_SIZE + 56) as u16)
                    << &(name.len() as u16)
                    << &0u32
                    << &0u32
                    << &name
                    << &pad_if_empty(&name)
            }
            CreateResponse {
                ref oplock_level,
                ref create_action,
                ref times,
                ref file_id,
            } => {
                buf << &89u16
                    << oplock_level
                    << &0u8
                    << create_action
                    << times
                    << &0u32
                    << file_id
                    << &0u32
                    << &0u32
            }
            CloseRequest {
                ref flags,
                ref file_id,
            } => buf << &24u16 << flags << &0u32 << file_id,
            CloseResponse {
                ref flags,
                ref times,
            } => buf << &60u16 << flags << &0u32 << times,
            FlushRequest { ref file_id } => buf << &24u16 << &0u16 << &0u32 << file_id,
            ReadRequest {
                ref length,
                ref offset,
                ref file_id,
                ref minimum_count,
            } => {
                buf << &49u16
                    << &((HEADER_SIZE + 16) as u8)
                    << &0u8
                    << length
                    << offset
                    << file_id
                    << minimum_count
                    << &0u32
                    << &0u32
                    << &0u16
                    << &0u16
                    << &0u8
            }
            ReadResponse {
                ref data,
                ref data_remaining,
            } => {
                buf << &17u16
                    << &((HEADER_SIZE + 16) as u8)
                    << &0u8
                    << &(data.len() as u32)
                    << data_remaining
                    << &0u32
                    << data
                    << &pad_if_empty(data)
            }
            WriteRequest {
                ref offset,
                ref file_id,
                ref data,
            } => {
                buf << &49u16
                    << &((HEADER_SIZE + 48) as u16)
                    << &(data.len() as u32)
                    << offset
                    << file_id
                    << &0u32
                    << &0u32
                    << &0u16
                    << &0u16
                    << &0u32
                    << data
                    << &pad_if_empty(data)
            }
            WriteResponse { ref count } => {
                buf << &17u16 << &0u16 << count << &0u32 << &0u16 << &0u16
            }
            IoctlRequest {
                ref ctl_code,
                ref file_id,
                ref input,
                ref max_output_response,
                ref flags,
            } => {
                buf << &57u16
                    << &0u16
                    << ctl_code
                    << file_id
                    << &((HEADER_SIZE + 56) as u32)
                    << &(input.len() as u32)
                    << &0u32
                    << &0u32
                    << &0u32
                    << max_output_response
                    << flags
                    << &0u32
                    << input
                    << &pad_if_empty(input)
            }
            IoctlResponse {
                ref ctl_code,
                ref file_id,
                ref output,
            } => {
                buf << &49u16
                    << &0u16
                    << ctl_code
                    << file_id
                    << &((HEADER_SIZE + 48) as u32)
                    << &0u32
                    << &((HEADER_SIZE + 48) as u32)
                    << &(output.len() as u32)
                    << &0u32
                    << &0u32
                    << output
            }
            QueryDirectoryRequest {
                ref info_class,
                ref flags,
                ref file_index,
                ref file_id,
                ref pattern,
                ref output_buffer_length,
            } => {
                let pattern = crate::utils::to_utf16le(pattern);
                buf << &33u16
                    << info_class
                    << &flags.bits()
                    << file_index
                    << file_id
                    << &((HEADER_SIZE + 32) as u16)
                    << &(pattern.len() as u16)
                    << output_buffer_length
                    << &pattern
                    << &pad_if_empty(&pattern)
            }
            QueryDirectoryResponse { ref data } | QueryInfoResponse { ref data } => {
                buf << &9u16
                    << &((HEADER_SIZE + 8) as u16)
                    << &(data.len() as u32)
                    << data
                    << &pad_if_empty(data)
            }
            QueryInfoRequest {
                ref info_type,
                ref info_class,
                ref output_buffer_length,
                ref additional_information,
                ref flags,
                ref file_id,
            } => {
                buf << &41u16
                    << info_type
                    << info_class
                    << output_buffer_length
                    << &0u16
                    << &0u16
                    << &0u32
                    << additional_information
                    << flags
                    << file_id
                    << &0u8
            }
            SetInfoRequest {
                ref info_type,
                ref info_class,
                ref additional_information,
                ref file_id,
                ref data,
            } => {
                buf << &33u16
                    << info_type
                    << info_class
                    << &(data.len() as u32)
                    << &((HEADER_SIZE + 32) as u16)
                    << &0u16
                    << additional_information
                    << file_id
                    << data
                    << &pad_if_empty(data)
            }
            SetInfoResponse => buf << &2u16,
            ErrorResponse { ref error_data } => {
                buf << &9u16
                    << &0u8
                    << &0u8
                    << &(error_data.len() as u32)
                    << error_data
                    << &pad_if_empty(error_data)
            }
        };

        buf.done()
    }
}

impl Encodable for Msg {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        Ok(self.header.encode(w)? + self.body.encode(w)?)
    }
}

/// Trait representing a type which can be deserialized from binary
pub trait Decodable: Sized {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self>;
}

impl Decodable for u8 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u8()
    }
}

impl Decodable for u16 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u16::<LittleEndian>()
    }
}

impl Decodable for u32 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u32::<LittleEndian>()
    }
}

impl Decodable for u64 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u64::<LittleEndian>()
    }
}

impl<const N: usize> Decodable for [u8; N] {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let mut buf = [0u8; N];
        r.read_exact(&mut buf).and(Ok(buf))
    }
}

impl Decodable for FileId {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(FileId {
            persistent: decode!(*r),
            volatile: decode!(*r),
        })
    }
}

impl Decodable for FileTimes {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(FileTimes {
            creation_time: decode!(*r),
            last_access_time: decode!(*r),
            last_write_time: decode!(*r),
            change_time: decode!(*r),
            allocation_size: decode!(*r),
            end_of_file: decode!(*r),
            file_attributes: decode!(FileAttributes, *r),
        })
    }
}

impl Decodable for Header {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let protocol: [u8; 4] = decode!(*r);
        if protocol != PROTOCOL_ID {
            return res!(io_err!(InvalidData, "Not an SMB2 message"));
        }
        let size: u16 = decode!(*r);
        if size as usize != HEADER_SIZE {
            return res!(io_err!(InvalidData, "Invalid header size"));
        }

        let mut header = Header {
            credit_charge: decode!(*r),
            status: decode!(*r),
            command: decode!(*r),
            credits: decode!(*r),
            flags: decode!(HeaderFlags, *r),
            next_command: decode!(*r),
            message_id: decode!(*r),
            ..Default::default()
        };
        if header.is_async() {
            header.async_id = decode!(*r);
        } else {
            let _reserved: u32 = decode!(*r);
            header.tree_id = decode!(*r);
        }
        header.session_id = decode!(*r);
        header.signature = decode!(*r);

        Ok(header)
    }
}

/// Copy `len` bytes at header-relative `offset` out of `msg`.
fn buffer_at(msg: &[u8], offset: usize, len: usize) -> Result<Vec<u8>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    match offset.checked_add(len) {
        Some(end) if offset >= HEADER_SIZE && end <= msg.len() => Ok(msg[offset..end].to_vec()),
        _ => res!(io_err!(InvalidData, "Buffer outside of message")),
    }
}

fn decode_contexts(msg: &[u8], offset: usize, count: usize) -> Result<Vec<NegotiateContext>> {
    let mut contexts = Vec::with_capacity(count);
    let mut pos = offset;
    for _ in 0..count {
        pos = align8(pos);
        if pos + 8 > msg.len() {
            return res!(io_err!(InvalidData, "Negotiate context outside of message"));
        }
        let mut r = Cursor::new(&msg[pos..]);
        let typ: u16 = decode!(r);
        let len: u16 = decode!(r);
        let _reserved: u32 = decode!(r);
        let data = buffer_at(msg, pos + 8, len as usize)?;
        pos += 8 + len as usize;

        let mut d = Cursor::new(&data[..]);
        let ctx = match typ {
            context_type::PREAUTH_INTEGRITY_CAPABILITIES => {
                let n: u16 = decode!(d);
                let salt_len: u16 = decode!(d);
                let hash_algorithms = (0..n)
                    .map(|_| Decodable::decode(&mut d))
                    .collect::<Result<Vec<u16>>>()?;
                let mut salt = vec![0; salt_len as usize];
                d.read_exact(&mut salt)?;
                NegotiateContext::PreauthIntegrity {
                    hash_algorithms,
                    salt,
                }
            }
            context_type::SIGNING_CAPABILITIES => {
                let n: u16 = decode!(d);
                let algorithms = (0..n)
                    .map(|_| Decodable::decode(&mut d))
                    .collect::<Result<Vec<u16>>>()?;
                NegotiateContext::Signing { algorithms }
            }
            typ => NegotiateContext::Other { typ, data },
        };
        contexts.push(ctx);
    }
    Ok(contexts)
}

/// Responses with these statuses carry the regular body of their command
/// rather than an error body.
fn has_regular_body(command: Command, status: u32) -> bool {
    match status {
        status::SUCCESS => true,
        status::MORE_PROCESSING_REQUIRED => command == Command::SessionSetup,
        status::BUFFER_OVERFLOW => matches!(
            command,
            Command::Read | Command::Ioctl | Command::QueryInfo | Command::QueryDirectory
        ),
        _ => false,
    }
}

fn decode_body(header: &Header, msg: &[u8]) -> Result<Body> {
    let command = header
        .command()
        .ok_or_else(|| io_err!(InvalidData, "Unknown command"))?;
    let response = header.is_response();

    let mut buf = Cursor::new(msg);
    buf.set_position(HEADER_SIZE as u64);
    let size: u16 = decode!(buf);

    if response && !has_regular_body(command, header.status) {
        if size != 9 {
            return res!(io_err!(InvalidData, "Invalid error response"));
        }
        let _context_count: u8 = decode!(buf);
        let _reserved: u8 = decode!(buf);
        let len: u32 = decode!(buf);
        return Ok(Body::ErrorResponse {
            error_data: buffer_at(msg, HEADER_SIZE + 8, len as usize)?,
        });
    }

    let body = match (command, response) {
        (Command::Negotiate, false) => {
            let count: u16 = decode!(buf);
            let security_mode = decode!(SecurityMode, buf);
            let _reserved: u16 = decode!(buf);
            let capabilities = decode!(Capabilities, buf);
            let client_guid = decode!(buf);
            let ctx_offset: u32 = decode!(buf);
            let ctx_count: u16 = decode!(buf);
            let _reserved2: u16 = decode!(buf);
            let dialects = (0..count)
                .map(|_| Decodable::decode(&mut buf))
                .collect::<Result<Vec<u16>>>()?;
            let contexts = if dialects.contains(&Dialect::Smb311.revision()) {
                decode_contexts(msg, ctx_offset as usize, ctx_count as usize)?
            } else {
                Vec::new()
            };
            Body::NegotiateRequest {
                security_mode,
                capabilities,
                client_guid,
                dialects,
                contexts,
            }
        }
        (Command::Negotiate, true) => {
            let security_mode = decode!(SecurityMode, buf);
            let dialect: u16 = decode!(buf);
            let ctx_count: u16 = decode!(buf);
            let server_guid = decode!(buf);
            let capabilities = decode!(Capabilities, buf);
            let max_transact_size = decode!(buf);
            let max_read_size = decode!(buf);
            let max_write_size = decode!(buf);
            let system_time = decode!(buf);
            let server_start_time = decode!(buf);
            let sec_offset: u16 = decode!(buf);
            let sec_len: u16 = decode!(buf);
            let ctx_offset: u32 = decode!(buf);
            let contexts = if dialect == Dialect::Smb311.revision() {
                decode_contexts(msg, ctx_offset as usize, ctx_count as usize)?
            } else {
                Vec::new()
            };
            Body::NegotiateResponse {
                security_mode,
                dialect,
                server_guid,
                capabilities,
                max_transact_size,
                max_read_size,
                max_write_size,
                system_time,
                server_start_time,
                security_buffer: buffer_at(msg, sec_offset as usize, sec_len as usize)?,
                contexts,
            }
        }
        (Command::SessionSetup, false) => {
            let flags = decode!(buf);
            let mode: u8 = decode!(buf);
            let capabilities = decode!(Capabilities, buf);
            let _channel: u32 = decode!(buf);
            let sec_offset: u16 = decode!(buf);
            let sec_len: u16 = decode!(buf);
            let previous_session_id = decode!(buf);
            Body::SessionSetupRequest {
                flags,
                security_mode: SecurityMode::from_bits_truncate(u16::from(mode)),
                capabilities,
                previous_session_id,
                security_buffer: buffer_at(msg, sec_offset as usize, sec_len as usize)?,
            }
        }
        (Command::SessionSetup, true) => {
            let session_flags = decode!(SessionFlags, buf);
            let sec_offset: u16 = decode!(buf);
            let sec_len: u16 = decode!(buf);
            Body::SessionSetupResponse {
                session_flags,
                security_buffer: buffer_at(msg, sec_offset as usize, sec_len as usize)?,
            }
        }
        (Command::Logoff, false) => Body::LogoffRequest,
        (Command::Logoff, true) => Body::LogoffResponse,
        (Command::TreeConnect, false) => {
            let _flags: u16 = decode!(buf);
            let offset: u16 = decode!(buf);
            let len: u16 = decode!(buf);
            Body::TreeConnectRequest {
                path: crate::utils::from_utf16le(&buffer_at(msg, offset as usize, len as usize)?)?,
            }
        }
        (Command::TreeConnect, true) => {
            let share_type = decode!(buf);
            let _reserved: u8 = decode!(buf);
            Body::TreeConnectResponse {
                share_type,
                share_flags: decode!(ShareFlags, buf),
                capabilities: decode!(ShareCapabilities, buf),
                maximal_access: decode!(AccessMask, buf),
            }
        }
        (Command::TreeDisconnect, false) => Body::TreeDisconnectRequest,
        (Command::TreeDisconnect, true) => Body::TreeDisconnectResponse,
        (Command::Create, false) => {
            let _security_flags: u8 = decode!(buf);
            let requested_oplock_level = decode!(buf);
            let impersonation_level = decode!(buf);
            let _create_flags: u64 = decode!(buf);
            let _reserved: u64 = decode!(buf);
            let desired_access = decode!(AccessMask, buf);
            let file_attributes = decode!(FileAttributes, buf);
            let share_access = decode!(ShareAccess, buf);
            let create_disposition = decode!(buf);
            let create_options = decode!(CreateOptions, buf);
            let name_offset: u16 = decode!(buf);
            let name_len: u16 = decode!(buf);
            Body::CreateRequest {
                requested_oplock_level,
                impersonation_level,
                desired_access,
                file_attributes,
                share_access,
                create_disposition,
                create_options,
                name: crate::utils::from_utf16le(&buffer_at(
                    msg,
                    name_offset as usize,
                    name_len as usize,
                )?)?,
            }
        }
        (Command::Create, true) => {
            let oplock_level = decode!(buf);
            let _flags: u8 = decode!(buf);
            let create_action = decode!(buf);
            let times = decode!(buf);
            let _reserved: u32 = decode!(buf);
            Body::CreateResponse {
                oplock_level,
                create_action,
                times,
                file_id: decode!(buf),
            }
        }
        (Command::Close, false) => {
            let flags = decode!(buf);
            let _reserved: u32 = decode!(buf);
            Body::CloseRequest {
                flags,
                file_id: decode!(buf),
            }
        }
        (Command::Close, true) => {
            let flags = decode!(buf);
            let _reserved: u32 = decode!(buf);
            Body::CloseResponse {
                flags,
                times: decode!(buf),
            }
        }
        (Command::Flush, false) => {
            let _reserved: [u8; 6] = decode!(buf);
            Body::FlushRequest {
                file_id: decode!(buf),
            }
        }
        (Command::Flush, true) => Body::FlushResponse,
        (Command::Read, false) => {
            let _padding: u8 = decode!(buf);
            let _flags: u8 = decode!(buf);
            Body::ReadRequest {
                length: decode!(buf),
                offset: decode!(buf),
                file_id: decode!(buf),
                minimum_count: decode!(buf),
            }
        }
        (Command::Read, true) => {
            let offset: u8 = decode!(buf);
            let _reserved: u8 = decode!(buf);
            let len: u32 = decode!(buf);
            let data_remaining = decode!(buf);
            Body::ReadResponse {
                data: buffer_at(msg, offset as usize, len as usize)?,
                data_remaining,
            }
        }
        (Command::Write, false) => {
            let data_offset: u16 = decode!(buf);
            let len: u32 = decode!(buf);
            let offset = decode!(buf);
            let file_id = decode!(buf);
            Body::WriteRequest {
                offset,
                file_id,
                data: buffer_at(msg, data_offset as usize, len as usize)?,
            }
        }
        (Command::Write, true) => {
            let _reserved: u16 = decode!(buf);
            Body::WriteResponse {
                count: decode!(buf),
            }
        }
        (Command::Ioctl, false) => {
            let _reserved: u16 = decode!(buf);
            let ctl_code = decode!(buf);
            let file_id = decode!(buf);
            let in_offset: u32 = decode!(buf);
            let in_len: u32 = decode!(buf);
            let _max_input_response: u32 = decode!(buf);
            let _out_offset: u32 = decode!(buf);
            let _out_len: u32 = decode!(buf);
            let max_output_response = decode!(buf);
            let flags = decode!(buf);
            Body::IoctlRequest {
                ctl_code,
                file_id,
                input: buffer_at(msg, in_offset as usize, in_len as usize)?,
                max_output_response,
                flags,
            }
        }
        (Command::Ioctl, true) => {
            let _reserved: u16 = decode!(buf);
            let ctl_code = decode!(buf);
            let file_id = decode!(buf);
            let _in_offset: u32 = decode!(buf);
            let _in_len: u32 = decode!(buf);
            let out_offset: u32 = decode!(buf);
            let out_len: u32 = decode!(buf);
            Body::IoctlResponse {
                ctl_code,
                file_id,
                output: buffer_at(msg, out_offset as usize, out_len as usize)?,
            }
        }
        (Command::Cancel, false) => Body::CancelRequest,
        (Command::Echo, false) => Body::EchoRequest,
        (Command::Echo, true) => Body::EchoResponse,
        (Command::QueryDirectory, false) => {
            let info_class = decode!(buf);
            let flags = decode!(QueryDirectoryFlags, buf);
            let file_index = decode!(buf);
            let file_id = decode!(buf);
            let name_offset: u16 = decode!(buf);
            let name_len: u16 = decode!(buf);
            let output_buffer_length = decode!(buf);
            Body::QueryDirectoryRequest {
                info_class,
                flags,
                file_index,
                file_id,
                pattern: crate::utils::from_utf16le(&buffer_at(
                    msg,
                    name_offset as usize,
                    name_len as usize,
                )?)?,
                output_buffer_length,
            }
        }
        (Command::QueryDirectory, true) | (Command::QueryInfo, true) => {
            let offset: u16 = decode!(buf);
            let len: u32 = decode!(buf);
            let data = buffer_at(msg, offset as usize, len as usize)?;
            if command == Command::QueryDirectory {
                Body::QueryDirectoryResponse { data }
            } else {
                Body::QueryInfoResponse { data }
            }
        }
        (Command::QueryInfo, false) => {
            let info_type = decode!(buf);
            let info_class = decode!(buf);
            let output_buffer_length = decode!(buf);
            let _in_offset: u16 = decode!(buf);
            let _reserved: u16 = decode!(buf);
            let _in_len: u32 = decode!(buf);
            Body::QueryInfoRequest {
                info_type,
                info_class,
                output_buffer_length,
                additional_information: decode!(buf),
                flags: decode!(buf),
                file_id: decode!(buf),
            }
        }
        (Command::SetInfo, false) => {
            let info_type = decode!(buf);
            let info_class = decode!(buf);
            let len: u32 = decode!(buf);
            let offset: u16 = decode!(buf);
            let _reserved: u16 = decode!(buf);
            let additional_information = decode!(buf);
            let file_id = decode!(buf);
            Body::SetInfoRequest {
                info_type,
                info_class,
                additional_information,
                file_id,
                data: buffer_at(msg, offset as usize, len as usize)?,
            }
        }
        (Command::SetInfo, true) => Body::SetInfoResponse,
        _ => return res!(io_err!(InvalidData, "Unsupported command")),
    };

    Ok(body)
}

/// Helper function to read one SMB2 message out of its compound element
pub fn read_msg(msg: &[u8]) -> Result<Msg> {
    let header: Header = Decodable::decode(&mut Cursor::new(msg))?;
    let body = decode_body(&header, msg)?;
    Ok(Msg { header, body })
}

/// Helper function to encode a single SMB2 message
pub fn write_msg(msg: &Msg) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + 128);
    msg.encode(&mut buf)?;
    Ok(buf)
}

/// Link encoded messages into a compound chain.
///
/// Every element but the last is padded to an 8-byte boundary and its
/// `NextCommand` set to its padded length. Signatures must be computed after
/// this step since they cover the padding.
pub fn chain(elements: &mut [Vec<u8>]) {
    let last = elements.len().saturating_sub(1);
    for (i, elem) in elements.iter_mut().enumerate() {
        let next = if i == last {
            0
        } else {
            elem.resize(align8(elem.len()), 0);
            elem.len() as u32
        };
        elem[20..24].copy_from_slice(&next.to_le_bytes());
    }
}

/// Encode `msgs` as one frame, compounding when there is more than one.
pub fn encode(msgs: &[Msg]) -> Result<Vec<u8>> {
    let mut elements = msgs.iter().map(write_msg).collect::<Result<Vec<_>>>()?;
    chain(&mut elements);
    Ok(elements.concat())
}

/// Decode every message of a frame.
pub fn decode(frame: &[u8]) -> Result<Vec<Msg>> {
    split_compound(frame)?
        .into_iter()
        .map(|range| read_msg(&frame[range]))
        .collect()
}

/// Split a frame into the byte ranges of its compound elements.
pub fn split_compound(frame: &[u8]) -> Result<Vec<Range<usize>>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    loop {
        if frame.len() - start < HEADER_SIZE {
            return res!(io_err!(InvalidData, "Truncated SMB2 header"));
        }
        if frame[start..start + 4] != PROTOCOL_ID {
            return res!(io_err!(InvalidData, "Not an SMB2 message"));
        }
        let next = u32::from_le_bytes([
            frame[start + 20],
            frame[start + 21],
            frame[start + 22],
            frame[start + 23],
        ]) as usize;
        if next == 0 {
            ranges.push(start..frame.len());
            return Ok(ranges);
        }
        if next < HEADER_SIZE || next % 8 != 0 || start + next > frame.len() {
            return res!(io_err!(InvalidData, "Invalid NextCommand offset"));
        }
        ranges.push(start..start + next);
        start += next;
    }
}
