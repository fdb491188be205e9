//! Request/response multiplexer over one transport connection.
//!
//! A single reader task decodes incoming frames and completes outstanding
//! requests by message id; any number of tasks may submit concurrently.

use {
    crate::{
        credit::CreditState,
        error::Error,
        pdu::*,
        serialize::{self, Decodable},
        sign::{PreauthHash, Signer},
        utils::Result,
    },
    bytes::Bytes,
    futures::sink::SinkExt,
    log::{debug, error, warn},
    std::{
        collections::{HashMap, HashSet},
        io::Cursor,
        sync::{Arc, Mutex, MutexGuard, OnceLock},
        time::Duration,
    },
    tokio::{
        io::{AsyncRead, AsyncWrite},
        sync::oneshot,
        task::JoinHandle,
    },
    tokio_stream::StreamExt,
    tokio_util::codec::{FramedRead, FramedWrite, length_delimited::{self, LengthDelimitedCodec}},
};

type Writer = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, LengthDelimitedCodec>;

/// Direct TCP transport framing: 4-byte big-endian length, high byte zero.
pub fn frame_codec() -> length_delimited::Builder {
    let mut builder = LengthDelimitedCodec::builder();
    builder
        .length_field_offset(0)
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_SIZE);
    builder
}

/// Connection properties fixed by NEGOTIATE.
#[derive(Clone, Debug)]
pub struct NegotiatedParameters {
    pub dialect: Dialect,
    pub server_guid: Guid,
    pub server_security_mode: SecurityMode,
    pub capabilities: Capabilities,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    /// Either side requires every session message to be signed.
    pub require_signing: bool,
    /// One of `signing_algorithm::*`
    pub signing_algorithm: u16,
    /// Connection preauth integrity hash after NEGOTIATE (3.1.1 only).
    pub preauth: Option<PreauthHash>,
}

/// A decoded response together with its wire bytes.
#[derive(Clone, Debug)]
pub struct Reply {
    pub msg: Msg,
    pub raw: Vec<u8>,
}

impl Reply {
    pub fn status(&self) -> u32 {
        self.msg.header.status
    }

    /// Turn a non-success status into `Error::Remote`.
    pub fn check(self) -> Result<Reply> {
        match self.status() {
            status::SUCCESS => Ok(self),
            code => Err(Error::remote(code)),
        }
    }
}

struct PendingEntry {
    tx: oneshot::Sender<Result<Reply>>,
    charge: u16,
    async_id: Option<u64>,
}

#[derive(Default)]
struct Table {
    next_id: u64,
    entries: HashMap<u64, PendingEntry>,
    closed: bool,
}

struct Shared {
    writer: tokio::sync::Mutex<Writer>,
    table: Mutex<Table>,
    credits: CreditState,
    signers: Mutex<HashMap<u64, Arc<Signer>>>,
    /// Sessions established and not yet logged off
    sessions: Mutex<HashSet<u64>>,
    params: OnceLock<NegotiatedParameters>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn signer(&self, session_id: u64) -> Option<Arc<Signer>> {
        lock(&self.signers).get(&session_id).cloned()
    }

    /// Once a session has a signer every final response on it must carry a
    /// valid signature.
    fn verify(&self, header: &Header, raw: &[u8]) -> Result<()> {
        // SESSION_SETUP responses are checked by the authentication exchange
        // once the key exists.
        if header.command == Command::SessionSetup as u16 {
            return Ok(());
        }
        let Some(signer) = self.signer(header.session_id) else {
            return Ok(());
        };
        if !header.flags.contains(HeaderFlags::SIGNED) {
            error!("Unsigned response to message {} on a signed session", header.message_id);
        } else if !signer.verify(raw) {
            error!("Bad signature on message {}", header.message_id);
        } else {
            return Ok(());
        }
        Err(Error::Integrity {
            message_id: header.message_id,
        })
    }

    fn dispatch(&self, frame: &[u8]) -> std::io::Result<()> {
        for range in serialize::split_compound(frame)? {
            let raw = &frame[range];
            let header = Header::decode(&mut Cursor::new(raw))?;
            debug!(
                "\t← {:?} id={} {}",
                header.command(),
                header.message_id,
                status::name(header.status)
            );

            if header.message_id == UNSOLICITED_MESSAGE_ID {
                debug!("Ignoring unsolicited {:?}", header.command());
                continue;
            }

            if header.is_async() && header.status == status::PENDING {
                if let Some(entry) = lock(&self.table).entries.get_mut(&header.message_id) {
                    entry.async_id = Some(header.async_id);
                }
                self.credits.grant(header.credits);
                continue;
            }

            let entry = match lock(&self.table).entries.remove(&header.message_id) {
                Some(entry) => entry,
                None => {
                    warn!("Response for unknown message id {}", header.message_id);
                    continue;
                }
            };
            self.credits.release(entry.charge, header.credits);

            let result = self.verify(&header, raw).and_then(|()| {
                let msg = serialize::read_msg(raw).map_err(Error::malformed)?;
                Ok(Reply {
                    msg,
                    raw: raw.to_vec(),
                })
            });
            let _ = entry.tx.send(result);
        }
        Ok(())
    }

    fn teardown(&self) {
        let entries = {
            let mut table = lock(&self.table);
            table.closed = true;
            std::mem::take(&mut table.entries)
        };
        if !entries.is_empty() {
            warn!("Connection lost with {} requests outstanding", entries.len());
        }
        for (_, entry) in entries {
            let _ = entry.tx.send(Err(Error::ConnectionLost));
        }
        self.credits.close();
    }
}

async fn read_loop<R>(shared: Arc<Shared>, mut framedread: FramedRead<R, LengthDelimitedCodec>)
where
    R: AsyncRead + Send + Unpin,
{
    while let Some(bytes) = framedread.next().await {
        if let Err(e) = bytes.and_then(|frame| shared.dispatch(&frame)) {
            error!("Error: {}: {:?}", e, e);
            break;
        }
    }
    shared.teardown();
}

/// One SMB2 connection.
///
/// Cloning yields another handle to the same connection. The connection stays
/// open until [`Conn::close`] is called or the peer hangs up.
#[derive(Clone)]
pub struct Conn {
    shared: Arc<Shared>,
}

impl Conn {
    /// Take ownership of `stream` and start the reader task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<S>(stream: S, max_credit_balance: u16) -> Conn
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let framedread = frame_codec().new_read(reader);
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        let framedwrite = frame_codec().new_write(writer);

        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(framedwrite),
            table: Mutex::new(Table::default()),
            credits: CreditState::new(max_credit_balance),
            signers: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashSet::new()),
            params: OnceLock::new(),
            reader: Mutex::new(None),
        });

        let handle = tokio::spawn(read_loop(shared.clone(), framedread));
        *lock(&shared.reader) = Some(handle);

        Conn { shared }
    }

    pub fn negotiated(&self) -> Option<&NegotiatedParameters> {
        self.shared.params.get()
    }

    pub(crate) fn set_negotiated(&self, params: NegotiatedParameters) -> Result<()> {
        self.shared
            .params
            .set(params)
            .map_err(|_| Error::Negotiation("connection already negotiated".to_owned()))
    }

    pub(crate) fn register_signer(&self, session_id: u64, signer: Arc<Signer>) {
        lock(&self.shared.signers).insert(session_id, signer);
    }

    pub(crate) fn unregister_signer(&self, session_id: u64) {
        lock(&self.shared.signers).remove(&session_id);
    }

    pub(crate) fn attach_session(&self, session_id: u64) {
        lock(&self.shared.sessions).insert(session_id);
    }

    /// Forget `session_id`; returns how many sessions remain.
    pub(crate) fn detach_session(&self, session_id: u64) -> usize {
        let mut sessions = lock(&self.shared.sessions);
        sessions.remove(&session_id);
        sessions.len()
    }

    /// Number of established sessions on this connection.
    pub fn sessions(&self) -> usize {
        lock(&self.shared.sessions).len()
    }

    pub fn credits(&self) -> &CreditState {
        &self.shared.credits
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.table).closed
    }

    /// Send one request.
    pub async fn submit(&self, session_id: u64, tree_id: u32, body: Body) -> Result<Pending> {
        let mut pending = self.submit_compound(session_id, tree_id, vec![body]).await?;
        pending.pop().ok_or(Error::ConnectionLost)
    }

    /// Send requests as one related compound chain.
    ///
    /// Later elements operate on the handle opened by an earlier CREATE in the
    /// chain when they carry `FileId::RELATED`.
    pub async fn submit_compound(
        &self,
        session_id: u64,
        tree_id: u32,
        bodies: Vec<Body>,
    ) -> Result<Vec<Pending>> {
        let shared = &self.shared;
        let multi_credit = self
            .negotiated()
            .is_some_and(|p| p.dialect.supports_multi_credit());

        let charges: Vec<u16> = bodies
            .iter()
            .map(|b| {
                if multi_credit {
                    let (send, recv) = b.payload_sizes();
                    credit_charge(send, recv)
                } else {
                    1
                }
            })
            .collect();
        let total: u16 = charges.iter().sum();

        shared.credits.acquire(total).await?;

        // Ids are taken under the writer lock so frames leave in id order.
        let mut writer = shared.writer.lock().await;

        let base = {
            let mut table = lock(&shared.table);
            if table.closed {
                drop(table);
                shared.credits.cancel(total);
                return Err(Error::ConnectionLost);
            }
            let base = table.next_id;
            table.next_id += u64::from(total);
            base
        };

        let mut elements = Vec::with_capacity(bodies.len());
        let mut ids = Vec::with_capacity(bodies.len());
        let mut id = base;
        for (i, (body, charge)) in bodies.into_iter().zip(charges.iter().copied()).enumerate() {
            let command = match body.command() {
                Some(command) if !body.is_response() => command,
                _ => {
                    shared.credits.cancel(total);
                    return Err(Error::No(crate::error::errno::EINVAL));
                }
            };

            let mut header = Header::new(command);
            header.credit_charge = if multi_credit { charge } else { 0 };
            header.credits = shared.credits.request_for(charge);
            header.message_id = id;
            header.session_id = session_id;
            header.tree_id = tree_id;
            if i > 0 {
                header.flags |= HeaderFlags::RELATED_OPERATIONS;
            }
            debug!("\t→ {:?} id={}", command, id);

            match serialize::write_msg(&Msg { header, body }) {
                Ok(buf) => elements.push(buf),
                Err(e) => {
                    shared.credits.cancel(total);
                    return Err(Error::malformed(e));
                }
            }
            ids.push((id, charge));
            id += u64::from(charge);
        }

        serialize::chain(&mut elements);
        if let Some(signer) = shared.signer(session_id) {
            elements.iter_mut().for_each(|e| signer.sign(e));
        }

        let mut pending = Vec::with_capacity(ids.len());
        {
            let mut table = lock(&shared.table);
            if table.closed {
                drop(table);
                shared.credits.cancel(total);
                return Err(Error::ConnectionLost);
            }
            for (&(message_id, charge), request) in ids.iter().zip(&elements) {
                let (tx, rx) = oneshot::channel();
                table.entries.insert(
                    message_id,
                    PendingEntry {
                        tx,
                        charge,
                        async_id: None,
                    },
                );
                pending.push(Pending {
                    conn: self.clone(),
                    message_id,
                    session_id,
                    tree_id,
                    request: request.clone(),
                    rx,
                });
            }
        }

        let frame = Bytes::from(elements.concat());
        if let Err(e) = writer.send(frame).await {
            error!("Failed to send message {}: {:?}", base, e);
            drop(writer);
            shared.teardown();
            return Err(Error::Io(e));
        }

        Ok(pending)
    }

    async fn send_cancel(&self, message_id: u64, session_id: u64, tree_id: u32) -> Result<()> {
        let async_id = match lock(&self.shared.table).entries.get(&message_id) {
            Some(entry) => entry.async_id,
            // already answered
            None => return Ok(()),
        };

        let mut header = Header::new(Command::Cancel);
        header.message_id = message_id;
        header.session_id = session_id;
        match async_id {
            Some(async_id) => {
                header.flags |= HeaderFlags::ASYNC_COMMAND;
                header.async_id = async_id;
            }
            None => header.tree_id = tree_id,
        }
        debug!("\t→ Cancel id={} async={:?}", message_id, async_id);

        let mut buf = serialize::write_msg(&Msg {
            header,
            body: Body::CancelRequest,
        })
        .map_err(Error::malformed)?;
        if let Some(signer) = self.shared.signer(session_id) {
            signer.sign(&mut buf);
        }

        let mut writer = self.shared.writer.lock().await;
        writer.send(Bytes::from(buf)).await.map_err(Error::Io)
    }

    /// Fail everything outstanding and shut the transport down.
    pub async fn close(&self) {
        self.shared.teardown();
        if let Some(handle) = lock(&self.shared.reader).take() {
            handle.abort();
        }
        let mut writer = self.shared.writer.lock().await;
        if let Err(e) = SinkExt::<Bytes>::close(&mut *writer).await {
            debug!("Error closing transport: {:?}", e);
        }
    }
}

/// A submitted request awaiting its response.
///
/// Dropping a `Pending` abandons the result; the credits it holds are still
/// returned when the response arrives.
pub struct Pending {
    conn: Conn,
    message_id: u64,
    session_id: u64,
    tree_id: u32,
    request: Vec<u8>,
    rx: oneshot::Receiver<Result<Reply>>,
}

impl Pending {
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    /// The request as it went out on the wire.
    pub fn request(&self) -> &[u8] {
        &self.request
    }

    pub async fn wait(self) -> Result<Reply> {
        self.rx.await.unwrap_or(Err(Error::ConnectionLost))
    }

    /// Ask the server to cancel the request and wait for its final response.
    ///
    /// Yields `Error::Cancelled` when the server confirms the cancellation; a
    /// request that completed first returns its response as usual.
    pub async fn cancel(mut self) -> Result<Reply> {
        self.conn
            .send_cancel(self.message_id, self.session_id, self.tree_id)
            .await?;
        match (&mut self.rx).await {
            Ok(Ok(reply)) if reply.status() == status::CANCELLED => Err(Error::Cancelled),
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionLost),
        }
    }

    /// Wait at most `timeout`, cancelling the request when it expires.
    ///
    /// The late response, if any, still returns the request's credits.
    pub async fn wait_timeout(mut self, timeout: Duration) -> Result<Reply> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(result) => result.unwrap_or(Err(Error::ConnectionLost)),
            Err(_) => {
                warn!("Message {} timed out, cancelling", self.message_id);
                if let Err(e) = self
                    .conn
                    .send_cancel(self.message_id, self.session_id, self.tree_id)
                    .await
                {
                    debug!("Cancel after timeout: {}", e);
                }
                Err(Error::TimedOut)
            }
        }
    }
}
