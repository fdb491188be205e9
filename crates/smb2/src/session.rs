//! Authenticated sessions.
//!
//! # Authentication
//! Mechanisms plug in through [`Initiator`]: the session drives SESSION_SETUP
//! round trips, passing each server token to the initiator and sending back
//! whatever it produces, until the server reports success.

use {
    crate::{
        conn::{Conn, Pending, Reply},
        error::Error,
        pdu::*,
        sign::Signer,
        tree::{Share, TreeState},
        utils::{self, Result},
    },
    async_trait::async_trait,
    log::{info, warn},
    std::sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

/// Upper bound on SESSION_SETUP round trips for one authentication.
pub const MAX_AUTH_ROUNDS: usize = 8;

/// Output of one authentication step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Step {
    /// Token for the server, possibly empty
    pub token: Vec<u8>,
    /// The mechanism has nothing more to say
    pub done: bool,
}

/// Client side of an authentication mechanism such as NTLM or Kerberos.
#[async_trait]
pub trait Initiator: Send + Sync {
    /// Produce the next token.
    ///
    /// `input` is `None` for the first call and the server's security buffer
    /// afterwards.
    async fn step(&mut self, input: Option<&[u8]>) -> Result<Step>;

    /// Session key established by the exchange, once complete.
    fn session_key(&self) -> Option<Vec<u8>>;
}

pub(crate) struct SessionState {
    conn: Conn,
    session_id: u64,
    flags: SessionFlags,
    signer: Option<Arc<Signer>>,
    host: String,
    closed: AtomicBool,
    trees: Mutex<Vec<Weak<TreeState>>>,
}

/// An authenticated session on a connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionState>,
}

fn auth_failed<T>(msg: impl Into<String>) -> Result<T> {
    Err(Error::Auth(msg.into()))
}

/// Authenticate over an already negotiated connection.
///
/// `host` names the server in tree connect paths for bare share names.
pub async fn authenticate(
    conn: &Conn,
    initiator: &mut dyn Initiator,
    host: &str,
) -> Result<Session> {
    let params = conn
        .negotiated()
        .ok_or_else(|| Error::Negotiation("connection not negotiated".to_owned()))?
        .clone();
    let security_mode = if params.require_signing {
        SecurityMode::SIGNING_ENABLED | SecurityMode::SIGNING_REQUIRED
    } else {
        SecurityMode::SIGNING_ENABLED
    };

    let mut preauth = params.preauth.clone();
    let mut session_id = 0u64;
    let mut input: Option<Vec<u8>> = None;

    for _ in 0..MAX_AUTH_ROUNDS {
        let step = initiator.step(input.as_deref()).await?;

        let pending: Pending = conn
            .submit(
                session_id,
                0,
                Body::SessionSetupRequest {
                    flags: 0,
                    security_mode,
                    capabilities: Capabilities::empty(),
                    previous_session_id: 0,
                    security_buffer: step.token,
                },
            )
            .await?;
        if let Some(hash) = preauth.as_mut() {
            hash.update(pending.request());
        }
        let reply = pending.wait().await?;
        session_id = reply.msg.header.session_id;

        let (session_flags, buffer) = match reply.msg.body {
            Body::SessionSetupResponse {
                session_flags,
                ref security_buffer,
            } => (session_flags, security_buffer.clone()),
            _ => {
                return auth_failed(format!(
                    "server returned {}",
                    status::name(reply.status())
                ));
            }
        };

        match reply.status() {
            status::MORE_PROCESSING_REQUIRED => {
                if let Some(hash) = preauth.as_mut() {
                    hash.update(&reply.raw);
                }
                input = Some(buffer);
            }
            status::SUCCESS => {
                if !step.done && !buffer.is_empty() {
                    initiator.step(Some(&buffer)).await?;
                }
                let signer = finish(conn, &params, initiator, session_flags, &reply, preauth.as_ref())?;
                info!(
                    "Session {:#x} established{}",
                    session_id,
                    if signer.is_some() { ", signed" } else { "" }
                );
                conn.attach_session(session_id);
                return Ok(Session {
                    inner: Arc::new(SessionState {
                        conn: conn.clone(),
                        session_id,
                        flags: session_flags,
                        signer,
                        host: host.to_owned(),
                        closed: AtomicBool::new(false),
                        trees: Mutex::new(Vec::new()),
                    }),
                });
            }
            code => return auth_failed(format!("server returned {}", status::name(code))),
        }
    }

    auth_failed(format!("no result after {} rounds", MAX_AUTH_ROUNDS))
}

/// Derive the signer once SESSION_SETUP succeeded and check the final response.
fn finish(
    conn: &Conn,
    params: &crate::conn::NegotiatedParameters,
    initiator: &dyn Initiator,
    flags: SessionFlags,
    reply: &Reply,
    preauth: Option<&crate::sign::PreauthHash>,
) -> Result<Option<Arc<Signer>>> {
    let header = &reply.msg.header;

    if flags.intersects(SessionFlags::IS_GUEST | SessionFlags::IS_NULL) {
        if params.require_signing {
            return auth_failed("guest session on a connection that requires signing");
        }
        return Ok(None);
    }

    let key = match initiator.session_key() {
        Some(key) if !key.is_empty() => key,
        _ if params.require_signing => return auth_failed("no session key to sign with"),
        _ => {
            warn!("Session {:#x} has no session key, messages go unsigned", header.session_id);
            return Ok(None);
        }
    };

    let signer = Arc::new(Signer::for_session(
        params.dialect,
        params.signing_algorithm,
        &key,
        preauth.map(|h| h.value()),
    )?);

    if header.flags.contains(HeaderFlags::SIGNED) {
        if !signer.verify(&reply.raw) {
            return Err(Error::Integrity {
                message_id: header.message_id,
            });
        }
    } else if params.require_signing {
        return auth_failed("unsigned SESSION_SETUP response");
    }

    conn.register_signer(header.session_id, signer.clone());
    Ok(Some(signer))
}

impl Session {
    pub fn id(&self) -> u64 {
        self.inner.session_id
    }

    pub fn conn(&self) -> &Conn {
        &self.inner.conn
    }

    pub fn flags(&self) -> SessionFlags {
        self.inner.flags
    }

    pub fn is_guest(&self) -> bool {
        self.inner.flags.contains(SessionFlags::IS_GUEST)
    }

    /// Messages of this session carry signatures.
    pub fn is_signed(&self) -> bool {
        self.inner.signer.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) || self.inner.conn.is_closed()
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            Err(Error::Closed("session"))
        } else if self.inner.conn.is_closed() {
            Err(Error::ConnectionLost)
        } else {
            Ok(())
        }
    }

    /// Send one request on this session and wait for the response.
    pub(crate) async fn call(&self, tree_id: u32, body: Body) -> Result<Reply> {
        self.check()?;
        self.inner
            .conn
            .submit(self.inner.session_id, tree_id, body)
            .await?
            .wait()
            .await
    }

    /// Send a related compound chain and collect every element's outcome.
    pub(crate) async fn call_compound(&self, tree_id: u32, bodies: Vec<Body>) -> Result<Vec<Result<Reply>>> {
        self.check()?;
        let pending = self
            .inner
            .conn
            .submit_compound(self.inner.session_id, tree_id, bodies)
            .await?;
        Ok(futures::future::join_all(pending.into_iter().map(Pending::wait)).await)
    }

    pub(crate) fn register_tree(&self, tree: &Arc<TreeState>) {
        let mut trees = self.inner.trees.lock().unwrap_or_else(|e| e.into_inner());
        trees.retain(|t| t.strong_count() > 0);
        trees.push(Arc::downgrade(tree));
    }

    /// Connect to a share, given either as `share` or `\\server\share`.
    pub async fn mount(&self, share: &str) -> Result<Share> {
        let (host, name) = utils::parse_unc(share)
            .ok_or_else(|| Error::No(crate::error::errno::EINVAL).with_path("mount", share))?;
        let host = if host.is_empty() { &self.inner.host[..] } else { host };
        let path = format!(r"\\{}\{}", host, name);
        Share::connect(self, &path).await
    }

    /// Round trip an ECHO to check the server is alive.
    pub async fn echo(&self) -> Result<()> {
        self.call(0, Body::EchoRequest).await?.check()?;
        Ok(())
    }

    /// Disconnect every live share and log off. The connection is closed
    /// once its last session has logged off.
    pub async fn logoff(&self) -> Result<()> {
        self.check()?;

        let trees: Vec<_> = {
            let mut trees = self.inner.trees.lock().unwrap_or_else(|e| e.into_inner());
            trees
                .drain(..)
                .filter_map(|t| t.upgrade())
                .filter(|t| !t.is_closed())
                .collect()
        };
        for tree in trees {
            if let Err(e) = tree.disconnect().await {
                warn!("Failed to disconnect tree {}: {}", tree.tree_id(), e);
            }
        }
        self.inner.closed.store(true, Ordering::Release);

        let conn = &self.inner.conn;
        let result = match conn.submit(self.inner.session_id, 0, Body::LogoffRequest).await {
            Ok(pending) => pending.wait().await.and_then(Reply::check).map(|_| ()),
            Err(e) => Err(e),
        };
        conn.unregister_signer(self.inner.session_id);
        if conn.detach_session(self.inner.session_id) == 0 {
            conn.close().await;
        }
        result
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.session_id)
            .field("flags", &self.inner.flags)
            .field("signed", &self.is_signed())
            .finish()
    }
}
