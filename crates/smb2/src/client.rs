//! Connection setup.

use {
    crate::{
        config::{ClientConfig, DEFAULT_MAX_CREDIT_BALANCE},
        conn::Conn,
        negotiate::Negotiator,
        session::{self, Initiator, Session},
        utils::Result,
    },
    log::{error, info},
    tokio::io::{AsyncRead, AsyncWrite},
};

/// Establishes sessions over caller supplied transports.
pub struct Dialer {
    /// Ceiling on credits held per connection
    pub max_credit_balance: u16,
    pub negotiator: Negotiator,
    pub initiator: Box<dyn Initiator>,
    /// Server name used when mounting a bare share name
    pub host: String,
}

impl Dialer {
    pub fn new<I: Initiator + 'static>(host: &str, initiator: I) -> Dialer {
        Dialer {
            max_credit_balance: DEFAULT_MAX_CREDIT_BALANCE,
            negotiator: Negotiator::default(),
            initiator: Box::new(initiator),
            host: host.to_owned(),
        }
    }

    /// Take the credit ceiling, connection policy and server name from `cfg`.
    pub fn from_config<I: Initiator + 'static>(cfg: &ClientConfig, initiator: I) -> Result<Dialer> {
        Ok(Dialer {
            max_credit_balance: cfg.max_credit_balance(),
            negotiator: cfg.negotiator()?,
            initiator: Box::new(initiator),
            host: cfg.transport.host.clone(),
        })
    }

    /// Negotiate and authenticate over `stream`.
    ///
    /// The connection is closed again when either step fails.
    pub async fn dial<S>(&mut self, stream: S) -> Result<Session>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let conn = Conn::new(stream, self.max_credit_balance);

        let setup = async {
            self.negotiator.negotiate(&conn).await?;
            session::authenticate(&conn, self.initiator.as_mut(), &self.host).await
        };
        match setup.await {
            Ok(session) => {
                info!("Connected to {}", self.host);
                Ok(session)
            }
            Err(e) => {
                error!("Dialing {} failed: {}", self.host, e);
                conn.close().await;
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Dialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialer")
            .field("max_credit_balance", &self.max_credit_balance)
            .field("negotiator", &self.negotiator)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}
