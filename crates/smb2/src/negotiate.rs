//! Dialect negotiation.

use {
    crate::{
        conn::{Conn, NegotiatedParameters},
        error::Error,
        pdu::*,
        sign::{PreauthHash, Signer},
        utils::Result,
    },
    log::info,
    num_traits::FromPrimitive,
};

/// Client side negotiation policy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Negotiator {
    /// Refuse sessions that do not sign.
    pub require_message_signing: bool,
    /// All zero picks a random GUID per connection.
    pub client_guid: Guid,
    /// Offer only this dialect instead of every supported one.
    pub specified_dialect: Option<Dialect>,
}

fn fail<T>(msg: impl Into<String>) -> Result<T> {
    Err(Error::Negotiation(msg.into()))
}

impl Negotiator {
    pub fn dialects(&self) -> Vec<Dialect> {
        match self.specified_dialect {
            Some(d) => vec![d],
            None => Dialect::ALL.to_vec(),
        }
    }

    pub fn security_mode(&self) -> SecurityMode {
        if self.require_message_signing {
            SecurityMode::SIGNING_ENABLED | SecurityMode::SIGNING_REQUIRED
        } else {
            SecurityMode::SIGNING_ENABLED
        }
    }

    fn request(&self) -> Body {
        let dialects = self.dialects();

        let contexts = if dialects.contains(&Dialect::Smb311) {
            vec![
                NegotiateContext::PreauthIntegrity {
                    hash_algorithms: vec![HASH_ALGORITHM_SHA512],
                    salt: rand::random::<[u8; 32]>().to_vec(),
                },
                NegotiateContext::Signing {
                    algorithms: vec![signing_algorithm::AES_CMAC, signing_algorithm::HMAC_SHA256],
                },
            ]
        } else {
            Vec::new()
        };

        let capabilities = if dialects.iter().any(|d| d.supports_multi_credit()) {
            Capabilities::LARGE_MTU
        } else {
            Capabilities::empty()
        };

        let client_guid = if self.client_guid == Guid::default() {
            rand::random()
        } else {
            self.client_guid
        };

        Body::NegotiateRequest {
            security_mode: self.security_mode(),
            capabilities,
            client_guid,
            dialects: dialects.iter().map(|d| d.revision()).collect(),
            contexts,
        }
    }

    /// Run NEGOTIATE on a fresh connection and record the outcome on it.
    pub async fn negotiate(&self, conn: &Conn) -> Result<NegotiatedParameters> {
        if conn.negotiated().is_some() {
            return fail("connection already negotiated");
        }

        let offered = self.dialects();
        let pending = conn.submit(0, 0, self.request()).await?;
        let request = pending.request().to_vec();
        let reply = pending.wait().await?;

        if reply.status() != status::SUCCESS {
            return fail(format!("server returned {}", status::name(reply.status())));
        }

        let Body::NegotiateResponse {
            security_mode,
            dialect,
            server_guid,
            capabilities,
            max_transact_size,
            max_read_size,
            max_write_size,
            ref contexts,
            ..
        } = reply.msg.body
        else {
            return fail("unexpected response to NEGOTIATE");
        };

        let dialect = match Dialect::from_u16(dialect) {
            Some(d) if offered.contains(&d) => d,
            _ => return fail(format!("server selected dialect 0x{:04x}", dialect)),
        };

        let mut algorithm = Signer::default_algorithm(dialect);
        let preauth = if dialect == Dialect::Smb311 {
            let mut preauth_seen = false;
            for ctx in contexts {
                match *ctx {
                    NegotiateContext::PreauthIntegrity {
                        ref hash_algorithms,
                        ..
                    } => {
                        if hash_algorithms[..] != [HASH_ALGORITHM_SHA512] {
                            return fail(format!(
                                "unsupported preauth hash algorithms {:?}",
                                hash_algorithms
                            ));
                        }
                        preauth_seen = true;
                    }
                    NegotiateContext::Signing { ref algorithms } => match algorithms[..] {
                        [alg @ (signing_algorithm::AES_CMAC | signing_algorithm::HMAC_SHA256)] => {
                            algorithm = alg
                        }
                        _ => {
                            return fail(format!("unsupported signing algorithms {:?}", algorithms));
                        }
                    },
                    NegotiateContext::Other { .. } => {}
                }
            }
            if !preauth_seen {
                return fail("missing preauth integrity context");
            }

            let mut hash = PreauthHash::default();
            hash.update(&request);
            hash.update(&reply.raw);
            Some(hash)
        } else {
            None
        };

        let params = NegotiatedParameters {
            dialect,
            server_guid,
            server_security_mode: security_mode,
            capabilities,
            max_transact_size,
            max_read_size,
            max_write_size,
            require_signing: self.require_message_signing
                || security_mode.contains(SecurityMode::SIGNING_REQUIRED),
            signing_algorithm: algorithm,
            preauth,
        };
        info!(
            "Negotiated {:?}, max read {} write {}, signing required: {}",
            params.dialect, params.max_read_size, params.max_write_size, params.require_signing
        );

        conn.set_negotiated(params.clone())?;
        Ok(params)
    }
}
