//! Client configuration file.
//!
//! The JSON layout:
//!
//! ```json
//! {
//!     "max_credit_balance": 128,
//!     "transport": { "type": "tcp", "host": "fileserver", "port": 445 },
//!     "conn": { "signing": false, "guid": "", "dialect": 0 },
//!     "session": {
//!         "type": "ntlm",
//!         "user": "alice",
//!         "passwd": "secret",
//!         "domain": "",
//!         "workstation": "",
//!         "targetSPN": ""
//!     },
//!     "tree_conn": { "share": "public" }
//! }
//! ```

use {
    crate::{error::Error, negotiate::Negotiator, pdu::*, utils::Result},
    num_traits::FromPrimitive,
    serde::{Deserialize, Serialize},
    std::path::Path,
};

/// Credit ceiling used when the configuration leaves it at zero.
pub const DEFAULT_MAX_CREDIT_BALANCE: u16 = 128;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    #[serde(rename = "type")]
    pub typ: String,
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnConfig {
    /// Require every session message to be signed
    pub signing: bool,
    /// Client GUID as 32 hex digits, empty for a random one
    pub guid: String,
    /// 202, 210, 300, 302 or 311; 0 negotiates the best common dialect
    pub dialect: u16,
}

/// Credentials for the authentication mechanism named by `typ`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(rename = "type")]
    pub typ: String,
    pub user: String,
    #[serde(rename = "passwd")]
    pub password: String,
    pub domain: String,
    pub workstation: String,
    #[serde(rename = "targetSPN")]
    pub target_spn: String,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("typ", &self.typ)
            .field("user", &self.user)
            .field("domain", &self.domain)
            .field("workstation", &self.workstation)
            .field("target_spn", &self.target_spn)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConnConfig {
    pub share: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub max_credit_balance: u16,
    pub transport: TransportConfig,
    pub conn: ConnConfig,
    pub session: SessionConfig,
    pub tree_conn: TreeConnConfig,
}

impl ClientConfig {
    pub fn from_json(s: &str) -> Result<ClientConfig> {
        serde_json::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<ClientConfig> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        ClientConfig::from_json(&text)
    }

    pub fn max_credit_balance(&self) -> u16 {
        match self.max_credit_balance {
            0 => DEFAULT_MAX_CREDIT_BALANCE,
            n => n,
        }
    }

    /// `host:port` to dial. Only the `tcp` transport is recognized.
    pub fn address(&self) -> Result<String> {
        let t = &self.transport;
        if t.typ != "tcp" {
            return Err(Error::Config(format!("unsupported transport type {:?}", t.typ)));
        }
        let port = if t.port == 0 { SMB_PORT } else { t.port };
        Ok(format!("{}:{}", t.host, port))
    }

    pub fn dialect(&self) -> Result<Option<Dialect>> {
        let revision = match self.conn.dialect {
            0 => return Ok(None),
            202 => 0x0202,
            210 => 0x0210,
            300 => 0x0300,
            302 => 0x0302,
            311 => 0x0311,
            n => return Err(Error::Config(format!("unsupported dialect {}", n))),
        };
        Ok(Dialect::from_u16(revision))
    }

    pub fn client_guid(&self) -> Result<Guid> {
        let mut guid = Guid::default();
        if self.conn.guid.is_empty() {
            return Ok(guid);
        }
        hex::decode_to_slice(&self.conn.guid, &mut guid)
            .map_err(|e| Error::Config(format!("client guid {:?}: {}", self.conn.guid, e)))?;
        Ok(guid)
    }

    pub fn negotiator(&self) -> Result<Negotiator> {
        Ok(Negotiator {
            require_message_signing: self.conn.signing,
            client_guid: self.client_guid()?,
            specified_dialect: self.dialect()?,
        })
    }
}
