//! Message signing and signing key derivation.

use {
    crate::{
        error::Error,
        pdu::{signing_algorithm, Dialect, HeaderFlags, SIGNATURE_OFFSET, SIGNATURE_SIZE},
        utils::Result,
    },
    aes::Aes128,
    cmac::Cmac,
    hmac::{Hmac, Mac},
    sha2::{Digest, Sha256, Sha512},
};

type HmacSha256 = Hmac<Sha256>;

const FLAGS_OFFSET: usize = 16;

/// Per-session message signer.
///
/// Created once when authentication completes and never mutated afterwards.
#[derive(Clone)]
pub enum Signer {
    /// HMAC-SHA256 truncated to the signature size
    HmacSha256(HmacSha256),
    /// AES-128-CMAC
    AesCmac(Cmac<Aes128>),
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Signer::HmacSha256(_) => f.write_str("Signer::HmacSha256"),
            Signer::AesCmac(_) => f.write_str("Signer::AesCmac"),
        }
    }
}

fn key_error<E>(_: E) -> Error {
    Error::Auth("invalid signing key".to_owned())
}

/// Session keys are used as 16 bytes; shorter keys are zero padded.
fn truncate_key(session_key: &[u8]) -> [u8; 16] {
    let mut key = [0u8; 16];
    let n = session_key.len().min(16);
    key[..n].copy_from_slice(&session_key[..n]);
    key
}

/// SP800-108 counter mode KDF with HMAC-SHA256, producing a 128 bit key.
pub fn kdf(key: &[u8], label: &[u8], context: &[u8]) -> Result<[u8; 16]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(key_error)?;
    mac.update(&1u32.to_be_bytes());
    mac.update(label);
    mac.update(&[0]);
    mac.update(context);
    mac.update(&128u32.to_be_bytes());

    let out = mac.finalize().into_bytes();
    let mut derived = [0u8; 16];
    derived.copy_from_slice(&out[..16]);
    Ok(derived)
}

impl Signer {
    pub fn hmac_sha256(key: &[u8]) -> Result<Signer> {
        Ok(Signer::HmacSha256(
            <HmacSha256 as Mac>::new_from_slice(key).map_err(key_error)?,
        ))
    }

    pub fn aes_cmac(key: &[u8]) -> Result<Signer> {
        Ok(Signer::AesCmac(
            <Cmac<Aes128> as Mac>::new_from_slice(key).map_err(key_error)?,
        ))
    }

    /// Build the signer of a session on `dialect`.
    ///
    /// `algorithm` is one of `signing_algorithm::*`; `preauth` is the
    /// session's preauth integrity hash, required on 3.1.1.
    pub fn for_session(
        dialect: Dialect,
        algorithm: u16,
        session_key: &[u8],
        preauth: Option<&[u8]>,
    ) -> Result<Signer> {
        let key = truncate_key(session_key);
        let key = match dialect {
            Dialect::Smb202 | Dialect::Smb210 => key,
            Dialect::Smb300 | Dialect::Smb302 => kdf(&key, b"SMB2AESCMAC\0", b"SmbSign\0")?,
            Dialect::Smb311 => {
                let context = preauth
                    .ok_or_else(|| Error::Auth("missing preauth integrity hash".to_owned()))?;
                kdf(&key, b"SMBSigningKey\0", context)?
            }
        };
        match algorithm {
            signing_algorithm::HMAC_SHA256 => Signer::hmac_sha256(&key),
            signing_algorithm::AES_CMAC => Signer::aes_cmac(&key),
            other => Err(Error::Negotiation(format!(
                "unsupported signing algorithm {}",
                other
            ))),
        }
    }

    /// Signing algorithm a dialect uses when no signing context says otherwise.
    pub fn default_algorithm(dialect: Dialect) -> u16 {
        if dialect.is_smb3() {
            signing_algorithm::AES_CMAC
        } else {
            signing_algorithm::HMAC_SHA256
        }
    }

    fn mac(&self, msg: &[u8]) -> [u8; SIGNATURE_SIZE] {
        let mut sig = [0u8; SIGNATURE_SIZE];
        match *self {
            Signer::HmacSha256(ref mac) => {
                let mut mac = mac.clone();
                mac.update(msg);
                sig.copy_from_slice(&mac.finalize().into_bytes()[..SIGNATURE_SIZE]);
            }
            Signer::AesCmac(ref mac) => {
                let mut mac = mac.clone();
                mac.update(msg);
                sig.copy_from_slice(&mac.finalize().into_bytes()[..SIGNATURE_SIZE]);
            }
        }
        sig
    }

    /// Sign an encoded message in place.
    ///
    /// Sets the SIGNED flag and fills the signature field; `msg` spans the
    /// header through the end of the message including compound padding.
    pub fn sign(&self, msg: &mut [u8]) {
        let flags = u32::from_le_bytes([
            msg[FLAGS_OFFSET],
            msg[FLAGS_OFFSET + 1],
            msg[FLAGS_OFFSET + 2],
            msg[FLAGS_OFFSET + 3],
        ]) | HeaderFlags::SIGNED.bits();
        msg[FLAGS_OFFSET..FLAGS_OFFSET + 4].copy_from_slice(&flags.to_le_bytes());
        msg[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE_SIZE].fill(0);
        let sig = self.mac(msg);
        msg[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE_SIZE].copy_from_slice(&sig);
    }

    /// Check the signature of a received message.
    pub fn verify(&self, msg: &[u8]) -> bool {
        if msg.len() < SIGNATURE_OFFSET + SIGNATURE_SIZE {
            return false;
        }
        let mut buf = msg.to_vec();
        buf[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE_SIZE].fill(0);
        let expected = &msg[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE_SIZE];

        match *self {
            Signer::HmacSha256(ref mac) => {
                let mut mac = mac.clone();
                mac.update(&buf);
                mac.verify_truncated_left(expected).is_ok()
            }
            Signer::AesCmac(ref mac) => {
                let mut mac = mac.clone();
                mac.update(&buf);
                mac.verify_truncated_left(expected).is_ok()
            }
        }
    }
}

/// SHA-512 chain over the negotiate and session setup exchange (3.1.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreauthHash([u8; 64]);

impl Default for PreauthHash {
    fn default() -> Self {
        PreauthHash([0; 64])
    }
}

impl PreauthHash {
    pub fn update(&mut self, msg: &[u8]) {
        let mut h = Sha512::new();
        h.update(self.0);
        h.update(msg);
        self.0.copy_from_slice(&h.finalize());
    }

    pub fn value(&self) -> &[u8] {
        &self.0
    }
}
