//! RMCP+ cipher suites and the three negotiated algorithm families.
//!
//! A cipher suite id resolves to one authentication, one integrity, and one
//! confidentiality algorithm (IPMI v2.0 Table 22-20). Selection is a pure
//! function from numeric code to variant; an id whose components are not all
//! implemented is rejected before any use.

use rand::RngCore;

use crate::crypto::{self, HashKind, SecretBytes};
use crate::error::{Error, Result};

/// RAKP authentication algorithm (IPMI v2.0 Table 13-17).
///
/// Computes the key-exchange authentication codes exchanged during RAKP and
/// supplies the keyed-hash primitive used to derive the per-session working
/// keys. The `None` variant is a legitimate no-op: it emits empty codes and
/// accepts every peer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationAlgorithm {
    /// RAKP-none: no key exchange authentication.
    None,
    /// RAKP-HMAC-SHA1.
    HmacSha1,
    /// RAKP-HMAC-MD5.
    HmacMd5,
    /// RAKP-HMAC-SHA256.
    HmacSha256,
}

impl AuthenticationAlgorithm {
    /// Resolve a wire code; unknown codes are a configuration error.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0x00 => Ok(Self::None),
            0x01 => Ok(Self::HmacSha1),
            0x02 => Ok(Self::HmacMd5),
            0x03 => Ok(Self::HmacSha256),
            _ => Err(Error::Unsupported("unknown authentication algorithm code")),
        }
    }

    /// Wire code for this algorithm.
    pub fn code(self) -> u8 {
        match self {
            Self::None => 0x00,
            Self::HmacSha1 => 0x01,
            Self::HmacMd5 => 0x02,
            Self::HmacSha256 => 0x03,
        }
    }

    fn hash(self) -> Option<HashKind> {
        match self {
            Self::None => None,
            Self::HmacSha1 => Some(HashKind::Sha1),
            Self::HmacMd5 => Some(HashKind::Md5),
            Self::HmacSha256 => Some(HashKind::Sha256),
        }
    }

    /// Length of the key-exchange authentication codes (RAKP 2/3).
    pub(crate) fn digest_len(self) -> usize {
        self.hash().map_or(0, HashKind::digest_len)
    }

    /// Length of the RAKP message 4 integrity check value.
    pub(crate) fn icv_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::HmacSha1 => 12,
            Self::HmacMd5 => 16,
            Self::HmacSha256 => 16,
        }
    }

    /// Keyed hash with this algorithm's primitive; empty output for `None`.
    pub(crate) fn keyed_hash(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        match self.hash() {
            Some(kind) => crypto::hmac(kind, key, data),
            None => Ok(Vec::new()),
        }
    }

    /// Keyed hash truncated to the integrity-check-value length.
    pub(crate) fn keyed_hash_icv(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        match self.hash() {
            Some(kind) => crypto::hmac_truncated(kind, key, data, self.icv_len()),
            None => Ok(Vec::new()),
        }
    }
}

/// Per-message integrity algorithm (IPMI v2.0 Table 13-18).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityAlgorithm {
    /// No session integrity trailer.
    None,
    /// HMAC-SHA1-96: 12-byte auth codes.
    HmacSha1_96,
    /// HMAC-MD5-128: 16-byte auth codes.
    HmacMd5_128,
    /// HMAC-SHA256-128: 16-byte auth codes.
    HmacSha256_128,
}

impl IntegrityAlgorithm {
    /// Resolve a wire code; unknown codes are a configuration error.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0x00 => Ok(Self::None),
            0x01 => Ok(Self::HmacSha1_96),
            0x02 => Ok(Self::HmacMd5_128),
            0x04 => Ok(Self::HmacSha256_128),
            _ => Err(Error::Unsupported("unknown integrity algorithm code")),
        }
    }

    /// Wire code for this algorithm.
    pub fn code(self) -> u8 {
        match self {
            Self::None => 0x00,
            Self::HmacSha1_96 => 0x01,
            Self::HmacMd5_128 => 0x02,
            Self::HmacSha256_128 => 0x04,
        }
    }

    /// Length of the per-message auth code appended to the session trailer.
    pub(crate) fn mac_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::HmacSha1_96 => 12,
            Self::HmacMd5_128 => 16,
            Self::HmacSha256_128 => 16,
        }
    }

    /// Per-message MAC keyed by the derived K1, truncated to [`Self::mac_len`].
    pub(crate) fn mac(self, k1: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let kind = match self {
            Self::None => return Ok(Vec::new()),
            Self::HmacSha1_96 => HashKind::Sha1,
            Self::HmacMd5_128 => HashKind::Md5,
            Self::HmacSha256_128 => HashKind::Sha256,
        };
        if k1.is_empty() {
            return Err(Error::Crypto("integrity key not derived"));
        }
        crypto::hmac_truncated(kind, k1, data, self.mac_len())
    }
}

/// Payload confidentiality algorithm (IPMI v2.0 Table 13-19).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidentialityAlgorithm {
    /// Identity transform: payload travels in the clear.
    None,
    /// AES-CBC-128 with a 16-byte IV prefix and explicit-length padding.
    AesCbc128,
}

impl ConfidentialityAlgorithm {
    /// Resolve a wire code; unknown codes are a configuration error.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0x00 => Ok(Self::None),
            0x01 => Ok(Self::AesCbc128),
            _ => Err(Error::Unsupported("unknown confidentiality algorithm code")),
        }
    }

    /// Wire code for this algorithm.
    pub fn code(self) -> u8 {
        match self {
            Self::None => 0x00,
            Self::AesCbc128 => 0x01,
        }
    }

    /// Encrypt a payload, emitting the algorithm's header/trailer overhead.
    ///
    /// For AES-CBC-128 the output is `iv || ciphertext` where the plaintext
    /// carries 1,2,3,... pad bytes plus an explicit pad-length byte so the
    /// total is a multiple of 16.
    pub(crate) fn encrypt(
        self,
        keys: &SessionKeys,
        payload: &[u8],
        rng: &mut dyn RngCore,
    ) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(payload.to_vec()),
            Self::AesCbc128 => {
                let mut iv = [0u8; 16];
                rng.fill_bytes(&mut iv);

                // Confidentiality trailer: [pad bytes][pad_len]
                let base = payload.len() + 1;
                let pad_len = (16 - (base % 16)) % 16;

                let mut to_encrypt = Vec::with_capacity(base + pad_len);
                to_encrypt.extend_from_slice(payload);
                for i in 0..pad_len {
                    to_encrypt.push((i + 1) as u8);
                }
                to_encrypt.push(pad_len as u8);

                let ciphertext =
                    crypto::aes128_cbc_encrypt(keys.aes_key()?, &iv, &to_encrypt)?;

                let mut out = Vec::with_capacity(16 + ciphertext.len());
                out.extend_from_slice(&iv);
                out.extend_from_slice(&ciphertext);
                Ok(out)
            }
        }
    }

    /// Decrypt a payload, stripping the IV prefix and pad trailer.
    pub(crate) fn decrypt(self, keys: &SessionKeys, payload: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(payload.to_vec()),
            Self::AesCbc128 => {
                if payload.len() < 16 {
                    return Err(Error::Protocol("encrypted payload too short"));
                }

                let iv: [u8; 16] = payload[..16]
                    .try_into()
                    .map_err(|_| Error::Protocol("invalid IV"))?;
                let ciphertext = &payload[16..];
                if ciphertext.is_empty() || !ciphertext.len().is_multiple_of(16) {
                    return Err(Error::Protocol("invalid AES-CBC ciphertext length"));
                }

                let mut plaintext =
                    crypto::aes128_cbc_decrypt(keys.aes_key()?, &iv, ciphertext)?;

                let pad_len = *plaintext
                    .last()
                    .ok_or(Error::Protocol("missing confidentiality pad length"))?
                    as usize;

                if pad_len > plaintext.len().saturating_sub(1) {
                    return Err(Error::Protocol("invalid confidentiality pad length"));
                }

                let trailer_start = plaintext.len() - 1 - pad_len;
                let pad_bytes = &plaintext[trailer_start..plaintext.len() - 1];
                for (i, &b) in pad_bytes.iter().enumerate() {
                    if b != (i as u8 + 1) {
                        return Err(Error::Protocol("invalid confidentiality pad bytes"));
                    }
                }

                plaintext.truncate(trailer_start);
                Ok(plaintext)
            }
        }
    }
}

/// A negotiated cipher suite: one algorithm per family, selected by suite id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSuite {
    id: u8,
    authentication: AuthenticationAlgorithm,
    integrity: IntegrityAlgorithm,
    confidentiality: ConfidentialityAlgorithm,
}

impl CipherSuite {
    /// Resolve a standard cipher suite id (IPMI v2.0 Table 22-20).
    ///
    /// Only the RAKP-none/SHA1/MD5/SHA256 rows are implemented; the xRC4
    /// and keyed-MD5 rows are rejected as unsupported.
    pub fn from_id(id: u8) -> Result<Self> {
        let (auth, integ, conf) = match id {
            0 => (0x00, 0x00, 0x00),
            1 => (0x01, 0x00, 0x00),
            2 => (0x01, 0x01, 0x00),
            3 => (0x01, 0x01, 0x01),
            6 => (0x02, 0x00, 0x00),
            7 => (0x02, 0x02, 0x00),
            8 => (0x02, 0x02, 0x01),
            15 => (0x03, 0x00, 0x00),
            16 => (0x03, 0x04, 0x00),
            17 => (0x03, 0x04, 0x01),
            _ => return Err(Error::Unsupported("unknown or unimplemented cipher suite id")),
        };
        Self::from_codes(id, auth, integ, conf)
    }

    /// Build a suite from explicit component codes (e.g. a discovery record).
    pub fn from_codes(id: u8, authentication: u8, integrity: u8, confidentiality: u8) -> Result<Self> {
        Ok(Self {
            id,
            authentication: AuthenticationAlgorithm::from_code(authentication)?,
            integrity: IntegrityAlgorithm::from_code(integrity)?,
            confidentiality: ConfidentialityAlgorithm::from_code(confidentiality)?,
        })
    }

    /// The suite id.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// The authentication algorithm component.
    pub fn authentication(&self) -> AuthenticationAlgorithm {
        self.authentication
    }

    /// The integrity algorithm component.
    pub fn integrity(&self) -> IntegrityAlgorithm {
        self.integrity
    }

    /// The confidentiality algorithm component.
    pub fn confidentiality(&self) -> ConfidentialityAlgorithm {
        self.confidentiality
    }

    /// Whether in-session payloads carry an integrity trailer.
    pub(crate) fn authenticated(&self) -> bool {
        self.integrity != IntegrityAlgorithm::None
    }

    /// Whether in-session payloads are encrypted.
    pub(crate) fn encrypted(&self) -> bool {
        self.confidentiality != ConfidentialityAlgorithm::None
    }

    /// Derive the per-session working keys from the SIK.
    ///
    /// K1 (integrity) and K2 (confidentiality source) are keyed hashes of
    /// constant-filled 20-byte blocks, computed with the *authentication*
    /// algorithm's primitive; the AES key is the first 16 bytes of K2.
    pub(crate) fn bind(&self, sik: &SecretBytes) -> Result<SessionKeys> {
        if !self.authenticated() && !self.encrypted() {
            return Ok(SessionKeys::plaintext());
        }

        if self.authentication == AuthenticationAlgorithm::None {
            return Err(Error::Crypto(
                "cipher suite requires keying material but authentication is none",
            ));
        }
        if sik.is_empty() {
            return Err(Error::Crypto("session integrity key not derived"));
        }

        let const1 = [0x01u8; 20];
        let const2 = [0x02u8; 20];

        let k1 = SecretBytes::new(self.authentication.keyed_hash(sik.expose(), &const1)?);

        let aes_key = if self.encrypted() {
            let k2 = SecretBytes::new(self.authentication.keyed_hash(sik.expose(), &const2)?);
            let mut key = [0u8; 16];
            key.copy_from_slice(&k2.expose()[..16]);
            Some(key)
        } else {
            None
        };

        Ok(SessionKeys { k1, aes_key })
    }
}

/// Working keys derived from the SIK for one session.
#[derive(Debug, Clone)]
pub(crate) struct SessionKeys {
    /// Integrity MAC key (K1); empty when the suite has no integrity.
    k1: SecretBytes,
    /// AES-128 key (first half of K2); absent when the suite has no
    /// confidentiality.
    aes_key: Option<[u8; 16]>,
}

impl SessionKeys {
    /// Keys for a suite with neither integrity nor confidentiality.
    pub(crate) fn plaintext() -> Self {
        Self {
            k1: SecretBytes::empty(),
            aes_key: None,
        }
    }

    pub(crate) fn k1(&self) -> &[u8] {
        self.k1.expose()
    }

    fn aes_key(&self) -> Result<&[u8; 16]> {
        self.aes_key
            .as_ref()
            .ok_or(Error::Crypto("confidentiality key not derived"))
    }
}

/// Security context of an established session: the negotiated suite plus the
/// keys bound from its SIK.
#[derive(Debug, Clone)]
pub(crate) struct SecurityContext {
    pub(crate) suite: CipherSuite,
    pub(crate) keys: SessionKeys,
}

impl SecurityContext {
    pub(crate) fn authenticated(&self) -> bool {
        self.suite.authenticated()
    }

    pub(crate) fn encrypted(&self) -> bool {
        self.suite.encrypted()
    }

    pub(crate) fn mac_len(&self) -> usize {
        self.suite.integrity().mac_len()
    }
}
