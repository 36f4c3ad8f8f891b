//! TSIG (Transaction Signature) signing for outgoing messages
//!
//! Implements the signing half of RFC 8945 (formerly RFC 2845). Responses are
//! not verified; a nameserver that rejects our signature answers NOTAUTH,
//! which the wire client classifies like any other non-zone rcode.

use super::common::{canonical_name_bytes, name_to_labels};
use super::enums::{DNSResourceClass, DNSResourceType};
use super::resource::{DNSResource, RData};
use super::DNSPacket;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ring::hmac;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Allowed clock skew advertised in every signature
const DEFAULT_FUDGE: u16 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsigAlgorithm {
    HmacSha256,
    HmacSha384,
    HmacSha512,
}

impl TsigAlgorithm {
    /// Algorithm name as it appears on the wire (without the trailing dot)
    pub fn name(&self) -> &'static str {
        match self {
            TsigAlgorithm::HmacSha256 => "hmac-sha256",
            TsigAlgorithm::HmacSha384 => "hmac-sha384",
            TsigAlgorithm::HmacSha512 => "hmac-sha512",
        }
    }

    fn hmac_algorithm(&self) -> hmac::Algorithm {
        match self {
            TsigAlgorithm::HmacSha256 => hmac::HMAC_SHA256,
            TsigAlgorithm::HmacSha384 => hmac::HMAC_SHA384,
            TsigAlgorithm::HmacSha512 => hmac::HMAC_SHA512,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().trim_end_matches('.') {
            "hmac-sha256" => Some(TsigAlgorithm::HmacSha256),
            "hmac-sha384" => Some(TsigAlgorithm::HmacSha384),
            "hmac-sha512" => Some(TsigAlgorithm::HmacSha512),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TsigError {
    #[error("Unknown TSIG algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("TSIG secret is not valid base64: {0}")]
    DecodeError(String),
    #[error("Failed to encode message for signing: {0}")]
    Encode(String),
}

#[derive(Clone)]
pub struct TsigKey {
    pub name: String,
    pub algorithm: TsigAlgorithm,
    secret: Vec<u8>,
}

impl std::fmt::Debug for TsigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsigKey")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl TsigKey {
    /// Build a key from its name, algorithm name and base64 secret
    pub fn from_base64(name: &str, algorithm: &str, secret: &str) -> Result<Self, TsigError> {
        let algorithm = TsigAlgorithm::from_name(algorithm)
            .ok_or_else(|| TsigError::UnknownAlgorithm(algorithm.to_string()))?;
        let secret = BASE64
            .decode(secret.trim())
            .map_err(|e| TsigError::DecodeError(e.to_string()))?;
        Ok(Self {
            name: name.trim_end_matches('.').to_lowercase(),
            algorithm,
            secret,
        })
    }

    /// Sign `packet` and return the wire bytes with the TSIG record appended
    pub fn sign(&self, packet: &DNSPacket) -> Result<Vec<u8>, TsigError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.sign_at(packet, now)
    }

    pub fn sign_at(&self, packet: &DNSPacket, time_signed: u64) -> Result<Vec<u8>, TsigError> {
        let message = packet
            .serialize()
            .map_err(|e| TsigError::Encode(e.to_string()))?;

        let key_name = canonical_name_bytes(&name_to_labels(&self.name));
        let algorithm_name = canonical_name_bytes(&name_to_labels(self.algorithm.name()));
        let time_bytes = &time_signed.to_be_bytes()[2..];

        let mut digest_input = message;
        digest_input.extend_from_slice(&key_name);
        digest_input.extend_from_slice(&u16::from(DNSResourceClass::ANY).to_be_bytes());
        digest_input.extend_from_slice(&0u32.to_be_bytes());
        digest_input.extend_from_slice(&algorithm_name);
        digest_input.extend_from_slice(time_bytes);
        digest_input.extend_from_slice(&DEFAULT_FUDGE.to_be_bytes());
        digest_input.extend_from_slice(&0u16.to_be_bytes()); // error
        digest_input.extend_from_slice(&0u16.to_be_bytes()); // other len

        let hmac_key = hmac::Key::new(self.algorithm.hmac_algorithm(), &self.secret);
        let mac = hmac::sign(&hmac_key, &digest_input);
        let mac = mac.as_ref();

        let mut rdata = algorithm_name;
        rdata.extend_from_slice(time_bytes);
        rdata.extend_from_slice(&DEFAULT_FUDGE.to_be_bytes());
        rdata.extend_from_slice(&(mac.len() as u16).to_be_bytes());
        rdata.extend_from_slice(mac);
        rdata.extend_from_slice(&packet.header.id.to_be_bytes());
        rdata.extend_from_slice(&0u16.to_be_bytes()); // error
        rdata.extend_from_slice(&0u16.to_be_bytes()); // other len

        let mut signed = packet.clone();
        signed.resources.push(DNSResource {
            labels: name_to_labels(&self.name),
            rtype: DNSResourceType::TSIG,
            rclass: DNSResourceClass::ANY,
            ttl: 0,
            rdata: RData::Raw(rdata),
        });
        signed
            .serialize()
            .map_err(|e| TsigError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "c2VjcmV0LXNlY3JldC1zZWNyZXQtc2VjcmV0IQ==";

    #[test]
    fn test_algorithm_from_name() {
        assert_eq!(
            TsigAlgorithm::from_name("HMAC-SHA256."),
            Some(TsigAlgorithm::HmacSha256)
        );
        assert_eq!(
            TsigAlgorithm::from_name("hmac-sha512"),
            Some(TsigAlgorithm::HmacSha512)
        );
        assert_eq!(TsigAlgorithm::from_name("hmac-md5"), None);
    }

    #[test]
    fn test_key_rejects_bad_secret() {
        assert!(matches!(
            TsigKey::from_base64("k.", "hmac-sha256", "not base64!!"),
            Err(TsigError::DecodeError(_))
        ));
        assert!(matches!(
            TsigKey::from_base64("k.", "hmac-md5", SECRET),
            Err(TsigError::UnknownAlgorithm(_))
        ));
    }

    #[test]
    fn test_signed_message_carries_tsig_record() {
        let key = TsigKey::from_base64("Transfer-Key.", "hmac-sha256", SECRET).unwrap();
        let packet = DNSPacket::notify("example.com.");

        let bytes = key.sign_at(&packet, 1_700_000_000).unwrap();
        let parsed = DNSPacket::parse(&bytes).unwrap();

        assert_eq!(parsed.header.arcount, 1);
        let tsig = &parsed.resources[0];
        assert_eq!(tsig.rtype, DNSResourceType::TSIG);
        assert_eq!(tsig.rclass, DNSResourceClass::ANY);
        assert_eq!(tsig.labels, vec!["transfer-key"]);

        let RData::Raw(rdata) = &tsig.rdata else {
            panic!("TSIG rdata should be opaque");
        };
        // algorithm name, 6 byte time, fudge, mac size, 32 byte mac, id, error, other len
        let alg_len = "hmac-sha256".len() + 2;
        assert_eq!(rdata.len(), alg_len + 6 + 2 + 2 + 32 + 2 + 2 + 2);
        let mac_size = u16::from_be_bytes([rdata[alg_len + 8], rdata[alg_len + 9]]);
        assert_eq!(mac_size, 32);
    }

    #[test]
    fn test_signature_is_deterministic_for_fixed_time() {
        let key = TsigKey::from_base64("k.", "hmac-sha384", SECRET).unwrap();
        let packet = DNSPacket::soa_query("example.com.");
        let a = key.sign_at(&packet, 42).unwrap();
        let b = key.sign_at(&packet, 42).unwrap();
        let c = key.sign_at(&packet, 43).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
