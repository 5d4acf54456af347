//! Encrypted blob and transit envelope formats

use lexguard_common::{KeyId, SecurityError, SecurityResult};
use serde::{Deserialize, Serialize};

/// Nonce length (96 bits)
pub const NONCE_LEN: usize = 12;
/// Tag length (128 bits)
pub const TAG_LEN: usize = 16;

/// Transit envelope format version
pub(crate) const TRANSIT_VERSION: u8 = 1;

/// AEAD algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aes256Gcm => "aes-256-gcm",
        }
    }
}

/// Ciphertext at rest
///
/// `key_id` is the only pointer back to the key that decrypts it and never
/// changes after encryption. Binary fields serialize as standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedBlob {
    #[serde(with = "b64")]
    pub(crate) data: Vec<u8>,
    #[serde(with = "b64")]
    pub(crate) iv: Vec<u8>,
    #[serde(with = "b64")]
    pub(crate) tag: Vec<u8>,
    pub(crate) key_id: KeyId,
    pub(crate) algorithm: Algorithm,
}

impl EncryptedBlob {
    /// Rebuild a blob loaded from storage.
    pub fn from_parts(data: Vec<u8>, iv: Vec<u8>, tag: Vec<u8>, key_id: KeyId, algorithm: Algorithm) -> Self {
        Self { data, iv, tag, key_id, algorithm }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub fn tag(&self) -> &[u8] {
        &self.tag
    }

    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Structural checks done before any key lookup
    pub(crate) fn validate(&self) -> SecurityResult<()> {
        if self.iv.len() != NONCE_LEN {
            return Err(SecurityError::InvalidInput(format!(
                "nonce must be {} bytes, got {}",
                NONCE_LEN,
                self.iv.len()
            )));
        }
        if self.tag.len() != TAG_LEN {
            return Err(SecurityError::InvalidInput(format!(
                "tag must be {} bytes, got {}",
                TAG_LEN,
                self.tag.len()
            )));
        }
        if self.key_id.as_str().is_empty() {
            return Err(SecurityError::InvalidInput("blob has no key id".into()));
        }
        Ok(())
    }
}

/// Versioned wrapper carried as base64 between services
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TransitEnvelope {
    pub v: u8,
    pub blob: EncryptedBlob,
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob() -> EncryptedBlob {
        EncryptedBlob::from_parts(
            vec![1, 2, 3],
            vec![0; NONCE_LEN],
            vec![9; TAG_LEN],
            KeyId::new("key_abc"),
            Algorithm::Aes256Gcm,
        )
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(blob()).unwrap();
        assert_eq!(json["data"], "AQID");
        assert_eq!(json["keyId"], "key_abc");
        assert_eq!(json["algorithm"], "aes-256-gcm");

        let back: EncryptedBlob = serde_json::from_value(json).unwrap();
        assert_eq!(back, blob());
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let mut json = serde_json::to_value(blob()).unwrap();
        json["algorithm"] = "des-cbc".into();
        assert!(serde_json::from_value::<EncryptedBlob>(json).is_err());
    }

    #[test]
    fn test_validate_lengths() {
        assert!(blob().validate().is_ok());

        let mut short_iv = blob();
        short_iv.iv.truncate(8);
        assert!(matches!(short_iv.validate(), Err(SecurityError::InvalidInput(_))));

        let mut long_tag = blob();
        long_tag.tag.push(0);
        assert!(matches!(long_tag.validate(), Err(SecurityError::InvalidInput(_))));
    }
}
