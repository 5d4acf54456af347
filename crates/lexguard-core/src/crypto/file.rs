//! Streaming file encryption
//!
//! Layout:
//!
//! ```text
//! header : "LGF1" | u16 key id len | key id | 12-byte base nonce | u32 chunk size
//! chunk  : u8 final flag | u32 sealed len | ciphertext || tag
//! ```
//!
//! Chunk `i` is sealed with the base nonce XOR `i` (big-endian, low 8 bytes)
//! and an AAD naming the tenant, key id, index and final flag. Reordered,
//! dropped or appended chunks fail to open.

use super::{aead_key, EncryptionEngine, NONCE_LEN, TAG_LEN};
use lexguard_common::{KeyId, SecurityError, SecurityResult, TenantId};
use ring::aead::{Aad, Nonce};
use serde::Serialize;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAGIC: &[u8; 4] = b"LGF1";
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Result of a streaming encryption or decryption
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEncryptionSummary {
    pub key_id: KeyId,
    pub chunks: u64,
    pub plaintext_bytes: u64,
}

impl EncryptionEngine {
    /// Encrypt `reader` into `writer` under the tenant's active key.
    pub async fn encrypt_file<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        tenant_id: &TenantId,
    ) -> SecurityResult<FileEncryptionSummary>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let chunk_size = self.chunk_size();
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(SecurityError::Config(format!("invalid file chunk size {}", chunk_size)));
        }

        let mut current = vec![0u8; chunk_size];
        let mut filled = read_full(reader, &mut current).await?;
        if filled == 0 {
            return Err(SecurityError::InvalidInput("empty file".into()));
        }

        let (meta, material) = self.vault().active_key_material(tenant_id).await?;
        let key = aead_key(&material)?;
        let base_nonce = self.random_nonce()?;
        let key_id_bytes = meta.key_id.as_bytes();
        let key_id_len = u16::try_from(key_id_bytes.len())
            .map_err(|_| SecurityError::InvalidInput("key id too long".into()))?;

        writer.write_all(MAGIC).await?;
        writer.write_u16(key_id_len).await?;
        writer.write_all(key_id_bytes).await?;
        writer.write_all(&base_nonce).await?;
        writer.write_u32(chunk_size as u32).await?;

        let mut next = vec![0u8; chunk_size];
        let mut index: u64 = 0;
        let mut total: u64 = 0;
        loop {
            // A short read means EOF, so only a full chunk needs a look-ahead.
            let next_filled = if filled == chunk_size {
                read_full(reader, &mut next).await?
            } else {
                0
            };
            let is_final = next_filled == 0;

            let mut sealed = current[..filled].to_vec();
            let tag = key
                .seal_in_place_separate_tag(
                    chunk_nonce(&base_nonce, index),
                    Aad::from(chunk_aad(tenant_id, &meta.key_id, index, is_final)),
                    &mut sealed,
                )
                .map_err(|_| SecurityError::InvalidInput("chunk too large".into()))?;
            sealed.extend_from_slice(tag.as_ref());

            writer.write_u8(is_final as u8).await?;
            writer.write_u32(sealed.len() as u32).await?;
            writer.write_all(&sealed).await?;

            total += filled as u64;
            index += 1;
            if is_final {
                break;
            }
            std::mem::swap(&mut current, &mut next);
            filled = next_filled;
        }
        writer.flush().await?;

        tracing::debug!(tenant_id = %tenant_id, key_id = %meta.key_id, chunks = index, bytes = total, "Encrypted file");
        Ok(FileEncryptionSummary {
            key_id: meta.key_id,
            chunks: index,
            plaintext_bytes: total,
        })
    }

    /// Decrypt a stream produced by [`encrypt_file`](Self::encrypt_file).
    ///
    /// Chunks are written as they verify; on error the caller must discard
    /// whatever reached `writer`.
    pub async fn decrypt_file<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        tenant_id: &TenantId,
    ) -> SecurityResult<FileEncryptionSummary>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).await.map_err(truncated)?;
        if &magic != MAGIC {
            return Err(SecurityError::InvalidInput("not an encrypted LexGuard file".into()));
        }

        let key_id_len = reader.read_u16().await.map_err(truncated)? as usize;
        let mut key_id_bytes = vec![0u8; key_id_len];
        reader.read_exact(&mut key_id_bytes).await.map_err(truncated)?;
        let key_id = String::from_utf8(key_id_bytes)
            .map(KeyId::new)
            .map_err(|_| SecurityError::InvalidInput("key id is not UTF-8".into()))?;

        let mut base_nonce = [0u8; NONCE_LEN];
        reader.read_exact(&mut base_nonce).await.map_err(truncated)?;
        let chunk_size = reader.read_u32().await.map_err(truncated)? as usize;
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(SecurityError::InvalidInput(format!("invalid chunk size {}", chunk_size)));
        }

        let material = self.resolve_for_decrypt(tenant_id, &key_id).await?;
        let key = aead_key(&material)?;

        let mut index: u64 = 0;
        let mut total: u64 = 0;
        loop {
            let flag = reader.read_u8().await.map_err(truncated)?;
            if flag > 1 {
                return Err(SecurityError::IntegrityViolation(format!("bad chunk flag {}", flag)));
            }
            let is_final = flag == 1;

            let sealed_len = reader.read_u32().await.map_err(truncated)? as usize;
            if sealed_len <= TAG_LEN || sealed_len > chunk_size + TAG_LEN {
                return Err(SecurityError::IntegrityViolation(format!("bad chunk length {}", sealed_len)));
            }
            let mut sealed = vec![0u8; sealed_len];
            reader.read_exact(&mut sealed).await.map_err(truncated)?;

            let plain = key
                .open_in_place(
                    chunk_nonce(&base_nonce, index),
                    Aad::from(chunk_aad(tenant_id, &key_id, index, is_final)),
                    &mut sealed[..],
                )
                .map_err(|_| {
                    tracing::warn!(tenant_id = %tenant_id, key_id = %key_id, chunk = index, "File chunk failed authentication");
                    SecurityError::IntegrityViolation(format!("chunk {} failed authentication", index))
                })?;
            writer.write_all(plain).await?;
            total += plain.len() as u64;
            index += 1;

            if is_final {
                let mut extra = [0u8; 1];
                if reader.read(&mut extra).await? != 0 {
                    return Err(SecurityError::IntegrityViolation("trailing data after final chunk".into()));
                }
                break;
            }
        }
        writer.flush().await?;

        Ok(FileEncryptionSummary {
            key_id,
            chunks: index,
            plaintext_bytes: total,
        })
    }
}

fn chunk_nonce(base: &[u8; NONCE_LEN], index: u64) -> Nonce {
    let mut nonce = *base;
    for (slot, byte) in nonce[NONCE_LEN - 8..].iter_mut().zip(index.to_be_bytes()) {
        *slot ^= byte;
    }
    Nonce::assume_unique_for_key(nonce)
}

fn chunk_aad(tenant_id: &TenantId, key_id: &KeyId, index: u64, is_final: bool) -> Vec<u8> {
    let mut aad = format!("lexguard:file:v1|{}|{}|", tenant_id, key_id).into_bytes();
    aad.extend_from_slice(&index.to_be_bytes());
    aad.push(is_final as u8);
    aad
}

fn truncated(e: std::io::Error) -> SecurityError {
    if e.kind() == ErrorKind::UnexpectedEof {
        SecurityError::IntegrityViolation("encrypted file is truncated".into())
    } else {
        e.into()
    }
}

async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> SecurityResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
