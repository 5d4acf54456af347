//! Blind index for searching encrypted fields
//!
//! Each tenant gets a search key derived from the deployment pepper, so equal
//! terms hash differently across tenants. The search key does not depend on
//! the data encryption key and survives rotation.

use hmac::{Hmac, Mac};
use lexguard_common::{SecurityError, SecurityResult, TenantId};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SEARCH_KEY_LABEL: &[u8] = b"lexguard-search-key|";

fn mac(key: &[u8]) -> SecurityResult<HmacSha256> {
    HmacSha256::new_from_slice(key).map_err(|e| SecurityError::Config(format!("search key: {}", e)))
}

fn tenant_search_key(pepper: &[u8], tenant_id: &TenantId) -> SecurityResult<Vec<u8>> {
    let mut mac = mac(pepper)?;
    mac.update(SEARCH_KEY_LABEL);
    mac.update(tenant_id.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Normalize a search term: trimmed and lowercased
pub fn normalize_term(term: &str) -> String {
    term.trim().to_lowercase()
}

/// 64 hex chars of HMAC-SHA256 over the normalized term
pub(crate) fn searchable_hash(pepper: &[u8], tenant_id: &TenantId, term: &str) -> SecurityResult<String> {
    let normalized = normalize_term(term);
    if normalized.is_empty() {
        return Err(SecurityError::InvalidInput("empty search term".into()));
    }
    if tenant_id.is_empty() {
        return Err(SecurityError::InvalidContext("empty tenant id".into()));
    }

    let key = tenant_search_key(pepper, tenant_id)?;
    let mut mac = mac(&key)?;
    mac.update(normalized.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEPPER: &[u8] = b"test-pepper-0123456789";

    #[test]
    fn test_hash_shape_and_stability() {
        let t1 = TenantId::new("t1");
        let a = searchable_hash(PEPPER, &t1, "Dupont").unwrap();
        let b = searchable_hash(PEPPER, &t1, "Dupont").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_is_tenant_scoped() {
        let a = searchable_hash(PEPPER, &TenantId::new("t1"), "Dupont").unwrap();
        let b = searchable_hash(PEPPER, &TenantId::new("t2"), "Dupont").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_terms_are_normalized() {
        let t1 = TenantId::new("t1");
        assert_eq!(
            searchable_hash(PEPPER, &t1, "  DUPONT ").unwrap(),
            searchable_hash(PEPPER, &t1, "dupont").unwrap()
        );
    }

    #[test]
    fn test_empty_term_rejected() {
        assert!(matches!(
            searchable_hash(PEPPER, &TenantId::new("t1"), "   "),
            Err(SecurityError::InvalidInput(_))
        ));
    }
}
