//! The procedure store.
//!
//! The one process-wide singleton the VM permits: a TTL-bounded map from
//! opaque `proc_<id>` tokens to stored atom ASTs. Tokens are identifiers,
//! not capabilities; expiry is checked lazily on lookup and eagerly via
//! `clear_expired`.

use crate::vm::error::monadic_error_with;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub const DEFAULT_TTL_MS: u64 = 60_000;
pub const DEFAULT_MAX_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct StoredProcedure {
    pub ast: Value,
    pub created_at: SystemTime,
    pub expires_at: Instant,
    /// Serialized size in bytes, used for the size bound.
    pub size: usize,
}

static PROCEDURES: Lazy<Mutex<HashMap<String, StoredProcedure>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));
static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_token() -> String {
    let count = TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
        .unwrap_or(0);
    format!("proc_{:016x}{:08x}", nanos.wrapping_mul(0x9e3779b97f4a7c15), count)
}

/// Store an AST, returning its token. Oversized ASTs are rejected with a
/// monadic error.
pub fn store_procedure(
    ast: Value,
    ttl_ms: Option<u64>,
    max_size: Option<usize>,
) -> Result<String, Value> {
    let size = serde_json::to_string(&ast).map(|s| s.len()).unwrap_or(0);
    let limit = max_size.unwrap_or(DEFAULT_MAX_SIZE);
    if size > limit {
        return Err(monadic_error_with(
            format!("Procedure too large: {} bytes (limit {})", size, limit),
            json!({ "op": "storeProcedure" }),
        ));
    }
    let ttl = Duration::from_millis(ttl_ms.unwrap_or(DEFAULT_TTL_MS));
    let token = next_token();
    let stored = StoredProcedure {
        ast,
        created_at: SystemTime::now(),
        expires_at: Instant::now() + ttl,
        size,
    };
    PROCEDURES.lock().unwrap().insert(token.clone(), stored);
    tracing::debug!(token = %token, size, ttl_ms = ttl.as_millis() as u64, "stored procedure");
    Ok(token)
}

/// Fetch a stored AST by token. Expired entries are dropped on lookup.
pub fn get_procedure(token: &str) -> Result<Value, Value> {
    let mut map = PROCEDURES.lock().unwrap();
    match map.get(token) {
        None => Err(monadic_error_with(
            format!("Procedure not found: {}", token),
            json!({ "op": "agentRun" }),
        )),
        Some(stored) if stored.expires_at <= Instant::now() => {
            map.remove(token);
            Err(monadic_error_with(
                format!("Procedure expired: {}", token),
                json!({ "op": "agentRun" }),
            ))
        }
        Some(stored) => Ok(stored.ast.clone()),
    }
}

/// Remove a procedure; true when it existed.
pub fn release_procedure(token: &str) -> bool {
    PROCEDURES.lock().unwrap().remove(token).is_some()
}

/// Eagerly drop every expired procedure, returning how many went away.
pub fn clear_expired() -> usize {
    let now = Instant::now();
    let mut map = PROCEDURES.lock().unwrap();
    let before = map.len();
    map.retain(|_, stored| stored.expires_at > now);
    before - map.len()
}

/// Is this string shaped like a procedure token?
pub fn is_token(s: &str) -> bool {
    s.starts_with("proc_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_fetch() {
        let ast = json!({"op": "seq", "children": []});
        let token = store_procedure(ast.clone(), Some(60_000), None).unwrap();
        assert!(token.starts_with("proc_"));
        assert_eq!(get_procedure(&token).unwrap(), ast);
        assert!(release_procedure(&token));
        assert!(!release_procedure(&token));
    }

    #[test]
    fn unknown_token_errors() {
        let err = get_procedure("proc_nope").unwrap_err();
        assert!(err["message"].as_str().unwrap().contains("not found"));
    }

    #[test]
    fn expiry_is_lazy() {
        let token = store_procedure(json!({"op": "seq", "children": []}), Some(0), None).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let err = get_procedure(&token).unwrap_err();
        assert!(err["message"].as_str().unwrap().contains("expired"));
        // The expired entry was dropped, so a second lookup reports not-found.
        let err = get_procedure(&token).unwrap_err();
        assert!(err["message"].as_str().unwrap().contains("not found"));
    }

    #[test]
    fn clear_expired_counts() {
        let t1 = store_procedure(json!({"op": "seq", "children": []}), Some(0), None).unwrap();
        let _t2 = store_procedure(json!({"op": "seq", "children": []}), Some(60_000), None).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clear_expired() >= 1);
        assert!(get_procedure(&t1).is_err());
    }

    #[test]
    fn size_limit() {
        let big = json!({"op": "seq", "children": ["x".repeat(1024)]});
        let err = store_procedure(big, None, Some(100)).unwrap_err();
        assert!(err["message"].as_str().unwrap().contains("too large"));
    }

    #[test]
    fn tokens_are_unique() {
        let a = next_token();
        let b = next_token();
        assert_ne!(a, b);
    }
}
