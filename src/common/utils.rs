//! Utility functions for gantry

use std::net::UdpSocket;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp (seconds, sub-second precision)
pub fn epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as f64
        / 1000.0
}

/// Get current Unix timestamp (whole seconds)
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Short hostname (everything before the first dot)
pub fn short_hostname() -> String {
    let name = hostname_os();
    name.split('.').next().unwrap_or("localhost").to_string()
}

fn hostname_os() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::process::Command::new("hostname")
                .output()
                .ok()
                .and_then(|o| String::from_utf8(o.stdout).ok())
                .map(|s| s.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

/// Best-effort local address detection.
///
/// Opens a UDP socket towards a public resolver to learn which local
/// interface the OS would route through. No packet is actually sent.
pub fn local_address() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip().to_string())
}

/// Python-style truthiness for JSON values
pub fn json_truthy(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Compute blake3 hash of data, return hex string
pub fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_string()
}

/// Compute blake3 hash of a file's contents
pub fn file_hash(path: &std::path::Path) -> crate::Result<String> {
    let data = std::fs::read(path)?;
    Ok(content_hash(&data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_monotonic_enough() {
        let a = epoch();
        let b = epoch();
        assert!(b >= a);
        assert!(a > 1_600_000_000.0);
    }

    #[test]
    fn test_short_hostname_no_dots() {
        let name = short_hostname();
        assert!(!name.is_empty());
        assert!(!name.contains('.'));
    }

    #[test]
    fn test_content_hash_stable() {
        let a = content_hash(b"gantry");
        let b = content_hash(b"gantry");
        assert_eq!(a, b);
        assert_ne!(a, content_hash(b"other"));
    }

    #[test]
    fn test_file_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.rs");
        std::fs::write(&path, b"fn main() {}").unwrap();
        assert_eq!(file_hash(&path).unwrap(), content_hash(b"fn main() {}"));
    }
}
