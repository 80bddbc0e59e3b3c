//! State codecs: how a component's state travels to the client and back.
//!
//! | Codec | Token | Server memory | Use for |
//! |-------|-------|---------------|---------|
//! | [`UniversalCodec`] | base64(percent(JSON)) | none | default |
//! | [`ServerCodec`] | uuid of a temp file | disk, TTL cleanup | large or sensitive state |
//! | [`DisposableCodec`] | constant sentinel | none | components without mutable state |
//!
//! `ServerCodec` requires shared storage or sticky routing when more than one
//! instance serves actions.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use tokio::runtime::RuntimeFlavor;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CodecError;

/// Strategy for serializing component state into an opaque token.
pub trait StateCodec: Send + Sync {
    /// Encode `state` into a token safe to embed in an HTML attribute.
    fn marshal(&self, state: &Value) -> Result<String, CodecError>;

    /// Decode a token produced by [`marshal`](Self::marshal).
    fn unmarshal(&self, token: &str) -> Result<Value, CodecError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

// =============================================================================
// Universal
// =============================================================================

/// Stateless inline codec: JSON, then percent-encoding, then base64.
///
/// Reversible and requires no server memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniversalCodec;

impl StateCodec for UniversalCodec {
    fn marshal(&self, state: &Value) -> Result<String, CodecError> {
        let json = serde_json::to_string(state)?;
        let escaped = urlencoding::encode(&json);
        Ok(STANDARD.encode(escaped.as_bytes()))
    }

    fn unmarshal(&self, token: &str) -> Result<Value, CodecError> {
        let escaped = STANDARD.decode(token.trim())?;
        let escaped =
            String::from_utf8(escaped).map_err(|e| CodecError::Malformed(e.to_string()))?;
        let json = urlencoding::decode(&escaped).map_err(|e| CodecError::Percent(e.to_string()))?;
        Ok(serde_json::from_str(&json)?)
    }

    fn name(&self) -> &'static str {
        "universal"
    }
}

// =============================================================================
// Server
// =============================================================================

/// Default lifetime of server-side state files.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const STATE_FILE_PREFIX: &str = "trellis-state-";
const STATE_FILE_SUFFIX: &str = ".json";

/// Keeps state on the server in uniquely named temp files.
///
/// The token is the file's uuid. Reading a token triggers an asynchronous
/// sweep of files older than the TTL.
#[derive(Debug, Clone)]
pub struct ServerCodec {
    dir: PathBuf,
    ttl: Duration,
}

impl Default for ServerCodec {
    fn default() -> Self {
        Self::new(std::env::temp_dir(), DEFAULT_STATE_TTL)
    }
}

impl ServerCodec {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn path_for(&self, id: &Uuid) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", STATE_FILE_PREFIX, id, STATE_FILE_SUFFIX))
    }

    /// Remove state files older than the TTL. Returns how many were removed.
    pub fn cleanup_expired(&self) -> Result<usize, CodecError> {
        cleanup_dir(&self.dir, self.ttl)
    }

    fn spawn_cleanup(&self) {
        let dir = self.dir.clone();
        let ttl = self.ttl;
        let sweep = move || match cleanup_dir(&dir, ttl) {
            Ok(0) => {}
            Ok(removed) => debug!(removed, dir = %dir.display(), "expired state files removed"),
            Err(e) => warn!(error = %e, dir = %dir.display(), "state cleanup failed"),
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(sweep);
            }
            Err(_) => {
                std::thread::spawn(sweep);
            }
        }
    }
}

fn cleanup_dir(dir: &Path, ttl: Duration) -> Result<usize, CodecError> {
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(STATE_FILE_PREFIX) || !name.ends_with(STATE_FILE_SUFFIX) {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => continue,
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age > ttl {
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                // Another sweep got there first.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(removed)
}

/// Run file IO without stalling the async workers.
///
/// On a multi-threaded runtime the current worker hands its other tasks off
/// while `io` runs. A current-thread runtime has nobody to hand them to, so
/// `io` runs inline there, as it does outside any runtime.
fn blocking_io<T>(io: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(io)
        }
        _ => io(),
    }
}

impl StateCodec for ServerCodec {
    fn marshal(&self, state: &Value) -> Result<String, CodecError> {
        let id = Uuid::new_v4();
        let json = serde_json::to_vec(state)?;
        let path = self.path_for(&id);
        blocking_io(|| -> std::io::Result<()> {
            fs::create_dir_all(&self.dir)?;
            fs::write(path, json)
        })?;
        Ok(id.to_string())
    }

    fn unmarshal(&self, token: &str) -> Result<Value, CodecError> {
        let id = Uuid::parse_str(token.trim())
            .map_err(|_| CodecError::Malformed(format!("not a state id: {:?}", token)))?;

        let path = self.path_for(&id);
        let read = blocking_io(|| fs::read(&path));
        self.spawn_cleanup();

        let bytes = match read {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CodecError::Expired(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn name(&self) -> &'static str {
        "server"
    }
}

// =============================================================================
// Disposable
// =============================================================================

/// Token emitted by [`DisposableCodec`].
pub const DISPOSABLE_TOKEN: &str = "disposable";

/// Carries no data at all.
///
/// Only valid for components without mutable state. Marshalling non-empty
/// state, or unmarshalling anything but the sentinel, fails loudly rather than
/// silently dropping data.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisposableCodec;

fn is_empty_state(state: &Value) -> bool {
    match state {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

impl StateCodec for DisposableCodec {
    fn marshal(&self, state: &Value) -> Result<String, CodecError> {
        if !is_empty_state(state) {
            return Err(CodecError::DisposableData);
        }
        Ok(DISPOSABLE_TOKEN.to_string())
    }

    fn unmarshal(&self, token: &str) -> Result<Value, CodecError> {
        if token.trim() != DISPOSABLE_TOKEN {
            return Err(CodecError::DisposableData);
        }
        Ok(Value::Object(Default::default()))
    }

    fn name(&self) -> &'static str {
        "disposable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_universal_round_trip_special_characters() {
        let state = json!({
            "title": "50% off & \"quotes\" <b>tags</b> ünïcödé 🎉",
            "path": "/a b/c?d=e&f=g#h",
            "lines": "one\ntwo\r\nthree",
            "nested": {"list": [1, 2.5, null, true], "empty": {}}
        });

        let token = UniversalCodec.marshal(&state).unwrap();
        // Safe inside an HTML attribute.
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '='));
        assert_eq!(UniversalCodec.unmarshal(&token).unwrap(), state);
    }

    #[test]
    fn test_universal_rejects_garbage() {
        assert!(matches!(
            UniversalCodec.unmarshal("!!!not base64!!!"),
            Err(CodecError::Base64(_))
        ));
        let not_json = STANDARD.encode("not%20json");
        assert!(matches!(
            UniversalCodec.unmarshal(&not_json),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn test_server_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let codec = ServerCodec::new(dir.path(), DEFAULT_STATE_TTL);
        let state = json!({"count": 5, "secret": "kept on the server"});

        let token = codec.marshal(&state).unwrap();
        assert!(Uuid::parse_str(&token).is_ok());
        assert!(!token.contains("secret"));
        assert_eq!(codec.unmarshal(&token).unwrap(), state);
    }

    #[test]
    fn test_server_rejects_foreign_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let codec = ServerCodec::new(dir.path(), DEFAULT_STATE_TTL);
        assert!(matches!(
            codec.unmarshal("../../etc/passwd"),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            codec.unmarshal(&Uuid::new_v4().to_string()),
            Err(CodecError::Expired(_))
        ));
    }

    #[test]
    fn test_server_cleanup_removes_only_expired() {
        let dir = tempfile::tempdir().unwrap();
        let codec = ServerCodec::new(dir.path(), Duration::from_millis(200));

        let old = codec.marshal(&json!({"generation": "old"})).unwrap();
        std::thread::sleep(Duration::from_millis(400));
        let fresh = codec.marshal(&json!({"generation": "fresh"})).unwrap();

        let removed = codec.cleanup_expired().unwrap();
        assert_eq!(removed, 1);
        assert!(matches!(codec.unmarshal(&old), Err(CodecError::Expired(_))));
        assert_eq!(
            codec.unmarshal(&fresh).unwrap(),
            json!({"generation": "fresh"})
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_server_unmarshal_sweeps_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let codec = ServerCodec::new(dir.path(), Duration::from_millis(100));

        let old = codec.marshal(&json!({"n": 1})).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let fresh = codec.marshal(&json!({"n": 2})).unwrap();

        assert_eq!(codec.unmarshal(&fresh).unwrap(), json!({"n": 2}));

        // The sweep runs on the blocking pool; give it a moment.
        let old_path = codec.path_for(&Uuid::parse_str(&old).unwrap());
        for _ in 0..50 {
            if !old_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!old_path.exists());
        assert!(codec.path_for(&Uuid::parse_str(&fresh).unwrap()).exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_server_io_does_not_stall_the_worker() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let job = tokio::spawn(async {
            let ran = Arc::new(AtomicBool::new(false));
            let flag = ran.clone();
            tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

            // The only worker is busy here; the task above can still run.
            blocking_io(|| {
                for _ in 0..200 {
                    if ran.load(Ordering::SeqCst) {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
            });
            ran.load(Ordering::SeqCst)
        });

        assert!(job.await.unwrap());
    }

    #[tokio::test]
    async fn test_server_round_trip_on_current_thread_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let codec = ServerCodec::new(dir.path(), DEFAULT_STATE_TTL);

        let token = codec.marshal(&json!({"count": 3})).unwrap();
        assert_eq!(codec.unmarshal(&token).unwrap(), json!({"count": 3}));
    }

    #[test]
    fn test_disposable_sentinel() {
        let token = DisposableCodec.marshal(&json!({})).unwrap();
        assert_eq!(token, DISPOSABLE_TOKEN);
        assert_eq!(DisposableCodec.unmarshal(&token).unwrap(), json!({}));
    }

    #[test]
    fn test_disposable_refuses_real_data() {
        assert!(matches!(
            DisposableCodec.marshal(&json!({"count": 1})),
            Err(CodecError::DisposableData)
        ));
        let real = UniversalCodec.marshal(&json!({"count": 1})).unwrap();
        assert!(matches!(
            DisposableCodec.unmarshal(&real),
            Err(CodecError::DisposableData)
        ));
    }
}
