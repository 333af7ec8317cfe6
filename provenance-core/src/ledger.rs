//! Tamper-evident append-only ledger.
//!
//! Each record carries an HMAC-SHA256 over the canonical JSON of its
//! `index`, `timestamp`, `payload` and `prev_hmac`, where `prev_hmac` is the
//! previous record's tag (or `"GENESIS"` for the first record). Altering any
//! past record therefore breaks its own tag and the link from its successor.
//!
//! Integrity rests entirely on the shared secret. Re-opening a ledger under a
//! different key reports every record as tampered; that is expected.
//!
//! # Backing file
//!
//! When a path is configured, every record is appended as one line of
//! canonical JSON containing exactly `hmac`, `index`, `payload`, `prev_hmac`
//! and `timestamp` (keys sorted, no whitespace). Opening the ledger replays
//! the file before accepting new appends. A line that is JSON but not a
//! well-formed record is kept as-is and reported by verification at its
//! position; only lines that are not JSON at all fail the open.
//!
//! A write that fails partway through is cut back to the previous end of
//! file, so a failed append never leaves a fragment for the next one.
//!
//! # Concurrency
//!
//! Records and the file handle live behind one mutex, so `append` takes
//! `&self` and concurrent appends from several threads are serialized and
//! cannot interleave the chain.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{ProvenanceError, Result};

/// `prev_hmac` of the first record.
pub const GENESIS: &str = "GENESIS";

/// Environment variable holding the ledger secret.
pub const SECRET_ENV: &str = "PROVENANCE_LEDGER_SECRET";

/// Environment variable holding the optional backing file path.
pub const PATH_ENV: &str = "PROVENANCE_LEDGER_PATH";

type HmacSha256 = Hmac<Sha256>;

/// One immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerRecord {
    /// Position in the chain, starting at 0.
    pub index: u64,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub payload: Value,
    /// Hex tag of the previous record, or [`GENESIS`].
    pub prev_hmac: String,
    /// Hex HMAC-SHA256 over the other four fields.
    pub hmac: String,
}

impl LedgerRecord {
    /// The line written to the backing file.
    pub fn to_canonical_json(&self) -> Result<String> {
        let value =
            serde_json::to_value(self).map_err(|e| ProvenanceError::SerializationError(e.to_string()))?;
        canonical_json(&value)
    }

    /// Bytes covered by the record's HMAC.
    fn signable_bytes(&self) -> Result<Vec<u8>> {
        signable_bytes(self.index, self.timestamp, &self.payload, &self.prev_hmac)
    }
}

/// Secret and backing file for a [`Ledger`].
#[derive(Clone)]
pub struct LedgerConfig {
    pub secret: Zeroizing<Vec<u8>>,
    pub path: Option<PathBuf>,
}

impl std::fmt::Debug for LedgerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerConfig")
            .field("secret", &"<redacted>")
            .field("path", &self.path)
            .finish()
    }
}

impl LedgerConfig {
    pub fn new(secret: impl AsRef<[u8]>, path: Option<PathBuf>) -> Self {
        Self {
            secret: Zeroizing::new(secret.as_ref().to_vec()),
            path,
        }
    }

    /// Load from `PROVENANCE_LEDGER_SECRET` and `PROVENANCE_LEDGER_PATH`.
    ///
    /// A missing or empty secret is fatal.
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var(SECRET_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(ProvenanceError::MissingSecret)?;
        let path = std::env::var(PATH_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        Ok(Self::new(Zeroizing::new(secret).as_bytes(), path))
    }
}

/// One position in the chain as read back from storage.
#[derive(Debug, Clone)]
enum Entry {
    Record(LedgerRecord),
    /// A JSON line that does not deserialize into a [`LedgerRecord`].
    Malformed { raw: Value, reason: String },
}

impl Entry {
    fn hmac(&self) -> Option<&str> {
        match self {
            Entry::Record(record) => Some(&record.hmac),
            Entry::Malformed { raw, .. } => raw.get("hmac").and_then(Value::as_str),
        }
    }

    fn record(&self) -> Option<&LedgerRecord> {
        match self {
            Entry::Record(record) => Some(record),
            Entry::Malformed { .. } => None,
        }
    }
}

/// Append-only byte sink behind the ledger.
trait Sink: Write + Send {
    /// Current length in bytes.
    fn size(&mut self) -> io::Result<u64>;
    /// Cut the sink back to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl Sink for File {
    fn size(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

struct LedgerState {
    entries: Vec<Entry>,
    sink: Option<Box<dyn Sink>>,
    /// The sink does not end with a newline.
    needs_newline: bool,
}

/// Single-process append-only HMAC chain.
pub struct Ledger {
    secret: Zeroizing<Vec<u8>>,
    path: Option<PathBuf>,
    state: Mutex<LedgerState>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("path", &self.path)
            .field("len", &self.len())
            .finish()
    }
}

impl Ledger {
    /// Open an in-memory ledger.
    pub fn in_memory(secret: impl AsRef<[u8]>) -> Result<Self> {
        Self::from_config(LedgerConfig::new(secret, None))
    }

    /// Open a ledger backed by `path`, replaying any existing records.
    pub fn open(secret: impl AsRef<[u8]>, path: impl AsRef<Path>) -> Result<Self> {
        Self::from_config(LedgerConfig::new(secret, Some(path.as_ref().to_path_buf())))
    }

    pub fn from_config(config: LedgerConfig) -> Result<Self> {
        if config.secret.is_empty() {
            return Err(ProvenanceError::MissingSecret);
        }

        let (entries, sink, needs_newline) = match &config.path {
            Some(path) => {
                let (entries, needs_newline) = replay(path)?;
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                info!(path = %path.display(), records = entries.len(), "opened ledger");
                (entries, Some(Box::new(file) as Box<dyn Sink>), needs_newline)
            }
            None => {
                debug!("opened in-memory ledger");
                (Vec::new(), None, false)
            }
        };

        Ok(Self {
            secret: config.secret,
            path: config.path,
            state: Mutex::new(LedgerState {
                entries,
                sink,
                needs_newline,
            }),
        })
    }

    /// Append a record holding `payload` and return it.
    ///
    /// The record is written to the backing file before it becomes visible
    /// in memory.
    pub fn append<T: Serialize + ?Sized>(&self, payload: &T) -> Result<LedgerRecord> {
        let payload =
            serde_json::to_value(payload).map_err(|e| ProvenanceError::SerializationError(e.to_string()))?;

        let mut guard = self.lock();
        let state = &mut *guard;
        let index = state.entries.len() as u64;
        let prev_hmac = match state.entries.last() {
            Some(entry) => entry.hmac().unwrap_or_default().to_string(),
            None => GENESIS.to_string(),
        };
        let timestamp = Utc::now().timestamp_micros() as f64 / 1_000_000.0;

        let hmac = self.tag(&signable_bytes(index, timestamp, &payload, &prev_hmac)?)?;
        let record = LedgerRecord {
            index,
            timestamp,
            payload,
            prev_hmac,
            hmac,
        };

        if let Some(sink) = state.sink.as_mut() {
            let mut line = String::new();
            if state.needs_newline {
                line.push('\n');
            }
            line.push_str(&record.to_canonical_json()?);
            line.push('\n');
            write_line(&mut **sink, line.as_bytes(), &mut state.needs_newline)?;
        }
        state.needs_newline = false;
        state.entries.push(Entry::Record(record.clone()));

        debug!(index, "appended ledger record");
        Ok(record)
    }

    /// Walk the chain from index 0 and fail on the first inconsistent record.
    pub fn verify_chain(&self) -> Result<()> {
        let state = self.lock();
        let mut expected_prev = GENESIS;

        for (position, entry) in state.entries.iter().enumerate() {
            let checked = match entry {
                Entry::Record(record) => self.check_record(position, record, expected_prev),
                Entry::Malformed { reason, .. } => Err(format!("malformed record: {}", reason)),
            };
            if let Err(reason) = checked {
                warn!(index = position, reason = %reason, "ledger integrity violation");
                return Err(ProvenanceError::IntegrityViolation {
                    index: position,
                    reason,
                });
            }
            expected_prev = entry.hmac().unwrap_or_default();
        }

        Ok(())
    }

    /// `true` iff [`verify_chain`](Self::verify_chain) fails.
    pub fn tamper_detected(&self) -> bool {
        self.verify_chain().is_err()
    }

    /// Number of positions in the chain, malformed ones included.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all well-formed records, in chain order.
    pub fn records(&self) -> Vec<LedgerRecord> {
        self.lock()
            .entries
            .iter()
            .filter_map(Entry::record)
            .cloned()
            .collect()
    }

    /// Record at `index`, `None` when out of range or malformed.
    pub fn get(&self, index: usize) -> Option<LedgerRecord> {
        self.lock().entries.get(index).and_then(Entry::record).cloned()
    }

    /// Tag the next record will chain to, `None` for an empty ledger.
    pub fn last_hmac(&self) -> Option<String> {
        self.lock()
            .entries
            .last()
            .map(|entry| entry.hmac().unwrap_or_default().to_string())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn check_record(&self, position: usize, record: &LedgerRecord, expected_prev: &str) -> std::result::Result<(), String> {
        if record.index != position as u64 {
            return Err(format!("index {} stored at position {}", record.index, position));
        }
        if record.prev_hmac != expected_prev {
            return Err("prev_hmac does not match the previous record".into());
        }

        let bytes = record.signable_bytes().map_err(|e| e.to_string())?;
        let stored = hex::decode(&record.hmac).map_err(|_| "hmac is not valid hex".to_string())?;
        let mut mac = self.mac().map_err(|e| e.to_string())?;
        mac.update(&bytes);
        mac.verify_slice(&stored)
            .map_err(|_| "hmac does not match record contents".to_string())
    }

    fn tag(&self, bytes: &[u8]) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(bytes);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ProvenanceError::InvalidArgument(format!("Invalid HMAC key: {}", e)))
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // Appends commit to memory only after the file write, so the state
        // stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Write one line, cutting the sink back to its previous length on failure.
///
/// When the cut itself fails, `needs_newline` is set so the next record
/// starts on a fresh line after the fragment.
fn write_line(sink: &mut dyn Sink, line: &[u8], needs_newline: &mut bool) -> Result<()> {
    let start = sink.size()?;
    let written = sink.write_all(line).and_then(|()| sink.flush());
    if let Err(err) = written {
        warn!(error = %err, "ledger write failed, rolling back");
        if let Err(cut) = sink.truncate(start) {
            warn!(error = %cut, "could not roll back partial ledger line");
            *needs_newline = true;
        }
        return Err(err.into());
    }
    Ok(())
}

/// Read every line from `path`; a missing file is an empty ledger.
fn replay(path: &Path) -> Result<(Vec<Entry>, bool)> {
    if !path.exists() {
        return Ok((Vec::new(), false));
    }

    let contents = fs::read_to_string(path)?;
    let needs_newline = !contents.is_empty() && !contents.ends_with('\n');
    let mut entries = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let raw: Value = serde_json::from_str(line).map_err(|e| {
            ProvenanceError::SerializationError(format!(
                "{} line {}: {}",
                path.display(),
                lineno + 1,
                e
            ))
        })?;
        let entry = match LedgerRecord::deserialize(&raw) {
            Ok(record) => Entry::Record(record),
            Err(e) => {
                warn!(line = lineno + 1, error = %e, "malformed ledger record");
                Entry::Malformed {
                    raw,
                    reason: e.to_string(),
                }
            }
        };
        entries.push(entry);
    }

    Ok((entries, needs_newline))
}

fn signable_bytes(index: u64, timestamp: f64, payload: &Value, prev_hmac: &str) -> Result<Vec<u8>> {
    let timestamp = serde_json::Number::from_f64(timestamp).ok_or_else(|| {
        ProvenanceError::SerializationError(format!("timestamp {} is not finite", timestamp))
    })?;

    let mut fields = Map::new();
    fields.insert("index".into(), Value::from(index));
    fields.insert("payload".into(), payload.clone());
    fields.insert("prev_hmac".into(), Value::from(prev_hmac));
    fields.insert("timestamp".into(), Value::Number(timestamp));

    Ok(canonical_json(&Value::Object(fields))?.into_bytes())
}

/// Compact JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> Result<String> {
    serde_json::to_string(&sorted(value)).map_err(|e| ProvenanceError::SerializationError(e.to_string()))
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), sorted(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn record_mut(ledger: &mut Ledger, index: usize) -> &mut LedgerRecord {
        match &mut ledger.state.get_mut().unwrap().entries[index] {
            Entry::Record(record) => record,
            Entry::Malformed { .. } => panic!("entry {} is malformed", index),
        }
    }

    /// In-memory sink that accepts `budget` bytes and then fails.
    struct FlakySink {
        data: Arc<Mutex<Vec<u8>>>,
        budget: Option<usize>,
        truncate_fails: bool,
    }

    impl FlakySink {
        fn install(ledger: &mut Ledger, budget: Option<usize>, truncate_fails: bool) -> Arc<Mutex<Vec<u8>>> {
            let data = Arc::new(Mutex::new(Vec::new()));
            ledger.state.get_mut().unwrap().sink = Some(Box::new(FlakySink {
                data: Arc::clone(&data),
                budget,
                truncate_fails,
            }));
            data
        }
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = match self.budget.as_mut() {
                Some(0) => return Err(io::Error::new(io::ErrorKind::Other, "disk full")),
                Some(budget) => {
                    let n = buf.len().min(*budget);
                    *budget -= n;
                    n
                }
                None => buf.len(),
            };
            self.data.lock().unwrap().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Sink for FlakySink {
        fn size(&mut self) -> io::Result<u64> {
            Ok(self.data.lock().unwrap().len() as u64)
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            if self.truncate_fails {
                return Err(io::Error::new(io::ErrorKind::Other, "read-only"));
            }
            self.data.lock().unwrap().truncate(len as usize);
            Ok(())
        }
    }

    fn lines(data: &Arc<Mutex<Vec<u8>>>) -> Vec<String> {
        String::from_utf8(data.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_missing_secret_is_fatal() {
        assert!(matches!(
            Ledger::in_memory(""),
            Err(ProvenanceError::MissingSecret)
        ));
    }

    #[test]
    fn test_empty_ledger_verifies() {
        let ledger = Ledger::in_memory("k").unwrap();
        assert!(ledger.is_empty());
        assert!(ledger.verify_chain().is_ok());
        assert!(!ledger.tamper_detected());
        assert!(ledger.last_hmac().is_none());
    }

    #[test]
    fn test_append_links_records() {
        let ledger = Ledger::in_memory("secret").unwrap();
        let first = ledger.append(&json!({"event": "ingest"})).unwrap();
        let second = ledger.append(&json!({"event": "resize", "width": 512})).unwrap();

        assert_eq!(first.index, 0);
        assert_eq!(first.prev_hmac, GENESIS);
        assert_eq!(second.index, 1);
        assert_eq!(second.prev_hmac, first.hmac);
        assert_eq!(first.hmac.len(), 64);
        assert_eq!(ledger.last_hmac(), Some(second.hmac.clone()));
        assert!(ledger.verify_chain().is_ok());
    }

    #[test]
    fn test_wrong_key_detects_tamper() {
        let ledger = Ledger::in_memory("original").unwrap();
        let record = ledger.append(&json!({"a": 1})).unwrap();

        let mut other = Ledger::in_memory("rotated").unwrap();
        other.state.get_mut().unwrap().entries.push(Entry::Record(record));
        match other.verify_chain() {
            Err(ProvenanceError::IntegrityViolation { index, .. }) => assert_eq!(index, 0),
            other => panic!("expected integrity violation, got {:?}", other),
        }
    }

    #[test]
    fn test_payload_mutation_detected_at_index() {
        let mut ledger = Ledger::in_memory("k").unwrap();
        for i in 0..4 {
            ledger.append(&json!({ "step": i })).unwrap();
        }
        record_mut(&mut ledger, 2).payload = json!({"step": 99});

        match ledger.verify_chain() {
            Err(ProvenanceError::IntegrityViolation { index, .. }) => assert_eq!(index, 2),
            other => panic!("expected integrity violation, got {:?}", other),
        }
    }

    #[test]
    fn test_index_mutation_detected() {
        let mut ledger = Ledger::in_memory("k").unwrap();
        ledger.append(&json!(1)).unwrap();
        ledger.append(&json!(2)).unwrap();
        record_mut(&mut ledger, 1).index = 5;
        assert!(ledger.tamper_detected());
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = json!({"b": 1, "a": {"d": [ {"z": 1, "y": 2} ], "c": null}});
        assert_eq!(
            canonical_json(&value).unwrap(),
            r#"{"a":{"c":null,"d":[{"y":2,"z":1}]},"b":1}"#
        );
    }

    #[test]
    fn test_record_line_has_exact_fields() {
        let ledger = Ledger::in_memory("k").unwrap();
        let record = ledger.append(&json!({"x": true})).unwrap();
        let line: Value = serde_json::from_str(&record.to_canonical_json().unwrap()).unwrap();
        let mut keys: Vec<_> = line.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, ["hmac", "index", "payload", "prev_hmac", "timestamp"]);
    }

    #[test]
    fn test_config_debug_redacts_secret() {
        let config = LedgerConfig::new("hunter2", None);
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_failed_write_is_rolled_back() {
        let mut ledger = Ledger::in_memory("k").unwrap();
        let data = FlakySink::install(&mut ledger, None, false);
        ledger.append(&json!({"step": 0})).unwrap();
        let committed = data.lock().unwrap().len();

        ledger.state.get_mut().unwrap().sink = Some(Box::new(FlakySink {
            data: Arc::clone(&data),
            budget: Some(20),
            truncate_fails: false,
        }));
        assert!(matches!(
            ledger.append(&json!({"step": 1})),
            Err(ProvenanceError::Io(_))
        ));
        assert_eq!(data.lock().unwrap().len(), committed);
        assert_eq!(ledger.len(), 1);

        ledger.state.get_mut().unwrap().sink = Some(Box::new(FlakySink {
            data: Arc::clone(&data),
            budget: None,
            truncate_fails: false,
        }));
        ledger.append(&json!({"step": 2})).unwrap();

        let lines = lines(&data);
        assert_eq!(lines.len(), 2);
        for line in &lines {
            serde_json::from_str::<LedgerRecord>(line).unwrap();
        }
        assert!(ledger.verify_chain().is_ok());
    }

    #[test]
    fn test_unrecoverable_fragment_gets_own_line() {
        let mut ledger = Ledger::in_memory("k").unwrap();
        let data = FlakySink::install(&mut ledger, Some(20), true);
        assert!(ledger.append(&json!({"step": 0})).is_err());
        assert!(ledger.state.get_mut().unwrap().needs_newline);

        ledger.state.get_mut().unwrap().sink = Some(Box::new(FlakySink {
            data: Arc::clone(&data),
            budget: None,
            truncate_fails: false,
        }));
        let record = ledger.append(&json!({"step": 1})).unwrap();

        let lines = lines(&data);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 20);
        assert_eq!(lines[1], record.to_canonical_json().unwrap());
    }

    #[test]
    fn test_malformed_entry_fails_verification_at_position() {
        let mut ledger = Ledger::in_memory("k").unwrap();
        ledger.append(&json!(1)).unwrap();
        ledger.append(&json!(2)).unwrap();
        let mut raw = serde_json::to_value(ledger.get(1).unwrap()).unwrap();
        raw["index"] = json!(-1);
        let reason = LedgerRecord::deserialize(&raw).unwrap_err().to_string();
        ledger.state.get_mut().unwrap().entries[1] = Entry::Malformed { raw, reason };

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.records().len(), 1);
        assert!(ledger.get(1).is_none());
        assert!(matches!(
            ledger.verify_chain(),
            Err(ProvenanceError::IntegrityViolation { index: 1, .. })
        ));
    }
}
