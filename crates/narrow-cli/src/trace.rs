//! JSONL effect trace for `narrow run --trace`.
//!
//! A trace is a stream of [`TraceRecord`]s, one JSON object per line:
//! a header, one effect entry per executed effect (`print`, or the
//! invocation of a deferred effect), and a footer written by
//! [`TraceEmitter::finalize`]. A trace without a footer was cut short.

use crate::eval::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

/// Current trace schema version.
pub const TRACE_SCHEMA_VERSION: &str = "0.1";

/// Values whose rendering exceeds this many bytes are stored as a hash only.
pub const HASH_THRESHOLD: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("failed to serialize trace {what}: {source}")]
    Serialize {
        what: &'static str,
        source: serde_json::Error,
    },
    #[error("failed to write trace {what}: {source}")]
    Write {
        what: &'static str,
        source: std::io::Error,
    },
}

/// Tagged trace value; `Int(42)` stays distinguishable from `"42"`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum TraceValue {
    Int(i64),
    Str(String),
    Bool(bool),
    Unit,
}

impl TraceValue {
    /// Variants and functions are recorded by their rendering.
    pub fn from_value(val: &Value) -> Self {
        match val {
            Value::Int(n) => TraceValue::Int(*n),
            Value::Str(s) => TraceValue::Str(s.clone()),
            Value::Bool(b) => TraceValue::Bool(*b),
            Value::Unit => TraceValue::Unit,
            other => TraceValue::Str(other.to_string()),
        }
    }

    fn to_hash_string(&self) -> String {
        match self {
            TraceValue::Int(n) => n.to_string(),
            TraceValue::Str(s) => s.clone(),
            TraceValue::Bool(b) => b.to_string(),
            TraceValue::Unit => "()".to_string(),
        }
    }
}

/// One executed effect.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct TraceEntry {
    pub seq: u64,
    pub timestamp: String,
    /// `io` for `print`, `deferred` for an effect run by the effect runner
    pub effect: String,
    pub operation: String,
    pub inputs: BTreeMap<String, TraceValue>,
    pub output: TraceOutput,
    pub duration_ms: u64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct TraceOutput {
    /// "ok" or "error"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<TraceValue>,
    pub value_hash: String,
    pub value_size: usize,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "record")]
pub enum TraceRecord {
    #[serde(rename = "header")]
    Header(TraceHeader),
    #[serde(rename = "effect")]
    Effect(TraceEntry),
    #[serde(rename = "footer")]
    Footer(TraceFooter),
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct TraceHeader {
    pub schema_version: String,
    pub timestamp: String,
    /// Source file the trace was recorded from.
    pub program: String,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct TraceFooter {
    pub timestamp: String,
    pub effect_count: u64,
    pub trace_status: String,
    /// "success" or "error"
    pub program_status: String,
}

/// Writes [`TraceRecord`]s as they happen. A disabled emitter only counts.
pub struct TraceEmitter {
    seq: u64,
    writer: Option<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for TraceEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceEmitter")
            .field("seq", &self.seq)
            .field("enabled", &self.writer.is_some())
            .finish()
    }
}

impl Default for TraceEmitter {
    fn default() -> Self {
        Self::disabled()
    }
}

impl TraceEmitter {
    /// Start a trace on `writer`; the header is written immediately.
    pub fn new(mut writer: Box<dyn Write + Send>, program: &str) -> Result<Self, TraceError> {
        let header = TraceRecord::Header(TraceHeader {
            schema_version: TRACE_SCHEMA_VERSION.to_string(),
            timestamp: now_iso8601(),
            program: program.to_string(),
        });
        write_record(&mut writer, &header, "header")?;
        Ok(Self {
            seq: 0,
            writer: Some(writer),
        })
    }

    pub fn disabled() -> Self {
        Self {
            seq: 0,
            writer: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    /// Number of effects recorded so far.
    pub fn effect_count(&self) -> u64 {
        self.seq
    }

    /// Record one effect. Inputs and outputs larger than [`HASH_THRESHOLD`]
    /// are replaced by their SHA-256 digest.
    pub fn record(
        &mut self,
        effect: &str,
        operation: &str,
        mut inputs: BTreeMap<String, TraceValue>,
        output: Result<TraceValue, String>,
        duration: Duration,
    ) -> Result<(), TraceError> {
        let seq = self.seq;
        self.seq += 1;
        let Some(w) = self.writer.as_mut() else {
            return Ok(());
        };

        for tv in inputs.values_mut() {
            let s = tv.to_hash_string();
            if s.len() > HASH_THRESHOLD {
                *tv = TraceValue::Str(sha256_hex(&s));
            }
        }

        let output = match output {
            Ok(tv) => {
                let s = tv.to_hash_string();
                TraceOutput {
                    status: "ok".to_string(),
                    value: (s.len() <= HASH_THRESHOLD).then_some(tv),
                    value_hash: sha256_hex(&s),
                    value_size: s.len(),
                }
            }
            Err(msg) => TraceOutput {
                status: "error".to_string(),
                value_hash: sha256_hex(&msg),
                value_size: msg.len(),
                value: Some(TraceValue::Str(msg)),
            },
        };

        let entry = TraceRecord::Effect(TraceEntry {
            seq,
            timestamp: now_iso8601(),
            effect: effect.to_string(),
            operation: operation.to_string(),
            inputs,
            output,
            duration_ms: duration.as_millis() as u64,
        });
        write_record(w, &entry, "effect")
    }

    /// Write the footer and flush.
    pub fn finalize(&mut self, program_status: &str) -> Result<(), TraceError> {
        let effect_count = self.seq;
        let Some(w) = self.writer.as_mut() else {
            return Ok(());
        };
        let footer = TraceRecord::Footer(TraceFooter {
            timestamp: now_iso8601(),
            effect_count,
            trace_status: "complete".to_string(),
            program_status: program_status.to_string(),
        });
        write_record(w, &footer, "footer")?;
        w.flush().map_err(|source| TraceError::Write {
            what: "flush",
            source,
        })
    }
}

fn write_record(
    w: &mut Box<dyn Write + Send>,
    record: &TraceRecord,
    what: &'static str,
) -> Result<(), TraceError> {
    let json =
        serde_json::to_string(record).map_err(|source| TraceError::Serialize { what, source })?;
    writeln!(w, "{}", json).map_err(|source| TraceError::Write { what, source })
}

/// SHA-256 hex digest of a string, prefixed with "sha256:".
fn sha256_hex(data: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

/// ISO 8601 UTC timestamp from the system clock.
fn now_iso8601() -> String {
    use std::time::SystemTime;
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs();
    let millis = now.subsec_millis();

    // Civil date from days since epoch (Howard Hinnant)
    let days = (secs / 86400) as i64;
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };

    let rem = secs % 86400;
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        y,
        m,
        d,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60,
        millis
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// A writer the test can read back after the emitter is done with it.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn records(&self) -> Vec<TraceRecord> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    #[test]
    fn header_effects_footer() {
        let buf = SharedBuf::default();
        let mut tracer = TraceEmitter::new(Box::new(buf.clone()), "demo.nw").unwrap();
        let inputs = BTreeMap::from([("value".to_string(), TraceValue::Int(5))]);
        tracer
            .record("io", "print", inputs, Ok(TraceValue::Unit), Duration::ZERO)
            .unwrap();
        tracer.finalize("success").unwrap();

        let records = buf.records();
        assert_eq!(records.len(), 3);
        match &records[0] {
            TraceRecord::Header(h) => {
                assert_eq!(h.schema_version, TRACE_SCHEMA_VERSION);
                assert_eq!(h.program, "demo.nw");
            }
            other => panic!("expected header, got {:?}", other),
        }
        match &records[1] {
            TraceRecord::Effect(e) => {
                assert_eq!(e.seq, 0);
                assert_eq!(e.operation, "print");
                assert_eq!(e.inputs["value"], TraceValue::Int(5));
                assert_eq!(e.output.status, "ok");
            }
            other => panic!("expected effect, got {:?}", other),
        }
        match &records[2] {
            TraceRecord::Footer(f) => {
                assert_eq!(f.effect_count, 1);
                assert_eq!(f.trace_status, "complete");
            }
            other => panic!("expected footer, got {:?}", other),
        }
    }

    #[test]
    fn large_values_are_hashed() {
        let buf = SharedBuf::default();
        let mut tracer = TraceEmitter::new(Box::new(buf.clone()), "big.nw").unwrap();
        let big = "x".repeat(HASH_THRESHOLD + 1);
        let inputs = BTreeMap::from([("value".to_string(), TraceValue::Str(big.clone()))]);
        tracer
            .record("io", "print", inputs, Ok(TraceValue::Str(big)), Duration::ZERO)
            .unwrap();

        let records = buf.records();
        let TraceRecord::Effect(e) = &records[1] else {
            panic!("expected effect record");
        };
        assert!(e.output.value.is_none());
        assert_eq!(e.output.value_size, HASH_THRESHOLD + 1);
        assert!(e.output.value_hash.starts_with("sha256:"));
        match &e.inputs["value"] {
            TraceValue::Str(s) => assert!(s.starts_with("sha256:")),
            other => panic!("expected hashed input, got {:?}", other),
        }
    }

    #[test]
    fn disabled_emitter_counts_only() {
        let mut tracer = TraceEmitter::disabled();
        tracer
            .record("io", "print", BTreeMap::new(), Ok(TraceValue::Unit), Duration::ZERO)
            .unwrap();
        assert!(!tracer.is_enabled());
        assert_eq!(tracer.effect_count(), 1);
        tracer.finalize("success").unwrap();
    }

    #[test]
    fn timestamp_shape() {
        let ts = now_iso8601();
        assert_eq!(ts.len(), 24, "{ts}");
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], "T");
    }
}
