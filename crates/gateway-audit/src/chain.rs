//! Hash-chained audit trail (C14 / §4.12).
//!
//! The firewall wrapping provider mutations writes an `intent` record before
//! executing, an `ok`/`err` record after, and a `denied` record at the first
//! rejection step. Records never carry secrets; callers are responsible for
//! pre-redacting `data` before it reaches [`AuditTrail::append`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Intent,
    Ok,
    Err,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub seq: u64,
    pub prev_hash: String,
    pub record_hash: String,
    pub timestamp: u64,
    pub job_id: String,
    pub template_id: String,
    pub action: String,
    pub phase: Phase,
    pub data: Value,
}

/// Canonical bytes hashed into `record_hash`: every field except the hash
/// itself, serialized in a fixed field order so the same logical record
/// always produces the same hash.
fn canonical_bytes(
    seq: u64,
    prev_hash: &str,
    timestamp: u64,
    job_id: &str,
    template_id: &str,
    action: &str,
    phase: Phase,
    data: &Value,
) -> Vec<u8> {
    let canonical = serde_json::json!({
        "seq": seq,
        "prev_hash": prev_hash,
        "timestamp": timestamp,
        "job_id": job_id,
        "template_id": template_id,
        "action": action,
        "phase": phase,
        "data": data,
    });
    serde_json::to_vec(&canonical).expect("canonical audit envelope must serialize")
}

fn hash_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Append-only, in-process audit log. Each record's `record_hash` commits to
/// the previous record's hash, forming a tamper-evident chain.
#[derive(Default)]
pub struct AuditTrail {
    records: std::sync::Mutex<Vec<AuditRecord>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &self,
        job_id: &str,
        template_id: &str,
        action: &str,
        phase: Phase,
        data: Value,
        timestamp: u64,
    ) -> AuditRecord {
        let mut records = self.records.lock().unwrap();
        let seq = records.len() as u64;
        let prev_hash = records.last().map(|r| r.record_hash.clone()).unwrap_or_else(|| GENESIS_HASH.to_string());

        let bytes = canonical_bytes(seq, &prev_hash, timestamp, job_id, template_id, action, phase, &data);
        let record_hash = hash_hex(&bytes);

        let record = AuditRecord {
            seq,
            prev_hash,
            record_hash,
            timestamp,
            job_id: job_id.to_string(),
            template_id: template_id.to_string(),
            action: action.to_string(),
            phase,
            data,
        };
        records.push(record.clone());
        record
    }

    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Intact,
    /// The chain is broken starting at this sequence number: either its
    /// `prev_hash` doesn't match the predecessor's `record_hash`, or its own
    /// `record_hash` doesn't match its recomputed content hash.
    BrokenAt(u64),
}

/// Rolls hashes forward over `records` and reports the first broken
/// sequence number, if any.
pub fn verify_chain(records: &[AuditRecord]) -> VerifyResult {
    let mut expected_prev = GENESIS_HASH.to_string();
    for record in records {
        if record.prev_hash != expected_prev {
            return VerifyResult::BrokenAt(record.seq);
        }
        let bytes = canonical_bytes(
            record.seq,
            &record.prev_hash,
            record.timestamp,
            &record.job_id,
            &record.template_id,
            &record.action,
            record.phase,
            &record.data,
        );
        if hash_hex(&bytes) != record.record_hash {
            return VerifyResult::BrokenAt(record.seq);
        }
        expected_prev = record.record_hash.clone();
    }
    VerifyResult::Intact
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chain_of_intent_ok_records_verifies_intact() {
        let trail = AuditTrail::new();
        trail.append("job-1", "tmpl-a", "provider_call", Phase::Intent, json!({"route": "/agent/chat"}), 100);
        trail.append("job-1", "tmpl-a", "provider_call", Phase::Ok, json!({"status": 200}), 101);

        assert_eq!(verify_chain(&trail.snapshot()), VerifyResult::Intact);
    }

    #[test]
    fn tampering_with_a_record_is_detected_at_that_sequence() {
        let trail = AuditTrail::new();
        trail.append("job-1", "tmpl-a", "provider_call", Phase::Intent, json!({}), 100);
        trail.append("job-1", "tmpl-a", "provider_call", Phase::Ok, json!({}), 101);
        trail.append("job-1", "tmpl-a", "provider_call", Phase::Ok, json!({}), 102);

        let mut records = trail.snapshot();
        records[1].data = json!({"tampered": true});

        assert_eq!(verify_chain(&records), VerifyResult::BrokenAt(1));
    }

    #[test]
    fn denied_record_is_recorded_at_first_rejection_step() {
        let trail = AuditTrail::new();
        trail.append("job-2", "tmpl-b", "payment_decision", Phase::Intent, json!({}), 1);
        let denied = trail.append("job-2", "tmpl-b", "payment_decision", Phase::Denied, json!({"reason": "insufficient_balance"}), 2);
        assert_eq!(denied.phase, Phase::Denied);
        assert_eq!(verify_chain(&trail.snapshot()), VerifyResult::Intact);
    }

    #[test]
    fn data_never_serializes_a_secret_field_the_caller_omitted() {
        // The envelope is a pass-through of whatever `data` the caller
        // supplies — this asserts the trail doesn't add any field of its
        // own beyond what's documented.
        let trail = AuditTrail::new();
        let record = trail.append("job-3", "tmpl-c", "action", Phase::Ok, json!({"amount_micro": 500}), 1);
        let as_value = serde_json::to_value(&record).unwrap();
        assert!(as_value.get("secret").is_none());
        assert!(as_value.get("hmac_secret").is_none());
    }
}
