/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `batches`: batch:{batch_id} -> BatchRecord (JSON)
/// - `jobs`: bjob:{batch_id}:{seq:04} -> JobRecord (JSON)
/// - `metadata`: meta:{key} -> value (string)
///
/// The zero-padded sequence number keeps a batch's job rows in settle order
/// under fjall's lexicographic iteration.

/// Encode a batch key: batch:{batch_id}
pub fn encode_batch_key(batch_id: &str) -> Vec<u8> {
    format!("batch:{}", batch_id).into_bytes()
}

/// Decode a batch key: batch:{batch_id} -> batch_id
pub fn decode_batch_key(key: &[u8]) -> Option<String> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix("batch:").map(String::from)
}

/// Encode a job key: bjob:{batch_id}:{seq:04}
pub fn encode_job_key(batch_id: &str, seq: usize) -> Vec<u8> {
    format!("bjob:{}:{:04}", batch_id, seq).into_bytes()
}

/// Encode a job prefix for range scan: bjob:{batch_id}:
pub fn encode_job_prefix(batch_id: &str) -> Vec<u8> {
    format!("bjob:{}:", batch_id).into_bytes()
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}
