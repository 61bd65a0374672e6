use anyhow::Result;

/// Bincode configuration shared by the snapshot and journal.
fn get_config() -> impl bincode::config::Config {
    // Limit allocation to prevent memory exhaustion on corrupt data
    bincode::config::legacy().with_limit::<{ 512 * 1024 * 1024 }>()
}

/// Serialize data using bincode v2.0 with serde
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn serialize<T: serde::Serialize>(data: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(data, get_config()).map_err(Into::into)
}

/// Deserialize data using bincode v2.0 with serde
///
/// # Errors
///
/// Returns an error if the bytes are malformed or truncated.
pub fn deserialize<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (result, _bytes_read) = bincode::serde::decode_from_slice(bytes, get_config())?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileRecord, PhysicalCopyGroup};
    use chrono::Utc;
    use std::path::PathBuf;

    #[test]
    fn test_group_survives_encoding() -> Result<()> {
        let group = PhysicalCopyGroup {
            id: 7,
            hash: "a9993e364706816aba3e25717850c26c9cd0d89d".to_string(),
            size: 3,
            created_at: Utc::now(),
            records: vec![FileRecord {
                path: PathBuf::from("2024-01-01_000000.000/docs/abc.txt"),
                modified: 1_700_000_000_123_456_789,
            }],
        };

        let bytes = serialize(&group)?;
        let decoded: PhysicalCopyGroup = deserialize(&bytes)?;
        assert_eq!(decoded, group);
        Ok(())
    }

    #[test]
    fn test_truncated_input_fails() -> Result<()> {
        let bytes = serialize(&vec![1u64, 2, 3])?;
        assert!(deserialize::<Vec<u64>>(&bytes[..bytes.len() - 1]).is_err());
        Ok(())
    }
}
