use std::path::Path;

use anyhow::Result;
use log::{error, info};
use tokio::fs;

use crate::error::BleError;

/// Asynchronously ensures that a directory exists, creating it if it does not.
/// This function is idempotent.
pub async fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        if let Err(e) = fs::create_dir_all(path).await {
            error!("Failed to create directory at {:?}: {}", path, e);
            return Err(e.into());
        }
        info!("Created directory at: {:?}", path);
    }
    Ok(())
}

/// Parses hex such as `0A FF`, `0aff` or `0x0A,0xFF` into bytes.
pub fn parse_hex(input: &str) -> Result<Vec<u8>, BleError> {
    let digits: String = input
        .split(|c: char| c.is_whitespace() || c == ',' || c == ':')
        .map(|part| part.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return Err(BleError::InvalidHex(input.to_string()));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| BleError::InvalidHex(input.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("0A FF").unwrap(), vec![0x0A, 0xFF]);
        assert_eq!(parse_hex("0aff01").unwrap(), vec![0x0A, 0xFF, 0x01]);
        assert_eq!(parse_hex("0x01, 0x02").unwrap(), vec![0x01, 0x02]);
        assert!(parse_hex("ABC").is_err());
        assert!(parse_hex("ZZ").is_err());
        assert!(parse_hex("").is_err());
    }
}
