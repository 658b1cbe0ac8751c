use crate::{DfsError, DfsResult};

/// IEEE CRC32 of a block payload. This is the only checksum the block
/// format carries; content addressing is out of scope.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Check a payload against the `(crc, length)` stored for it.
pub fn verify_block(data: &[u8], crc: u32, length: u32) -> DfsResult<()> {
    if data.len() as u32 != length {
        return Err(DfsError::IntegrityError(format!(
            "length mismatch: expected {} got {}",
            length,
            data.len()
        )));
    }
    let actual = crc32(data);
    if actual != crc {
        return Err(DfsError::IntegrityError(format!(
            "crc mismatch: expected {} got {}",
            crc, actual
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_known_value() {
        // IEEE polynomial check value for "123456789".
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn test_verify_block() {
        let data = b"hello";
        let crc = crc32(data);
        assert!(verify_block(data, crc, 5).is_ok());
        assert!(matches!(
            verify_block(data, crc, 4),
            Err(DfsError::IntegrityError(_))
        ));
        assert!(matches!(
            verify_block(data, crc ^ 1, 5),
            Err(DfsError::IntegrityError(_))
        ));
    }
}
