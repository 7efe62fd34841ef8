//! SCSI opcode vocabulary

/// Bulk data transfer opcodes that the command tracer skips:
/// READ(6), READ(10), READ(16), WRITE(6), WRITE(10), WRITE(16)
pub const READ_WRITE_OPCODES: [u32; 6] = [0x08, 0x28, 0x88, 0x0A, 0x2A, 0x8A];

pub fn is_read_write(opcode: u32) -> bool {
    READ_WRITE_OPCODES.contains(&opcode)
}

/// Human-readable name for well-known control commands
pub fn opcode_name(opcode: u8) -> Option<&'static str> {
    match opcode {
        0x00 => Some("TEST_UNIT_READY"),
        0x03 => Some("REQUEST_SENSE"),
        0x12 => Some("INQUIRY"),
        0x1B => Some("START_STOP_UNIT"),
        0x2F => Some("VERIFY"),
        0x35 => Some("SYNCHRONIZE_CACHE"),
        0x42 => Some("UNMAP (TRIM)"),
        0x5E => Some("PERSISTENT_RESERVE"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_filter() {
        for op in READ_WRITE_OPCODES {
            assert!(is_read_write(op));
        }
        assert!(!is_read_write(0x35));
        assert!(!is_read_write(0x00));
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(opcode_name(0x35), Some("SYNCHRONIZE_CACHE"));
        assert_eq!(opcode_name(0x42), Some("UNMAP (TRIM)"));
        assert_eq!(opcode_name(0x99), None);
    }
}
