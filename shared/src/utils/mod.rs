//! Utility functions and helpers

pub mod scsi;
pub mod time;

use anyhow::Result;
use std::net::Ipv4Addr;

/// Parse a duration string (e.g., "500ms", "30s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<std::time::Duration> {
    let s = s.trim();

    if let Some(num_str) = s.strip_suffix("ms") {
        let millis: u64 = num_str.parse()?;
        Ok(std::time::Duration::from_millis(millis))
    } else if let Some(num_str) = s.strip_suffix("us") {
        let micros: u64 = num_str.parse()?;
        Ok(std::time::Duration::from_micros(micros))
    } else if let Some(num_str) = s.strip_suffix('s') {
        let secs: u64 = num_str.parse()?;
        Ok(std::time::Duration::from_secs(secs))
    } else if let Some(num_str) = s.strip_suffix('m') {
        let mins: u64 = num_str.parse()?;
        Ok(std::time::Duration::from_secs(mins * 60))
    } else if let Some(num_str) = s.strip_suffix('h') {
        let hours: u64 = num_str.parse()?;
        Ok(std::time::Duration::from_secs(hours * 3600))
    } else {
        // Default to seconds if no suffix
        let secs: u64 = s.parse()?;
        Ok(std::time::Duration::from_secs(secs))
    }
}

/// IPv4 address from a `__be32` as stored in `skc_daddr`
pub fn ipv4_from_be(addr: u32) -> Ipv4Addr {
    Ipv4Addr::from(u32::from_be(addr))
}

/// Port from a `__be16` as stored in `skc_dport`
pub fn port_from_be(port: u16) -> u16 {
    u16::from_be(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap().as_secs(), 30);
        assert_eq!(parse_duration("5m").unwrap().as_secs(), 300);
        assert_eq!(parse_duration("1h").unwrap().as_secs(), 3600);
        assert_eq!(parse_duration("60").unwrap().as_secs(), 60);
        assert_eq!(parse_duration("250ms").unwrap().as_millis(), 250);
        assert_eq!(parse_duration("1500us").unwrap().as_micros(), 1500);
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_network_byte_order() {
        let daddr = u32::from_be_bytes([10, 0, 0, 7]).to_be();
        assert_eq!(ipv4_from_be(daddr), Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(port_from_be(443u16.to_be()), 443);
    }
}
