//! Pure validation of endpoint parameters.
//!
//! Every check rejects with a [`ValidationError`] naming the field and
//! what was expected; builders run these before any resource is acquired.

use std::fmt;

pub const MAX_HOSTNAME_LENGTH: usize = 253;
pub const MAX_LABEL_LENGTH: usize = 63;
pub const MAX_DEVICE_PATH_LENGTH: usize = 256;
pub const MIN_BAUD_RATE: u32 = 50;
pub const MAX_BAUD_RATE: u32 = 4_000_000;
pub const MIN_DATA_BITS: u8 = 5;
pub const MAX_DATA_BITS: u8 = 8;
pub const MIN_RETRY_INTERVAL_MS: u64 = 1;
pub const MAX_RETRY_INTERVAL_MS: u64 = 300_000;

/// A rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
    pub expected: &'static str,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>, expected: &'static str) -> Self {
        Self {
            field,
            message: message.into(),
            expected,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid {}: {} (expected {})",
            self.field, self.message, self.expected
        )
    }
}

impl std::error::Error for ValidationError {}

/// Accept an IPv4 or IPv6 literal or an RFC 1123 hostname.
pub fn validate_host(host: &str) -> Result<(), ValidationError> {
    if host.is_empty() {
        return Err(ValidationError::new(
            "host",
            "empty string",
            "IPv4, IPv6, or hostname",
        ));
    }
    if is_valid_ipv4(host) || is_valid_ipv6(host) || is_valid_hostname(host) {
        return Ok(());
    }
    Err(ValidationError::new(
        "host",
        format!("{host:?}"),
        "IPv4, IPv6, or hostname",
    ))
}

pub fn validate_port(port: u16) -> Result<(), ValidationError> {
    if port == 0 {
        return Err(ValidationError::new("port", "0", "1..=65535"));
    }
    Ok(())
}

pub fn validate_baud_rate(baud_rate: u32) -> Result<(), ValidationError> {
    if !(MIN_BAUD_RATE..=MAX_BAUD_RATE).contains(&baud_rate) {
        return Err(ValidationError::new(
            "baud_rate",
            baud_rate.to_string(),
            "50..=4000000",
        ));
    }
    Ok(())
}

pub fn validate_data_bits(data_bits: u8) -> Result<(), ValidationError> {
    if !(MIN_DATA_BITS..=MAX_DATA_BITS).contains(&data_bits) {
        return Err(ValidationError::new(
            "data_bits",
            data_bits.to_string(),
            "5..=8",
        ));
    }
    Ok(())
}

pub fn validate_stop_bits(stop_bits: u8) -> Result<(), ValidationError> {
    if stop_bits != 1 && stop_bits != 2 {
        return Err(ValidationError::new(
            "stop_bits",
            stop_bits.to_string(),
            "1 or 2",
        ));
    }
    Ok(())
}

/// Case-insensitive `none` / `odd` / `even`.
pub fn validate_parity(parity: &str) -> Result<(), ValidationError> {
    let lower = parity.to_ascii_lowercase();
    match lower.as_str() {
        "none" | "odd" | "even" => Ok(()),
        _ => Err(ValidationError::new(
            "parity",
            format!("{parity:?}"),
            "none, odd, or even",
        )),
    }
}

pub fn validate_retry_interval(interval_ms: u64) -> Result<(), ValidationError> {
    if !(MIN_RETRY_INTERVAL_MS..=MAX_RETRY_INTERVAL_MS).contains(&interval_ms) {
        return Err(ValidationError::new(
            "retry_interval_ms",
            interval_ms.to_string(),
            "1..=300000",
        ));
    }
    Ok(())
}

/// Unix absolute paths (alphanumerics, `/`, `_`, `-`), Windows `COM1..=COM255`,
/// or a Windows reserved device name.
pub fn validate_device_path(device: &str) -> Result<(), ValidationError> {
    if device.is_empty() {
        return Err(ValidationError::new(
            "device",
            "empty string",
            "absolute device path or COM port",
        ));
    }
    if device.len() > MAX_DEVICE_PATH_LENGTH {
        return Err(ValidationError::new(
            "device",
            format!("{} characters", device.len()),
            "at most 256 characters",
        ));
    }
    if is_valid_device_path(device) {
        return Ok(());
    }
    Err(ValidationError::new(
        "device",
        format!("{device:?}"),
        "absolute device path or COM port",
    ))
}

/// Strict dotted-quad: four octets 0..=255, no leading zeros.
pub fn is_valid_ipv4(address: &str) -> bool {
    let octets: Vec<&str> = address.split('.').collect();
    if octets.len() != 4 {
        return false;
    }
    octets.iter().all(|octet| {
        if octet.is_empty() || octet.len() > 3 {
            return false;
        }
        if octet.len() > 1 && octet.starts_with('0') {
            return false;
        }
        if !octet.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        octet.parse::<u16>().map(|v| v <= 255).unwrap_or(false)
    })
}

/// Basic IPv6 form: eight full hextets, `::`, or `::1`.
pub fn is_valid_ipv6(address: &str) -> bool {
    if address == "::" || address == "::1" {
        return true;
    }
    let groups: Vec<&str> = address.split(':').collect();
    groups.len() == 8
        && groups.iter().all(|group| {
            !group.is_empty()
                && group.len() <= 4
                && group.bytes().all(|b| b.is_ascii_hexdigit())
        })
}

/// RFC 1123: labels of 1..=63 alphanumerics/hyphens, no leading or
/// trailing hyphen, total length ≤ 253.
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > MAX_HOSTNAME_LENGTH {
        return false;
    }
    if hostname.starts_with('-') || hostname.ends_with('-') {
        return false;
    }
    hostname.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LENGTH
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

pub fn is_valid_device_path(device: &str) -> bool {
    if device.starts_with('/') {
        return device
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'/' || b == b'_' || b == b'-');
    }

    if let Some(num) = device.strip_prefix("COM") {
        if num.is_empty() || !num.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        return num
            .parse::<u32>()
            .map(|n| (1..=255).contains(&n))
            .unwrap_or(false);
    }

    matches!(device, "NUL" | "CON" | "PRN" | "AUX" | "LPT1" | "LPT2" | "LPT3")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_rules() {
        assert!(is_valid_ipv4("127.0.0.1"));
        assert!(is_valid_ipv4("0.0.0.0"));
        assert!(is_valid_ipv4("255.255.255.255"));
        assert!(!is_valid_ipv4("256.0.0.1"));
        assert!(!is_valid_ipv4("1.2.3"));
        assert!(!is_valid_ipv4("01.2.3.4"), "leading zero");
        assert!(!is_valid_ipv4("1.2.3.4.5"));
        assert!(!is_valid_ipv4("a.b.c.d"));
    }

    #[test]
    fn ipv6_rules() {
        assert!(is_valid_ipv6("::"));
        assert!(is_valid_ipv6("::1"));
        assert!(is_valid_ipv6("2001:0db8:0000:0000:0000:8a2e:0370:7334"));
        assert!(!is_valid_ipv6("2001:db8"));
        assert!(!is_valid_ipv6("127.0.0.1"));
    }

    #[test]
    fn hostname_rules() {
        assert!(is_valid_hostname("localhost"));
        assert!(is_valid_hostname("example.com"));
        assert!(is_valid_hostname("a-b.c-d.example"));
        assert!(!is_valid_hostname("-leading.example"));
        assert!(!is_valid_hostname("trailing-.example"));
        assert!(!is_valid_hostname(&"x".repeat(254)));
        assert!(!is_valid_hostname("under_score.example"));
        let long_label = format!("{}.example", "x".repeat(64));
        assert!(!is_valid_hostname(&long_label));
    }

    #[test]
    fn device_path_rules() {
        assert!(is_valid_device_path("/dev/ttyUSB0"));
        assert!(is_valid_device_path("/dev/tty_ACM-1"));
        assert!(!is_valid_device_path("/dev/tty USB"));
        assert!(is_valid_device_path("COM1"));
        assert!(is_valid_device_path("COM255"));
        assert!(!is_valid_device_path("COM0"));
        assert!(!is_valid_device_path("COM256"));
        assert!(!is_valid_device_path("COMx"));
        assert!(is_valid_device_path("NUL"));
        assert!(!is_valid_device_path("relative/path"));
    }

    #[test]
    fn port_and_ranges() {
        assert!(validate_port(0).is_err());
        assert!(validate_port(1).is_ok());
        assert!(validate_baud_rate(49).is_err());
        assert!(validate_baud_rate(115_200).is_ok());
        assert!(validate_baud_rate(4_000_001).is_err());
        assert!(validate_data_bits(4).is_err());
        assert!(validate_data_bits(8).is_ok());
        assert!(validate_stop_bits(3).is_err());
        assert!(validate_retry_interval(0).is_err());
        assert!(validate_retry_interval(300_001).is_err());
        assert!(validate_retry_interval(2000).is_ok());
    }

    #[test]
    fn parity_is_case_insensitive() {
        assert!(validate_parity("None").is_ok());
        assert!(validate_parity("ODD").is_ok());
        assert!(validate_parity("even").is_ok());
        assert!(validate_parity("mark").is_err());
    }

    #[test]
    fn host_accepts_all_three_forms() {
        assert!(validate_host("192.168.0.10").is_ok());
        assert!(validate_host("::1").is_ok());
        assert!(validate_host("broker.internal").is_ok());
        assert!(validate_host("").is_err());
        let err = validate_host("bad host").unwrap_err();
        assert_eq!(err.field, "host");
        assert!(err.to_string().contains("expected"));
    }
}
