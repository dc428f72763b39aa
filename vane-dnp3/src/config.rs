//! Endpoint and point configuration attributes.

use std::collections::BTreeMap;
use std::time::Duration;

use vane_types::{DataType, PointId};

use crate::error::ConfigError;
use crate::objects::PointType;
use crate::transport::MASTER_MAX_FRAGMENT;

/// Default TCP and UDP port.
pub const DEFAULT_PORT: u16 = 20000;
/// Default serial line speed.
pub const DEFAULT_SERIAL_SPEED: u32 = 9600;
/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default reply timeout.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);
/// Default keep-alive interval.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Multi-valued configuration attributes for one remote origin.
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    map: BTreeMap<String, Vec<String>>,
}

impl Attributes {
    /// Empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one value under a key.
    pub fn add(&mut self, key: &str, value: impl Into<String>) {
        self.map
            .entry(key.to_ascii_uppercase())
            .or_default()
            .push(value.into());
    }

    /// First value under a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map
            .get(&key.to_ascii_uppercase())
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// All values under a key.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.map
            .get(&key.to_ascii_uppercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// One logical device declared on a remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalDevice {
    /// Optional device name.
    pub name: Option<String>,
    /// DNP3 link address.
    pub address: u16,
}

/// Parsed configuration of one DNP3 remote origin.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// TCP addresses (`host[:port]`; `*` accepts any source).
    pub tcp_addresses: Vec<String>,
    /// UDP addresses.
    pub udp_addresses: Vec<String>,
    /// Listen/connect TCP port.
    pub tcp_port: u16,
    /// Listen/connect UDP port.
    pub udp_port: u16,
    /// Serial device path, when the remote is serial-attached.
    pub serial_port: Option<String>,
    /// Serial line speed.
    pub serial_speed: u32,
    /// Declared logical devices.
    pub logical_devices: Vec<LogicalDevice>,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Reply timeout.
    pub reply_timeout: Duration,
    /// Keep-alive interval.
    pub keep_alive: Duration,
    /// Maximum application fragment size.
    pub max_fragment_size: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            tcp_addresses: Vec::new(),
            udp_addresses: Vec::new(),
            tcp_port: DEFAULT_PORT,
            udp_port: DEFAULT_PORT,
            serial_port: None,
            serial_speed: DEFAULT_SERIAL_SPEED,
            logical_devices: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            keep_alive: DEFAULT_KEEP_ALIVE,
            max_fragment_size: MASTER_MAX_FRAGMENT,
        }
    }
}

impl RemoteConfig {
    /// Parse from configuration attributes.
    pub fn from_attributes(attributes: &Attributes) -> Result<Self, ConfigError> {
        let mut config = Self {
            tcp_addresses: attributes.get_all("TCPAddress").to_vec(),
            udp_addresses: attributes.get_all("UDPAddress").to_vec(),
            ..Self::default()
        };

        // A wildcard accepts any source, so it cannot share the remote
        // list with concrete addresses.
        let wildcards = config.tcp_addresses.iter().filter(|a| *a == "*").count();
        if wildcards > 0 && config.tcp_addresses.len() > 1 {
            return Err(ConfigError::WildcardNotAlone);
        }

        if let Some(port) = attributes.get("TCPPort") {
            config.tcp_port = parse_number(port, "TCPPort")?;
        }
        if let Some(port) = attributes.get("UDPPort") {
            config.udp_port = parse_number(port, "UDPPort")?;
        }
        config.serial_port = attributes.get("SerialPort").map(str::to_owned);
        if let Some(speed) = attributes.get("SerialSpeed") {
            config.serial_speed = parse_number(speed, "SerialSpeed")?;
        }
        for device in attributes.get_all("LogicalDevice") {
            config.logical_devices.push(parse_logical_device(device)?);
        }
        if let Some(timeout) = attributes.get("ConnectTimeout") {
            config.connect_timeout = Duration::from_secs(parse_number(timeout, "ConnectTimeout")?);
        }
        if let Some(timeout) = attributes.get("ReplyTimeout") {
            config.reply_timeout = Duration::from_secs(parse_number(timeout, "ReplyTimeout")?);
        }
        if let Some(timeout) = attributes.get("KeepAliveTimeout") {
            config.keep_alive = Duration::from_secs(parse_number(timeout, "KeepAliveTimeout")?);
        }
        if let Some(size) = attributes.get("MaxFragmentSize") {
            config.max_fragment_size = parse_number(size, "MaxFragmentSize")?;
        }
        Ok(config)
    }

    /// Address of the first logical device, when one is declared.
    pub fn first_address(&self) -> Option<u16> {
        self.logical_devices.first().map(|d| d.address)
    }
}

fn parse_number<T: std::str::FromStr>(text: &str, name: &'static str) -> Result<T, ConfigError> {
    text.trim().parse().map_err(|_| ConfigError::BadAttribute {
        name,
        value: text.to_owned(),
    })
}

/// Parse `name:address` or a bare `address`.
fn parse_logical_device(text: &str) -> Result<LogicalDevice, ConfigError> {
    let (name, address_text) = match text.rsplit_once(':') {
        Some((name, address)) => (Some(name.trim().to_owned()), address),
        None => (None, text),
    };
    let address: u32 = parse_number(address_text, "LogicalDevice")?;
    if address > 0xFFFC {
        return Err(ConfigError::AddressOutOfRange(address));
    }
    Ok(LogicalDevice {
        name,
        address: address as u16,
    })
}

/// Per-point protocol binding.
#[derive(Debug, Clone, PartialEq)]
pub struct PointConfig {
    /// Point identity.
    pub point: PointId,
    /// Point taxonomy.
    pub point_type: PointType,
    /// Wire data type.
    pub data_type: DataType,
    /// First index.
    pub start_index: u32,
    /// Last index (equal to `start_index` for single points).
    pub stop_index: u32,
    /// Logical device override.
    pub logical_device: Option<u16>,
    /// Output variation override.
    pub variation: Option<u8>,
}

impl PointConfig {
    /// A single-index point.
    pub fn single(
        point: PointId,
        point_type: PointType,
        data_type: DataType,
        index: u32,
    ) -> Self {
        Self {
            point,
            point_type,
            data_type,
            start_index: index,
            stop_index: index,
            logical_device: None,
            variation: None,
        }
    }

    /// A multi-index point covering `start..=stop`.
    pub fn range(
        point: PointId,
        point_type: PointType,
        data_type: DataType,
        start: u32,
        stop: u32,
    ) -> Self {
        Self {
            point,
            point_type,
            data_type,
            start_index: start,
            stop_index: stop,
            logical_device: None,
            variation: None,
        }
    }

    /// Number of indexes this point covers.
    pub const fn index_count(&self) -> usize {
        (self.stop_index - self.start_index + 1) as usize
    }

    /// Return `true` when `start..=stop` overlaps this point's range.
    pub const fn covers(&self, start: u32, stop: u32) -> bool {
        start <= self.stop_index && stop >= self.start_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let config = RemoteConfig::from_attributes(&Attributes::new()).unwrap();
        assert_eq!(config.tcp_port, DEFAULT_PORT);
        assert_eq!(config.reply_timeout, DEFAULT_REPLY_TIMEOUT);
        assert_eq!(config.serial_speed, DEFAULT_SERIAL_SPEED);
    }

    #[test]
    fn logical_devices_parse_both_forms() {
        let mut attributes = Attributes::new();
        attributes.add("LogicalDevice", "plant:12");
        attributes.add("LogicalDevice", "1024");
        let config = RemoteConfig::from_attributes(&attributes).unwrap();
        assert_eq!(
            config.logical_devices,
            vec![
                LogicalDevice {
                    name: Some("plant".to_owned()),
                    address: 12
                },
                LogicalDevice {
                    name: None,
                    address: 1024
                },
            ]
        );
    }

    #[test]
    fn wildcard_must_be_alone() {
        let mut attributes = Attributes::new();
        attributes.add("TCPAddress", "*");
        attributes.add("TCPAddress", "10.0.0.1");
        assert_eq!(
            RemoteConfig::from_attributes(&attributes).unwrap_err(),
            ConfigError::WildcardNotAlone
        );

        let mut attributes = Attributes::new();
        attributes.add("TCPAddress", "*");
        assert!(RemoteConfig::from_attributes(&attributes).is_ok());
    }

    #[test]
    fn reserved_addresses_are_rejected() {
        let mut attributes = Attributes::new();
        attributes.add("LogicalDevice", "65533");
        assert_eq!(
            RemoteConfig::from_attributes(&attributes).unwrap_err(),
            ConfigError::AddressOutOfRange(65533)
        );

        // 0xFFFC is the last assignable device address.
        let mut attributes = Attributes::new();
        attributes.add("LogicalDevice", "65532");
        let config = RemoteConfig::from_attributes(&attributes).unwrap();
        assert_eq!(config.first_address(), Some(0xFFFC));
    }

    #[test]
    fn point_ranges() {
        let point = PointConfig::range(
            PointId::from(1),
            PointType::AnalogInput,
            DataType::Int32,
            4,
            7,
        );
        assert_eq!(point.index_count(), 4);
        assert!(point.covers(5, 5));
        assert!(!point.covers(8, 9));
    }
}
