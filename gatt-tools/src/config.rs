use eyre::{bail, Report};
use gatt_stream::MacAddress;
use serde::{Deserialize as _, Deserializer};
use serde_derive::Deserialize;
use stable_eyre::eyre::WrapErr;
use std::collections::HashMap;
use std::fs::read_to_string;
use std::path::Path;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_DEVICE_NAMES_FILENAME: &str = "device-names.toml";
const CONFIG_FILENAME: &str = "gatt-tools.toml";

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// How long to stream notifications for, if not given on the command line.
    #[serde(deserialize_with = "de_duration_seconds", rename = "timeout_seconds")]
    pub timeout: Duration,
    /// How long to scan for, if not given on the command line.
    #[serde(deserialize_with = "de_duration_seconds", rename = "scan_seconds")]
    pub scan_duration: Duration,
    /// Whether to write activation commands as requests rather than commands.
    pub write_with_response: bool,
    pub device_names_filename: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            timeout: DEFAULT_TIMEOUT,
            scan_duration: DEFAULT_SCAN_DURATION,
            write_with_response: false,
            device_names_filename: DEFAULT_DEVICE_NAMES_FILENAME.to_owned(),
        }
    }
}

impl Config {
    /// Read the config from the given file, or from `gatt-tools.toml` in the current directory if
    /// it exists. Falls back to defaults if no file is given and there is none there.
    pub fn from_file(path: Option<&Path>) -> Result<Config, Report> {
        match path {
            Some(path) => Config::read(path),
            None => {
                let default_path = Path::new(CONFIG_FILENAME);
                if default_path.exists() {
                    Config::read(default_path)
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    fn read(path: &Path) -> Result<Config, Report> {
        let config_file =
            read_to_string(path).wrap_err_with(|| format!("Reading {}", path.display()))?;
        toml::from_str(&config_file).wrap_err_with(|| format!("Parsing {}", path.display()))
    }

    /// Read the device names file, if there is one.
    pub fn device_names(&self) -> Result<HashMap<MacAddress, String>, Report> {
        if Path::new(&self.device_names_filename).exists() {
            read_device_names(&self.device_names_filename)
        } else {
            Ok(HashMap::new())
        }
    }
}

pub fn de_duration_seconds<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let seconds = u64::deserialize(d)?;
    Ok(Duration::from_secs(seconds))
}

pub fn read_device_names(filename: &str) -> Result<HashMap<MacAddress, String>, Report> {
    let device_names_file =
        read_to_string(filename).wrap_err_with(|| format!("Reading {filename}"))?;
    parse_device_names(&device_names_file).wrap_err_with(|| format!("Parsing {filename}"))
}

fn parse_device_names(contents: &str) -> Result<HashMap<MacAddress, String>, Report> {
    toml::from_str::<HashMap<String, String>>(contents)?
        .into_iter()
        .map(|(mac_address, name)| {
            let parsed = mac_address
                .parse::<MacAddress>()
                .wrap_err_with(|| format!("Invalid MAC address '{mac_address}'"))?;
            Ok::<_, Report>((parsed, name))
        })
        .collect()
}

/// Interpret a command-line target as either a MAC address or the configured name of a device.
pub fn resolve_address(
    target: &str,
    names: &HashMap<MacAddress, String>,
) -> Result<MacAddress, Report> {
    if let Ok(mac_address) = target.parse() {
        return Ok(mac_address);
    }
    let matches: Vec<&MacAddress> = names
        .iter()
        .filter(|(_, name)| name.eq_ignore_ascii_case(target))
        .map(|(mac_address, _)| mac_address)
        .collect();
    match matches[..] {
        [mac_address] => Ok(*mac_address),
        [] => bail!("'{}' is neither a MAC address nor a known device name", target),
        _ => bail!("More than one device is named '{}'", target),
    }
}

/// The name to show for a device: the configured name, then the advertised name.
pub fn display_name<'a>(
    mac_address: &MacAddress,
    advertised: Option<&'a str>,
    names: &'a HashMap<MacAddress, String>,
) -> Option<&'a str> {
    names
        .get(mac_address)
        .map(String::as_str)
        .or(advertised.filter(|name| !name.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parsing the example config file should not give any errors.
    #[test]
    fn example_config() {
        let config = Config::read(Path::new("gatt-tools.example.toml")).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(!config.write_with_response);
    }

    /// Parsing an empty config file should not give any errors.
    #[test]
    fn empty_config() {
        let config = toml::from_str::<Config>("").unwrap();
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.scan_duration, DEFAULT_SCAN_DURATION);
        assert_eq!(config.device_names_filename, DEFAULT_DEVICE_NAMES_FILENAME);
    }

    #[test]
    fn unknown_key() {
        assert!(toml::from_str::<Config>("timeout = 5").is_err());
    }

    /// Parsing the example device names file should not give any errors.
    #[test]
    fn example_device_names() {
        let names = read_device_names("device-names.example.toml").unwrap();
        assert!(!names.is_empty());
    }

    #[test]
    fn invalid_device_address() {
        assert!(parse_device_names(r#""kitchen" = "Kitchen probe""#).is_err());
    }

    #[test]
    fn resolve_by_address_or_name() {
        let names = parse_device_names(r#""A4:C1:38:12:34:56" = "Kitchen probe""#).unwrap();
        let kitchen: MacAddress = "A4:C1:38:12:34:56".parse().unwrap();

        assert_eq!(resolve_address("A4:C1:38:12:34:56", &names).unwrap(), kitchen);
        assert_eq!(resolve_address("kitchen PROBE", &names).unwrap(), kitchen);
        assert!(resolve_address("Garden probe", &names).is_err());
    }

    #[test]
    fn configured_name_wins() {
        let names = parse_device_names(r#""A4:C1:38:12:34:56" = "Kitchen probe""#).unwrap();
        let kitchen: MacAddress = "A4:C1:38:12:34:56".parse().unwrap();
        let other: MacAddress = "11:22:33:44:55:66".parse().unwrap();

        assert_eq!(
            display_name(&kitchen, Some("LYWSD03MMC"), &names),
            Some("Kitchen probe")
        );
        assert_eq!(display_name(&other, Some("Probe"), &names), Some("Probe"));
        assert_eq!(display_name(&other, Some(" "), &names), None);
        assert_eq!(display_name(&other, None, &names), None);
    }
}
