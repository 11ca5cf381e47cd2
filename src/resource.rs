//! VISA-style resource strings.
//!
//! | form                               | transport        |
//! |------------------------------------|------------------|
//! | `ASRL/dev/ttyUSB0::INSTR`          | serial port      |
//! | `TCPIP0::10.0.0.5::5025::SOCKET`   | raw TCP socket   |
//! | `TCPIP0::10.0.0.5::SOCKET`         | raw TCP socket on 5025 |
//! | `GPIB0::12::INSTR`, `USB0::...`    | VISA library     |
//! | `12`                               | `GPIB0::12::INSTR` |

use std::fmt;
use std::str::FromStr;

use crate::constants::SCPI_SOCKET_PORT;
use crate::error::InstrumentError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Serial { port: String },
    Socket { host: String, port: u16 },
    Visa(String),
}

impl Resource {
    /// Primary GPIB address on the first board
    pub fn gpib(address: u8) -> Self {
        Resource::Visa(format!("GPIB0::{}::INSTR", address))
    }
}

fn malformed(s: &str, why: &str) -> InstrumentError {
    InstrumentError::Connection(format!("Malformed resource string {:?}: {}", s, why))
}

impl FromStr for Resource {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(malformed(s, "empty"));
        }
        if let Ok(address) = s.parse::<u8>() {
            return Ok(Resource::gpib(address));
        }

        let parts: Vec<&str> = s.split("::").collect();
        let interface = parts[0].to_ascii_uppercase();
        let last = parts[parts.len() - 1].to_ascii_uppercase();

        if interface.starts_with("ASRL") {
            let port = &parts[0][4..];
            if parts.len() != 2 || last != "INSTR" || port.is_empty() {
                return Err(malformed(s, "expected ASRL<port>::INSTR"));
            }
            return Ok(Resource::Serial {
                port: port.to_owned(),
            });
        }

        if interface.starts_with("TCPIP") && last == "SOCKET" {
            if !(3..=4).contains(&parts.len()) || parts[1].is_empty() {
                return Err(malformed(s, "expected TCPIP[n]::<host>[::<port>]::SOCKET"));
            }
            let port = match parts.len() {
                4 => parts[2]
                    .parse::<u16>()
                    .map_err(|_| malformed(s, "socket port is not a number"))?,
                _ => SCPI_SOCKET_PORT,
            };
            return Ok(Resource::Socket {
                host: parts[1].to_owned(),
                port,
            });
        }

        let is_visa = ["GPIB", "USB", "TCPIP", "VXI", "PXI"]
            .iter()
            .any(|prefix| interface.starts_with(prefix));
        if is_visa && parts.len() >= 2 && last == "INSTR" {
            return Ok(Resource::Visa(s.to_owned()));
        }

        Err(malformed(s, "unrecognised interface"))
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Serial { port } => write!(f, "ASRL{}::INSTR", port),
            Resource::Socket { host, port } => write!(f, "TCPIP0::{}::{}::SOCKET", host, port),
            Resource::Visa(name) => write!(f, "{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serial_ports() {
        assert_eq!(
            "ASRL/dev/ttyUSB0::INSTR".parse::<Resource>().unwrap(),
            Resource::Serial {
                port: "/dev/ttyUSB0".to_owned()
            }
        );
        assert_eq!(
            "asrlCOM3::instr".parse::<Resource>().unwrap(),
            Resource::Serial {
                port: "COM3".to_owned()
            }
        );
    }

    #[test]
    fn parses_sockets() {
        let resource: Resource = "TCPIP0::192.168.1.20::5025::SOCKET".parse().unwrap();
        assert_eq!(
            resource,
            Resource::Socket {
                host: "192.168.1.20".to_owned(),
                port: 5025
            }
        );
        assert_eq!(resource.to_string(), "TCPIP0::192.168.1.20::5025::SOCKET");

        let resource: Resource = "TCPIP::awg.lab::SOCKET".parse().unwrap();
        assert_eq!(
            resource,
            Resource::Socket {
                host: "awg.lab".to_owned(),
                port: SCPI_SOCKET_PORT
            }
        );
    }

    #[test]
    fn integer_is_gpib_shorthand() {
        assert_eq!(
            "12".parse::<Resource>().unwrap(),
            Resource::Visa("GPIB0::12::INSTR".to_owned())
        );
    }

    #[test]
    fn visa_forms_are_kept_verbatim() {
        for name in [
            "GPIB0::5::INSTR",
            "USB0::0x0957::0x2807::MY123::INSTR",
            "TCPIP0::10.0.0.2::inst0::INSTR",
        ] {
            assert_eq!(
                name.parse::<Resource>().unwrap(),
                Resource::Visa(name.to_owned())
            );
        }
    }

    #[test]
    fn rejects_malformed_strings() {
        for bad in ["", "ASRL::INSTR", "TCPIP0::host::port::SOCKET", "FOO::1::INSTR", "GPIB0::5"] {
            assert!(
                matches!(bad.parse::<Resource>(), Err(InstrumentError::Connection(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
