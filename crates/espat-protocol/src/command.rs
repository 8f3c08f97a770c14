//! Typed ESP-AT commands
//!
//! A command line is matched by exact string first (`AT`, `AT+CIFSR`,
//! `AT+CWMODE?`, ...) and then by the longest `KEY=` prefix. Arguments of
//! prefix commands are tokenized with [`split_params`] and validated here, so
//! the engine only ever sees well-formed values.

use std::fmt;

use crate::error::ParseError;
use crate::params::{split_params, Param};
use crate::{MAX_CONNECTIONS, MAX_SERVER_TIMEOUT_SECS};

/// Port used by `AT+CIPSERVER=1` when none is given
pub const DEFAULT_SERVER_PORT: u16 = 333;

/// Transport requested by `AT+CIPSTART`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportKind {
    /// TCP stream
    Tcp,
    /// UDP datagrams bound to one remote peer
    Udp,
    /// TLS over TCP (`"SSL"` on the wire)
    Ssl,
}

impl TransportKind {
    /// Wire name used in `AT+CIPSTART` and `+CIPSTATUS`
    pub fn name(&self) -> &'static str {
        match self {
            TransportKind::Tcp => "TCP",
            TransportKind::Udp => "UDP",
            TransportKind::Ssl => "SSL",
        }
    }

    /// Parse a wire name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "TCP" => Some(TransportKind::Tcp),
            "UDP" => Some(TransportKind::Udp),
            "SSL" | "TLS" => Some(TransportKind::Ssl),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arguments of `AT+CIPSTART`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartParams {
    /// Link ID (only present in multiplexed mode)
    pub link_id: Option<u8>,
    /// Transport to open
    pub kind: TransportKind,
    /// Remote host name or address
    pub remote_host: String,
    /// Remote port
    pub remote_port: u16,
    /// TCP keep-alive interval in seconds
    pub keep_alive_secs: Option<u16>,
    /// Local address to bind before connecting
    pub local_ip: Option<String>,
}

/// A parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtCommand {
    /// `AT`
    Attention,
    /// `AT+RST`
    Reset,
    /// `AT+GMR`
    Version,
    /// `ATE0` / `ATE1`
    Echo(bool),
    /// `AT+CWMODE=<0-3>`
    SetWifiMode(u8),
    /// `AT+CWMODE?`
    QueryWifiMode,
    /// `AT+CWDHCP=...`
    SetDhcp,
    /// `AT+CWLAP`
    ListAccessPoints,
    /// `AT+CWJAP="<ssid>","<pwd>"`
    JoinAccessPoint {
        /// Network name
        ssid: String,
        /// Passphrase
        password: String,
    },
    /// `AT+CWQAP`
    QuitAccessPoint,
    /// `AT+CIPSTA?`
    QueryStationAddress,
    /// `AT+CIFSR`
    QueryLocalAddress,
    /// `AT+CIPMUX=<0|1>`
    SetMultiplex(bool),
    /// `AT+CIPMUX?`
    QueryMultiplex,
    /// `AT+CIPSERVER=<0|1>[,<port>]`
    Server {
        /// Start (true) or stop (false)
        enable: bool,
        /// Listening port
        port: u16,
    },
    /// `AT+CIPSERVERMAXCONN=<n>`
    ServerMaxConnections(u8),
    /// `AT+CIPSTATUS`
    Status,
    /// `AT+CIPSTO=<0-7200>`
    SetServerTimeout(u16),
    /// `AT+CIPSTO?`
    QueryServerTimeout,
    /// `AT+CIPSTART=...`
    Start(StartParams),
    /// `AT+CIPSEND=[<link>,]<size>`
    Send {
        /// Link ID (only present in multiplexed mode)
        link_id: Option<u8>,
        /// Requested payload size, before clamping
        size: usize,
    },
    /// `AT+CIPCLOSE[=<link>]`
    Close {
        /// Link ID (absent in single-connection mode)
        link_id: Option<u8>,
    },
    /// `AT+CIPRECVMODE=<0|1>`
    SetReceiveMode(u8),
    /// `AT+CIPRECVLEN?`
    QueryReceiveLength,
    /// `AT+CIPRECVDATA=<link>,<len>`
    ReceiveData {
        /// Link to drain
        link_id: u8,
        /// Maximum number of bytes to return
        len: usize,
    },
}

/// Commands matched against the whole line
fn parse_exact(line: &str) -> Option<AtCommand> {
    let cmd = match line {
        "AT" => AtCommand::Attention,
        "AT+RST" => AtCommand::Reset,
        "AT+GMR" => AtCommand::Version,
        "ATE0" => AtCommand::Echo(false),
        "ATE1" => AtCommand::Echo(true),
        "AT+CWMODE?" => AtCommand::QueryWifiMode,
        "AT+CWLAP" => AtCommand::ListAccessPoints,
        "AT+CWQAP" => AtCommand::QuitAccessPoint,
        "AT+CIPSTA?" => AtCommand::QueryStationAddress,
        "AT+CIFSR" => AtCommand::QueryLocalAddress,
        "AT+CIPMUX?" => AtCommand::QueryMultiplex,
        "AT+CIPSTATUS" => AtCommand::Status,
        "AT+CIPSTO?" => AtCommand::QueryServerTimeout,
        "AT+CIPCLOSE" => AtCommand::Close { link_id: None },
        "AT+CIPRECVLEN?" => AtCommand::QueryReceiveLength,
        _ => return None,
    };
    Some(cmd)
}

type ArgParser = fn(&[Param]) -> Result<AtCommand, ParseError>;

/// Commands matched by `KEY=` prefix, arguments parsed from the remainder
const PREFIXED: &[(&str, ArgParser)] = &[
    ("AT+CWMODE=", parse_wifi_mode),
    ("AT+CWDHCP=", parse_dhcp),
    ("AT+CWJAP=", parse_join),
    ("AT+CIPMUX=", parse_multiplex),
    ("AT+CIPSERVER=", parse_server),
    ("AT+CIPSERVERMAXCONN=", parse_max_conn),
    ("AT+CIPSTO=", parse_server_timeout),
    ("AT+CIPSTART=", parse_start),
    ("AT+CIPSEND=", parse_send),
    ("AT+CIPCLOSE=", parse_close),
    ("AT+CIPRECVMODE=", parse_receive_mode),
    ("AT+CIPRECVDATA=", parse_receive_data),
];

impl AtCommand {
    /// Parse a trimmed command line
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        if let Some(cmd) = parse_exact(line) {
            return Ok(cmd);
        }

        let (key, parse_args) = PREFIXED
            .iter()
            .filter(|(key, _)| line.starts_with(*key))
            .max_by_key(|(key, _)| key.len())
            .ok_or_else(|| ParseError::UnknownCommand(line.to_string()))?;

        let params = split_params(&line[key.len()..])?;
        parse_args(params.as_slice())
    }

    /// Short name of the command for logging
    pub fn name(&self) -> &'static str {
        match self {
            AtCommand::Attention => "AT",
            AtCommand::Reset => "RST",
            AtCommand::Version => "GMR",
            AtCommand::Echo(_) => "ATE",
            AtCommand::SetWifiMode(_) | AtCommand::QueryWifiMode => "CWMODE",
            AtCommand::SetDhcp => "CWDHCP",
            AtCommand::ListAccessPoints => "CWLAP",
            AtCommand::JoinAccessPoint { .. } => "CWJAP",
            AtCommand::QuitAccessPoint => "CWQAP",
            AtCommand::QueryStationAddress => "CIPSTA",
            AtCommand::QueryLocalAddress => "CIFSR",
            AtCommand::SetMultiplex(_) | AtCommand::QueryMultiplex => "CIPMUX",
            AtCommand::Server { .. } => "CIPSERVER",
            AtCommand::ServerMaxConnections(_) => "CIPSERVERMAXCONN",
            AtCommand::Status => "CIPSTATUS",
            AtCommand::SetServerTimeout(_) | AtCommand::QueryServerTimeout => "CIPSTO",
            AtCommand::Start(_) => "CIPSTART",
            AtCommand::Send { .. } => "CIPSEND",
            AtCommand::Close { .. } => "CIPCLOSE",
            AtCommand::SetReceiveMode(_) => "CIPRECVMODE",
            AtCommand::QueryReceiveLength => "CIPRECVLEN",
            AtCommand::ReceiveData { .. } => "CIPRECVDATA",
        }
    }
}

fn expect_count(
    params: &[Param],
    command: &'static str,
    expected: &'static str,
    allowed: std::ops::RangeInclusive<usize>,
) -> Result<(), ParseError> {
    if allowed.contains(&params.len()) {
        Ok(())
    } else {
        Err(ParseError::ParameterCount {
            command,
            expected,
            actual: params.len(),
        })
    }
}

fn parse_link_id(param: &Param) -> Result<u8, ParseError> {
    Ok(param.as_ranged("link_id", 0, MAX_CONNECTIONS as u64 - 1)? as u8)
}

fn parse_wifi_mode(params: &[Param]) -> Result<AtCommand, ParseError> {
    expect_count(params, "CWMODE", "1", 1..=1)?;
    Ok(AtCommand::SetWifiMode(params[0].as_ranged("mode", 0, 3)? as u8))
}

fn parse_dhcp(_params: &[Param]) -> Result<AtCommand, ParseError> {
    Ok(AtCommand::SetDhcp)
}

fn parse_join(params: &[Param]) -> Result<AtCommand, ParseError> {
    expect_count(params, "CWJAP", "2", 2..=2)?;
    let ssid = params[0].as_quoted("ssid")?;
    if ssid.is_empty() {
        return Err(ParseError::InvalidParameter {
            name: "ssid",
            value: String::new(),
        });
    }
    Ok(AtCommand::JoinAccessPoint {
        ssid: ssid.to_string(),
        password: params[1].as_quoted("password")?.to_string(),
    })
}

fn parse_multiplex(params: &[Param]) -> Result<AtCommand, ParseError> {
    expect_count(params, "CIPMUX", "1", 1..=1)?;
    Ok(AtCommand::SetMultiplex(params[0].as_ranged("mode", 0, 1)? == 1))
}

fn parse_server(params: &[Param]) -> Result<AtCommand, ParseError> {
    expect_count(params, "CIPSERVER", "1-2", 1..=2)?;
    let enable = params[0].as_ranged("mode", 0, 1)? == 1;
    if !enable {
        // Second field of mode 0 is the close-all flag, which is not modelled
        return Ok(AtCommand::Server {
            enable,
            port: DEFAULT_SERVER_PORT,
        });
    }
    let port = match params.get(1) {
        Some(p) => p.as_ranged("port", 1, u16::MAX as u64)? as u16,
        None => DEFAULT_SERVER_PORT,
    };
    Ok(AtCommand::Server { enable, port })
}

fn parse_max_conn(params: &[Param]) -> Result<AtCommand, ParseError> {
    expect_count(params, "CIPSERVERMAXCONN", "1", 1..=1)?;
    Ok(AtCommand::ServerMaxConnections(
        params[0].as_ranged("num", 1, MAX_CONNECTIONS as u64)? as u8,
    ))
}

fn parse_server_timeout(params: &[Param]) -> Result<AtCommand, ParseError> {
    expect_count(params, "CIPSTO", "1", 1..=1)?;
    Ok(AtCommand::SetServerTimeout(
        params[0].as_ranged("time", 0, MAX_SERVER_TIMEOUT_SECS as u64)? as u16,
    ))
}

fn parse_start(params: &[Param]) -> Result<AtCommand, ParseError> {
    expect_count(params, "CIPSTART", "3-6", 3..=6)?;

    // A leading bare number is the link ID; the transport is always quoted
    let (link_id, rest) = if params[0].is_numeric() {
        (Some(parse_link_id(&params[0])?), &params[1..])
    } else {
        (None, params)
    };
    expect_count(rest, "CIPSTART", "3-5 after link ID", 3..=5)?;

    let kind_name = rest[0].as_quoted("type")?;
    let kind = TransportKind::from_name(kind_name).ok_or_else(|| ParseError::InvalidParameter {
        name: "type",
        value: kind_name.to_string(),
    })?;

    let remote_host = rest[1].as_quoted("remote_host")?;
    if remote_host.is_empty() {
        return Err(ParseError::InvalidParameter {
            name: "remote_host",
            value: String::new(),
        });
    }

    let remote_port = rest[2].as_ranged("remote_port", 1, u16::MAX as u64)? as u16;

    let keep_alive_secs = match rest.get(3) {
        Some(p) if !p.value.is_empty() => {
            Some(p.as_ranged("keep_alive", 0, MAX_SERVER_TIMEOUT_SECS as u64)? as u16)
        }
        _ => None,
    };

    let local_ip = match rest.get(4) {
        Some(p) if !p.value.is_empty() => Some(p.as_quoted("local_ip")?.to_string()),
        _ => None,
    };

    Ok(AtCommand::Start(StartParams {
        link_id,
        kind,
        remote_host: remote_host.to_string(),
        remote_port,
        keep_alive_secs,
        local_ip,
    }))
}

fn parse_send(params: &[Param]) -> Result<AtCommand, ParseError> {
    let (link_id, size) = match params {
        [size] => (None, size),
        [link, size] => (Some(parse_link_id(link)?), size),
        _ => {
            return Err(ParseError::ParameterCount {
                command: "CIPSEND",
                expected: "1-2",
                actual: params.len(),
            })
        }
    };
    let size = size.as_number("length")?;
    if size == 0 {
        return Err(ParseError::OutOfRange {
            name: "length",
            value: 0,
        });
    }
    Ok(AtCommand::Send {
        link_id,
        size: usize::try_from(size).unwrap_or(usize::MAX),
    })
}

fn parse_close(params: &[Param]) -> Result<AtCommand, ParseError> {
    expect_count(params, "CIPCLOSE", "1", 1..=1)?;
    Ok(AtCommand::Close {
        link_id: Some(parse_link_id(&params[0])?),
    })
}

fn parse_receive_mode(params: &[Param]) -> Result<AtCommand, ParseError> {
    expect_count(params, "CIPRECVMODE", "1", 1..=1)?;
    Ok(AtCommand::SetReceiveMode(
        params[0].as_ranged("mode", 0, 1)? as u8,
    ))
}

fn parse_receive_data(params: &[Param]) -> Result<AtCommand, ParseError> {
    expect_count(params, "CIPRECVDATA", "2", 2..=2)?;
    let link_id = parse_link_id(&params[0])?;
    let len = params[1].as_number("len")?;
    Ok(AtCommand::ReceiveData {
        link_id,
        len: usize::try_from(len).unwrap_or(usize::MAX),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_commands() {
        assert_eq!(AtCommand::parse("AT"), Ok(AtCommand::Attention));
        assert_eq!(AtCommand::parse("AT+RST"), Ok(AtCommand::Reset));
        assert_eq!(AtCommand::parse("AT+CWMODE?"), Ok(AtCommand::QueryWifiMode));
        assert_eq!(AtCommand::parse("ATE0"), Ok(AtCommand::Echo(false)));
        assert_eq!(
            AtCommand::parse("AT+CIPCLOSE"),
            Ok(AtCommand::Close { link_id: None })
        );
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        assert!(matches!(
            AtCommand::parse("at"),
            Err(ParseError::UnknownCommand(_))
        ));
        assert!(AtCommand::parse("AT+cwmode=1").is_err());
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            AtCommand::parse("AT+FOO"),
            Err(ParseError::UnknownCommand("AT+FOO".into()))
        );
        // Exact-only commands do not match as prefixes
        assert!(AtCommand::parse("AT+GMRX").is_err());
    }

    #[test]
    fn test_longest_prefix_wins() {
        assert_eq!(
            AtCommand::parse("AT+CIPSERVERMAXCONN=2"),
            Ok(AtCommand::ServerMaxConnections(2))
        );
        assert_eq!(
            AtCommand::parse("AT+CIPSERVER=1,8080"),
            Ok(AtCommand::Server {
                enable: true,
                port: 8080
            })
        );
    }

    #[test]
    fn test_server_default_port() {
        assert_eq!(
            AtCommand::parse("AT+CIPSERVER=1"),
            Ok(AtCommand::Server {
                enable: true,
                port: DEFAULT_SERVER_PORT
            })
        );
        assert!(AtCommand::parse("AT+CIPSERVER=2,80").is_err());
    }

    #[test]
    fn test_server_stop_ignores_close_flag() {
        for line in ["AT+CIPSERVER=0", "AT+CIPSERVER=0,0", "AT+CIPSERVER=0,1"] {
            assert!(
                matches!(
                    AtCommand::parse(line),
                    Ok(AtCommand::Server { enable: false, .. })
                ),
                "{} should stop the server",
                line
            );
        }
    }

    #[test]
    fn test_wifi_mode_range() {
        assert_eq!(AtCommand::parse("AT+CWMODE=3"), Ok(AtCommand::SetWifiMode(3)));
        assert!(AtCommand::parse("AT+CWMODE=4").is_err());
        assert!(AtCommand::parse("AT+CWMODE=").is_err());
        assert!(AtCommand::parse("AT+CWMODE=x").is_err());
    }

    #[test]
    fn test_join_requires_quotes() {
        assert_eq!(
            AtCommand::parse(r#"AT+CWJAP="home","secret""#),
            Ok(AtCommand::JoinAccessPoint {
                ssid: "home".into(),
                password: "secret".into()
            })
        );
        assert!(AtCommand::parse("AT+CWJAP=home,secret").is_err());
        assert!(AtCommand::parse(r#"AT+CWJAP="home""#).is_err());
        assert!(AtCommand::parse(r#"AT+CWJAP="home,"secret""#).is_err());
    }

    #[test]
    fn test_start_multiplexed() {
        let cmd = AtCommand::parse(r#"AT+CIPSTART=0,"TCP","127.0.0.1",9000"#).unwrap();
        assert_eq!(
            cmd,
            AtCommand::Start(StartParams {
                link_id: Some(0),
                kind: TransportKind::Tcp,
                remote_host: "127.0.0.1".into(),
                remote_port: 9000,
                keep_alive_secs: None,
                local_ip: None,
            })
        );
    }

    #[test]
    fn test_start_single_with_options() {
        let cmd =
            AtCommand::parse(r#"AT+CIPSTART="SSL","example.com",443,120,"192.168.0.2""#).unwrap();
        let AtCommand::Start(params) = cmd else {
            panic!("expected Start");
        };
        assert_eq!(params.link_id, None);
        assert_eq!(params.kind, TransportKind::Ssl);
        assert_eq!(params.keep_alive_secs, Some(120));
        assert_eq!(params.local_ip.as_deref(), Some("192.168.0.2"));
    }

    #[test]
    fn test_start_rejects_bad_arguments() {
        // Link ID out of range
        assert!(AtCommand::parse(r#"AT+CIPSTART=5,"TCP","1.2.3.4",80"#).is_err());
        // Unknown transport
        assert!(AtCommand::parse(r#"AT+CIPSTART=0,"FTP","1.2.3.4",80"#).is_err());
        // Port out of range
        assert!(AtCommand::parse(r#"AT+CIPSTART=0,"TCP","1.2.3.4",70000"#).is_err());
        assert!(AtCommand::parse(r#"AT+CIPSTART=0,"TCP","1.2.3.4",0"#).is_err());
        // Too few parameters
        assert!(AtCommand::parse("AT+CIPSTART=0").is_err());
        // Empty host
        assert!(AtCommand::parse(r#"AT+CIPSTART=0,"TCP","",80"#).is_err());
    }

    #[test]
    fn test_send_forms() {
        assert_eq!(
            AtCommand::parse("AT+CIPSEND=0,4"),
            Ok(AtCommand::Send {
                link_id: Some(0),
                size: 4
            })
        );
        assert_eq!(
            AtCommand::parse("AT+CIPSEND=5000"),
            Ok(AtCommand::Send {
                link_id: None,
                size: 5000
            })
        );
        assert!(AtCommand::parse("AT+CIPSEND=0,0").is_err());
        assert!(AtCommand::parse("AT+CIPSEND=9,4").is_err());
    }

    #[test]
    fn test_receive_commands() {
        assert_eq!(
            AtCommand::parse("AT+CIPRECVDATA=2,10"),
            Ok(AtCommand::ReceiveData { link_id: 2, len: 10 })
        );
        assert_eq!(
            AtCommand::parse("AT+CIPRECVMODE=1"),
            Ok(AtCommand::SetReceiveMode(1))
        );
        assert_eq!(
            AtCommand::parse("AT+CIPRECVLEN?"),
            Ok(AtCommand::QueryReceiveLength)
        );
    }

    #[test]
    fn test_server_timeout_range() {
        assert_eq!(
            AtCommand::parse("AT+CIPSTO=7200"),
            Ok(AtCommand::SetServerTimeout(7200))
        );
        assert!(AtCommand::parse("AT+CIPSTO=7201").is_err());
    }

    #[test]
    fn test_transport_names() {
        assert_eq!(TransportKind::from_name("udp"), Some(TransportKind::Udp));
        assert_eq!(TransportKind::Ssl.to_string(), "SSL");
        assert_eq!(TransportKind::from_name("SCTP"), None);
    }
}
