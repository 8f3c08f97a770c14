//! Response and notification encoding
//!
//! Every reply the modem writes is produced here so framing stays bit-exact
//! with what ESP8266 host tooling expects. Leading and trailing `\r\n`
//! placement differs per command and must not be normalized.

use crate::command::TransportKind;
use crate::MAX_CONNECTIONS;

/// Generic success
pub const OK: &[u8] = b"\r\n\r\nOK\r\n";
/// Generic failure
pub const ERROR: &[u8] = b"\r\n\r\nERROR\r\n";
/// Bare success used by echo, server and receive-mode commands
pub const OK_SHORT: &[u8] = b"OK\r\n";
/// Bare failure counterpart of [`OK_SHORT`]
pub const ERROR_SHORT: &[u8] = b"ERROR\r\n";

/// Firmware identification returned by `AT+GMR`
pub const VERSION: &[u8] = b"\r\nAT version:0.51.0.0(Nov 27 2015 13:37:21)\r\n\
SDK version:1.5.0\r\n\
compile time:Nov 27 2015 13:58:02\r\n\
\r\nOK\r\n";

/// Fixed scan result for `AT+CWLAP`
pub const ACCESS_POINTS: &[u8] = b"\r\n\
+CWLAP:(4,\"rede1\",-91,\"30:b5:c2:2b:58:de\",1)\r\n\
+CWLAP:(0,\"netmail12\",-88,\"00:0c:42:18:c6:4c\",2)\r\n\
+CWLAP:(0,\"netmail10\",-91,\"00:0c:42:1f:1d:81\",7)\r\n\
+CWLAP:(0,\"netmail11\",-84,\"00:0c:42:1f:73:2e\",9)\r\n\
\r\nOK\r\n";

/// Fixed station addressing for `AT+CIPSTA?`
pub const STATION_ADDRESS: &[u8] = b"\r\n\
+CIPSTA:ip:192.168.0.2\r\n\
+CIPSTA:gateway:192.168.0.1\r\n\
+CIPSTA:netmask:255.255.255.0\r\n\
\r\nOK\r\n";

/// Successful `AT+CWJAP`
pub const WIFI_CONNECTED: &[u8] = b"\r\n\r\nWIFI CONNECTED\r\nWIFI GOT IP\r\n\r\nOK\r\n";

/// Duplicate `AT+CIPSTART` on a live link
pub const ALREADY_CONNECTED: &[u8] = b"\r\nALREADY CONNECTED\r\n\r\nERROR\r\n";

/// Prompt asking the host for the `AT+CIPSEND` payload
pub const SEND_PROMPT: &[u8] = b"\r\n\r\nOK\r\n> ";

/// Payload could not be delivered
pub const SEND_FAIL: &[u8] = b"\r\nSEND FAIL\r\n";

/// `AT+CIPRECVDATA` with nothing buffered
pub const RECEIVE_EMPTY: &[u8] = b"\r\n+CIPRECVDATA:0:\r\n\r\nOK\r\n";

/// ROM log printed by an ESP8266 after reset
pub const BOOT_BANNER: &[u8] = b"WIFI DISCONNECT\r\n\r\n \
ets Jan  8 2013,rst cause:1, boot mode:(3,7)\r\n\r\n\
load 0x40100000, len 1396, room 16\r\n\
tail 4\r\n\
chksum 0x89\r\n\
load 0x3ffe8000, len 776, room 4\r\n\
tail 4\r\n\
chksum 0xe8\r\n\
load 0x3ffe8308, len 540, room 4\r\n\
tail 8\r\n\
chksum 0xc0\r\n\
csum 0xc0\r\n\r\n\
2nd boot version : 1.4(b1)\r\n  \
SPI Speed      : 40MHz\r\n  \
SPI Mode       : QIO\r\n  \
SPI Flash Size & Map: 8Mbit(512KB+512KB)\r\n\
jump to run user1 @ 1000\r\n\r\n\
ready\r\n";

/// One row of `AT+CIPSTATUS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub link_id: u8,
    pub kind: TransportKind,
    pub remote_ip: String,
    pub remote_port: u16,
    pub local_port: u16,
    /// Accepted by the local server (as opposed to dialed)
    pub is_server: bool,
}

/// `+CWMODE:<mode>`
pub fn wifi_mode(mode: u8) -> Vec<u8> {
    format!("\r\n+CWMODE:{}\r\n\r\nOK\r\n", mode).into_bytes()
}

/// `+CIFSR:STAIP` and `+CIFSR:STAMAC`
pub fn local_address(ip: &str, mac: &str) -> Vec<u8> {
    format!(
        "\r\n+CIFSR:STAIP,\"{}\"\r\n+CIFSR:STAMAC,\"{}\"\r\n\r\nOK\r\n",
        ip, mac
    )
    .into_bytes()
}

/// `+CIPMUX:<0|1>`
pub fn multiplex(enabled: bool) -> Vec<u8> {
    format!("\r\n+CIPMUX:{}\r\n\r\nOK\r\n", u8::from(enabled)).into_bytes()
}

/// `+CIPSTO:<seconds>`
pub fn server_timeout(secs: u16) -> Vec<u8> {
    format!("\r\n+CIPSTO:{}\r\n\r\nOK\r\n", secs).into_bytes()
}

/// Connection table for `AT+CIPSTATUS`
///
/// Status 3 means at least one transport is open, 2 means none.
pub fn status(entries: &[StatusEntry]) -> Vec<u8> {
    let code = if entries.is_empty() { 2 } else { 3 };
    let mut out = format!("\r\nSTATUS:{}\r\n", code);
    for e in entries {
        out.push_str(&format!(
            "+CIPSTATUS:{},\"{}\",\"{}\",{},{},{}\r\n",
            e.link_id,
            e.kind,
            e.remote_ip,
            e.remote_port,
            e.local_port,
            u8::from(e.is_server)
        ));
    }
    out.push_str("\r\nOK\r\n");
    out.into_bytes()
}

/// Reply to a successful `AT+CIPSTART`
pub fn connected(link_id: Option<u8>) -> Vec<u8> {
    match link_id {
        Some(id) => format!("\r\n{},CONNECT\r\n\r\nOK\r\n", id).into_bytes(),
        None => b"\r\nCONNECT\r\n\r\nOK\r\n".to_vec(),
    }
}

/// Reply to `AT+CIPCLOSE`
pub fn closed(link_id: Option<u8>) -> Vec<u8> {
    match link_id {
        Some(id) => format!("\r\n{},CLOSED\r\n\r\nOK\r\n", id).into_bytes(),
        None => b"\r\nCLOSED\r\n\r\nOK\r\n".to_vec(),
    }
}

/// Acknowledgement once a `AT+CIPSEND` payload has been written
pub fn send_ack(len: usize) -> Vec<u8> {
    format!("\r\nRecv {} bytes\r\n\r\nSEND OK\r\n", len).into_bytes()
}

/// `+CIPRECVLEN` with one entry per link slot
pub fn receive_lengths(lengths: &[usize; MAX_CONNECTIONS]) -> Vec<u8> {
    let joined = lengths
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("\r\n+CIPRECVLEN:{}\r\n\r\nOK\r\n", joined).into_bytes()
}

/// `+CIPRECVDATA` carrying buffered bytes verbatim
pub fn receive_data(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return RECEIVE_EMPTY.to_vec();
    }
    let mut out = format!("\r\n\r\n+CIPRECVDATA,{}:", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n\r\nOK\r\n");
    out
}

/// Unsolicited notice of a connection accepted by the server
pub fn accept_notice(link_id: Option<u8>) -> Vec<u8> {
    match link_id {
        Some(id) => format!("{},CONNECT\r\n\r\n", id).into_bytes(),
        None => b"CONNECT\r\n\r\n".to_vec(),
    }
}

/// Unsolicited notice that bytes are waiting in the receive buffer
pub fn data_notice(link_id: Option<u8>, len: usize) -> Vec<u8> {
    match link_id {
        Some(id) => format!("+IPD,{},{}\r\n", id, len).into_bytes(),
        None => format!("+IPD,{}\r\n", len).into_bytes(),
    }
}

/// Unsolicited notice of a closed link
pub fn close_notice(link_id: Option<u8>) -> Vec<u8> {
    match link_id {
        Some(id) => format!("{},CLOSED\r\n", id).into_bytes(),
        None => b"CLOSED\r\n".to_vec(),
    }
}
