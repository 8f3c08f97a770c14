//! AT command engine
//!
//! [`AtModem`] is the single owner of the modem configuration and the
//! connection table. Transport adapters hand it bytes through [`AtModem::feed`]
//! and write back whatever it returns; asynchronous output (socket activity,
//! the boot banner after a reset, an expired payload wait) is pulled with
//! [`AtModem::next_notification`].

use std::future::pending;

use espat_net::{ConnectionEvent, ConnectionManager, LinkId, Role};
use espat_protocol::response::{self, StatusEntry};
use espat_protocol::{
    AtCommand, Frame, HexDump, LineCodec, StartParams, MAX_CONNECTIONS, MAX_SEND_SIZE,
};
use tokio::sync::broadcast;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::settings::ModemSettings;
use crate::state::ModemConfig;

/// Capacity of the observer channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Activity reported to observers of a modem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemEvent {
    /// `AT+CIPSEND` accepted; the next `expected` bytes are payload
    RawCaptureRequested {
        /// Link the payload is for
        link_id: LinkId,
        /// Payload length after clamping
        expected: usize,
    },
    /// Payload collected and handed to the link
    RawCaptureCompleted {
        /// Link the payload was for
        link_id: LinkId,
        /// Bytes handed over
        received: usize,
    },
    /// Payload never completed and was discarded
    RawCaptureTimedOut {
        /// Link the payload was for
        link_id: LinkId,
    },
    /// Bytes written back to the host
    Output(Vec<u8>),
}

/// Payload wait armed by `AT+CIPSEND`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCapture {
    /// Link the payload is for
    pub link_id: LinkId,
    /// Number of payload bytes expected
    pub expected: usize,
    deadline: Option<Instant>,
}

/// Simulated ESP8266 running AT firmware
pub struct AtModem {
    config: ModemConfig,
    settings: ModemSettings,
    codec: LineCodec,
    connections: ConnectionManager,
    capture: Option<RawCapture>,
    boot_at: Option<Instant>,
    events_tx: broadcast::Sender<ModemEvent>,
}

impl AtModem {
    /// Create a modem in its power-on state
    pub fn new(settings: ModemSettings) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config: ModemConfig::new(settings.station_ip.clone(), settings.station_mac.clone()),
            settings,
            codec: LineCodec::new(),
            connections: ConnectionManager::new(),
            capture: None,
            boot_at: None,
            events_tx,
        }
    }

    /// Current configuration
    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    /// Settings the modem was created with
    pub fn settings(&self) -> &ModemSettings {
        &self.settings
    }

    /// Connection table, read-only
    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Payload wait in progress, if any
    pub fn capture(&self) -> Option<&RawCapture> {
        self.capture.as_ref()
    }

    /// Subscribe to modem activity
    pub fn subscribe(&self) -> broadcast::Receiver<ModemEvent> {
        self.events_tx.subscribe()
    }

    fn emit(&self, event: ModemEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    /// Process bytes from the host and return the bytes to write back
    ///
    /// Frames lines and payloads with the built-in codec, so adapters never
    /// need to track the line/raw switch themselves.
    pub async fn feed(&mut self, data: &[u8]) -> Vec<u8> {
        debug!("Host sent {} bytes\n{}", data.len(), HexDump(data));
        self.codec.push_bytes(data);
        // A send armed through submit_line still expects its payload here
        if let Some(capture) = &self.capture {
            if !self.codec.is_raw() {
                self.codec.begin_raw(capture.expected);
            }
        }

        let mut out = Vec::new();
        while let Some(frame) = self.codec.next_frame() {
            match frame {
                Frame::Line(line) => {
                    out.extend(self.submit_line(&line).await);
                    if let Some(capture) = &self.capture {
                        if !self.codec.is_raw() {
                            self.codec.begin_raw(capture.expected);
                        }
                    }
                }
                Frame::Raw(payload) => match self.capture.map(|c| c.link_id) {
                    Some(link_id) => {
                        if let Some(ack) = self.submit_raw(link_id, &payload).await {
                            out.extend(ack);
                        }
                    }
                    None => warn!("Discarding {} payload bytes, no send armed", payload.len()),
                },
            }
        }
        out
    }

    /// Execute one command line and return its response
    ///
    /// The line is trimmed; an empty line yields an empty response.
    pub async fn submit_line(&mut self, line: &str) -> Vec<u8> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }

        let reply = if self.capture.is_some() {
            warn!("Command {:?} received while waiting for payload", line);
            response::ERROR.to_vec()
        } else {
            match AtCommand::parse(line) {
                Ok(command) => {
                    debug!("Executing {}", command.name());
                    self.execute(command).await
                }
                Err(e) => {
                    debug!("Rejected {:?}: {}", line, e);
                    if has_short_replies(line) {
                        response::ERROR_SHORT.to_vec()
                    } else {
                        response::ERROR.to_vec()
                    }
                }
            }
        };

        self.emit(ModemEvent::Output(reply.clone()));
        reply
    }

    /// Deliver the payload announced by `AT+CIPSEND`
    ///
    /// Returns the acknowledgement, or `None` when no payload was expected
    /// for `link_id`.
    pub async fn submit_raw(&mut self, link_id: LinkId, payload: &[u8]) -> Option<Vec<u8>> {
        match self.capture {
            Some(capture) if capture.link_id == link_id => {}
            _ => {
                warn!("Unexpected payload for link {}", link_id);
                return None;
            }
        }
        self.capture = None;

        let ack = self
            .connections
            .complete_pending_send(link_id, payload)
            .await
            .unwrap_or_else(|| {
                // Link went away while the payload was in flight
                response::SEND_FAIL.to_vec()
            });

        self.emit(ModemEvent::RawCaptureCompleted {
            link_id,
            received: payload.len(),
        });
        self.emit(ModemEvent::Output(ack.clone()));
        Some(ack)
    }

    /// Wait for the next unsolicited output
    ///
    /// Cancel safe, so it can sit in a `select!` next to the host reader.
    pub async fn next_notification(&mut self) -> Vec<u8> {
        loop {
            let boot_at = self.boot_at;
            let capture_deadline = self.capture.and_then(|c| c.deadline);

            let out = tokio::select! {
                event = self.connections.next_event() => self.translate(event),
                _ = sleep_until_opt(boot_at) => {
                    self.boot_at = None;
                    info!("Boot complete");
                    Some(response::BOOT_BANNER.to_vec())
                }
                _ = sleep_until_opt(capture_deadline) => self.expire_capture(),
            };

            if let Some(out) = out {
                self.emit(ModemEvent::Output(out.clone()));
                return out;
            }
        }
    }

    /// Stop the server and drop every connection and pending transfer
    pub fn shutdown(&mut self) {
        info!("Modem shutting down");
        self.connections.reset();
        self.capture = None;
        self.boot_at = None;
        self.codec.clear();
    }

    /// Link number shown to the host, omitted in single-connection mode
    fn display_id(&self, link_id: LinkId) -> Option<u8> {
        self.config.multiplex.then_some(link_id.0)
    }

    /// Resolve the link a `CIPSTART`/`CIPSEND`/`CIPCLOSE` addresses
    fn resolve_link(&self, link_id: Option<u8>) -> Option<LinkId> {
        match (self.config.multiplex, link_id) {
            (true, Some(id)) => LinkId::new(id),
            (false, None) => Some(LinkId(0)),
            _ => None,
        }
    }

    fn translate(&mut self, event: ConnectionEvent) -> Option<Vec<u8>> {
        match event {
            ConnectionEvent::ServerConnectionEstablished { link_id } => {
                Some(response::accept_notice(self.display_id(link_id)))
            }
            ConnectionEvent::DataAvailable { link_id, len } => {
                Some(response::data_notice(self.display_id(link_id), len))
            }
            ConnectionEvent::ConnectionClosed { link_id } => {
                Some(response::close_notice(self.display_id(link_id)))
            }
            ConnectionEvent::ConnectionError { link_id, error } => {
                warn!("Link {} failed: {}", link_id, error);
                // A retained record reports CLOSED once drained
                if self.connections.has_connection(link_id) {
                    None
                } else {
                    Some(response::close_notice(self.display_id(link_id)))
                }
            }
        }
    }

    fn expire_capture(&mut self) -> Option<Vec<u8>> {
        let capture = self.capture.take()?;
        let dropped = self.codec.cancel_raw();
        self.connections.cancel_pending_send(capture.link_id);
        warn!(
            "Link {} payload timed out with {} of {} bytes",
            capture.link_id, dropped, capture.expected
        );
        self.emit(ModemEvent::RawCaptureTimedOut {
            link_id: capture.link_id,
        });
        Some(response::SEND_FAIL.to_vec())
    }

    fn reset(&mut self) {
        info!("Resetting modem");
        self.config.reset();
        self.connections.reset();
        self.capture = None;
        self.codec.cancel_raw();
        self.boot_at = Some(Instant::now() + self.settings.boot_delay());
    }

    async fn execute(&mut self, command: AtCommand) -> Vec<u8> {
        match command {
            AtCommand::Attention | AtCommand::SetDhcp => response::OK.to_vec(),
            AtCommand::Reset => {
                self.reset();
                response::OK.to_vec()
            }
            AtCommand::Version => response::VERSION.to_vec(),
            AtCommand::Echo(_) => response::OK_SHORT.to_vec(),

            AtCommand::SetWifiMode(mode) => {
                self.config.wifi_mode = mode;
                response::OK.to_vec()
            }
            AtCommand::QueryWifiMode => response::wifi_mode(self.config.wifi_mode),
            AtCommand::ListAccessPoints => {
                if self.config.is_softap_only() {
                    response::ERROR.to_vec()
                } else {
                    response::ACCESS_POINTS.to_vec()
                }
            }
            AtCommand::JoinAccessPoint { ssid, password } => {
                if self.config.is_softap_only() {
                    return response::ERROR.to_vec();
                }
                info!("Joined access point {:?}", ssid);
                self.config.ssid = ssid;
                self.config.password = password;
                self.config.wifi_connected = true;
                response::WIFI_CONNECTED.to_vec()
            }
            AtCommand::QuitAccessPoint => {
                self.config.wifi_connected = false;
                self.config.ssid.clear();
                self.config.password.clear();
                response::OK.to_vec()
            }
            AtCommand::QueryStationAddress => {
                if self.config.is_softap_only() {
                    response::ERROR.to_vec()
                } else {
                    response::STATION_ADDRESS.to_vec()
                }
            }
            AtCommand::QueryLocalAddress => {
                if self.config.wifi_connected {
                    response::local_address(&self.config.ip, &self.config.mac)
                } else {
                    response::ERROR.to_vec()
                }
            }

            AtCommand::SetMultiplex(enabled) => {
                if self.config.server_active || self.config.transmission_mode != 0 {
                    return response::ERROR.to_vec();
                }
                self.config.multiplex = enabled;
                response::OK.to_vec()
            }
            AtCommand::QueryMultiplex => response::multiplex(self.config.multiplex),

            AtCommand::Server { enable: true, port } => self.start_server(port).await,
            AtCommand::Server { enable: false, .. } => {
                self.connections.stop_server();
                self.config.server_active = false;
                response::OK_SHORT.to_vec()
            }
            AtCommand::ServerMaxConnections(_) => response::OK_SHORT.to_vec(),
            AtCommand::SetServerTimeout(secs) => {
                self.config.server_timeout = secs;
                self.connections.set_server_idle_timeout(secs);
                response::OK_SHORT.to_vec()
            }
            AtCommand::QueryServerTimeout => response::server_timeout(self.config.server_timeout),
            AtCommand::Status => response::status(&self.status_entries()),

            AtCommand::Start(params) => self.start(params).await,
            AtCommand::Send { link_id, size } => self.arm_send(link_id, size),
            AtCommand::Close { link_id } => {
                // An explicit id is honoured in either mode and echoed back
                let target = match link_id {
                    Some(id) => LinkId::new(id),
                    None => self.resolve_link(None),
                };
                match target {
                    Some(target) if self.connections.close_connection(target) => {
                        response::closed(link_id)
                    }
                    _ => response::ERROR.to_vec(),
                }
            }

            // Only passive receive is simulated
            AtCommand::SetReceiveMode(1) => response::OK_SHORT.to_vec(),
            AtCommand::SetReceiveMode(_) => response::ERROR_SHORT.to_vec(),
            AtCommand::QueryReceiveLength => {
                let mut lengths = [0usize; MAX_CONNECTIONS];
                for link_id in LinkId::all() {
                    lengths[link_id.index()] = self.connections.peek_pending_length(link_id);
                }
                response::receive_lengths(&lengths)
            }
            AtCommand::ReceiveData { link_id, len } => {
                let chunk = LinkId::new(link_id)
                    .and_then(|link_id| self.connections.take_pending_receive(link_id, len));
                match chunk {
                    Some(data) => response::receive_data(&data),
                    None => response::RECEIVE_EMPTY.to_vec(),
                }
            }
        }
    }

    async fn start_server(&mut self, port: u16) -> Vec<u8> {
        if self.config.server_active && self.connections.server_port() == Some(port) {
            return response::OK_SHORT.to_vec();
        }
        if self.connections.start_server(port).await {
            self.config.server_active = true;
            self.config.server_port = port;
            response::OK_SHORT.to_vec()
        } else {
            // A running server keeps listening on its old port
            response::ERROR_SHORT.to_vec()
        }
    }

    fn status_entries(&self) -> Vec<StatusEntry> {
        self.connections
            .all_connections()
            .filter(|conn| conn.is_open())
            .map(|conn| StatusEntry {
                link_id: conn.link_id.0,
                kind: conn.kind,
                remote_ip: conn.remote_addr.clone(),
                remote_port: conn.remote_port,
                local_port: conn.local_port.unwrap_or(0),
                is_server: conn.role == Role::Server,
            })
            .collect()
    }

    async fn start(&mut self, params: StartParams) -> Vec<u8> {
        let Some(link_id) = self.resolve_link(params.link_id) else {
            return response::ERROR.to_vec();
        };
        if self.connections.has_connection(link_id) {
            return response::ALREADY_CONNECTED.to_vec();
        }

        let dialed = self
            .connections
            .dial(
                link_id,
                params.kind,
                &params.remote_host,
                params.remote_port,
                params.keep_alive_secs,
                params.local_ip.as_deref(),
            )
            .await;

        if dialed {
            response::connected(self.display_id(link_id))
        } else {
            response::ERROR.to_vec()
        }
    }

    fn arm_send(&mut self, link_id: Option<u8>, size: usize) -> Vec<u8> {
        let Some(link_id) = self.resolve_link(link_id) else {
            return response::ERROR.to_vec();
        };
        if !self
            .connections
            .get_connection(link_id)
            .is_some_and(|conn| conn.is_open())
        {
            return response::ERROR.to_vec();
        }

        let expected = size.min(MAX_SEND_SIZE);
        if expected < size {
            warn!("Link {} send of {} bytes clamped to {}", link_id, size, expected);
        }
        if !self.connections.begin_pending_send(link_id, expected) {
            return response::ERROR.to_vec();
        }

        self.capture = Some(RawCapture {
            link_id,
            expected,
            deadline: self
                .settings
                .raw_capture_timeout()
                .map(|timeout| Instant::now() + timeout),
        });
        self.emit(ModemEvent::RawCaptureRequested { link_id, expected });
        response::SEND_PROMPT.to_vec()
    }
}

impl Default for AtModem {
    fn default() -> Self {
        Self::new(ModemSettings::default())
    }
}

/// Commands whose firmware replies are the bare `OK`/`ERROR` forms
fn has_short_replies(line: &str) -> bool {
    ["ATE", "AT+CIPSERVER", "AT+CIPSTO=", "AT+CIPRECVMODE"]
        .iter()
        .any(|prefix| line.starts_with(prefix))
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    async fn send(modem: &mut AtModem, line: &str) -> String {
        let out = modem.feed(format!("{}\r\n", line).as_bytes()).await;
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_basic_commands() {
        let mut modem = AtModem::default();
        assert_eq!(send(&mut modem, "AT").await, "\r\n\r\nOK\r\n");
        assert_eq!(send(&mut modem, "ATE0").await, "OK\r\n");
        assert_eq!(send(&mut modem, "AT+CWMODE=1").await, "\r\n\r\nOK\r\n");
        assert_eq!(
            send(&mut modem, "AT+CWMODE?").await,
            "\r\n+CWMODE:1\r\n\r\nOK\r\n"
        );
        assert!(send(&mut modem, "AT+GMR").await.contains("SDK version:1.5.0"));
        assert_eq!(send(&mut modem, "AT+BOGUS").await, "\r\n\r\nERROR\r\n");
        assert_eq!(send(&mut modem, "AT+CWMODE=7").await, "\r\n\r\nERROR\r\n");
    }

    #[tokio::test]
    async fn test_wifi_association() {
        let mut modem = AtModem::default();
        assert_eq!(send(&mut modem, "AT+CIFSR").await, "\r\n\r\nERROR\r\n");

        assert_eq!(
            send(&mut modem, "AT+CWJAP=\"home\",\"secret\"").await,
            "\r\n\r\nWIFI CONNECTED\r\nWIFI GOT IP\r\n\r\nOK\r\n"
        );
        assert_eq!(modem.config().ssid, "home");
        assert_eq!(
            send(&mut modem, "AT+CIFSR").await,
            "\r\n+CIFSR:STAIP,\"127.0.0.1\"\r\n+CIFSR:STAMAC,\"11:22:33:44:55:66\"\r\n\r\nOK\r\n"
        );

        send(&mut modem, "AT+CWQAP").await;
        assert!(!modem.config().wifi_connected);
    }

    #[tokio::test]
    async fn test_softap_mode_refuses_station_commands() {
        let mut modem = AtModem::default();
        send(&mut modem, "AT+CWMODE=2").await;
        assert_eq!(send(&mut modem, "AT+CWLAP").await, "\r\n\r\nERROR\r\n");
        assert_eq!(send(&mut modem, "AT+CIPSTA?").await, "\r\n\r\nERROR\r\n");
        assert_eq!(
            send(&mut modem, "AT+CWJAP=\"a\",\"b\"").await,
            "\r\n\r\nERROR\r\n"
        );
        assert!(!modem.config().wifi_connected);

        send(&mut modem, "AT+CWMODE=3").await;
        assert!(send(&mut modem, "AT+CWLAP").await.contains("+CWLAP:(4,\"rede1\""));
    }

    #[tokio::test]
    async fn test_server_blocks_multiplex_change() {
        let mut modem = AtModem::default();
        send(&mut modem, "AT+CIPMUX=1").await;

        let spare = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = spare.local_addr().unwrap().port();
        drop(spare);

        assert_eq!(
            send(&mut modem, &format!("AT+CIPSERVER=1,{}", port)).await,
            "OK\r\n"
        );
        assert!(modem.config().server_active);
        assert_eq!(send(&mut modem, "AT+CIPMUX=0").await, "\r\n\r\nERROR\r\n");
        assert!(modem.config().multiplex);

        assert_eq!(send(&mut modem, "AT+CIPSERVER=2,80").await, "ERROR\r\n");
        assert!(modem.config().server_active);

        assert_eq!(send(&mut modem, "AT+CIPSERVER=0").await, "OK\r\n");
        assert_eq!(send(&mut modem, "AT+CIPMUX=0").await, "\r\n\r\nOK\r\n");
        assert_eq!(
            send(&mut modem, "AT+CIPMUX?").await,
            "\r\n+CIPMUX:0\r\n\r\nOK\r\n"
        );
    }

    #[tokio::test]
    async fn test_server_timeout_roundtrip() {
        let mut modem = AtModem::default();
        assert_eq!(
            send(&mut modem, "AT+CIPSTO?").await,
            "\r\n+CIPSTO:180\r\n\r\nOK\r\n"
        );
        assert_eq!(send(&mut modem, "AT+CIPSTO=30").await, "OK\r\n");
        assert_eq!(modem.connections().server_idle_timeout(), 30);
        assert_eq!(send(&mut modem, "AT+CIPSTO=7201").await, "ERROR\r\n");
        assert_eq!(
            send(&mut modem, "AT+CIPSTO?").await,
            "\r\n+CIPSTO:30\r\n\r\nOK\r\n"
        );
    }

    #[tokio::test]
    async fn test_link_addressing_follows_mux_mode() {
        let mut modem = AtModem::default();
        // Link id given in single mode
        assert_eq!(
            send(&mut modem, "AT+CIPSTART=0,\"TCP\",\"127.0.0.1\",9").await,
            "\r\n\r\nERROR\r\n"
        );

        send(&mut modem, "AT+CIPMUX=1").await;
        // Link id missing in multiplexed mode
        assert_eq!(send(&mut modem, "AT+CIPSEND=4").await, "\r\n\r\nERROR\r\n");
        assert_eq!(send(&mut modem, "AT+CIPCLOSE").await, "\r\n\r\nERROR\r\n");
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let mut modem = AtModem::default();
        send(&mut modem, "AT+CIPMUX=1").await;
        assert_eq!(send(&mut modem, "AT+CIPSEND=0,4").await, "\r\n\r\nERROR\r\n");
        assert!(modem.capture().is_none());
        assert_eq!(send(&mut modem, "AT+CIPCLOSE=0").await, "\r\n\r\nERROR\r\n");
    }

    #[tokio::test]
    async fn test_receive_queries_without_data() {
        let mut modem = AtModem::default();
        assert_eq!(
            send(&mut modem, "AT+CIPRECVLEN?").await,
            "\r\n+CIPRECVLEN:0,0,0,0,0\r\n\r\nOK\r\n"
        );
        assert_eq!(
            send(&mut modem, "AT+CIPRECVDATA=2,10").await,
            "\r\n+CIPRECVDATA:0:\r\n\r\nOK\r\n"
        );
        assert_eq!(send(&mut modem, "AT+CIPRECVMODE=1").await, "OK\r\n");
        assert_eq!(send(&mut modem, "AT+CIPRECVMODE=0").await, "ERROR\r\n");
        assert_eq!(
            send(&mut modem, "AT+CIPSTATUS").await,
            "\r\nSTATUS:2\r\n\r\nOK\r\n"
        );
    }

    #[tokio::test]
    async fn test_output_is_observable() {
        let mut modem = AtModem::default();
        let mut events = modem.subscribe();
        send(&mut modem, "AT").await;
        assert_eq!(
            events.recv().await.unwrap(),
            ModemEvent::Output(b"\r\n\r\nOK\r\n".to_vec())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restores_defaults_and_boots() {
        let mut modem = AtModem::default();
        send(&mut modem, "AT+CIPMUX=1").await;
        send(&mut modem, "AT+CWJAP=\"x\",\"y\"").await;

        assert_eq!(send(&mut modem, "AT+RST").await, "\r\n\r\nOK\r\n");
        assert!(!modem.config().multiplex);
        assert!(!modem.config().wifi_connected);

        let start = Instant::now();
        let banner = modem.next_notification().await;
        assert_eq!(banner, response::BOOT_BANNER.to_vec());
        assert!(start.elapsed() >= modem.settings().boot_delay());
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_replies(
            splits in proptest::collection::vec(0usize..96, 0..6),
        ) {
            let input: &[u8] = b"AT\r\nAT+CWMODE=3\r\nAT+CWMODE?\r\nATE0\r\nAT+NOPE\r\nAT+CIPMUX?\r\n";
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let (whole, chunked) = runtime.block_on(async {
                let whole = AtModem::default().feed(input).await;

                let mut cuts: Vec<usize> = splits.iter().map(|s| s % input.len()).collect();
                cuts.sort_unstable();
                let mut modem = AtModem::default();
                let mut chunked = Vec::new();
                let mut start = 0;
                for cut in cuts.into_iter().chain([input.len()]) {
                    chunked.extend(modem.feed(&input[start..cut.max(start)]).await);
                    start = cut.max(start);
                }
                (whole, chunked)
            });

            prop_assert_eq!(whole, chunked);
        }
    }
}
