//! PCLink discovery: devices broadcast a `<PCLinkClient>` announcement over
//! UDP and expect the server to connect back and introduce itself with a
//! `<PCLinkServer>` packet.
//!
//! Addresses and ports travel as decimal integers in the device's own byte
//! order: the IP holds the first octet in its lowest byte and the port has
//! its two bytes swapped.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::netif::Interface;
use crate::protocol::escape;
use crate::superscroll::Superscroll;

pub const SUPPORTED_VERSION: &str = "1.0";
pub const SUPPORTED_VENDOR_ID: &str = "Philips";
pub const SUPPORTED_NAME: &str = "MC-i200";

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

const RECEIVE_BACKOFF_MIN: Duration = Duration::from_millis(100);
const RECEIVE_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Pause after `errors` consecutive receive failures: doubles from 100 ms,
/// capped at 5 s.
fn receive_backoff(errors: u32) -> Duration {
    let factor = 1u32 << errors.saturating_sub(1).min(16);
    RECEIVE_BACKOFF_MIN
        .saturating_mul(factor)
        .min(RECEIVE_BACKOFF_MAX)
}

#[derive(Debug, PartialEq)]
pub enum PacketError {
    InvalidEnvelope,
    MissingTag(&'static str),
    InvalidNumber(&'static str, String),
}

impl std::fmt::Display for PacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PacketError::InvalidEnvelope => write!(f, "not a PCLinkClient packet"),
            PacketError::MissingTag(tag) => write!(f, "missing <{}>", tag),
            PacketError::InvalidNumber(tag, value) => {
                write!(f, "invalid number in <{}>: '{}'", tag, value)
            }
        }
    }
}

impl std::error::Error for PacketError {}

#[derive(Debug)]
pub enum Error {
    PacketError(PacketError),
    IoError(io::Error),
}

impl From<PacketError> for Error {
    fn from(err: PacketError) -> Error {
        Error::PacketError(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::PacketError(e) => write!(f, "{}", e),
            Error::IoError(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

pub fn decode_ip(value: u32) -> Ipv4Addr {
    Ipv4Addr::new(
        (value & 0xFF) as u8,
        (value >> 8 & 0xFF) as u8,
        (value >> 16 & 0xFF) as u8,
        (value >> 24 & 0xFF) as u8,
    )
}

pub fn encode_ip(ip: Ipv4Addr) -> u32 {
    ip.octets()
        .iter()
        .enumerate()
        .fold(0, |acc, (i, &octet)| acc | (octet as u32) << (i * 8))
}

/// Port conversion; its own inverse.
pub fn swap_port(port: u16) -> u16 {
    (port & 0xFF) << 8 | (port >> 8 & 0xFF)
}

/// A decoded `<PCLinkClient>` announcement.
#[derive(Debug, Clone, PartialEq)]
pub struct Announcement {
    pub version: String,
    pub name: String,
    pub vendor_id: String,
    pub ip: Ipv4Addr,
    pub port: u16,
}

fn envelope_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^<PCLinkClient>(.*)</PCLinkClient>$").expect("valid envelope regex")
    })
}

fn field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(\w+)>([^<]*)</(\w+)>").expect("valid field regex"))
}

impl Announcement {
    pub fn parse(packet: &str) -> Result<Announcement, PacketError> {
        let packet = packet.replace('\n', "");
        let packet = packet.trim_matches(|c: char| c.is_whitespace() || c == '\0');

        let body = match envelope_regex().captures(packet) {
            Some(cap) => cap.get(1).map_or("", |m| m.as_str()).to_string(),
            None => return Err(PacketError::InvalidEnvelope),
        };

        let mut fields: HashMap<&str, &str> = HashMap::new();
        for cap in field_regex().captures_iter(&body) {
            let (open, value, close) = (
                cap.get(1).map_or("", |m| m.as_str()),
                cap.get(2).map_or("", |m| m.as_str()),
                cap.get(3).map_or("", |m| m.as_str()),
            );
            if open == close {
                fields.entry(open).or_insert(value);
            }
        }

        let field = |tag: &'static str| {
            fields
                .get(tag)
                .map(|v| v.trim())
                .ok_or(PacketError::MissingTag(tag))
        };

        let number = |tag: &'static str| -> Result<u64, PacketError> {
            let value = field(tag)?;
            value
                .parse::<u64>()
                .map_err(|_| PacketError::InvalidNumber(tag, value.to_string()))
        };

        Ok(Announcement {
            version: field("Version")?.to_string(),
            name: field("Name")?.to_string(),
            vendor_id: field("VendorID")?.to_string(),
            ip: decode_ip(number("IP")? as u32),
            port: swap_port(number("Port")? as u16),
        })
    }

    pub fn is_supported(&self) -> bool {
        self.version == SUPPORTED_VERSION
            && self.vendor_id == SUPPORTED_VENDOR_ID
            && self.name == SUPPORTED_NAME
    }
}

/// How this server introduces itself to devices.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerIdentity {
    pub version: String,
    pub vendor_id: String,
    pub name: String,
    pub short_name: String,
}

pub fn render_reply(identity: &ServerIdentity, ip: Ipv4Addr, web_port: u16) -> String {
    format!(
        "<PCLinkServer>\
        <Version>{}</Version>\
        <VendorID>{}</VendorID>\
        <name>{}</name>\
        <ShortName>{}</ShortName>\
        <IP>{}</IP>\
        <Port>{}</Port>\
        </PCLinkServer>",
        escape(&identity.version),
        escape(&identity.vendor_id),
        escape(&identity.name),
        escape(&identity.short_name),
        encode_ip(ip),
        swap_port(web_port)
    )
}

/// Answers announcements arriving on one interface.
pub struct Responder {
    interface: Interface,
    port: u16,
    web_port: u16,
    identity: Arc<ServerIdentity>,
    superscroll: Arc<Superscroll>,
}

impl Responder {
    pub fn new(
        interface: Interface,
        port: u16,
        web_port: u16,
        identity: Arc<ServerIdentity>,
        superscroll: Arc<Superscroll>,
    ) -> Responder {
        Responder {
            interface,
            port,
            web_port,
            identity,
            superscroll,
        }
    }

    pub async fn run(self) -> io::Result<()> {
        let socket = UdpSocket::bind((self.interface.broadcast, self.port)).await?;

        info!(
            "listening on {}:{} for {}/{} ({})",
            self.interface.broadcast,
            self.port,
            self.interface.address,
            self.interface.netmask,
            self.interface.name
        );

        let responder = Arc::new(self);
        let mut buf = vec![0u8; 4096];
        let mut errors: u32 = 0;

        loop {
            let (len, peer) = match socket.recv_from(&mut buf).await {
                Ok(r) => {
                    errors = 0;
                    r
                }
                Err(e) => {
                    errors = errors.saturating_add(1);
                    let pause = receive_backoff(errors);
                    error!(
                        "udp receive on {}: {}, retrying in {}ms",
                        responder.interface.name,
                        e,
                        pause.as_millis()
                    );
                    tokio::time::sleep(pause).await;
                    continue;
                }
            };

            let packet = String::from_utf8_lossy(&buf[..len]).into_owned();
            debug!("message from {} - {}", peer, packet);

            let responder = responder.clone();
            tokio::spawn(async move {
                if let Err(e) = responder.handle_packet(&packet).await {
                    error!("error processing packet from {}: {}", peer, e);
                }
            });
        }
    }

    pub async fn handle_packet(&self, packet: &str) -> Result<Announcement, Error> {
        let announcement = Announcement::parse(packet)?;

        trace!("version: {}", announcement.version);
        trace!("name: {}", announcement.name);
        trace!("vendor id: {}", announcement.vendor_id);
        trace!("ip: {}", announcement.ip);
        trace!("port: {}", announcement.port);

        if !announcement.is_supported() {
            warn!(
                "packet may not be supported: version '{}', vendor '{}', name '{}'",
                announcement.version, announcement.vendor_id, announcement.name
            );
        }

        self.handshake(&announcement).await?;

        Ok(announcement)
    }

    async fn handshake(&self, announcement: &Announcement) -> io::Result<()> {
        let addr = SocketAddr::from((announcement.ip, announcement.port));

        debug!("connecting to streamium at {}", addr);

        let mut stream = match timeout(HANDSHAKE_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", addr),
                ))
            }
        };

        info!("connected to {}", addr);

        let reply = render_reply(&self.identity, self.interface.address, self.web_port);
        debug!("sending packet: {}", reply);

        match timeout(HANDSHAKE_TIMEOUT, stream.write_all(reply.as_bytes())).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("write to {} timed out", addr),
                ))
            }
        }

        self.superscroll.clear(IpAddr::V4(announcement.ip));

        if let Err(e) = stream.shutdown().await {
            trace!("shutdown {}: {}", addr, e);
        }

        Ok(())
    }
}

/// Starts one responder per interface. A responder that cannot bind is
/// logged and does not affect the others.
pub fn spawn_responders(
    interfaces: Vec<Interface>,
    port: u16,
    web_port: u16,
    identity: Arc<ServerIdentity>,
    superscroll: Arc<Superscroll>,
) -> Vec<JoinHandle<()>> {
    interfaces
        .into_iter()
        .map(|interface| {
            let name = interface.name.clone();
            let responder = Responder::new(
                interface,
                port,
                web_port,
                identity.clone(),
                superscroll.clone(),
            );

            tokio::spawn(async move {
                if let Err(e) = responder.run().await {
                    error!("discovery responder on {} stopped: {}", name, e);
                }
            })
        })
        .collect()
}
