//! HTTP viewer endpoints.
//!
//! Routes:
//! - `/`: index page embedding the streams
//! - `/cam`, `/processed`, `/mask`, `/background`: multipart JPEG streams
//! - the same paths with `.jpg`: snapshot of the latest frame
//! - `/stats`: last stats report as JSON
//! - `/health`: liveness check
//!
//! The listener runs on its own thread and hands every connection to a fresh
//! thread. A streaming connection subscribes to its topic for as long as the
//! client keeps reading; a failed write ends only that connection.

pub mod http;
pub mod mjpeg;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::RecvTimeoutError;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::broadcast::Broadcaster;
use crate::codec;
use crate::frame::Frame;
use crate::pipeline::{TOPIC_BACKGROUND, TOPIC_MARKED, TOPIC_MASK, TOPIC_RAW};
use crate::stats::Stats;

use self::http::{
    read_request, write_json_response, write_response, Status, REQUEST_READ_TIMEOUT,
};

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const VIEWER_POLL: Duration = Duration::from_millis(250);

/// Stream routes and the topic each one serves.
pub const STREAM_ROUTES: [(&str, &str); 4] = [
    ("/cam", TOPIC_RAW),
    ("/processed", TOPIC_MARKED),
    ("/mask", TOPIC_MASK),
    ("/background", TOPIC_BACKGROUND),
];

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>motioncast</title></head>
<body>
<img src="/cam">
<img src="/processed">
<img src="/mask">
</body>
</html>
"#;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
    pub quality: u8,
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: ":8080".to_string(),
            quality: codec::DEFAULT_QUALITY,
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// Resolve a listen address; a bare `:PORT` binds every interface.
pub fn resolve_listen_addr(addr: &str) -> Result<SocketAddr> {
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };
    full.to_socket_addrs()
        .with_context(|| format!("resolve listen address '{}'", addr))?
        .next()
        .ok_or_else(|| anyhow!("listen address '{}' resolved to nothing", addr))
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting connections. Open streams end at their next poll.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        Ok(())
    }
}

struct Shared {
    broadcaster: Broadcaster,
    stats: Arc<Stats>,
    quality: u8,
    write_timeout: Duration,
    shutdown: Arc<AtomicBool>,
}

pub struct StreamServer {
    cfg: ServerConfig,
    broadcaster: Broadcaster,
    stats: Arc<Stats>,
}

impl StreamServer {
    pub fn new(cfg: ServerConfig, broadcaster: Broadcaster, stats: Arc<Stats>) -> Self {
        Self {
            cfg,
            broadcaster,
            stats,
        }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let configured_addr = resolve_listen_addr(&self.cfg.addr)?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(Shared {
            broadcaster: self.broadcaster,
            stats: self.stats,
            quality: self.cfg.quality,
            write_timeout: self.cfg.write_timeout,
            shutdown: shutdown.clone(),
        });
        let join = thread::Builder::new()
            .name("http-accept".to_string())
            .spawn(move || {
                if let Err(err) = run_server(listener, shared) {
                    log::error!("stream server stopped: {}", err);
                }
            })
            .context("spawn stream server thread")?;
        log::info!("serving streams on http://{}", addr);

        Ok(ServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(listener: TcpListener, shared: Arc<Shared>) -> Result<()> {
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let shared = shared.clone();
                let spawned = thread::Builder::new()
                    .name(format!("http-{}", peer))
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &shared) {
                            log::debug!("connection from {} ended: {:#}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("could not spawn handler for {}: {}", peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, shared: &Shared) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(REQUEST_READ_TIMEOUT))?;
    stream.set_write_timeout(Some(shared.write_timeout))?;

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_json_response(&mut stream, Status::BadRequest, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };
    log::debug!("{} {}", request.method, request.path);
    if request.method != "GET" {
        return write_json_response(
            &mut stream,
            Status::MethodNotAllowed,
            r#"{"error":"method_not_allowed"}"#,
        );
    }

    match request.path.as_str() {
        "/" | "/index.html" => write_response(
            &mut stream,
            Status::Ok,
            "text/html; charset=utf-8",
            INDEX_HTML.as_bytes(),
        ),
        "/health" => write_json_response(&mut stream, Status::Ok, r#"{"status":"ok"}"#),
        "/stats" => match shared.stats.last_report() {
            Some(report) => {
                let payload = serde_json::to_vec(&report)?;
                write_response(&mut stream, Status::Ok, "application/json", &payload)
            }
            None => {
                write_json_response(&mut stream, Status::Unavailable, r#"{"error":"no_report"}"#)
            }
        },
        path => {
            if let Some(topic) = stream_topic(path) {
                return stream_frames(&mut stream, topic, shared);
            }
            if let Some(topic) = path.strip_suffix(".jpg").and_then(stream_topic) {
                return write_snapshot(&mut stream, topic, shared);
            }
            write_json_response(&mut stream, Status::NotFound, r#"{"error":"not_found"}"#)
        }
    }
}

fn stream_topic(path: &str) -> Option<&'static str> {
    STREAM_ROUTES
        .iter()
        .find(|(route, _)| *route == path)
        .map(|(_, topic)| *topic)
}

fn write_snapshot(stream: &mut TcpStream, topic: &str, shared: &Shared) -> Result<()> {
    let Some(frame) = shared.broadcaster.latest(topic) else {
        return write_json_response(stream, Status::Unavailable, r#"{"error":"no_frame"}"#);
    };
    match encode(&frame, shared) {
        Some(jpeg) => write_response(stream, Status::Ok, "image/jpeg", &jpeg),
        None => {
            write_json_response(stream, Status::InternalError, r#"{"error":"encode_failed"}"#)
        }
    }
}

fn stream_frames(stream: &mut TcpStream, topic: &str, shared: &Shared) -> Result<()> {
    let (subscription, latest) = shared.broadcaster.subscribe_with_latest(topic);
    mjpeg::write_stream_header(stream)?;
    log::info!("viewer {} attached to {}", subscription.id(), topic);

    if let Some(frame) = latest {
        send_frame(stream, &frame, shared)?;
    }
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
        match subscription.recv_timeout(VIEWER_POLL) {
            Ok(frame) => send_frame(stream, &frame, shared)?,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("{} closed; ending viewer {}", topic, subscription.id());
                return Ok(());
            }
        }
    }
}

fn send_frame(stream: &mut TcpStream, frame: &Frame, shared: &Shared) -> Result<()> {
    // An unencodable frame is skipped; the viewer keeps its connection.
    let Some(jpeg) = encode(frame, shared) else {
        return Ok(());
    };
    if let Err(err) = mjpeg::write_part(stream, &jpeg) {
        shared.stats.write_error();
        return Err(err.context("write multipart frame"));
    }
    shared.stats.frame_streamed();
    Ok(())
}

fn encode(frame: &Frame, shared: &Shared) -> Option<Vec<u8>> {
    match shared.stats.encode.time(|| codec::encode(frame, shared.quality)) {
        Ok(jpeg) => Some(jpeg),
        Err(err) => {
            shared.stats.encode_error();
            log::warn!("encode failed: {:#}", err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_listens_on_all_interfaces() {
        let addr = resolve_listen_addr(":8080").unwrap();
        assert!(addr.ip().is_unspecified());
        assert_eq!(addr.port(), 8080);

        let addr = resolve_listen_addr("127.0.0.1:0").unwrap();
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn routes_map_to_topics() {
        assert_eq!(stream_topic("/cam"), Some(TOPIC_RAW));
        assert_eq!(stream_topic("/processed"), Some(TOPIC_MARKED));
        assert_eq!(stream_topic("/mask"), Some(TOPIC_MASK));
        assert_eq!(stream_topic("/background"), Some(TOPIC_BACKGROUND));
        assert_eq!(stream_topic("/cam.jpg"), None);
        assert_eq!(stream_topic("/nope"), None);
    }

    #[test]
    fn index_embeds_camera_stream() {
        assert!(INDEX_HTML.contains(r#"<img src="/cam">"#));
    }
}
