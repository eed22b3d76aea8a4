//! mDNS Discovery: announce this node's Transfer Server and hear other nodes.
//!
//! Uses `_capsule-mesh._tcp.local.` service type. Instance name is the node id; TXT
//! record carries `node_id`, `host`, `port` and an announcement counter `seq`.
//!
//! The [`Announcer`] owns two loops: a sender that re-announces every interval and a
//! receiver that hands every presence record (own announcements included) to the
//! registered callbacks. The transport underneath is a [`PresenceChannel`].

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

/// Capsule mesh mDNS service type (RFC 6763: _service._proto.local.)
pub const SERVICE_TYPE: &str = "_capsule-mesh._tcp.local.";

const RECV_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Failed to open discovery channel: {0}")]
    Bind(String),

    #[error("Failed to send announcement: {0}")]
    Send(String),

    #[error("Failed to receive announcement: {0}")]
    Receive(String),

    #[error("Discovery channel closed")]
    Closed,
}

/// Presence record a node broadcasts: who it is and where its Transfer Server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub node_id: String,
    pub host: String,
    pub port: u16,
}

impl PresenceRecord {
    /// Transfer Server address, if `host` is an IP literal.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.host
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }

    fn txt_properties(&self, seq: u64) -> Vec<(String, String)> {
        vec![
            ("node_id".to_string(), self.node_id.clone()),
            ("host".to_string(), self.host.clone()),
            ("port".to_string(), self.port.to_string()),
            ("seq".to_string(), seq.to_string()),
        ]
    }
}

/// What the receive side of a channel observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Announced(PresenceRecord),
    /// The node said goodbye (mDNS removal).
    Withdrawn { node_id: String },
}

/// Local-network presence transport used by the [`Announcer`].
///
/// `bind` failures are fatal to `Announcer::start`; `announce` and `recv_timeout`
/// failures are treated as transient.
pub trait PresenceChannel: Send + Sync {
    fn bind(&self, local: &PresenceRecord) -> Result<(), DiscoveryError>;

    fn announce(&self, local: &PresenceRecord, seq: u64) -> Result<(), DiscoveryError>;

    /// Next event, or `Ok(None)` when nothing arrived within `timeout`.
    /// `Err(DiscoveryError::Closed)` ends the receive loop.
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<PresenceEvent>, DiscoveryError>;

    /// Release the underlying socket. Must be safe to call when not bound.
    fn close(&self);
}

/// [`PresenceChannel`] over mDNS service registration and browsing.
#[derive(Default)]
pub struct MdnsChannel {
    state: Mutex<Option<MdnsState>>,
}

struct MdnsState {
    daemon: ServiceDaemon,
    browse_rx: mdns_sd::Receiver<ServiceEvent>,
}

impl MdnsChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresenceChannel for MdnsChannel {
    fn bind(&self, _local: &PresenceRecord) -> Result<(), DiscoveryError> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if state.is_some() {
            return Ok(());
        }
        let daemon = ServiceDaemon::new()
            .map_err(|e| DiscoveryError::Bind(format!("Failed to create mDNS daemon: {e}")))?;
        let browse_rx = daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| DiscoveryError::Bind(format!("Failed to browse for capsule peers: {e}")))?;
        *state = Some(MdnsState { daemon, browse_rx });
        Ok(())
    }

    /// Re-registers the service with a bumped `seq`, so browsers see a changed record.
    fn announce(&self, local: &PresenceRecord, seq: u64) -> Result<(), DiscoveryError> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let state = state.as_ref().ok_or(DiscoveryError::Closed)?;

        let txt = local.txt_properties(seq);
        let properties: Vec<(&str, &str)> =
            txt.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let host_name = format!("{}.local.", local.node_id);
        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &local.node_id,
            &host_name,
            &local.host,
            local.port,
            &properties[..],
        )
        .map_err(|e| DiscoveryError::Send(format!("Invalid ServiceInfo: {e}")))?;

        state
            .daemon
            .register(service)
            .map_err(|e| DiscoveryError::Send(e.to_string()))?;
        if seq == 0 {
            tracing::info!(
                node = %local.node_id,
                addr = %format!("{}:{}", local.host, local.port),
                "Registered capsule node via mDNS"
            );
        }
        Ok(())
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<PresenceEvent>, DiscoveryError> {
        // Clone the receiver so announcements are not blocked while we wait.
        let rx = {
            let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            state
                .as_ref()
                .map(|s| s.browse_rx.clone())
                .ok_or(DiscoveryError::Closed)?
        };
        match rx.recv_timeout(timeout) {
            Ok(ServiceEvent::ServiceResolved(resolved)) => {
                let node_id = resolved
                    .txt_properties
                    .get_property_val_str("node_id")
                    .map(str::to_string)
                    .or_else(|| instance_from_fullname(&resolved.fullname));
                let Some(node_id) = node_id else {
                    return Ok(None);
                };
                let host = resolved
                    .txt_properties
                    .get_property_val_str("host")
                    .filter(|h| h.parse::<IpAddr>().is_ok())
                    .map(str::to_string)
                    .or_else(|| resolved.addresses.iter().next().map(|a| a.to_string()))
                    .unwrap_or_else(|| resolved.host.clone());
                let port = resolved
                    .txt_properties
                    .get_property_val_str("port")
                    .and_then(|p| p.parse::<u16>().ok())
                    .unwrap_or(resolved.port);
                Ok(Some(PresenceEvent::Announced(PresenceRecord {
                    node_id,
                    host,
                    port,
                })))
            }
            Ok(ServiceEvent::ServiceRemoved(_, fullname)) => Ok(instance_from_fullname(&fullname)
                .map(|node_id| PresenceEvent::Withdrawn { node_id })),
            Ok(ServiceEvent::ServiceFound(_, _)) => {
                // Will be followed by ServiceResolved
                Ok(None)
            }
            Ok(_) => Ok(None),
            Err(_) if rx.is_disconnected() => Err(DiscoveryError::Closed),
            Err(_) => Ok(None),
        }
    }

    fn close(&self) {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(state) = state {
            if let Err(e) = state.daemon.shutdown() {
                tracing::warn!(err = %e, "Failed to shutdown mDNS daemon");
            }
        }
    }
}

/// `"<instance>._capsule-mesh._tcp.local."` → `"<instance>"`.
fn instance_from_fullname(fullname: &str) -> Option<String> {
    fullname
        .strip_suffix(SERVICE_TYPE)
        .and_then(|s| s.strip_suffix('.'))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

type AnnouncedCallback = Arc<dyn Fn(&PresenceRecord) + Send + Sync>;
type WithdrawnCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    announced: Vec<AnnouncedCallback>,
    withdrawn: Vec<WithdrawnCallback>,
}

struct Running {
    interval: Duration,
    record: PresenceRecord,
    shutdown: Arc<AtomicBool>,
    // Dropping the sender wakes the announce loop immediately.
    stop_tx: mpsc::Sender<()>,
    sender: JoinHandle<()>,
    receiver: JoinHandle<()>,
}

/// Periodic presence broadcaster and listener.
pub struct Announcer {
    channel: Arc<dyn PresenceChannel>,
    callbacks: Arc<Mutex<Callbacks>>,
    running: Mutex<Option<Running>>,
}

impl Announcer {
    pub fn new(channel: Arc<dyn PresenceChannel>) -> Self {
        Self {
            channel,
            callbacks: Arc::new(Mutex::new(Callbacks::default())),
            running: Mutex::new(None),
        }
    }

    /// Announcer over mDNS.
    pub fn mdns() -> Self {
        Self::new(Arc::new(MdnsChannel::new()))
    }

    /// Called for every received presence record, duplicates and self-announcements included.
    pub fn on_peer_announced<F>(&self, callback: F)
    where
        F: Fn(&PresenceRecord) + Send + Sync + 'static,
    {
        let mut cbs = self.callbacks.lock().unwrap_or_else(|p| p.into_inner());
        cbs.announced.push(Arc::new(callback));
    }

    /// Called with the node id of every peer that withdrew its announcement.
    pub fn on_peer_withdrawn<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let mut cbs = self.callbacks.lock().unwrap_or_else(|p| p.into_inner());
        cbs.withdrawn.push(Arc::new(callback));
    }

    /// Start announcing `record` every `interval` and listening for peers.
    ///
    /// Calling again with the same parameters is a no-op; with different parameters the
    /// running loops are stopped and restarted. Bind failure is returned.
    pub fn start(&self, interval: Duration, record: PresenceRecord) -> Result<(), DiscoveryError> {
        let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(current) = running.as_ref() {
            if current.interval == interval && current.record == record {
                return Ok(());
            }
        }
        if let Some(previous) = running.take() {
            tracing::info!(
                node = %previous.record.node_id,
                "Restarting announcer with new parameters"
            );
            self.halt(previous);
        }

        self.channel.bind(&record)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let sender = spawn_announce_loop(self.channel.clone(), interval, record.clone(), stop_rx);
        let receiver =
            spawn_receive_loop(self.channel.clone(), self.callbacks.clone(), shutdown.clone());

        tracing::info!(
            node = %record.node_id,
            addr = %format!("{}:{}", record.host, record.port),
            interval_ms = interval.as_millis() as u64,
            "Announcer started"
        );
        *running = Some(Running {
            interval,
            record,
            shutdown,
            stop_tx,
            sender,
            receiver,
        });
        Ok(())
    }

    /// Stop both loops and release the channel. Safe in any state.
    pub fn stop(&self) {
        let previous = self
            .running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(previous) = previous {
            self.halt(previous);
            tracing::info!("Announcer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|r| r.is_some())
            .unwrap_or(false)
    }

    fn halt(&self, running: Running) {
        running.shutdown.store(true, Ordering::SeqCst);
        drop(running.stop_tx);
        let _ = running.sender.join();
        self.channel.close();
        let _ = running.receiver.join();
    }
}

impl Drop for Announcer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_announce_loop(
    channel: Arc<dyn PresenceChannel>,
    interval: Duration,
    record: PresenceRecord,
    stop_rx: mpsc::Receiver<()>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut seq: u64 = 0;
        loop {
            if let Err(e) = channel.announce(&record, seq) {
                tracing::warn!(err = %e, seq, "Announcement failed; will retry next interval");
            }
            seq = seq.wrapping_add(1);
            match stop_rx.recv_timeout(interval) {
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                _ => break,
            }
        }
    })
}

fn spawn_receive_loop(
    channel: Arc<dyn PresenceChannel>,
    callbacks: Arc<Mutex<Callbacks>>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !shutdown.load(Ordering::SeqCst) {
            match channel.recv_timeout(RECV_POLL) {
                Ok(Some(PresenceEvent::Announced(record))) => {
                    let announced = callbacks
                        .lock()
                        .map(|c| c.announced.clone())
                        .unwrap_or_default();
                    for cb in announced {
                        cb(&record);
                    }
                }
                Ok(Some(PresenceEvent::Withdrawn { node_id })) => {
                    let withdrawn = callbacks
                        .lock()
                        .map(|c| c.withdrawn.clone())
                        .unwrap_or_default();
                    for cb in withdrawn {
                        cb(&node_id);
                    }
                }
                Ok(None) => {}
                Err(DiscoveryError::Closed) => break,
                Err(e) => {
                    tracing::warn!(err = %e, "Discovery receive error; continuing");
                    std::thread::sleep(RECV_POLL);
                }
            }
        }
    })
}
