use crate::config::Config;
use crate::lan::presence::{PeerInfo, PresenceRegistry};
use crate::lan::proto::{self, Chat, Heartbeat, Packet, TaskComplete};
use crate::metrics::Metrics;
use crate::store::{MAX_CHAT_TEXT_CHARS, MessageStore};
use crate::utils::misc::{get_unix_millis_now, truncate_chars};
use futures::StreamExt;
use if_watch::IfEvent;
use if_watch::tokio::IfWatcher;
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at, timeout};
use tracing::{debug, error, info, warn};

/// Task titles beyond this many characters are cut before sending.
pub const MAX_TASK_TITLE_CHARS: usize = 200;

#[derive(Debug, thiserror::Error, strum_macros::IntoStaticStr)]
pub enum Error {
    #[error("service was already started")]
    AlreadyStarted,
    #[error("service is not started")]
    NotStarted,
    #[error("service lock poisoned")]
    Poisoned,
    #[error("proto: {0}")]
    Proto(#[from] proto::Error),
    #[error("store: {0}")]
    Store(#[from] crate::store::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl crate::utils::misc::Typename for Error {
    fn typename(&self) -> &'static str {
        self.into()
    }
}

/// Opaque handle returned by the `on_*` registrations. Each registration
/// gets a fresh one, even for the same closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

struct SubscriberSet<T> {
    subs: Mutex<BTreeMap<u64, Arc<dyn Fn(&T) + Send + Sync>>>,
}

impl<T> SubscriberSet<T> {
    fn new() -> Self {
        Self { subs: Mutex::new(BTreeMap::new()) }
    }

    fn insert(&self, id: u64, sub: Arc<dyn Fn(&T) + Send + Sync>) {
        if let Ok(mut subs) = self.subs.lock() {
            subs.insert(id, sub);
        }
    }

    fn remove(&self, id: u64) -> bool {
        match self.subs.lock() {
            Ok(mut subs) => subs.remove(&id).is_some(),
            Err(_) => false,
        }
    }

    /// Calls subscribers in registration order. The lock is released before
    /// any callback runs, so callbacks may re-enter the service.
    fn emit(&self, value: &T) {
        let subs: Vec<_> = match self.subs.lock() {
            Ok(subs) => subs.values().cloned().collect(),
            Err(_) => return,
        };
        for sub in subs {
            sub(value);
        }
    }
}

/// UDP multicast presence, chat and task announcements for one LAN group.
///
/// One instance per process: `start` binds the group port, joins the
/// multicast group and spawns a receive loop that keeps running until
/// `stop`. All inbound packets go through [`LanService::handle_datagram`],
/// which also makes the dispatch rules testable without a socket.
pub struct LanService {
    config: Config,
    presence: Arc<PresenceRegistry>,
    store: Arc<MessageStore>,
    metrics: Arc<Metrics>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    started: AtomicBool,
    shutdown: Mutex<Option<mpsc::Sender<()>>>,
    next_sub_id: AtomicU64,
    chat_subs: SubscriberSet<Chat>,
    task_subs: SubscriberSet<TaskComplete>,
}

impl LanService {
    pub fn new(
        config: Config,
        presence: Arc<PresenceRegistry>,
        store: Arc<MessageStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            presence,
            store,
            metrics,
            socket: Mutex::new(None),
            started: AtomicBool::new(false),
            shutdown: Mutex::new(None),
            next_sub_id: AtomicU64::new(1),
            chat_subs: SubscriberSet::new(),
            task_subs: SubscriberSet::new(),
        }
    }

    fn open_socket(config: &Config) -> Result<UdpSocket, Error> {
        let socket = std::net::UdpSocket::bind(("0.0.0.0", config.port))?;
        socket.set_broadcast(true)?;
        socket.join_multicast_v4(&config.multicast_addr, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_nonblocking(true)?;
        Ok(UdpSocket::from_std(socket)?)
    }

    /// Join the group, announce once on every known interface and spawn the
    /// receive loop. A service starts at most once; restarting after `stop`
    /// needs a fresh instance.
    pub async fn start(self: Arc<Self>) -> Result<(), Error> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }
        if let Err(error) = Self::start_inner(&self).await {
            self.started.store(false, Ordering::SeqCst);
            return Err(error);
        }
        Ok(())
    }

    async fn start_inner(this: &Arc<Self>) -> Result<(), Error> {
        let socket = Arc::new(Self::open_socket(&this.config)?);
        let mut watcher = IfWatcher::new()?;

        let ifaces = collect_initial_interfaces(&mut watcher).await;

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        *this.socket.lock().map_err(|_| Error::Poisoned)? = Some(socket.clone());
        *this.shutdown.lock().map_err(|_| Error::Poisoned)? = Some(shutdown_tx);

        info!(
            "joined {}:{} as \"{}\" ({}), {} interface(s) up",
            this.config.multicast_addr,
            this.config.port,
            this.config.device_name,
            this.config.device_id,
            ifaces.len()
        );

        this.broadcast_heartbeat(&socket, &ifaces).await;
        tokio::spawn(this.clone().run(socket, watcher, ifaces, shutdown_rx));
        Ok(())
    }

    async fn run(
        self: Arc<Self>,
        socket: Arc<UdpSocket>,
        mut watcher: IfWatcher,
        mut ifaces: BTreeSet<Ipv4Addr>,
        mut shutdown: mpsc::Receiver<()>,
    ) {
        let period = Duration::from_millis(self.config.heartbeat_interval_ms.max(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        let mut buf = vec![0u8; self.config.buffer_size];
        let mut watching = true;
        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, src)) => self.handle_datagram(&buf[..len], src),
                    Err(error) => {
                        error!("udp recv failed: {error}");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                _ = ticker.tick() => {
                    self.presence.sweep(get_unix_millis_now());
                    self.broadcast_heartbeat(&socket, &ifaces).await;
                }
                event = watcher.next(), if watching => match event {
                    Some(Ok(event)) => apply_if_event(&mut ifaces, event),
                    Some(Err(error)) => warn!("interface watch: {error}"),
                    None => watching = false,
                },
                _ = shutdown.recv() => break,
            }
        }
        info!("lan service stopped");
    }

    /// Decode and dispatch one datagram. Malformed input bumps an error
    /// counter and is dropped; nothing received off the wire can panic.
    pub(crate) fn handle_datagram(&self, bin: &[u8], src: SocketAddr) {
        self.metrics.add_udp_datagram(bin.len());
        let packet = match Packet::from_json_bytes(bin) {
            Ok(packet) => packet,
            Err(error) => return self.metrics.add_error(&error),
        };
        self.metrics.add_handled_packet_by_name(packet.name());
        match packet {
            Packet::Heartbeat(heartbeat) => self.handle_heartbeat(heartbeat, src),
            Packet::Chat(chat) => self.handle_chat(chat),
            Packet::TaskComplete(task) => self.handle_task_complete(task),
        }
    }

    fn handle_heartbeat(&self, heartbeat: Heartbeat, src: SocketAddr) {
        // no self filter: looped-back announcements keep the sender in its
        // own roster. The address comes from the socket, not the payload.
        self.presence.upsert_heartbeat(
            &heartbeat.device_id,
            &heartbeat.name,
            src.ip(),
            heartbeat.port,
            get_unix_millis_now(),
        );
    }

    fn handle_chat(&self, chat: Chat) {
        if chat.from == self.config.device_id {
            return; // own echo, already stored at send time
        }
        if let Some(to) = &chat.to {
            if to != &self.config.device_id {
                return; // directed at someone else
            }
        }
        if let Err(error) =
            self.store.create_message(&chat.from, chat.to.as_deref(), &chat.text, Some(chat.ts))
        {
            self.metrics.add_error(&error);
        }
        self.chat_subs.emit(&chat);
    }

    fn handle_task_complete(&self, task: TaskComplete) {
        if task.from == self.config.device_id {
            return;
        }
        self.task_subs.emit(&task);
    }

    fn current_socket(&self) -> Result<Arc<UdpSocket>, Error> {
        self.socket.lock().map_err(|_| Error::NotStarted)?.as_ref().cloned().ok_or(Error::NotStarted)
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Error> {
        let socket = self.current_socket()?;
        let bin = packet.to_json_bytes()?;
        let group = SocketAddrV4::new(self.config.multicast_addr, self.config.port);
        socket.send_to(&bin, group).await?;
        self.metrics.add_sent_datagram();
        Ok(())
    }

    /// One announcement per local interface address so every reachable
    /// segment hears the same payload.
    async fn broadcast_heartbeat(&self, socket: &UdpSocket, ifaces: &BTreeSet<Ipv4Addr>) {
        let packet = Packet::Heartbeat(Heartbeat {
            device_id: self.config.device_id.clone(),
            name: self.config.device_name.clone(),
            port: self.config.port,
            ts: get_unix_millis_now(),
        });
        let bin = match packet.to_json_bytes() {
            Ok(bin) => bin,
            Err(error) => return self.metrics.add_error(&error),
        };
        let group = SocketAddrV4::new(self.config.multicast_addr, self.config.port);
        for iface in ifaces {
            match socket.send_to(&bin, group).await {
                Ok(_) => self.metrics.add_sent_datagram(),
                Err(error) => debug!("heartbeat via {iface} failed: {error}"),
            }
        }
    }

    /// Broadcast (`to` of `None`) or direct-message `text`. The local echo
    /// is stored first and its row id returned; a transmit failure is logged
    /// but does not undo the stored echo.
    pub async fn send_chat(&self, text: &str, to: Option<&str>) -> Result<i64, Error> {
        self.current_socket()?; // fail before storing the echo
        let text = truncate_chars(text, MAX_CHAT_TEXT_CHARS);
        let ts = get_unix_millis_now();
        let row_id = self.store.create_message(&self.config.device_id, to, &text, Some(ts))?;
        let packet = Packet::Chat(Chat {
            from: self.config.device_id.clone(),
            to: to.map(str::to_string),
            text,
            ts,
        });
        if let Err(error) = self.send_packet(&packet).await {
            debug!("chat transmit failed: {error}");
        }
        Ok(row_id)
    }

    /// Announce a completed task to the whole group. Transmit failures are
    /// best-effort like every send here; only a stopped service errors.
    pub async fn send_task_complete(&self, task_id: i64, task_title: &str) -> Result<(), Error> {
        self.current_socket()?;
        let packet = Packet::TaskComplete(TaskComplete {
            from: self.config.device_id.clone(),
            from_name: self.config.device_name.clone(),
            task_id,
            task_title: truncate_chars(task_title, MAX_TASK_TITLE_CHARS),
            ts: get_unix_millis_now(),
        });
        if let Err(error) = self.send_packet(&packet).await {
            debug!("task announcement transmit failed: {error}");
        }
        Ok(())
    }

    /// Sweep expired entries, then list who is on the air right now.
    pub fn get_online_peers(&self) -> Vec<PeerInfo> {
        let now = get_unix_millis_now();
        self.presence.sweep(now);
        self.presence.list_online(now)
    }

    pub fn on_chat<F: Fn(&Chat) + Send + Sync + 'static>(&self, sub: F) -> SubscriptionId {
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        self.chat_subs.insert(id, Arc::new(sub));
        SubscriptionId(id)
    }

    pub fn off_chat(&self, id: SubscriptionId) -> bool {
        self.chat_subs.remove(id.0)
    }

    pub fn on_task_complete<F: Fn(&TaskComplete) + Send + Sync + 'static>(
        &self,
        sub: F,
    ) -> SubscriptionId {
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        self.task_subs.insert(id, Arc::new(sub));
        SubscriptionId(id)
    }

    pub fn off_task_complete(&self, id: SubscriptionId) -> bool {
        self.task_subs.remove(id.0)
    }

    /// Leave the group. Idempotent; afterwards sends answer `NotStarted` and
    /// the receive loop winds down.
    pub async fn stop(&self) {
        let sender = match self.shutdown.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Ok(mut slot) = self.socket.lock() {
            slot.take();
        }
        if let Some(sender) = sender {
            let _ = sender.send(()).await;
        }
    }
}

/// Wait out the watcher's opening address enumeration and return the
/// non-loopback IPv4 set. The netlink backend reports existing addresses
/// asynchronously, never as already-queued events; one quiet window with
/// no event ends the collection.
async fn collect_initial_interfaces(watcher: &mut IfWatcher) -> BTreeSet<Ipv4Addr> {
    let mut ifaces = BTreeSet::new();
    loop {
        match timeout(Duration::from_millis(100), watcher.next()).await {
            Ok(Some(Ok(event))) => apply_if_event(&mut ifaces, event),
            Ok(Some(Err(error))) => warn!("interface enumeration: {error}"),
            Ok(None) | Err(_) => return ifaces,
        }
    }
}

fn apply_if_event(ifaces: &mut BTreeSet<Ipv4Addr>, event: IfEvent) {
    match event {
        IfEvent::Up(net) => {
            if let IpAddr::V4(addr) = net.addr() {
                if !addr.is_loopback() && ifaces.insert(addr) {
                    debug!("interface up: {addr}");
                }
            }
        }
        IfEvent::Down(net) => {
            if let IpAddr::V4(addr) = net.addr() {
                if ifaces.remove(&addr) {
                    debug!("interface down: {addr}");
                }
            }
        }
    }
}
