//! # Server Runtime
//!
//! Accept loop, per-connection handshakes, and the TUN-reader
//! dispatcher. One thread reads the server TUN and routes each packet
//! by destination address to the owning connection's writer thread
//! through a small bounded channel; each connection's reader thread
//! decrypts client traffic straight into the TUN.
//!
//! Counter ownership: only a connection's writer thread touches its
//! send counter and only its reader thread touches its receive
//! counter, so both stay strictly sequential without shared state.

use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use dashmap::DashMap;

use crate::config::{netmask_from_prefix, ServerConfig};
use crate::constants::{
    HANDSHAKE_READ_TIMEOUT_SECS, MAX_FRAME_SIZE, WRITER_CHANNEL_CAPACITY,
};
use crate::crypto::{Ed25519KeyPair, KeyFile};
use crate::error::{Result, TunnelError};
use crate::frame::{read_frame, write_frame};
use crate::handshake;
use crate::platform::{self, GatewayGuard};
use crate::session::{RecvHalf, SendHalf, SessionId};
use crate::tun::TunDevice;

static RUNNING: AtomicBool = AtomicBool::new(true);
static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Dispatch entry: everything the rest of the server may do to a
/// connection. Dropping it (or failing its channel) ends the writer;
/// `shutdown` lets an evictor or the dispatcher kick the reader loose.
struct ClientRecord {
    conn_id: u64,
    outbound: Sender<Vec<u8>>,
    shutdown: TcpStream,
    session_id: SessionId,
}

type DispatchMap = Arc<DashMap<Ipv4Addr, ClientRecord>>;

pub fn run(config_path: &str) -> Result<()> {
    let cfg = ServerConfig::from_file(config_path)?;
    let listen_addr = cfg.listen_addr()?;
    let (tun_ip, prefix) = cfg.tunnel_cidr()?;

    let keyfile = KeyFile::load_or_generate(&cfg.server.key_file)?;
    let identity = Arc::new(keyfile.keypair()?);
    log::info!(
        "server identity: {} (distribute to clients)",
        BASE64.encode(keyfile.public_key())
    );

    platform::remove_interface(&cfg.tun.name);
    let tun = TunDevice::create(&cfg.tun.name)?;
    tun.set_address(tun_ip)?;
    tun.set_netmask(netmask_from_prefix(prefix))?;
    tun.set_mtu(cfg.tun.mtu)?;
    tun.bring_up()?;
    log::info!("tunnel address {}/{}", tun_ip, prefix);

    let egress = platform::default_egress_interface()?;
    let _gateway = GatewayGuard::acquire(tun.name(), &egress)?;

    let listener = TcpListener::bind(listen_addr)?;
    log::info!("listening on {}", listen_addr);

    install_signal_handler();

    let tun = Arc::new(tun);
    let map: DispatchMap = Arc::new(DashMap::new());

    // The single TUN reader for the lifetime of the server
    {
        let tun = Arc::clone(&tun);
        let map = Arc::clone(&map);
        thread::spawn(move || dispatch_loop(&tun, &map));
    }

    // Accept on a worker thread so this one can watch the shutdown
    // flag; a fatal accept error is reported back through the channel.
    let (fatal_tx, fatal_rx) = mpsc::channel::<TunnelError>();
    {
        let map = Arc::clone(&map);
        let tun = Arc::clone(&tun);
        thread::spawn(move || {
            if let Err(e) = accept_loop(&listener, &identity, &map, &tun) {
                let _ = fatal_tx.send(e);
            }
        });
    }

    loop {
        match fatal_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(e) => {
                log::error!("accept loop failed: {}", e);
                return Err(e);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if !RUNNING.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    log::info!("server shutting down");
    Ok(())
}

fn accept_loop(
    listener: &TcpListener,
    identity: &Arc<Ed25519KeyPair>,
    map: &DispatchMap,
    tun: &Arc<TunDevice>,
) -> Result<()> {
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                if RUNNING.load(Ordering::SeqCst) {
                    continue;
                }
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let identity = Arc::clone(identity);
        let map = Arc::clone(map);
        let tun = Arc::clone(tun);
        thread::spawn(move || handle_connection(stream, peer, &identity, &map, &tun));
    }
}

/// Handshake, register, then read client traffic into the TUN until
/// the connection dies.
fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    identity: &Ed25519KeyPair,
    map: &DispatchMap,
    tun: &TunDevice,
) {
    let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);

    let handshake_result = (|| -> Result<_> {
        stream.set_read_timeout(Some(Duration::from_secs(HANDSHAKE_READ_TIMEOUT_SECS)))?;
        let accepted = handshake::accept(&mut stream, identity)?;
        stream.set_read_timeout(None)?;
        Ok(accepted)
    })();

    let (keys, inner_ip) = match handshake_result {
        Ok(accepted) => accepted,
        Err(e) => {
            log::warn!("handshake with {} failed: {}", peer, e);
            return;
        }
    };
    let session_id = keys.session_id;
    let (send_half, mut recv_half) = keys.split();
    log::info!("{} registered as {} (session {})", peer, inner_ip, session_id);

    let (outbound_tx, outbound_rx) = bounded::<Vec<u8>>(WRITER_CHANNEL_CAPACITY);

    let record = ClientRecord {
        conn_id,
        outbound: outbound_tx,
        shutdown: match stream.try_clone() {
            Ok(clone) => clone,
            Err(e) => {
                log::warn!("cannot clone socket for {}: {}", peer, e);
                return;
            }
        },
        session_id,
    };

    // Writer thread owns the send half and the write side of the socket
    {
        let write_stream = match stream.try_clone() {
            Ok(clone) => clone,
            Err(e) => {
                log::warn!("cannot clone socket for {}: {}", peer, e);
                return;
            }
        };
        let map = Arc::clone(map);
        thread::spawn(move || {
            writer_loop(write_stream, outbound_rx, send_half, &map, inner_ip, conn_id)
        });
    }

    // A newer handshake for the same inner IP evicts the older session
    if let Some(old) = map.insert(inner_ip, record) {
        log::info!(
            "evicting session {} for {} in favor of {}",
            old.session_id,
            inner_ip,
            session_id
        );
        let _ = old.shutdown.shutdown(Shutdown::Both);
    }

    reader_loop(&mut stream, &mut recv_half, tun, peer);

    // Only remove the entry if it is still ours; a newer session may
    // already own this inner IP.
    map.remove_if(&inner_ip, |_, record| record.conn_id == conn_id);
    let _ = stream.shutdown(Shutdown::Both);
    log::info!("client {} disconnected", peer);
}

/// TCP -> TUN: open frames in arrival order and hand the inner
/// packets to the TUN.
fn reader_loop(stream: &mut TcpStream, recv: &mut RecvHalf, tun: &TunDevice, peer: SocketAddr) {
    let mut buf = vec![0u8; MAX_FRAME_SIZE];

    loop {
        let n = match read_frame(stream, &mut buf) {
            Ok(Some(n)) => n,
            Ok(None) => return,
            Err(e) => {
                log::warn!("read from {} failed: {}", peer, e);
                return;
            }
        };

        let packet = match recv.open(&buf[..n]) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("rejecting frame from {} at counter {}: {}", peer, recv.counter(), e);
                return;
            }
        };

        if let Err(e) = tun.write(&packet) {
            log::error!("TUN write failed: {}", e);
            return;
        }
    }
}

/// Channel -> TCP: seal and frame packets routed here by the
/// dispatcher. Exits when the channel closes (record removed or
/// evicted) or the socket fails; either way the dispatch entry is
/// cleaned up and the socket shut so the reader unblocks.
fn writer_loop(
    mut stream: TcpStream,
    outbound: Receiver<Vec<u8>>,
    mut send: SendHalf,
    map: &DispatchMap,
    inner_ip: Ipv4Addr,
    conn_id: u64,
) {
    for packet in outbound.iter() {
        let sealed = match send.seal(&packet) {
            Ok(sealed) => sealed,
            Err(e) => {
                log::warn!("seal for {} failed: {}", inner_ip, e);
                break;
            }
        };
        if let Err(e) = write_frame(&mut stream, &sealed) {
            log::warn!("write to {} failed: {}", inner_ip, e);
            break;
        }
    }

    map.remove_if(&inner_ip, |_, record| record.conn_id == conn_id);
    let _ = stream.shutdown(Shutdown::Both);
}

/// The single TUN reader: route each packet by destination address.
/// Unroutable packets are dropped silently; a full channel drops the
/// packet rather than letting one slow client stall the rest.
fn dispatch_loop(tun: &TunDevice, map: &DispatchMap) {
    let mut buf = vec![0u8; MAX_FRAME_SIZE];

    while RUNNING.load(Ordering::SeqCst) {
        let n = match tun.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(e) => {
                // Reading may recover; the server keeps going
                log::error!("TUN read failed: {}", e);
                continue;
            }
        };

        let destination = match crate::ipv4::Ipv4Header::parse(&buf[..n]) {
            Ok(header) => header.destination,
            Err(e) => {
                log::debug!("unparseable packet from TUN: {}", e);
                continue;
            }
        };

        let Some(record) = map.get(&destination) else {
            continue;
        };

        match record.outbound.try_send(buf[..n].to_vec()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::trace!("queue full for {}, dropping packet", destination);
            }
            Err(TrySendError::Disconnected(_)) => {
                let dead_id = record.conn_id;
                drop(record);
                map.remove_if(&destination, |_, r| r.conn_id == dead_id);
            }
        }
    }
}

fn install_signal_handler() {
    unsafe {
        libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
    }
}

extern "C" fn handle_signal(_: libc::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionKeys;
    use zeroize::Zeroizing;

    fn dummy_record(conn_id: u64) -> (ClientRecord, Receiver<Vec<u8>>, TcpListener) {
        // A real socket pair backs the shutdown handle
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (tx, rx) = bounded(WRITER_CHANNEL_CAPACITY);
        (
            ClientRecord {
                conn_id,
                outbound: tx,
                shutdown: stream,
                session_id: SessionId([0u8; 32]),
            },
            rx,
            listener,
        )
    }

    #[test]
    fn test_one_record_per_inner_ip() {
        let map: DispatchMap = Arc::new(DashMap::new());
        let ip = Ipv4Addr::new(10, 0, 0, 2);

        let (first, _rx1, _l1) = dummy_record(1);
        let (second, _rx2, _l2) = dummy_record(2);

        assert!(map.insert(ip, first).is_none());
        let evicted = map.insert(ip, second).unwrap();
        assert_eq!(evicted.conn_id, 1);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&ip).unwrap().conn_id, 2);
    }

    #[test]
    fn test_identity_checked_removal_spares_newer_session() {
        let map: DispatchMap = Arc::new(DashMap::new());
        let ip = Ipv4Addr::new(10, 0, 0, 2);

        let (newer, _rx, _l) = dummy_record(7);
        map.insert(ip, newer);

        // The evicted connection (id 1) cleans up after itself but
        // must not take the newer record with it
        map.remove_if(&ip, |_, record| record.conn_id == 1);
        assert!(map.get(&ip).is_some());

        map.remove_if(&ip, |_, record| record.conn_id == 7);
        assert!(map.get(&ip).is_none());
    }

    #[test]
    fn test_dispatch_routes_by_destination() {
        let map: DispatchMap = Arc::new(DashMap::new());
        let (record_a, rx_a, _la) = dummy_record(1);
        let (record_b, rx_b, _lb) = dummy_record(2);
        map.insert(Ipv4Addr::new(10, 0, 0, 2), record_a);
        map.insert(Ipv4Addr::new(10, 0, 0, 3), record_b);

        // A packet destined for .3 reaches only that record
        let destination = Ipv4Addr::new(10, 0, 0, 3);
        let record = map.get(&destination).unwrap();
        record.outbound.try_send(vec![1, 2, 3]).unwrap();
        drop(record);

        assert_eq!(rx_b.try_recv().unwrap(), vec![1, 2, 3]);
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_unknown_destination_is_a_silent_miss() {
        let map: DispatchMap = Arc::new(DashMap::new());
        assert!(map.get(&Ipv4Addr::new(10, 0, 0, 99)).is_none());
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let (record, _rx, _l) = dummy_record(1);
        for _ in 0..WRITER_CHANNEL_CAPACITY {
            record.outbound.try_send(vec![0u8; 64]).unwrap();
        }
        assert!(matches!(
            record.outbound.try_send(vec![0u8; 64]),
            Err(TrySendError::Full(_))
        ));
    }

    #[test]
    fn test_writer_loop_drains_seals_and_frames() {
        // Loopback connection: writer at one end, assertions at the other
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server_side, _) = listener.accept().unwrap();

        let keys_server = SessionKeys::new(
            SessionId([1u8; 32]),
            Zeroizing::new([0x10u8; 32]),
            Zeroizing::new([0x20u8; 32]),
            true,
        );
        let keys_client = SessionKeys::new(
            SessionId([1u8; 32]),
            Zeroizing::new([0x20u8; 32]),
            Zeroizing::new([0x10u8; 32]),
            false,
        );
        let (send_half, _) = keys_server.split();
        let (_, mut client_recv) = keys_client.split();

        let map: DispatchMap = Arc::new(DashMap::new());
        let (tx, rx) = bounded::<Vec<u8>>(WRITER_CHANNEL_CAPACITY);

        let writer_map = Arc::clone(&map);
        let writer = thread::spawn(move || {
            writer_loop(
                server_side,
                rx,
                send_half,
                &writer_map,
                Ipv4Addr::new(10, 0, 0, 2),
                1,
            )
        });

        tx.send(vec![0xAA; 100]).unwrap();
        tx.send(vec![0xBB; 200]).unwrap();
        drop(tx); // channel closed -> writer exits

        let mut reader = client;
        let mut buf = vec![0u8; MAX_FRAME_SIZE];

        let n = read_frame(&mut reader, &mut buf).unwrap().unwrap();
        assert_eq!(n, 100 + 16);
        assert_eq!(client_recv.open(&buf[..n]).unwrap(), vec![0xAA; 100]);

        let n = read_frame(&mut reader, &mut buf).unwrap().unwrap();
        assert_eq!(client_recv.open(&buf[..n]).unwrap(), vec![0xBB; 200]);

        writer.join().unwrap();
    }
}
