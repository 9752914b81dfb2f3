//! # Client Runtime
//!
//! Configure the TUN, route everything through it (with the server
//! pinned via the old gateway), dial, handshake, then run the two
//! packet pumps until either side fails.

use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::{netmask_from_prefix, ClientConfig};
use crate::constants::{HANDSHAKE_READ_TIMEOUT_SECS, MAX_FRAME_SIZE, MAX_PACKET_SIZE};
use crate::error::Result;
use crate::frame::{read_frame, write_frame};
use crate::handshake;
use crate::platform::{self, RouteGuard};
use crate::session::{RecvHalf, SendHalf};
use crate::tun::TunDevice;

pub fn run(config_path: &str) -> Result<()> {
    let cfg = ClientConfig::from_file(config_path)?;
    let (tun_ip, prefix) = cfg.tunnel_cidr()?;
    let server_public = cfg.server_public_key()?;
    let server_addr = cfg.server_addr()?;

    platform::remove_interface(&cfg.tun.name);
    let tun = TunDevice::create(&cfg.tun.name)?;
    tun.set_address(tun_ip)?;
    tun.set_netmask(netmask_from_prefix(prefix))?;
    tun.set_mtu(cfg.tun.mtu)?;
    tun.bring_up()?;
    log::info!("tunnel address {}/{}", tun_ip, prefix);

    // Reroute before dialing; the pinned host route keeps the server
    // reachable through the physical interface.
    let _routes = RouteGuard::acquire(tun.name(), &server_addr.ip().to_string())?;

    let mut stream = TcpStream::connect(server_addr)?;
    log::info!("connected to server at {}", server_addr);

    stream.set_read_timeout(Some(Duration::from_secs(HANDSHAKE_READ_TIMEOUT_SECS)))?;
    let keys = handshake::connect(&mut stream, tun_ip, &server_public)?;
    stream.set_read_timeout(None)?;
    log::info!("session {} established", keys.session_id);

    let (send_half, recv_half) = keys.split();
    let tun = Arc::new(tun);

    // TUN -> TCP pump; shuts the socket down on failure so the
    // downlink pump unblocks too. Its error is kept so a TUN failure
    // still exits non-zero.
    let uplink_error: Arc<Mutex<Option<crate::TunnelError>>> = Arc::new(Mutex::new(None));
    {
        let uplink_tun = Arc::clone(&tun);
        let uplink_error = Arc::clone(&uplink_error);
        let mut uplink_stream = stream.try_clone()?;
        thread::spawn(move || {
            if let Err(e) = pump_uplink(&uplink_tun, &mut uplink_stream, send_half) {
                log::error!("uplink pump failed: {}", e);
                *uplink_error.lock().unwrap() = Some(e);
            }
            let _ = uplink_stream.shutdown(Shutdown::Both);
        });
    }

    // TCP -> TUN pump on this thread. When it returns the process is
    // done; the uplink thread dies with it.
    let downlink_result = pump_downlink(&tun, &mut stream, recv_half);
    let _ = stream.shutdown(Shutdown::Both);

    log::info!("tunnel closed");
    if let Some(e) = uplink_error.lock().unwrap().take() {
        return Err(e);
    }
    downlink_result
}

fn pump_uplink(tun: &TunDevice, stream: &mut TcpStream, mut send: SendHalf) -> Result<()> {
    let mut buf = vec![0u8; MAX_FRAME_SIZE];

    loop {
        let n = tun.read(&mut buf)?;
        if n == 0 {
            continue;
        }
        if n > MAX_PACKET_SIZE {
            log::warn!("dropping oversized packet from TUN: {} bytes", n);
            continue;
        }

        let sealed = send.seal(&buf[..n])?;
        write_frame(stream, &sealed)?;
    }
}

fn pump_downlink(tun: &TunDevice, stream: &mut TcpStream, mut recv: RecvHalf) -> Result<()> {
    let mut buf = vec![0u8; MAX_FRAME_SIZE];

    loop {
        let n = match read_frame(stream, &mut buf)? {
            Some(n) => n,
            None => {
                log::info!("server closed the connection");
                return Ok(());
            }
        };

        let packet = recv.open(&buf[..n])?;
        tun.write(&packet)?;
    }
}
