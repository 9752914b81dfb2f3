//! # TUN Device
//!
//! Linux layer-3 virtual interface. The only module aware of the TUN
//! ABI: open("/dev/net/tun"), TUNSETIFF, then plain read/write of one
//! IP packet per call.

use crate::error::{PlatformError, Result, TunnelError};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::net::Ipv4Addr;
use std::os::unix::io::{AsRawFd, RawFd};

// From linux/if_tun.h and linux/sockios.h
const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;
const IFNAMSIZ: usize = 16;
const TUNSETIFF: libc::c_ulong = 0x400454ca;
const SIOCSIFMTU: libc::c_ulong = 0x8922;
const SIOCSIFADDR: libc::c_ulong = 0x8916;
const SIOCSIFNETMASK: libc::c_ulong = 0x891c;
const SIOCGIFFLAGS: libc::c_ulong = 0x8913;
const SIOCSIFFLAGS: libc::c_ulong = 0x8914;
const IFF_UP: libc::c_short = 0x1;
const IFF_RUNNING: libc::c_short = 0x40;

#[repr(C)]
struct IfReq {
    ifr_name: [libc::c_char; IFNAMSIZ],
    ifr_flags: libc::c_short,
    _pad: [u8; 22],
}

impl IfReq {
    fn new(name: &str, flags: libc::c_short) -> Result<Self> {
        Ok(IfReq {
            ifr_name: encode_name(name)?,
            ifr_flags: flags,
            _pad: [0; 22],
        })
    }
}

#[repr(C)]
struct SockAddrIn {
    sin_family: libc::sa_family_t,
    sin_port: u16,
    sin_addr: libc::in_addr,
    sin_zero: [u8; 8],
}

#[repr(C)]
struct IfReqAddr {
    ifr_name: [libc::c_char; IFNAMSIZ],
    ifr_addr: SockAddrIn,
}

impl IfReqAddr {
    fn new(name: &str, addr: Ipv4Addr) -> Result<Self> {
        Ok(IfReqAddr {
            ifr_name: encode_name(name)?,
            ifr_addr: SockAddrIn {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: 0,
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(addr.octets()),
                },
                sin_zero: [0; 8],
            },
        })
    }
}

#[repr(C)]
struct IfReqMtu {
    ifr_name: [libc::c_char; IFNAMSIZ],
    ifr_mtu: libc::c_int,
    _pad: [u8; 20],
}

fn encode_name(name: &str) -> Result<[libc::c_char; IFNAMSIZ]> {
    if name.is_empty() || name.len() >= IFNAMSIZ {
        return Err(PlatformError::InvalidName(name.to_string()).into());
    }
    let mut encoded = [0 as libc::c_char; IFNAMSIZ];
    for (i, byte) in name.bytes().enumerate() {
        encoded[i] = byte as libc::c_char;
    }
    Ok(encoded)
}

/// A configured TUN interface.
///
/// Read and write take `&self` so the device can be shared between
/// pump threads; the kernel delivers and accepts whole packets per
/// syscall, so packet-level atomicity holds without locking.
pub struct TunDevice {
    file: File,
    name: String,
}

impl TunDevice {
    /// Create the interface. Requires root or CAP_NET_ADMIN.
    pub fn create(name: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/net/tun")
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    TunnelError::Platform(PlatformError::PermissionDenied)
                } else {
                    TunnelError::Platform(PlatformError::TunOpenFailed)
                }
            })?;

        let mut ifr = IfReq::new(name, IFF_TUN | IFF_NO_PI)?;

        // SAFETY: ifr is a properly initialized ifreq for TUNSETIFF
        let result = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF, &mut ifr) };
        if result < 0 {
            let errno = std::io::Error::last_os_error();
            return Err(PlatformError::IoctlFailed(format!("TUNSETIFF: {}", errno)).into());
        }

        let actual_name = ifr
            .ifr_name
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8 as char)
            .collect::<String>();

        log::info!("created TUN interface {}", actual_name);
        Ok(TunDevice {
            file,
            name: actual_name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_address(&self, addr: Ipv4Addr) -> Result<()> {
        log::debug!("{}: address {}", self.name, addr);
        let ifr = IfReqAddr::new(&self.name, addr)?;
        self.ioctl_with_socket(SIOCSIFADDR, &ifr, "SIOCSIFADDR")
    }

    pub fn set_netmask(&self, mask: Ipv4Addr) -> Result<()> {
        log::debug!("{}: netmask {}", self.name, mask);
        let ifr = IfReqAddr::new(&self.name, mask)?;
        self.ioctl_with_socket(SIOCSIFNETMASK, &ifr, "SIOCSIFNETMASK")
    }

    pub fn set_mtu(&self, mtu: u16) -> Result<()> {
        log::debug!("{}: mtu {}", self.name, mtu);
        let ifr = IfReqMtu {
            ifr_name: encode_name(&self.name)?,
            ifr_mtu: mtu as libc::c_int,
            _pad: [0; 20],
        };
        self.ioctl_with_socket(SIOCSIFMTU, &ifr, "SIOCSIFMTU")
    }

    pub fn bring_up(&self) -> Result<()> {
        let mut ifr = IfReq::new(&self.name, 0)?;
        let sock = self.create_ioctl_socket()?;

        let result = unsafe { libc::ioctl(sock, SIOCGIFFLAGS, &mut ifr) };
        if result < 0 {
            unsafe { libc::close(sock) };
            return Err(PlatformError::IoctlFailed(format!(
                "SIOCGIFFLAGS: {}",
                std::io::Error::last_os_error()
            ))
            .into());
        }

        ifr.ifr_flags |= IFF_UP | IFF_RUNNING;
        let result = unsafe { libc::ioctl(sock, SIOCSIFFLAGS, &ifr) };
        unsafe { libc::close(sock) };

        if result < 0 {
            return Err(PlatformError::IoctlFailed(format!(
                "SIOCSIFFLAGS: {}",
                std::io::Error::last_os_error()
            ))
            .into());
        }
        log::info!("interface {} up", self.name);
        Ok(())
    }

    /// Read one complete IP packet. Blocks until one is available.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let n = (&self.file).read(buf)?;
        log::trace!("{}: read {} bytes", self.name, n);
        Ok(n)
    }

    /// Write one complete IP packet.
    pub fn write(&self, packet: &[u8]) -> Result<usize> {
        let n = (&self.file).write(packet)?;
        log::trace!("{}: wrote {} bytes", self.name, n);
        Ok(n)
    }

    fn ioctl_with_socket<T>(&self, request: libc::c_ulong, arg: &T, name: &str) -> Result<()> {
        let sock = self.create_ioctl_socket()?;
        let result = unsafe { libc::ioctl(sock, request, arg) };
        unsafe { libc::close(sock) };
        if result < 0 {
            return Err(PlatformError::IoctlFailed(format!(
                "{}: {}",
                name,
                std::io::Error::last_os_error()
            ))
            .into());
        }
        Ok(())
    }

    fn create_ioctl_socket(&self) -> Result<RawFd> {
        let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if sock < 0 {
            return Err(PlatformError::IoctlFailed("socket() failed".into()).into());
        }
        Ok(sock)
    }
}

impl AsRawFd for TunDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}
