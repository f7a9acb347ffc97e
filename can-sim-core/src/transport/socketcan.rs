//! Linux SocketCAN transport
//!
//! Opens a CAN_RAW socket on a named interface and negotiates the optional
//! features the simulator benefits from. Only socket creation and bind are
//! fatal; every optional feature the kernel or driver refuses is reported as
//! a warning and the simulator runs without it.
//!
//! Receive timestamps come from ancillary data:
//! - SO_TIMESTAMPING: `timespec[3]`, index 0 is the software stamp
//! - SO_TIMESTAMP: `timeval`

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use crate::codec::CANFD_MTU;
use crate::types::{Result, SimError};

use super::{Received, TimestampMode, Transport};

/// Room for one SO_TIMESTAMP and one SO_TIMESTAMPING control message,
/// as `u64` words so the buffer is suitably aligned for `cmsghdr`
const CONTROL_WORDS: usize = 32;

/// Optional socket features requested at open time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    /// Enable CAN_RAW_FD_FRAMES so 72-byte frames can be read and written
    pub fd_frames: bool,
    /// Receive frames sent from this socket (CAN_RAW_RECV_OWN_MSGS)
    pub recv_own_msgs: bool,
    /// Subscribe to every error class (CAN_RAW_ERR_FILTER)
    pub error_frames: bool,
    /// Negotiate receive timestamps
    pub timestamps: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            fd_frames: true,
            recv_own_msgs: true,
            error_frames: true,
            timestamps: true,
        }
    }
}

/// Raw SocketCAN socket bound to one interface
#[derive(Debug)]
pub struct SocketCan {
    fd: OwnedFd,
    interface: String,
    timestamp_mode: TimestampMode,
    fd_frames: bool,
    unsupported: Vec<&'static str>,
}

impl SocketCan {
    /// Create the socket, bind it to `interface` and negotiate `options`
    pub fn open(interface: &str, options: &SocketOptions) -> Result<Self> {
        let raw = unsafe {
            libc::socket(
                libc::PF_CAN,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                libc::CAN_RAW,
            )
        };
        if raw < 0 {
            return Err(SimError::Socket(io::Error::last_os_error()));
        }
        // SAFETY: `raw` is a freshly created descriptor we exclusively own
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let bind_error = |source| SimError::Bind {
            interface: interface.to_string(),
            source,
        };
        let ifindex = interface_index(interface).map_err(bind_error)?;

        let mut addr: libc::sockaddr_can = unsafe { mem::zeroed() };
        addr.can_family = libc::AF_CAN as libc::sa_family_t;
        addr.can_ifindex = ifindex as libc::c_int;

        let res = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_can as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_can>() as libc::socklen_t,
            )
        };
        if res < 0 {
            return Err(bind_error(io::Error::last_os_error()));
        }

        log::info!("Bound to CAN interface {}", interface);

        let mut socket = Self {
            fd,
            interface: interface.to_string(),
            timestamp_mode: TimestampMode::None,
            fd_frames: false,
            unsupported: Vec::new(),
        };
        socket.configure(options);
        Ok(socket)
    }

    /// Name of the bound interface
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Timestamp source in use
    pub fn timestamp_mode(&self) -> TimestampMode {
        self.timestamp_mode
    }

    /// True if CAN-FD frames can be exchanged
    pub fn fd_frames(&self) -> bool {
        self.fd_frames
    }

    /// Socket options the kernel refused
    pub fn unsupported_features(&self) -> &[&'static str] {
        &self.unsupported
    }

    fn configure(&mut self, options: &SocketOptions) {
        let fd = self.fd.as_raw_fd();
        let on: libc::c_int = 1;

        if options.recv_own_msgs {
            if let Err(err) = set_option(fd, libc::SOL_CAN_RAW, libc::CAN_RAW_RECV_OWN_MSGS, &on) {
                self.report_unsupported("CAN_RAW_RECV_OWN_MSGS", &err);
            }
        }

        if options.error_frames {
            let err_mask: u32 = libc::CAN_ERR_MASK;
            if let Err(err) = set_option(fd, libc::SOL_CAN_RAW, libc::CAN_RAW_ERR_FILTER, &err_mask)
            {
                self.report_unsupported("CAN_ERR_* error frames", &err);
            }
        }

        if options.fd_frames {
            match set_option(fd, libc::SOL_CAN_RAW, libc::CAN_RAW_FD_FRAMES, &on) {
                Ok(()) => self.fd_frames = true,
                Err(err) => self.report_unsupported("CAN FD", &err),
            }
        }

        if options.timestamps {
            self.timestamp_mode = self.negotiate_timestamps();
        }
        log::debug!(
            "{}: timestamps {:?}, CAN FD {}",
            self.interface,
            self.timestamp_mode,
            self.fd_frames
        );
    }

    /// SO_TIMESTAMPING, then SO_TIMESTAMP, then nothing
    fn negotiate_timestamps(&mut self) -> TimestampMode {
        let fd = self.fd.as_raw_fd();
        let flags = (libc::SOF_TIMESTAMPING_SOFTWARE
            | libc::SOF_TIMESTAMPING_RX_SOFTWARE
            | libc::SOF_TIMESTAMPING_RX_HARDWARE
            | libc::SOF_TIMESTAMPING_RAW_HARDWARE) as libc::c_int;
        match set_option(fd, libc::SOL_SOCKET, libc::SO_TIMESTAMPING, &flags) {
            Ok(()) => return TimestampMode::Timestamping,
            Err(err) => self.report_unsupported("SO_TIMESTAMPING", &err),
        }

        let on: libc::c_int = 1;
        match set_option(fd, libc::SOL_SOCKET, libc::SO_TIMESTAMP, &on) {
            Ok(()) => TimestampMode::Timestamp,
            Err(err) => {
                self.report_unsupported("SO_TIMESTAMP", &err);
                TimestampMode::None
            }
        }
    }

    /// ENOPROTOOPT is the usual answer of an old kernel; anything else is
    /// logged the same way with its errno
    fn report_unsupported(&mut self, feature: &'static str, err: &io::Error) {
        log::warn!("{} not supported on {}: {}", feature, self.interface, err);
        self.unsupported.push(feature);
    }

    fn read_frame(&self) -> Result<Received> {
        let mut frame = [0u8; CANFD_MTU];
        let mut control = [0u64; CONTROL_WORDS];

        let mut iov = libc::iovec {
            iov_base: frame.as_mut_ptr() as *mut libc::c_void,
            iov_len: frame.len(),
        };
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = mem::size_of_val(&control) as _;

        let nbytes = unsafe { libc::recvmsg(self.fd.as_raw_fd(), &mut msg, 0) };
        if nbytes < 0 {
            return Err(SimError::SocketRead(io::Error::last_os_error()));
        }

        // SAFETY: `msg` was filled in by a successful recvmsg
        let timestamp_ns = unsafe { extract_timestamp(&msg, self.timestamp_mode) };
        Ok(Received::new(&frame[..nbytes as usize], timestamp_ns))
    }
}

impl AsRawFd for SocketCan {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Transport for SocketCan {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Received>> {
        let mut fds = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        let res = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(SimError::SocketRead(err));
        }
        if res == 0 {
            return Ok(None);
        }

        if fds.revents & libc::POLLIN != 0 {
            return self.read_frame().map(Some);
        }
        if fds.revents & libc::POLLERR != 0 {
            return Err(SimError::SocketRead(io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "error reading from socket, have you forgot to set bitrate and set up {}?",
                    self.interface
                ),
            )));
        }

        log::warn!(
            "Unexpected poll events 0x{:x} on {}",
            fds.revents,
            self.interface
        );
        Ok(None)
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let written = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                bytes.as_ptr() as *const libc::c_void,
                bytes.len(),
            )
        };
        if written < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(written as usize)
    }
}

fn interface_index(name: &str) -> io::Result<libc::c_uint> {
    let c_name = CString::new(name)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(index)
}

fn set_option<T>(fd: RawFd, level: libc::c_int, name: libc::c_int, value: &T) -> io::Result<()> {
    let res = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            value as *const T as *const libc::c_void,
            mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Walk the control messages and pull the stamp matching `mode`
unsafe fn extract_timestamp(msg: &libc::msghdr, mode: TimestampMode) -> Option<u64> {
    let mut timestamp = None;
    let mut cmsg = libc::CMSG_FIRSTHDR(msg);
    while !cmsg.is_null() {
        let header = &*cmsg;
        if header.cmsg_level == libc::SOL_SOCKET {
            match (mode, header.cmsg_type) {
                (TimestampMode::Timestamping, libc::SO_TIMESTAMPING) => {
                    let stamp = ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const libc::timespec);
                    timestamp = to_nanos(stamp.tv_sec as i64, stamp.tv_nsec as i64);
                }
                (TimestampMode::Timestamp, libc::SO_TIMESTAMP) => {
                    let tv = ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const libc::timeval);
                    timestamp = to_nanos(tv.tv_sec as i64, tv.tv_usec as i64 * 1000);
                }
                _ => {}
            }
        }
        cmsg = libc::CMSG_NXTHDR(msg, cmsg);
    }
    timestamp
}

fn to_nanos(secs: i64, nanos: i64) -> Option<u64> {
    let total = secs.checked_mul(1_000_000_000)?.checked_add(nanos)?;
    (total > 0).then_some(total as u64)
}
