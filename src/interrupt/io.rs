//! Interruptible descriptor I/O (unix).
//!
//! Every wrapper first waits for readiness through [`poll`], which adds a
//! private wake descriptor to the caller's set. Raising the thread's context
//! signals that descriptor, so the poll returns and the call reports
//! [`io::ErrorKind::Interrupted`].

use super::{current, Armed, Interrupted};
use std::io::{self, IoSlice, IoSliceMut, Read, Write};
use std::mem;
use std::net::{
    Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, TcpListener, TcpStream,
    ToSocketAddrs, UdpSocket,
};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

struct WakeFd {
    read: OwnedFd,
    write: Option<OwnedFd>,
}

impl WakeFd {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            read: unsafe { OwnedFd::from_raw_fd(fd) },
            write: None,
        })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn new() -> io::Result<Self> {
        let mut fds: [libc::c_int; 2] = [-1, -1];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        for fd in [read.as_raw_fd(), write.as_raw_fd()] {
            set_nonblock_cloexec(fd)?;
        }
        Ok(Self {
            read,
            write: Some(write),
        })
    }

    fn signal_fd(&self) -> RawFd {
        self.write.as_ref().unwrap_or(&self.read).as_raw_fd()
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_nonblock_cloexec(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

// eventfd wants exactly 8 bytes; a pipe takes anything. A full pipe or a
// saturated counter already means "woken", so errors are ignored.
fn signal(fd: RawFd) {
    let one: u64 = 1;
    unsafe {
        libc::write(
            fd,
            &one as *const u64 as *const libc::c_void,
            mem::size_of::<u64>(),
        );
    }
}

fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = (d.as_nanos() + 999_999) / 1_000_000;
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

fn sys_poll(fds: &mut [libc::pollfd], timeout: Option<Duration>) -> io::Result<usize> {
    let ret = unsafe {
        libc::poll(
            fds.as_mut_ptr(),
            fds.len() as libc::nfds_t,
            timeout_ms(timeout),
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret as usize)
}

/// Interruptible `poll(2)`. Returns the number of ready descriptors; `None`
/// waits forever.
pub fn poll(fds: &mut [libc::pollfd], timeout: Option<Duration>) -> io::Result<usize> {
    let ctx = match current() {
        Some(ctx) => ctx,
        None => return sys_poll(fds, timeout),
    };

    let wake = WakeFd::new()?;
    let mut set = Vec::with_capacity(fds.len() + 1);
    set.extend_from_slice(fds);
    set.push(libc::pollfd {
        fd: wake.read.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    });

    let signal_fd = wake.signal_fd();
    let armed = Armed::arm(Some(ctx), move || signal(signal_fd));
    let result = sys_poll(&mut set, timeout);
    let interrupted = armed.disarm();

    for (dst, src) in fds.iter_mut().zip(&set) {
        dst.revents = src.revents;
    }

    if interrupted {
        return Err(Interrupted.into());
    }

    let ready = result?;
    if set[fds.len()].revents != 0 {
        return Ok(ready.saturating_sub(1));
    }
    Ok(ready)
}

fn wait_ready(fd: BorrowedFd<'_>, events: libc::c_short) -> io::Result<()> {
    let mut ufd = [libc::pollfd {
        fd: fd.as_raw_fd(),
        events,
        revents: 0,
    }];
    poll(&mut ufd, None).map(|_| ())
}

pub fn read<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: Read + AsFd + ?Sized,
{
    wait_ready(reader.as_fd(), libc::POLLIN)?;
    reader.read(buf)
}

pub fn readv<R>(reader: &mut R, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize>
where
    R: Read + AsFd + ?Sized,
{
    wait_ready(reader.as_fd(), libc::POLLIN)?;
    reader.read_vectored(bufs)
}

pub fn write<W>(writer: &mut W, buf: &[u8]) -> io::Result<usize>
where
    W: Write + AsFd + ?Sized,
{
    wait_ready(writer.as_fd(), libc::POLLOUT)?;
    writer.write(buf)
}

pub fn writev<W>(writer: &mut W, bufs: &[IoSlice<'_>]) -> io::Result<usize>
where
    W: Write + AsFd + ?Sized,
{
    wait_ready(writer.as_fd(), libc::POLLOUT)?;
    writer.write_vectored(bufs)
}

pub fn recv(socket: &UdpSocket, buf: &mut [u8]) -> io::Result<usize> {
    wait_ready(socket.as_fd(), libc::POLLIN)?;
    socket.recv(buf)
}

pub fn recv_from(socket: &UdpSocket, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    wait_ready(socket.as_fd(), libc::POLLIN)?;
    socket.recv_from(buf)
}

pub fn send(socket: &UdpSocket, buf: &[u8]) -> io::Result<usize> {
    wait_ready(socket.as_fd(), libc::POLLOUT)?;
    socket.send(buf)
}

pub fn send_to<A: ToSocketAddrs>(socket: &UdpSocket, buf: &[u8], addr: A) -> io::Result<usize> {
    wait_ready(socket.as_fd(), libc::POLLOUT)?;
    socket.send_to(buf, addr)
}

pub fn accept(listener: &TcpListener) -> io::Result<(TcpStream, SocketAddr)> {
    wait_ready(listener.as_fd(), libc::POLLIN)?;
    listener.accept()
}

/// Scatter receive on any socket. Also returns the sender address when the
/// socket is unconnected and the address family is IPv4 or IPv6.
pub fn recvmsg<S>(
    socket: &S,
    bufs: &mut [IoSliceMut<'_>],
    flags: libc::c_int,
) -> io::Result<(usize, Option<SocketAddr>)>
where
    S: AsFd + ?Sized,
{
    let fd = socket.as_fd();
    wait_ready(fd, libc::POLLIN)?;

    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = &mut storage as *mut libc::sockaddr_storage as *mut libc::c_void;
    msg.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    // IoSliceMut is ABI compatible with iovec on unix.
    msg.msg_iov = bufs.as_mut_ptr() as *mut libc::iovec;
    msg.msg_iovlen = bufs.len() as _;

    let n = unsafe { libc::recvmsg(fd.as_raw_fd(), &mut msg, flags) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    let addr = raw_to_socket_addr(&storage, msg.msg_namelen);
    Ok((n as usize, addr))
}

/// Gather send on any socket, optionally to an explicit destination.
pub fn sendmsg<S>(
    socket: &S,
    bufs: &[IoSlice<'_>],
    addr: Option<&SocketAddr>,
    flags: libc::c_int,
) -> io::Result<usize>
where
    S: AsFd + ?Sized,
{
    let fd = socket.as_fd();
    wait_ready(fd, libc::POLLOUT)?;

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    let mut name = addr.map(socket_addr_to_raw);
    if let Some((storage, len)) = name.as_mut() {
        msg.msg_name = storage as *mut libc::sockaddr_storage as *mut libc::c_void;
        msg.msg_namelen = *len;
    }
    msg.msg_iov = bufs.as_ptr() as *mut libc::iovec;
    msg.msg_iovlen = bufs.len() as _;

    let n = unsafe { libc::sendmsg(fd.as_raw_fd(), &msg, flags) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

fn raw_to_socket_addr(
    storage: &libc::sockaddr_storage,
    len: libc::socklen_t,
) -> Option<SocketAddr> {
    let len = len as usize;
    match storage.ss_family as libc::c_int {
        libc::AF_INET if len >= mem::size_of::<libc::sockaddr_in>() => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
            Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 if len >= mem::size_of::<libc::sockaddr_in6>() => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

// BSD kernels fill in `sa_len` from the length argument, so it is left zero.
fn socket_addr_to_raw(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in) };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let sin6 = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6) };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_addr.s6_addr = v6.ip().octets();
            sin6.sin6_scope_id = v6.scope_id();
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}
