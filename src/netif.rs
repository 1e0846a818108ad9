use std::ffi::CStr;
use std::io;
use std::net::Ipv4Addr;
use std::os::raw::c_char;

#[derive(Debug, Clone, PartialEq)]
pub struct Interface {
    pub name: String,
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub broadcast: Ipv4Addr,
}

pub fn broadcast_address(address: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    let address = u32::from(address);
    let netmask = u32::from(netmask);
    Ipv4Addr::from((address & netmask) | !netmask)
}

unsafe fn sockaddr_ipv4(addr: *const libc::sockaddr) -> Option<Ipv4Addr> {
    if addr.is_null() || (*addr).sa_family as i32 != libc::AF_INET {
        return None;
    }

    let addr = &*(addr as *const libc::sockaddr_in);
    Some(Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)))
}

/// Every up, non-loopback interface with an IPv4 address.
pub fn ipv4_interfaces() -> io::Result<Vec<Interface>> {
    let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();

    if unsafe { libc::getifaddrs(&mut ifaddrs) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let mut result = Vec::new();
    let mut current = ifaddrs;

    while !current.is_null() {
        let entry = unsafe { &*current };
        current = entry.ifa_next;

        let flags = entry.ifa_flags as i32;
        if flags & libc::IFF_LOOPBACK != 0 || flags & libc::IFF_UP == 0 {
            continue;
        }

        let (address, netmask) = unsafe {
            match (
                sockaddr_ipv4(entry.ifa_addr),
                sockaddr_ipv4(entry.ifa_netmask),
            ) {
                (Some(address), Some(netmask)) => (address, netmask),
                _ => continue,
            }
        };

        let name = unsafe { CStr::from_ptr(entry.ifa_name) }
            .to_string_lossy()
            .into_owned();

        trace!("interface {} {}/{}", name, address, netmask);

        result.push(Interface {
            name,
            address,
            netmask,
            broadcast: broadcast_address(address, netmask),
        });
    }

    unsafe { libc::freeifaddrs(ifaddrs) };

    Ok(result)
}

pub fn hostname() -> Option<String> {
    let mut buf = [0 as c_char; 256];

    if unsafe { libc::gethostname(buf.as_mut_ptr(), buf.len()) } != 0 {
        return None;
    }

    // gethostname may not terminate a truncated name
    buf[buf.len() - 1] = 0;

    let name = unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}
