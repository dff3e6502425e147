use std::io;

/// Returns the name of the local machine, as reported by the operating system.
#[cfg(unix)]
pub fn local_hostname() -> io::Result<String> {
    let hostname = nix::unistd::gethostname()?.to_string_lossy().into_owned();
    if hostname.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "hostname is empty"));
    }

    Ok(hostname)
}

/// Returns the name of the local machine, as reported by the operating system.
#[cfg(not(unix))]
pub fn local_hostname() -> io::Result<String> {
    std::env::var("COMPUTERNAME").map_err(|e| io::Error::new(io::ErrorKind::NotFound, e))
}
