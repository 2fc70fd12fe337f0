//! Port allocation and out-of-band port discovery.
//!
//! The frontend starts the backend as a separate process and learns its port
//! only by reading the port file, so the file must hold the complete decimal
//! port before `publish` returns.

use std::fs::{self, File};
use std::io::{self, Write};
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::errors::ServiceError;

/// Asks the OS for an unused port on `host` by binding port 0, then releases
/// the probe socket so the real listener can bind it.
///
/// Another process may claim the port between release and rebind. That race
/// is not retried; the rebind fails with `ResourceUnavailable`.
pub fn allocate(host: IpAddr) -> Result<u16, ServiceError> {
    let addr = SocketAddr::new(host, 0);
    let probe = TcpListener::bind(addr)
        .map_err(|source| ServiceError::ResourceUnavailable { addr, source })?;
    let port = probe
        .local_addr()
        .map_err(|source| ServiceError::ResourceUnavailable { addr, source })?
        .port();
    drop(probe);

    debug!("OS assigned port {port} on {host}");
    Ok(port)
}

/// Writes and removes the port record at a fixed path.
#[derive(Debug, Clone)]
pub struct PortPublisher {
    path: PathBuf,
}

impl PortPublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Publishes `port` as plain decimal text, replacing any stale record.
    /// The content is fsynced to a sibling temp file and renamed into place,
    /// so readers see either the old record or the complete new one.
    pub fn publish(&self, port: u16) -> Result<PublishedPort, ServiceError> {
        self.write_record(port)
            .map_err(|source| ServiceError::DiscoveryWrite {
                path: self.path.clone(),
                source,
            })?;

        info!("Published port {port} to {}", self.path.display());
        Ok(PublishedPort {
            publisher: self.clone(),
            active: true,
        })
    }

    fn write_record(&self, port: u16) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let written = write_synced(&tmp, port).and_then(|()| fs::rename(&tmp, &self.path));
        if written.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        written
    }

    /// Removes the record. Returns `Ok(false)` when there was nothing to remove.
    pub fn unpublish(&self) -> Result<bool, ServiceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ServiceError::DiscoveryCleanup {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

fn write_synced(path: &Path, port: u16) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(port.to_string().as_bytes())?;
    file.sync_all()
}

/// A live port record. Removed on `release` or, failing that, on drop.
#[derive(Debug)]
pub struct PublishedPort {
    publisher: PortPublisher,
    active: bool,
}

impl PublishedPort {
    /// Removes the record. Cleanup failures are logged and swallowed.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        match self.publisher.unpublish() {
            Ok(true) => info!("Removed port record {}", self.publisher.path().display()),
            Ok(false) => debug!(
                "Port record {} already absent",
                self.publisher.path().display()
            ),
            Err(e) => warn!("{e}"),
        }
    }
}

impl Drop for PublishedPort {
    fn drop(&mut self) {
        self.remove();
    }
}
