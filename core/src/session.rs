//! # Workload Session
//!
//! Bootstrap of one workload: create, bind activations, read back its
//! description. Any failure destroys what was created and leaves nothing
//! behind. The session destroys the workload when closed or dropped.

use core::fmt::Write as _;

use crate::error::{ErrorKind, PerfError, PerfResult};
use crate::workload::{Workload, WorkloadInfo, WorkloadProvider, MAX_NAME};

/// Maximum number of networks reported by discovery
pub const MAX_NETWORKS: usize = 8;

/// Names of the workloads a provider exposes, in index order
pub fn discover<P: WorkloadProvider + ?Sized>(
    provider: &P,
) -> heapless::Vec<heapless::String<MAX_NAME>, MAX_NETWORKS> {
    let mut names = heapless::Vec::new();
    let mut index = 0;
    while let Some(name) = provider.find(index) {
        let mut owned = heapless::String::new();
        if owned.write_str(name).is_err() {
            log::warn!("Session: network #{} name too long, skipped", index);
        } else if names.push(owned).is_err() {
            log::warn!("Session: more than {} networks, rest ignored", MAX_NETWORKS);
            break;
        }
        index += 1;
    }
    names
}

/// An initialized workload and its description
#[derive(Debug)]
pub struct Session<W: Workload> {
    workload: W,
    info: WorkloadInfo,
    closed: bool,
}

impl<W: Workload> Session<W> {
    /// Create and initialize the named workload
    pub fn open<P>(provider: &mut P, name: &str, activations: &mut [u8]) -> PerfResult<Self>
    where
        P: WorkloadProvider<Workload = W> + ?Sized,
    {
        let mut workload = provider.create(name).map_err(|err| {
            log::error!("Session: creating \"{}\" failed ({})", name, err);
            PerfError::new(ErrorKind::CreateFailed, "workload creation failed").with_code(err)
        })?;

        if !workload.init(activations) {
            let err = workload.last_error();
            log::error!("Session: initializing \"{}\" failed ({})", name, err);
            discard(&mut workload, name);
            return Err(
                PerfError::new(ErrorKind::InitFailed, "workload initialization failed").with_code(err),
            );
        }

        let Some(info) = workload.info() else {
            let err = workload.last_error();
            log::error!("Session: no description for \"{}\" ({})", name, err);
            discard(&mut workload, name);
            return Err(
                PerfError::new(ErrorKind::InfoUnavailable, "workload description unavailable")
                    .with_code(err),
            );
        };

        log::info!(
            "Session: \"{}\" ready, {} units, {} MACC, activations {} bytes, weights {} bytes, runtime {} (tool {})",
            info.name,
            info.unit_count,
            info.op_count,
            info.activations_size,
            info.weights_size,
            info.runtime_version,
            info.tool_version
        );

        Ok(Self {
            workload,
            info,
            closed: false,
        })
    }

    /// Open the `index`-th workload of the provider
    pub fn open_index<P>(provider: &mut P, index: usize, activations: &mut [u8]) -> PerfResult<Self>
    where
        P: WorkloadProvider<Workload = W> + ?Sized,
    {
        let mut name: heapless::String<MAX_NAME> = heapless::String::new();
        match provider.find(index) {
            Some(found) => {
                if name.write_str(found).is_err() {
                    return Err(PerfError::new(ErrorKind::NetworkNotFound, "network name too long"));
                }
            }
            None => {
                log::error!("Session: no network at index {}", index);
                return Err(PerfError::new(ErrorKind::NetworkNotFound, "no network at index"));
            }
        }
        Self::open(provider, &name, activations)
    }

    /// Workload description
    pub fn info(&self) -> &WorkloadInfo {
        &self.info
    }

    /// The workload
    pub fn workload_mut(&mut self) -> &mut W {
        &mut self.workload
    }

    /// Destroy the workload
    pub fn close(mut self) -> PerfResult<()> {
        self.closed = true;
        if self.workload.destroy() {
            log::info!("Session: \"{}\" closed", self.info.name);
            Ok(())
        } else {
            let err = self.workload.last_error();
            log::error!("Session: destroying \"{}\" failed ({})", self.info.name, err);
            Err(PerfError::new(ErrorKind::DestroyFailed, "workload destroy failed").with_code(err))
        }
    }
}

/// Destroy a workload that failed setup
fn discard<W: Workload + ?Sized>(workload: &mut W, name: &str) {
    if !workload.destroy() {
        log::warn!(
            "Session: destroying \"{}\" after failed setup failed ({})",
            name,
            workload.last_error()
        );
    }
}

impl<W: Workload> Drop for Session<W> {
    fn drop(&mut self) {
        if !self.closed && !self.workload.destroy() {
            log::warn!("Session: destroying \"{}\" on drop failed", self.info.name);
        }
    }
}
