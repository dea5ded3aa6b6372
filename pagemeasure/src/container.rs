use std::ffi::OsString;
use std::io::Cursor;
use std::path::Path;
use std::process::Command;

use crate::process::Process;
use crate::{ContainerPids, FromRead, ProcError, ProcResult, ProcessScan, ScanOptions};

/// Something that knows which processes run inside a container.
pub trait ContainerProcesses {
    /// Lists the host pids of the processes of `container_id`.
    ///
    /// Returns [`ProcError::ContainerNotFound`] if the container is unknown.
    fn list_container_processes(&self, container_id: &str) -> ProcResult<Vec<i32>>;
}

/// Lists container processes with `docker top <id> -eo pid`.
#[derive(Debug, Clone)]
pub struct DockerTop {
    program: OsString,
}

impl Default for DockerTop {
    fn default() -> Self {
        DockerTop {
            program: OsString::from("docker"),
        }
    }
}

impl DockerTop {
    pub fn new() -> DockerTop {
        DockerTop::default()
    }

    /// Runs `program` instead of `docker` (e.g. `podman`, or a full path).
    pub fn with_program<S: Into<OsString>>(program: S) -> DockerTop {
        DockerTop {
            program: program.into(),
        }
    }
}

impl ContainerProcesses for DockerTop {
    fn list_container_processes(&self, container_id: &str) -> ProcResult<Vec<i32>> {
        let output = Command::new(&self.program)
            .args(["top", container_id, "-eo", "pid"])
            .output()
            .map_err(|e| ProcError::Io(e, Default::default()))?;

        if !output.status.success() {
            log::debug!(
                "{:?} top {} failed: {}",
                self.program,
                container_id,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(ProcError::ContainerNotFound(container_id.to_string()));
        }

        Ok(ContainerPids::from_read(Cursor::new(output.stdout))?.0)
    }
}

/// Measures every process of a container, each one on its own.
///
/// Only a failure to list the container's processes is returned as an error.  A process that
/// exits or cannot be read during the scan gets an `Err` in its slot and the remaining
/// processes are still scanned.
pub fn scan_container<C>(
    source: &C,
    container_id: &str,
    options: &ScanOptions,
) -> ProcResult<Vec<(i32, ProcResult<ProcessScan>)>>
where
    C: ContainerProcesses + ?Sized,
{
    scan_each(source, container_id, options, Process::new)
}

/// Like [`scan_container`], with processes opened under `root` instead of `/proc`.
pub fn scan_container_with_root<C, P>(
    source: &C,
    container_id: &str,
    root: P,
    options: &ScanOptions,
) -> ProcResult<Vec<(i32, ProcResult<ProcessScan>)>>
where
    C: ContainerProcesses + ?Sized,
    P: AsRef<Path>,
{
    let root = root.as_ref();
    scan_each(source, container_id, options, |pid| {
        Process::new_with_root(root.join(pid.to_string()))
    })
}

fn scan_each<C, F>(
    source: &C,
    container_id: &str,
    options: &ScanOptions,
    open: F,
) -> ProcResult<Vec<(i32, ProcResult<ProcessScan>)>>
where
    C: ContainerProcesses + ?Sized,
    F: Fn(i32) -> ProcResult<Process>,
{
    let pids = source.list_container_processes(container_id)?;
    log::info!("container {}: {} process(es)", container_id, pids.len());

    Ok(pids
        .into_iter()
        .map(|pid| {
            let scan = open(pid).and_then(|p| p.scan(options));
            if let Err(e) = &scan {
                log::warn!("pid {}: scan failed: {}", pid, e);
            }
            (pid, scan)
        })
        .collect())
}
