use std::io::BufRead;

use crate::{FromBufRead, ProcResult};

/// The process ids listed by a container runtime, e.g. `docker top <id> -eo pid`.
///
/// The first line is a column header and is skipped.  Any other line that is not a pid is
/// skipped as well.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerPids(pub Vec<i32>);

impl FromBufRead for ContainerPids {
    fn from_buf_read<R: BufRead>(r: R) -> ProcResult<Self> {
        let mut pids = Vec::new();

        for line in r.lines().skip(1) {
            let line = line?;
            let field = line.trim();
            if field.is_empty() {
                continue;
            }
            match field.parse::<i32>() {
                Ok(pid) if pid > 0 => pids.push(pid),
                _ => log::debug!("skipping process listing line {:?}", line),
            }
        }

        Ok(ContainerPids(pids))
    }
}
