use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::{Error, Result};

/// Reads resource usage of a live process from procfs.
pub struct ProcessProbe {
    proc_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemorySample {
    /// Current resident set size in bytes.
    pub rss: u64,
    /// Resident high-water mark in bytes.
    pub hwm: u64,
}

impl MemorySample {
    pub fn peak(&self) -> u64 {
        self.rss.max(self.hwm)
    }
}

impl ProcessProbe {
    pub fn new(pid: u32) -> Result<Self> {
        Self::with_root(Path::new("/proc"), pid)
    }

    /// Probe through a procfs mounted at `root`.
    pub fn with_root(root: &Path, pid: u32) -> Result<Self> {
        let proc_path = root.join(pid.to_string());
        if !proc_path.join("status").exists() {
            return Err(Error::NotFound(format!("process {}", pid)));
        }
        Ok(Self { proc_path })
    }

    /// Get the current memory usage. `None` once the process is gone.
    pub fn memory(&self) -> Option<MemorySample> {
        let content = fs::read_to_string(self.proc_path.join("status")).ok()?;
        parse_status(&content)
    }

    /// Get the cpu time consumed so far, user and system.
    pub fn cpu_time(&self) -> Option<Duration> {
        let content = fs::read_to_string(self.proc_path.join("stat")).ok()?;
        let ticks = parse_stat_ticks(&content)?;
        let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if hz <= 0 {
            return None;
        }
        Some(Duration::from_millis(ticks * 1000 / hz as u64))
    }
}

fn parse_status(content: &str) -> Option<MemorySample> {
    let mut sample = MemorySample::default();
    let mut seen = false;
    for line in content.lines() {
        let (key, value) = match line.split_once(':') {
            Some(kv) => kv,
            None => continue,
        };
        let slot = match key {
            "VmRSS" => &mut sample.rss,
            "VmHWM" => &mut sample.hwm,
            _ => continue,
        };
        let kb: u64 = value.trim().trim_end_matches("kB").trim().parse().ok()?;
        *slot = kb << 10;
        seen = true;
    }
    // zombies and kernel threads have no Vm* lines
    if seen {
        Some(sample)
    } else {
        None
    }
}

fn parse_stat_ticks(content: &str) -> Option<u64> {
    // comm may contain spaces, fields are counted after its closing paren
    let rest = &content[content.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // utime and stime are fields 14 and 15 of stat, 12 and 13 after comm
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process;

    #[test]
    fn probe_self() {
        let probe = ProcessProbe::new(process::id()).unwrap();
        let mem = probe.memory().unwrap();
        assert!(mem.rss > 0);
        assert!(mem.peak() >= mem.rss);
        assert!(probe.cpu_time().is_some());
    }

    #[test]
    fn missing_process() {
        assert!(ProcessProbe::new(u32::MAX).is_err());
    }

    #[test]
    fn missing_procfs() {
        let root = Path::new("/nonexistent/anvil/proc");
        assert!(ProcessProbe::with_root(root, process::id()).is_err());
    }

    #[test]
    fn parse_status_lines() {
        let status = "Name:\tcat\nVmHWM:\t    2048 kB\nVmRSS:\t    1024 kB\nThreads:\t1\n";
        let sample = parse_status(status).unwrap();
        assert_eq!(sample.rss, 1024 * 1024);
        assert_eq!(sample.hwm, 2048 * 1024);
        assert!(parse_status("Name:\tzombie\nState:\tZ\n").is_none());
    }

    #[test]
    fn parse_stat_with_spaces_in_comm() {
        let stat = "42 (a b) S 1 42 42 0 -1 4194304 100 0 0 0 7 3 0 0 20 0 1 0 100 0 0";
        assert_eq!(parse_stat_ticks(stat), Some(10));
    }
}
