//! Pre/post snapshots of rewritten units.
//!
//! A sink receives the original bytes (`Pre`) and the rewritten bytes
//! (`Post`) of every unit that changed. Sink errors are reported to the
//! caller, which logs them and carries on; they never fail a transform.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use ccl_classfile::{disassemble, ClassFile};
use parking_lot::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DumpPhase {
    Pre,
    Post,
}

impl DumpPhase {
    pub fn suffix(self) -> &'static str {
        match self {
            DumpPhase::Pre => "_PRE",
            DumpPhase::Post => "_POST",
        }
    }
}

impl fmt::Display for DumpPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DumpPhase::Pre => "pre",
            DumpPhase::Post => "post",
        })
    }
}

/// Destination for unit snapshots. Shared by every loader thread.
pub trait DumpSink: Send + Sync {
    fn dump(&self, unit: &str, phase: DumpPhase, bytes: &[u8]) -> Result<()>;
}

/// Text listing of a class, or a note saying why there is none.
fn listing(bytes: &[u8]) -> Result<String> {
    let class = ClassFile::decode(bytes).map_err(|e| anyhow!("cannot disassemble: {}", e))?;
    Ok(disassemble(&class))
}

/// Relative path for a unit name: `a.b.C` becomes `a/b/C`.
///
/// Empty, `.` and `..` segments are dropped so no name can leave the root.
pub fn snapshot_path(unit: &str) -> Option<PathBuf> {
    let mut path = PathBuf::new();
    for segment in unit.split(['.', '/', '\\']) {
        if segment.is_empty() {
            continue;
        }
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) => path.push(part),
            _ => continue,
        }
    }
    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Write via a temp file and a rename, creating parent directories.
fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let tmp_path = with_suffix(path, ".tmp");
    std::fs::write(&tmp_path, contents)
        .map_err(|e| anyhow!("Failed to write temp file {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        anyhow!(
            "Failed to rename {} to {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;
    Ok(())
}

/// Writes `<root>/<pkg>/<Name>_PRE.class`, `..._PRE_BYTE.txt` and the
/// `_POST` pair.
///
/// The root is wiped and recreated once, on the first dump of the process.
#[derive(Debug)]
pub struct FsDumpSink {
    root: PathBuf,
    prepared: OnceLock<std::result::Result<(), String>>,
}

impl FsDumpSink {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            prepared: OnceLock::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn prepare(&self) -> Result<()> {
        let outcome = self.prepared.get_or_init(|| {
            match std::fs::remove_dir_all(&self.root) {
                Ok(()) => debug!(root = %self.root.display(), "cleared previous snapshots"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => debug!(root = %self.root.display(), error = %e, "could not clear snapshots"),
            }
            std::fs::create_dir_all(&self.root)
                .map_err(|e| format!("Failed to create {}: {}", self.root.display(), e))
        });
        outcome.clone().map_err(|e| anyhow!(e))
    }
}

impl DumpSink for FsDumpSink {
    fn dump(&self, unit: &str, phase: DumpPhase, bytes: &[u8]) -> Result<()> {
        self.prepare()?;
        let relative =
            snapshot_path(unit).ok_or_else(|| anyhow!("unit name {:?} has no path segments", unit))?;
        let base = with_suffix(&self.root.join(relative), phase.suffix());

        let class_file = with_suffix(&base, ".class");
        atomic_write(&class_file, bytes)
            .with_context(|| format!("Could not save class (byte[]) {}", unit))?;
        info!(path = %class_file.display(), "saved class (byte[])");

        let text_file = with_suffix(&base, "_BYTE.txt");
        let text = listing(bytes)
            .with_context(|| format!("Could not save class (bytecode) {}", unit))?;
        atomic_write(&text_file, text.as_bytes())
            .with_context(|| format!("Could not save class (bytecode) {}", unit))?;
        info!(path = %text_file.display(), "saved class (bytecode)");
        Ok(())
    }
}

/// One captured snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub unit: String,
    pub phase: DumpPhase,
    pub bytes: Vec<u8>,
    pub listing: String,
}

/// Keeps snapshots in memory.
#[derive(Debug, Default)]
pub struct MemoryDumpSink {
    snapshots: Mutex<Vec<Snapshot>>,
}

impl MemoryDumpSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything captured so far.
    pub fn take(&self) -> Vec<Snapshot> {
        std::mem::take(&mut *self.snapshots.lock())
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

impl DumpSink for MemoryDumpSink {
    fn dump(&self, unit: &str, phase: DumpPhase, bytes: &[u8]) -> Result<()> {
        let listing = listing(bytes)?;
        self.snapshots.lock().push(Snapshot {
            unit: unit.to_string(),
            phase,
            bytes: bytes.to_vec(),
            listing,
        });
        Ok(())
    }
}
