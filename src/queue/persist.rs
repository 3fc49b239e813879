//! Explicit queue persistence records (§4.5, §6): one file per queue, a
//! version byte, then a length-prefixed JSON blob per entry. JSON (rather
//! than a bespoke binary layout) is used for message bodies the same way the
//! rest of this codebase uses `serde_json` at its other persistence
//! boundaries; the fixed-width framing around it is what makes each record
//! independently recoverable if a later one is truncated.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};

use super::IncomingEntry;
use crate::protocol::SmtpMailMessage;

const FORMAT_VERSION: u8 = 1;

fn write_all<T: Serialize>(path: &Path, entries: &VecDeque<T>) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(&[FORMAT_VERSION])?;
    for entry in entries {
        let bytes = serde_json::to_vec(entry)?;
        file.write_all(&(bytes.len() as u32).to_be_bytes())?;
        file.write_all(&bytes)?;
    }
    Ok(())
}

fn read_all<T: DeserializeOwned>(path: &Path) -> Result<VecDeque<T>> {
    let mut file = File::open(path)?;
    let mut version = [0u8; 1];
    file.read_exact(&mut version)?;
    if version[0] != FORMAT_VERSION {
        anyhow::bail!("unsupported queue file version {}", version[0]);
    }

    let mut entries = VecDeque::new();
    loop {
        let mut len_buf = [0u8; 4];
        match file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        entries.push_back(serde_json::from_slice(&buf)?);
    }
    Ok(entries)
}

pub fn save_incoming(path: impl AsRef<Path>, entries: &VecDeque<IncomingEntry>) -> Result<()> {
    write_all(path.as_ref(), entries)
}

pub fn save_outgoing(path: impl AsRef<Path>, entries: &VecDeque<SmtpMailMessage>) -> Result<()> {
    write_all(path.as_ref(), entries)
}

/// `None` if the file is absent; logs and returns an empty queue on
/// corruption, per the queue-file-corruption policy in §7.
pub fn load_incoming(path: impl AsRef<Path>) -> Result<Option<VecDeque<IncomingEntry>>> {
    load(path)
}

pub fn load_outgoing(path: impl AsRef<Path>) -> Result<Option<VecDeque<SmtpMailMessage>>> {
    load(path)
}

fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Option<VecDeque<T>>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    match read_all(path) {
        Ok(entries) => Ok(Some(entries)),
        Err(e) => {
            log::error!("queue file at {path:?} is corrupt ({e}); starting with an empty queue");
            Ok(Some(VecDeque::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MailMessage;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_path(name: &str) -> std::path::PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("relaymail-queue-persist-{name}-{n}-{}", std::process::id()))
    }

    #[test]
    fn incoming_round_trip() {
        let path = temp_path("incoming");
        let mut entries = VecDeque::new();
        entries.push_back(IncomingEntry {
            username: "bob".into(),
            message: MailMessage::new().with_subject("hi"),
        });
        save_incoming(&path, &entries).unwrap();

        let loaded = load_incoming(&path).unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].username, "bob");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_yields_none() {
        let path = temp_path("missing");
        assert!(load_incoming(&path).unwrap().is_none());
    }

    #[test]
    fn corrupt_file_yields_empty_queue() {
        let path = temp_path("corrupt");
        std::fs::write(&path, [1u8, 0, 0, 0, 99]).unwrap();
        let loaded: VecDeque<IncomingEntry> = load_incoming(&path).unwrap().unwrap();
        assert!(loaded.is_empty());
        std::fs::remove_file(&path).ok();
    }
}
