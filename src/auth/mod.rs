//! The authentication store: salted SHA-1 password hashes, held in memory
//! and persisted to the binary record format specified in §6.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use rand::RngCore;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

const SALT_LEN: usize = 16;

/// One registered account: username, salt, and the hex-encoded digest of
/// `SHA-1(salt || password)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub salt: [u8; SALT_LEN],
    pub password_hash: String,
}

/// `username -> User`, mutated only by `add_user` and by `load`/`save`.
/// Concurrent writers race under last-write-wins semantics, as specified.
pub struct AuthStore {
    users: RwLock<HashMap<String, User>>,
}

impl AuthStore {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Generates a fresh random salt, hashes `SHA-1(salt || password)`, and
    /// stores the account, overwriting any prior entry for `username`.
    pub fn add_user(&self, username: &str, password: &str) -> Result<()> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let password_hash = hash_password(&salt, password);

        let user = User {
            username: username.to_string(),
            salt,
            password_hash,
        };
        self.users
            .write()
            .map_err(|_| anyhow!("auth store lock poisoned"))?
            .insert(username.to_string(), user);
        Ok(())
    }

    /// `false` if the user is unknown; otherwise recomputes the hash and
    /// compares in constant time.
    pub fn is_valid_login(&self, username: &str, password: &str) -> bool {
        let users = match self.users.read() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        let Some(user) = users.get(username) else {
            return false;
        };
        let candidate = hash_password(&user.salt, password);
        candidate.as_bytes().ct_eq(user.password_hash.as_bytes()).into()
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users
            .read()
            .map(|u| u.contains_key(username))
            .unwrap_or(false)
    }

    /// Loads a store from disk, per the §6 binary record format. A missing
    /// file yields an empty store (nothing has been registered yet); any
    /// deserialization error is logged and also yields an empty store,
    /// per the "queue-file corruption" policy in §7 (applied here to the
    /// auth file for the same reason: never refuse to start over a corrupt
    /// persisted file).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self::new();
        let path = path.as_ref();
        if !path.exists() {
            return Ok(store);
        }

        let mut file = File::open(path)?;
        match read_all_records(&mut file) {
            Ok(users) => {
                let mut guard = store.users.write().map_err(|_| anyhow!("auth store lock poisoned"))?;
                for user in users {
                    guard.insert(user.username.clone(), user);
                }
            }
            Err(e) => {
                log::error!("auth store at {path:?} is corrupt ({e}); starting with an empty store");
            }
        }
        Ok(store)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let users = self.users.read().map_err(|_| anyhow!("auth store lock poisoned"))?;
        let mut file = File::create(path)?;
        for user in users.values() {
            write_record(&mut file, user)?;
        }
        Ok(())
    }
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_password(salt: &[u8; SALT_LEN], password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn write_utf(writer: &mut impl Write, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    writer.write_all(&(bytes.len() as u16).to_be_bytes())?;
    writer.write_all(bytes)
}

fn read_utf(reader: &mut impl Read) -> io::Result<Option<String>> {
    let mut len_buf = [0u8; 2];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

fn write_record(writer: &mut impl Write, user: &User) -> io::Result<()> {
    write_utf(writer, &user.username)?;
    write_utf(writer, &user.password_hash)?;
    writer.write_all(&(user.salt.len() as u32).to_be_bytes())?;
    writer.write_all(&user.salt)
}

fn read_all_records(reader: &mut impl Read) -> io::Result<Vec<User>> {
    let mut users = Vec::new();
    loop {
        let username = match read_utf(reader)? {
            Some(s) => s,
            None => return Ok(users),
        };
        let password_hash = read_utf(reader)?.ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "truncated auth record (hash)")
        })?;

        let mut salt_len_buf = [0u8; 4];
        reader.read_exact(&mut salt_len_buf)?;
        let salt_len = u32::from_be_bytes(salt_len_buf) as usize;
        if salt_len != SALT_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected salt length {salt_len}"),
            ));
        }
        let mut salt = [0u8; SALT_LEN];
        reader.read_exact(&mut salt)?;

        users.push(User {
            username,
            salt,
            password_hash,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_path(name: &str) -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("relaymail-test-{name}-{n}-{}", std::process::id()))
    }

    #[test]
    fn add_and_validate_login() {
        let store = AuthStore::new();
        store.add_user("alice", "hunter2").unwrap();
        assert!(store.is_valid_login("alice", "hunter2"));
        assert!(!store.is_valid_login("alice", "wrong"));
        assert!(!store.is_valid_login("bob", "hunter2"));
    }

    #[test]
    fn save_and_load_round_trip() {
        let store = AuthStore::new();
        store.add_user("alice", "hunter2").unwrap();
        store.add_user("bob", "swordfish").unwrap();

        let path = temp_path("authstore");
        store.save(&path).unwrap();

        let loaded = AuthStore::load(&path).unwrap();
        assert!(loaded.is_valid_login("alice", "hunter2"));
        assert!(loaded.is_valid_login("bob", "swordfish"));
        assert!(!loaded.is_valid_login("bob", "hunter2"));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_yields_empty_store() {
        let path = temp_path("does-not-exist");
        let store = AuthStore::load(&path).unwrap();
        assert!(!store.contains("anyone"));
    }

    #[test]
    fn corrupt_file_yields_empty_store() {
        let path = temp_path("corrupt");
        std::fs::write(&path, b"\x00\x01not a valid record").unwrap();
        let store = AuthStore::load(&path).unwrap();
        assert!(!store.contains("anyone"));
        std::fs::remove_file(&path).ok();
    }
}
