//! Profile store: persisted setting values, one map per profile identity.
//!
//! A [`ProfileId`] is the composed key `<mode prefix>.<subject>`, where the
//! mode prefix encodes the display topology (`PowerControl.Process` or
//! `PowerControl.Process.Docked`) and the subject is a process name. The
//! reserved Autostart identity is `PowerControl.Autostart`.
//!
//! The file backend stores each identity as `<dir>/<key>.toml`. An entry
//! "exists" once its file does; it is created lazily by the first write.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{PowerctlError, Result};
use crate::value::Value;

pub const AUTOSTART_PREFIX: &str = "PowerControl";
pub const AUTOSTART_SUBJECT: &str = "Autostart";
pub const PROCESS_PREFIX: &str = "PowerControl.Process";
pub const DOCKED_PREFIX: &str = "PowerControl.Process.Docked";

/// Header comment prepended to saved profile files.
const PROFILE_HEADER: &str = "# powerctl profile. Values are applied when this profile activates.\n\n";

/// Display topology qualifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Topology {
    Regular,
    Docked,
}

impl Topology {
    pub fn from_docked(docked: bool) -> Self {
        if docked {
            Topology::Docked
        } else {
            Topology::Regular
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Topology::Regular => PROCESS_PREFIX,
            Topology::Docked => DOCKED_PREFIX,
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Regular => f.write_str("regular"),
            Topology::Docked => f.write_str("docked"),
        }
    }
}

/// Profile identity. Two identities are equal iff their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProfileId {
    key: String,
}

impl ProfileId {
    pub fn new(prefix: &str, subject: &str) -> Self {
        Self {
            key: format!("{prefix}.{subject}"),
        }
    }

    pub fn from_key(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn autostart() -> Self {
        Self::new(AUTOSTART_PREFIX, AUTOSTART_SUBJECT)
    }

    pub fn for_process(topology: Topology, process_name: &str) -> Self {
        Self::new(topology.prefix(), process_name)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_autostart(&self) -> bool {
        *self == Self::autostart()
    }

    /// Topology qualifier of a process identity; `None` for Autostart and
    /// foreign keys.
    pub fn topology(&self) -> Option<Topology> {
        if self.key.starts_with(&format!("{DOCKED_PREFIX}.")) {
            Some(Topology::Docked)
        } else if self.key.starts_with(&format!("{PROCESS_PREFIX}.")) {
            Some(Topology::Regular)
        } else {
            None
        }
    }

    /// Subject part of the key (process name or `Autostart`).
    pub fn subject(&self) -> &str {
        let prefix = match self.topology() {
            Some(t) => t.prefix(),
            None => AUTOSTART_PREFIX,
        };
        self.key
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(&self.key)
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Persisted values of one profile, keyed by setting name.
pub type ProfileData = BTreeMap<String, Value>;

// ── Backend trait ──

pub trait ProfileBackend {
    /// Load an identity's values. `Ok(None)` means the entry does not exist.
    fn load(&self, id: &ProfileId) -> Result<Option<ProfileData>>;
    fn save(&mut self, id: &ProfileId, data: &ProfileData) -> Result<()>;
    /// Remove the entry entirely. Removing a missing entry is not an error.
    fn remove(&mut self, id: &ProfileId) -> Result<()>;
    fn list(&self) -> Result<Vec<ProfileId>>;
}

/// One TOML file per identity in a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &ProfileId) -> PathBuf {
        self.dir.join(format!("{}.toml", file_stem(id.key())))
    }
}

/// Keys become file names; anything outside a conservative set is replaced.
fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_alphanumeric() || "._- ".contains(c) {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl ProfileBackend for FileBackend {
    fn load(&self, id: &ProfileId) -> Result<Option<ProfileData>> {
        let path = self.path_for(id);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        toml::from_str(&contents)
            .map(Some)
            .map_err(|e| PowerctlError::Store(format!("{}: {e}", path.display())))
    }

    /// Write atomically: temp file, then rename over the original.
    fn save(&mut self, id: &ProfileId, data: &ProfileData) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(id);
        let serialized =
            toml::to_string_pretty(data).map_err(|e| PowerctlError::Store(e.to_string()))?;
        let contents = format!("{PROFILE_HEADER}{serialized}");
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, &contents)?;
        if std::fs::rename(&tmp, &path).is_err() {
            let result = std::fs::write(&path, &contents);
            let _ = std::fs::remove_file(&tmp);
            result?;
        }
        Ok(())
    }

    fn remove(&mut self, id: &ProfileId) -> Result<()> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<ProfileId>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids: Vec<ProfileId> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .filter_map(|p| p.file_stem()?.to_str().map(ProfileId::from_key))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

// ── Store ──

/// Front door to the backend. Hands out [`ProfileEntry`] handles scoped to
/// one identity.
pub struct ProfileStore {
    backend: Box<dyn ProfileBackend>,
}

impl ProfileStore {
    pub fn new(backend: impl ProfileBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// File-backed store rooted at `dir`.
    pub fn open_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(FileBackend::new(dir))
    }

    /// Handle for `id`. Nothing is persisted until a write.
    pub fn entry(&mut self, id: &ProfileId) -> ProfileEntry<'_> {
        ProfileEntry {
            backend: self.backend.as_mut(),
            id: id.clone(),
        }
    }

    pub fn list(&self) -> Result<Vec<ProfileId>> {
        self.backend.list()
    }
}

pub struct ProfileEntry<'a> {
    backend: &'a mut dyn ProfileBackend,
    id: ProfileId,
}

impl ProfileEntry<'_> {
    pub fn id(&self) -> &ProfileId {
        &self.id
    }

    /// Current contents for reading; unreadable entries are logged and
    /// treated as absent.
    fn load(&self) -> Option<ProfileData> {
        match self.backend.load(&self.id) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("[store] {}: {e}", self.id);
                None
            }
        }
    }

    pub fn exists(&self) -> bool {
        self.load().is_some()
    }

    /// All persisted values (empty if the entry does not exist).
    pub fn values(&self) -> ProfileData {
        self.load().unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.load()?.remove(key)
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Integer value, or `default` when absent or not an integer.
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(|v| v.as_int()).unwrap_or(default)
    }

    /// Persist one value immediately, creating the entry if needed.
    ///
    /// An unreadable entry is left untouched and its error returned.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        let mut data = self.backend.load(&self.id)?.unwrap_or_default();
        data.insert(key.to_string(), value);
        self.backend.save(&self.id, &data)
    }

    /// Remove one key. A missing entry stays missing.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        let Some(mut data) = self.backend.load(&self.id)? else {
            return Ok(());
        };
        if data.remove(key).is_some() {
            self.backend.save(&self.id, &data)?;
        }
        Ok(())
    }

    /// Create the entry (empty) if it does not exist yet.
    pub fn touch(&mut self) -> Result<()> {
        if self.backend.load(&self.id)?.is_some() {
            return Ok(());
        }
        self.backend.save(&self.id, &ProfileData::new())
    }

    /// Destroy the entry entirely.
    pub fn delete_file(&mut self) -> Result<()> {
        self.backend.remove(&self.id)
    }
}

pub mod mock {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// In-memory backend for tests. Clones share the same profiles.
    #[derive(Debug, Clone, Default)]
    pub struct MemoryBackend {
        pub profiles: Rc<RefCell<BTreeMap<ProfileId, ProfileData>>>,
        /// If true, `save` fails.
        pub fail_save: Rc<Cell<bool>>,
    }

    impl MemoryBackend {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a profile directly.
        pub fn insert(&self, id: &ProfileId, values: &[(&str, Value)]) {
            let data = values
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();
            self.profiles.borrow_mut().insert(id.clone(), data);
        }

        pub fn get(&self, id: &ProfileId) -> Option<ProfileData> {
            self.profiles.borrow().get(id).cloned()
        }
    }

    impl ProfileBackend for MemoryBackend {
        fn load(&self, id: &ProfileId) -> Result<Option<ProfileData>> {
            Ok(self.profiles.borrow().get(id).cloned())
        }

        fn save(&mut self, id: &ProfileId, data: &ProfileData) -> Result<()> {
            if self.fail_save.get() {
                return Err(PowerctlError::Store("mock: save failed".into()));
            }
            self.profiles.borrow_mut().insert(id.clone(), data.clone());
            Ok(())
        }

        fn remove(&mut self, id: &ProfileId) -> Result<()> {
            self.profiles.borrow_mut().remove(id);
            Ok(())
        }

        fn list(&self) -> Result<Vec<ProfileId>> {
            Ok(self.profiles.borrow().keys().cloned().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game() -> ProfileId {
        ProfileId::for_process(Topology::Regular, "game.exe")
    }

    // ── ProfileId ──

    #[test]
    fn identity_keys() {
        assert_eq!(ProfileId::autostart().key(), "PowerControl.Autostart");
        assert_eq!(game().key(), "PowerControl.Process.game.exe");
        assert_eq!(
            ProfileId::for_process(Topology::Docked, "game.exe").key(),
            "PowerControl.Process.Docked.game.exe"
        );
    }

    #[test]
    fn identity_equality_is_key_equality() {
        assert_eq!(game(), ProfileId::from_key("PowerControl.Process.game.exe"));
        assert_ne!(game(), ProfileId::for_process(Topology::Docked, "game.exe"));
    }

    #[test]
    fn identity_topology_and_subject() {
        let docked = ProfileId::for_process(Topology::Docked, "game.exe");
        assert_eq!(docked.topology(), Some(Topology::Docked));
        assert_eq!(docked.subject(), "game.exe");
        assert_eq!(game().topology(), Some(Topology::Regular));
        assert_eq!(game().subject(), "game.exe");
        assert_eq!(ProfileId::autostart().topology(), None);
        assert_eq!(ProfileId::autostart().subject(), "Autostart");
        assert!(ProfileId::autostart().is_autostart());
        assert!(!game().is_autostart());
    }

    // ── File backend ──

    #[test]
    fn get_returns_default_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::open_dir(dir.path());
        let entry = store.entry(&game());
        assert!(!entry.exists());
        assert_eq!(entry.get_or("TDP", Value::from("15W")), Value::from("15W"));
        assert_eq!(entry.get_int("ApplyDelay", 500), 500);
    }

    #[test]
    fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::open_dir(dir.path());
        store.entry(&game()).set("TDP", Value::from("10W")).unwrap();

        let entry = store.entry(&game());
        assert!(entry.exists());
        assert_eq!(entry.get_or("TDP", Value::from("15W")), Value::from("10W"));
    }

    #[test]
    fn first_write_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("profiles"));
        let path = backend.path_for(&game());
        let mut store = ProfileStore::new(backend);
        assert!(!path.exists());

        store.entry(&game()).set("ApplyDelay", Value::Int(750)).unwrap();
        assert!(path.exists());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# powerctl profile"));
        assert!(text.contains("ApplyDelay = 750"));
        assert_eq!(store.entry(&game()).get_int("ApplyDelay", 500), 750);
    }

    #[test]
    fn delete_removes_one_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::open_dir(dir.path());
        let mut entry = store.entry(&game());
        entry.set("TDP", Value::from("10W")).unwrap();
        entry.set("Microphone", Value::from("Enabled")).unwrap();
        entry.delete("TDP").unwrap();

        assert_eq!(entry.get("TDP"), None);
        assert_eq!(entry.get("Microphone"), Some(Value::from("Enabled")));
    }

    #[test]
    fn delete_on_missing_entry_does_not_create_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::open_dir(dir.path());
        store.entry(&game()).delete("TDP").unwrap();
        assert!(!store.entry(&game()).exists());
    }

    #[test]
    fn touch_and_delete_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::open_dir(dir.path());
        let mut entry = store.entry(&game());
        entry.touch().unwrap();
        assert!(entry.exists());
        assert!(entry.values().is_empty());

        entry.set("TDP", Value::from("10W")).unwrap();
        entry.touch().unwrap();
        assert_eq!(entry.get("TDP"), Some(Value::from("10W")), "touch keeps data");

        entry.delete_file().unwrap();
        assert!(!entry.exists());
        entry.delete_file().unwrap();
    }

    #[test]
    fn list_returns_sorted_identities() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::open_dir(dir.path());
        store.entry(&game()).touch().unwrap();
        store.entry(&ProfileId::autostart()).touch().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let ids = store.list().unwrap();
        assert_eq!(ids, vec![ProfileId::autostart(), game()]);
    }

    #[test]
    fn list_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open_dir(dir.path().join("nope"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn unparsable_profile_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        std::fs::write(backend.path_for(&game()), "this is { not toml").unwrap();
        assert!(backend.load(&game()).is_err());

        let mut store = ProfileStore::new(backend);
        assert!(!store.entry(&game()).exists());
        assert_eq!(store.entry(&game()).get("TDP"), None);
    }

    #[test]
    fn writes_to_unparsable_profile_keep_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let path = backend.path_for(&game());
        let broken = "TDP = \"10W\"\nGPU = \"High\nApplyDelay = 750\n";
        std::fs::write(&path, broken).unwrap();

        let mut store = ProfileStore::new(backend);
        let mut entry = store.entry(&game());
        assert!(matches!(
            entry.set("Microphone", Value::from("Disabled")),
            Err(PowerctlError::Store(_))
        ));
        assert!(entry.delete("TDP").is_err());
        assert!(entry.touch().is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), broken);
    }

    #[test]
    fn unsafe_characters_in_subject_are_replaced() {
        let backend = FileBackend::new("/profiles");
        let id = ProfileId::for_process(Topology::Regular, "a/b:c");
        let path = backend.path_for(&id);
        assert_eq!(
            path.file_name().unwrap(),
            "PowerControl.Process.a_b_c.toml"
        );
    }

    // ── Memory backend ──

    #[test]
    fn memory_backend_shares_state_between_clones() {
        let backend = mock::MemoryBackend::new();
        let mut store = ProfileStore::new(backend.clone());
        store.entry(&game()).set("TDP", Value::from("10W")).unwrap();
        assert_eq!(
            backend.get(&game()).unwrap().get("TDP"),
            Some(&Value::from("10W"))
        );
    }

    #[test]
    fn failed_save_surfaces_error() {
        let backend = mock::MemoryBackend::new();
        backend.fail_save.set(true);
        let mut store = ProfileStore::new(backend);
        assert!(store.entry(&game()).set("TDP", Value::from("10W")).is_err());
        assert!(!store.entry(&game()).exists());
    }
}
