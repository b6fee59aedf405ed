//! Secret Store
//!
//! One JSON file per environment under the store directory, readable by the
//! owner only. Every read-modify-write happens under an advisory lock and
//! ends in an atomic rename, so a crash leaves either the old file or the
//! new one.
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "environment": "production",
//!   "entries": {
//!     "DB_PASSWORD": {
//!       "value": "...",
//!       "version": 2,
//!       "created_at": "2026-01-01T00:00:00Z",
//!       "rotation_due": "2026-04-01T00:00:00Z",
//!       "previous": { "value": "...", "version": 1, "retired_at": "...", "valid_until": "..." }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use keel_common::clock::{Clock, SystemClock};
use keel_common::fs::{
    ensure_private_dir, read_if_exists, remove_file_if_exists, write_atomic, FileLock,
    PRIVATE_FILE_MODE,
};
use keel_common::EnvironmentLabel;

use crate::error::StoreError;
use crate::generator::{generate, EntropySource, OsEntropy};
use crate::policy::SecretPolicy;

/// Store file format version
pub const FORMAT_VERSION: u32 = 1;

/// How long to wait for another process holding the store lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// A versioned secret value. `Debug` never prints the value.
#[derive(Clone, Serialize, Deserialize)]
pub struct SecretEntry {
    /// Current value
    pub value: Zeroizing<String>,
    /// Monotonic version, starting at 1
    pub version: u32,
    /// When this version was created
    pub created_at: DateTime<Utc>,
    /// When this version should be replaced; `None` never rotates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_due: Option<DateTime<Utc>>,
    /// The value this version replaced, while still inside its grace window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<PreviousValue>,
}

/// A rotated-out value kept for its grace window
#[derive(Clone, Serialize, Deserialize)]
pub struct PreviousValue {
    /// Retired value
    pub value: Zeroizing<String>,
    /// Retired version
    pub version: u32,
    /// When it was replaced
    pub retired_at: DateTime<Utc>,
    /// Last moment it is still accepted
    pub valid_until: DateTime<Utc>,
}

impl fmt::Debug for SecretEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretEntry")
            .field("value", &"<redacted>")
            .field("version", &self.version)
            .field("created_at", &self.created_at)
            .field("rotation_due", &self.rotation_due)
            .field("previous", &self.previous)
            .finish()
    }
}

impl fmt::Debug for PreviousValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviousValue")
            .field("value", &"<redacted>")
            .field("version", &self.version)
            .field("retired_at", &self.retired_at)
            .field("valid_until", &self.valid_until)
            .finish()
    }
}

/// Whether a presented value is one the store knows
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acceptance {
    /// The current version
    Current,
    /// The previous version, still inside its grace window
    Grace,
    /// Neither
    Unknown,
}

impl SecretEntry {
    fn new(
        value: Zeroizing<String>,
        version: u32,
        now: DateTime<Utc>,
        policy: &SecretPolicy,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            value,
            version,
            created_at: now,
            rotation_due: policy.rotation.map(|r| offset(now, r)).transpose()?,
            previous: None,
        })
    }

    /// Whether the entry is past its rotation date
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.rotation_due.is_some_and(|due| now > due)
    }

    /// Classify a presented value
    pub fn accepts(&self, value: &str, now: DateTime<Utc>) -> Acceptance {
        if self.value.as_str() == value {
            return Acceptance::Current;
        }
        match &self.previous {
            Some(prev) if prev.value.as_str() == value && now <= prev.valid_until => {
                Acceptance::Grace
            }
            _ => Acceptance::Unknown,
        }
    }

    /// Replace the value, keeping the old one for the grace window
    fn replace(
        &mut self,
        value: Zeroizing<String>,
        now: DateTime<Utc>,
        policy: &SecretPolicy,
    ) -> Result<(), StoreError> {
        let valid_until = offset(now, policy.grace_window)?;
        let next = Self::new(value, self.version + 1, now, policy)?;
        let old = std::mem::replace(self, next);
        self.previous = Some(PreviousValue {
            value: old.value,
            version: old.version,
            retired_at: now,
            valid_until,
        });
        Ok(())
    }

    fn expire_previous(&mut self, now: DateTime<Utc>) {
        if self.previous.as_ref().is_some_and(|p| now > p.valid_until) {
            self.previous = None;
        }
    }
}

/// `now + delta`, or an error when the result is past the representable range
fn offset(now: DateTime<Utc>, delta: TimeDelta) -> Result<DateTime<Utc>, StoreError> {
    now.checked_add_signed(delta)
        .ok_or_else(|| StoreError::DateOutOfRange {
            seconds: delta.num_seconds(),
        })
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    format_version: u32,
    environment: EnvironmentLabel,
    #[serde(default)]
    entries: BTreeMap<String, SecretEntry>,
}

/// What `ensure` did for one secret
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnsureAction {
    /// Generated a first version
    Created,
    /// Existing, not-yet-due value kept
    Unchanged,
    /// Past due; a new version was generated
    Rotated,
    /// Past due but operator-supplied; kept until replaced with `set-secret`
    RotationDue,
    /// Operator-supplied and not set yet
    AwaitingOperator,
}

impl fmt::Display for EnsureAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Unchanged => "unchanged",
            Self::Rotated => "rotated",
            Self::RotationDue => "rotation due",
            Self::AwaitingOperator => "awaiting operator",
        })
    }
}

/// Versioned secret storage for one environment
pub struct SecretStore {
    dir: PathBuf,
    environment: EnvironmentLabel,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn EntropySource>,
    lock_timeout: Duration,
}

impl SecretStore {
    /// Store for `environment` under `dir`, using the system clock and OS entropy
    pub fn new(dir: impl Into<PathBuf>, environment: EnvironmentLabel) -> Self {
        Self {
            dir: dir.into(),
            environment,
            clock: Arc::new(SystemClock),
            entropy: Arc::new(OsEntropy),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Use a different clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different entropy source
    pub fn with_entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    /// Change the lock acquisition timeout
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Environment this store serves
    pub fn environment(&self) -> EnvironmentLabel {
        self.environment
    }

    /// Current time according to the store's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Store file path
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.environment))
    }

    /// Lock file path
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{}.lock", self.environment))
    }

    /// Every entry; empty when the store does not exist yet
    pub fn load_all(&self) -> Result<BTreeMap<String, SecretEntry>, StoreError> {
        Ok(self.read_file()?.entries)
    }

    /// One entry, if present
    pub fn get(&self, name: &str) -> Result<Option<SecretEntry>, StoreError> {
        Ok(self.load_all()?.remove(name))
    }

    /// Return the entry for `name`, generating or rotating it as needed.
    ///
    /// Existing, not-yet-due entries are returned unchanged.
    pub fn ensure(&self, name: &str, policy: &SecretPolicy) -> Result<SecretEntry, StoreError> {
        if !policy.generate {
            return self.operator_supplied(name);
        }
        let (action, entry) = self.modify(|entries, now| {
            let action = self.ensure_entry(entries, name, policy, now)?;
            Ok((action, entries.get(name).cloned()))
        })?;
        match entry {
            Some(entry) => {
                debug!(environment = %self.environment, secret = %name, %action, "ensured secret");
                Ok(entry)
            }
            None => Err(StoreError::NotGeneratable {
                name: name.to_string(),
            }),
        }
    }

    /// Ensure many secrets under a single lock and a single write
    pub fn ensure_all<'p, I>(&self, secrets: I) -> Result<Vec<(String, EnsureAction)>, StoreError>
    where
        I: IntoIterator<Item = (&'p str, &'p SecretPolicy)>,
    {
        let secrets: Vec<_> = secrets.into_iter().collect();
        self.modify(|entries, now| {
            secrets
                .iter()
                .map(|(name, policy)| -> Result<_, StoreError> {
                    let action = self.ensure_entry(entries, name, policy, now)?;
                    Ok((name.to_string(), action))
                })
                .collect()
        })
    }

    /// Store an operator-supplied value as a new version
    pub fn import(
        &self,
        name: &str,
        value: Zeroizing<String>,
        policy: &SecretPolicy,
    ) -> Result<SecretEntry, StoreError> {
        if value.trim().is_empty() {
            return Err(StoreError::RejectedValue {
                name: name.to_string(),
                reason: "value is empty".to_string(),
            });
        }
        let entry = self.modify(|entries, now| {
            match entries.get_mut(name) {
                Some(existing) if existing.value == value => {}
                Some(existing) => existing.replace(value, now, policy)?,
                None => {
                    entries.insert(name.to_string(), SecretEntry::new(value, 1, now, policy)?);
                }
            }
            Ok(entries.get(name).cloned())
        })?;
        info!(environment = %self.environment, secret = %name, "imported secret");
        entry.ok_or_else(|| StoreError::NotGeneratable {
            name: name.to_string(),
        })
    }

    /// Generate a new version now, regardless of the rotation date
    pub fn rotate(&self, name: &str, policy: &SecretPolicy) -> Result<SecretEntry, StoreError> {
        if !policy.generate {
            return Err(StoreError::NotGeneratable {
                name: name.to_string(),
            });
        }
        let entry = self.modify(|entries, now| {
            let value = generate(policy, self.entropy.as_ref())?;
            match entries.get_mut(name) {
                Some(existing) => existing.replace(value, now, policy)?,
                None => {
                    entries.insert(name.to_string(), SecretEntry::new(value, 1, now, policy)?);
                }
            }
            Ok(entries.get(name).cloned())
        })?;
        info!(environment = %self.environment, secret = %name, "rotated secret");
        entry.ok_or_else(|| StoreError::NotGeneratable {
            name: name.to_string(),
        })
    }

    /// Remove the store file under the store lock; the lock file goes with
    /// it. Absent files are not errors.
    ///
    /// Returns whether a store file existed.
    pub fn wipe(&self) -> Result<bool, StoreError> {
        if !self.dir.exists() {
            return Ok(false);
        }
        let lock = FileLock::acquire(&self.lock_path(), self.lock_timeout)?;
        let removed = remove_file_if_exists(&self.path())?;
        drop(lock);
        if removed {
            info!(environment = %self.environment, "wiped secret store");
        }
        Ok(removed)
    }

    /// Read-only path of `ensure` for values keel never generates
    fn operator_supplied(&self, name: &str) -> Result<SecretEntry, StoreError> {
        let Some(entry) = self.get(name)? else {
            return Err(StoreError::NotGeneratable {
                name: name.to_string(),
            });
        };
        if entry.is_due(self.now()) {
            warn!(environment = %self.environment, secret = %name, "operator-supplied secret is past its rotation date");
        }
        Ok(entry)
    }

    fn ensure_entry(
        &self,
        entries: &mut BTreeMap<String, SecretEntry>,
        name: &str,
        policy: &SecretPolicy,
        now: DateTime<Utc>,
    ) -> Result<EnsureAction, StoreError> {
        match entries.get_mut(name) {
            Some(entry) if !entry.is_due(now) => Ok(EnsureAction::Unchanged),
            Some(_) if !policy.generate => {
                warn!(environment = %self.environment, secret = %name, "operator-supplied secret is past its rotation date");
                Ok(EnsureAction::RotationDue)
            }
            Some(entry) => {
                let value = generate(policy, self.entropy.as_ref())?;
                entry.replace(value, now, policy)?;
                info!(environment = %self.environment, secret = %name, version = entry.version, "rotated due secret");
                Ok(EnsureAction::Rotated)
            }
            None if !policy.generate => Ok(EnsureAction::AwaitingOperator),
            None => {
                let value = generate(policy, self.entropy.as_ref())?;
                entries.insert(name.to_string(), SecretEntry::new(value, 1, now, policy)?);
                info!(environment = %self.environment, secret = %name, "generated secret");
                Ok(EnsureAction::Created)
            }
        }
    }

    /// Locked read-modify-write. Expired grace values are dropped first; the
    /// file is rewritten only when `f` succeeds.
    fn modify<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, SecretEntry>, DateTime<Utc>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        ensure_private_dir(&self.dir)?;
        let _lock = FileLock::acquire(&self.lock_path(), self.lock_timeout)?;

        let mut file = self.read_file()?;
        let now = self.clock.now();
        for entry in file.entries.values_mut() {
            entry.expire_previous(now);
        }
        let result = f(&mut file.entries, now)?;
        self.write_file(&file)?;
        Ok(result)
    }

    fn read_file(&self) -> Result<StoreFile, StoreError> {
        let path = self.path();
        let Some(contents) = read_if_exists(&path)? else {
            return Ok(StoreFile {
                format_version: FORMAT_VERSION,
                environment: self.environment,
                entries: BTreeMap::new(),
            });
        };
        // serde_json errors quote at most a type name and position, never input.
        let file: StoreFile = serde_json::from_str(&contents).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;
        check_header(&path, &file, self.environment)?;
        Ok(file)
    }

    fn write_file(&self, file: &StoreFile) -> Result<(), StoreError> {
        let path = self.path();
        let json = Zeroizing::new(serde_json::to_vec_pretty(file).map_err(|e| {
            StoreError::Corrupt {
                path: path.clone(),
                message: e.to_string(),
            }
        })?);
        write_atomic(&path, &json, Some(PRIVATE_FILE_MODE))?;
        Ok(())
    }
}

fn check_header(path: &Path, file: &StoreFile, expected: EnvironmentLabel) -> Result<(), StoreError> {
    if file.format_version != FORMAT_VERSION {
        return Err(StoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            version: file.format_version,
        });
    }
    if file.environment != expected {
        return Err(StoreError::EnvironmentMismatch {
            path: path.to_path_buf(),
            expected,
            found: file.environment,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyEngine;
    use chrono::TimeZone;
    use keel_common::clock::ManualClock;

    struct Fixture {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        store: SecretStore,
    }

    fn fixture(environment: EnvironmentLabel) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = SecretStore::new(dir.path().join("secrets"), environment)
            .with_clock(clock.clone())
            .with_lock_timeout(Duration::from_millis(200));
        Fixture {
            _dir: dir,
            clock,
            store,
        }
    }

    fn policy(class: &str) -> SecretPolicy {
        PolicyEngine::default()
            .policy_for(EnvironmentLabel::Production, class)
            .unwrap()
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let f = fixture(EnvironmentLabel::Production);
        let policy = policy("core-credential");
        let first = f.store.ensure("DB_PASSWORD", &policy).unwrap();
        let second = f.store.ensure("DB_PASSWORD", &policy).unwrap();
        assert_eq!(first.value, second.value);
        assert_eq!(second.version, 1);
        assert_eq!(first.value.len(), 32);
    }

    #[test]
    fn test_rotation_boundary_and_grace_window() {
        let f = fixture(EnvironmentLabel::Production);
        let policy = policy("core-credential");
        let v1 = f.store.ensure("DB_PASSWORD", &policy).unwrap();

        // Exactly at the due date nothing changes
        f.clock.advance(chrono::Duration::days(90));
        let same = f.store.ensure("DB_PASSWORD", &policy).unwrap();
        assert_eq!(same.version, 1);

        // One second past due rotates
        f.clock.advance(chrono::Duration::seconds(1));
        let v2 = f.store.ensure("DB_PASSWORD", &policy).unwrap();
        assert_eq!(v2.version, 2);
        assert_ne!(v2.value, v1.value);
        let now = f.clock.now();
        assert_eq!(v2.accepts(&v1.value, now), Acceptance::Grace);
        assert_eq!(v2.accepts(&v2.value, now), Acceptance::Current);

        // Still inside the 24h window
        f.clock.advance(chrono::Duration::hours(24));
        assert_eq!(v2.accepts(&v1.value, f.clock.now()), Acceptance::Grace);

        // Past the window the old value is unknown and dropped on next write
        f.clock.advance(chrono::Duration::seconds(1));
        assert_eq!(v2.accepts(&v1.value, f.clock.now()), Acceptance::Unknown);
        let kept = f.store.ensure("DB_PASSWORD", &policy).unwrap();
        assert_eq!(kept.version, 2);
        assert!(kept.previous.is_none());
    }

    #[test]
    fn test_external_keys_are_not_generated() {
        let f = fixture(EnvironmentLabel::Production);
        let policy = policy("external-api-key");
        let err = f.store.ensure("STRIPE_KEY", &policy).unwrap_err();
        assert!(matches!(err, StoreError::NotGeneratable { .. }));

        let actions = f.store.ensure_all([("STRIPE_KEY", &policy)]).unwrap();
        assert_eq!(
            actions,
            vec![("STRIPE_KEY".to_string(), EnsureAction::AwaitingOperator)]
        );

        f.store
            .import("STRIPE_KEY", Zeroizing::new("sk_live_abcdef".into()), &policy)
            .unwrap();
        let entry = f.store.ensure("STRIPE_KEY", &policy).unwrap();
        assert_eq!(entry.value.as_str(), "sk_live_abcdef");
    }

    #[test]
    fn test_forced_rotation_keeps_previous() {
        let f = fixture(EnvironmentLabel::Staging);
        let policy = policy("signing-key");
        let v1 = f.store.ensure("JWT_SECRET", &policy).unwrap();
        let v2 = f.store.rotate("JWT_SECRET", &policy).unwrap();
        assert_eq!(v2.version, 2);
        let prev = v2.previous.as_ref().unwrap();
        assert_eq!(prev.value, v1.value);
        assert_eq!(prev.valid_until, f.clock.now() + chrono::Duration::hours(24));
    }

    #[test]
    fn test_environment_scoping() {
        let f = fixture(EnvironmentLabel::Production);
        let policy = policy("core-credential");
        f.store.ensure("DB_PASSWORD", &policy).unwrap();
        let dev = SecretStore::new(f._dir.path().join("secrets"), EnvironmentLabel::Development);
        assert!(dev.load_all().unwrap().is_empty());
        assert!(f.store.path().ends_with("production.json"));
    }

    #[test]
    fn test_mismatched_environment_rejected() {
        let f = fixture(EnvironmentLabel::Production);
        f.store
            .ensure("DB_PASSWORD", &policy("core-credential"))
            .unwrap();
        let contents = std::fs::read_to_string(f.store.path()).unwrap();
        std::fs::write(
            f.store.path(),
            contents.replace("\"production\"", "\"staging\""),
        )
        .unwrap();
        assert!(matches!(
            f.store.load_all(),
            Err(StoreError::EnvironmentMismatch { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let f = fixture(EnvironmentLabel::Production);
        f.store
            .ensure("DB_PASSWORD", &policy("core-credential"))
            .unwrap();
        let file_mode = std::fs::metadata(f.store.path()).unwrap().permissions().mode();
        let dir_mode = std::fs::metadata(f.store.path().parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[test]
    fn test_lock_contention_times_out() {
        let f = fixture(EnvironmentLabel::Production);
        std::fs::create_dir_all(f.store.lock_path().parent().unwrap()).unwrap();
        let _held = FileLock::acquire(&f.store.lock_path(), Duration::from_millis(50)).unwrap();
        let err = f
            .store
            .ensure("DB_PASSWORD", &policy("core-credential"))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Io(keel_common::Error::LockTimeout { .. })
        ));
    }

    #[test]
    fn test_wipe_is_idempotent() {
        let f = fixture(EnvironmentLabel::Production);
        f.store
            .ensure("DB_PASSWORD", &policy("core-credential"))
            .unwrap();
        assert!(f.store.wipe().unwrap());
        assert!(!f.store.wipe().unwrap());
        assert!(f.store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_out_of_range_grace_window_is_an_error() {
        let f = fixture(EnvironmentLabel::Production);
        let mut policy = policy("core-credential");
        f.store.ensure("DB_PASSWORD", &policy).unwrap();

        policy.grace_window = chrono::Duration::hours(i64::from(u32::MAX));
        let err = f.store.rotate("DB_PASSWORD", &policy).unwrap_err();
        assert!(matches!(err, StoreError::DateOutOfRange { .. }));
        // Nothing was written
        assert_eq!(f.store.get("DB_PASSWORD").unwrap().unwrap().version, 1);
    }

    #[test]
    fn test_out_of_range_rotation_is_an_error() {
        let f = fixture(EnvironmentLabel::Production);
        let mut policy = policy("core-credential");
        policy.rotation = Some(chrono::Duration::days(i64::from(u32::MAX)));
        assert!(matches!(
            f.store.ensure("DB_PASSWORD", &policy),
            Err(StoreError::DateOutOfRange { .. })
        ));
        assert!(!f.store.path().exists());
    }

    #[test]
    fn test_ensure_of_operator_secret_does_not_write() {
        let f = fixture(EnvironmentLabel::Production);
        let policy = policy("external-api-key");
        assert!(matches!(
            f.store.ensure("STRIPE_KEY", &policy),
            Err(StoreError::NotGeneratable { .. })
        ));
        assert!(!f.store.path().exists());
    }

    #[test]
    fn test_wipe_waits_for_the_lock() {
        let f = fixture(EnvironmentLabel::Production);
        f.store
            .ensure("DB_PASSWORD", &policy("core-credential"))
            .unwrap();
        let held = FileLock::acquire(&f.store.lock_path(), Duration::from_millis(50)).unwrap();
        assert!(matches!(
            f.store.wipe(),
            Err(StoreError::Io(keel_common::Error::LockTimeout { .. }))
        ));
        assert!(f.store.path().exists());

        drop(held);
        assert!(f.store.wipe().unwrap());
        assert!(!f.store.lock_path().exists());
    }

    #[test]
    fn test_debug_redacts_values() {
        let f = fixture(EnvironmentLabel::Production);
        let entry = f
            .store
            .ensure("DB_PASSWORD", &policy("core-credential"))
            .unwrap();
        let debug = format!("{:?}", entry);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(entry.value.as_str()));
    }
}
