//! Scoped environment overrides for integration tests.

use std::env;
use std::ffi::OsString;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

static ENV_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();

/// Applies environment overrides for its lifetime and restores the previous
/// values on drop.
///
/// The guard holds a global mutex so concurrent tests never interleave
/// their mutations of the process environment.
pub struct EnvVarGuard {
    saved: Vec<(OsString, Option<OsString>)>,
    _lock: MutexGuard<'static, ()>,
}

impl EnvVarGuard {
    /// Sets each `(key, value)` pair; a `None` value unsets the key.
    pub fn apply(overrides: &[(&str, Option<&str>)]) -> Self {
        let lock = ENV_MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut saved = Vec::with_capacity(overrides.len());
        for (key, value) in overrides {
            let key_name = OsString::from(key);
            saved.push((key_name.clone(), env::var_os(&key_name)));
            unsafe {
                // SAFETY: the global mutex serializes environment mutations in tests.
                match value {
                    Some(new_value) => env::set_var(&key_name, new_value),
                    None => env::remove_var(&key_name),
                }
            }
        }

        Self { saved, _lock: lock }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain(..) {
            unsafe {
                // SAFETY: the global mutex serializes environment mutations in tests.
                match value {
                    Some(previous) => env::set_var(&key, previous),
                    None => env::remove_var(&key),
                }
            }
        }
    }
}
