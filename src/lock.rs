use std::fs::{self, OpenOptions};
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use sysinfo::{Pid, System};

use crate::error::GeoflatError;

/// Exclusive marker file guarding one working root. Removed on drop.
///
/// The file holds the owner's pid. A lock left behind by a process that no
/// longer exists is taken over.
#[derive(Debug)]
pub struct RunLock {
    path: Utf8PathBuf,
}

impl RunLock {
    pub fn acquire(path: &Utf8Path) -> Result<Self, GeoflatError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| GeoflatError::Filesystem(err.to_string()))?;
        }
        match Self::create(path) {
            Err(GeoflatError::Locked(_)) if holder_is_gone(path) => {
                tracing::warn!(path = %path, "owner of run lock is gone, taking it over");
                match fs::remove_file(path.as_std_path()) {
                    Ok(()) => {}
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => {
                        return Err(GeoflatError::Filesystem(format!(
                            "remove stale lock {path}: {err}"
                        )));
                    }
                }
                Self::create(path)
            }
            other => other,
        }
    }

    fn create(path: &Utf8Path) -> Result<Self, GeoflatError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path.as_std_path())
            .map_err(|err| match err.kind() {
                io::ErrorKind::AlreadyExists => GeoflatError::Locked(path.as_std_path().to_path_buf()),
                _ => GeoflatError::Filesystem(format!("create lock {path}: {err}")),
            })?;
        let lock = Self {
            path: path.to_path_buf(),
        };
        writeln!(file, "{}", std::process::id())
            .map_err(|err| GeoflatError::Filesystem(format!("write lock {path}: {err}")))?;
        tracing::debug!(path = %path, "run lock acquired");
        Ok(lock)
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(self.path.as_std_path()) {
            tracing::warn!(path = %self.path, error = %err, "failed to remove run lock");
        }
    }
}

/// True only when the lock names a pid and no such process is running.
/// Unreadable or pid-less lock files count as held.
fn holder_is_gone(path: &Utf8Path) -> bool {
    let Ok(content) = fs::read_to_string(path.as_std_path()) else {
        return false;
    };
    let Ok(pid) = content.trim().parse::<u32>() else {
        return false;
    };
    !process_is_running(pid)
}

fn process_is_running(pid: u32) -> bool {
    let system = System::new_all();
    system.process(Pid::from_u32(pid)).is_some()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    // Above the Linux pid ceiling, so never a live process.
    const DEAD_PID: u32 = 4_194_305;

    fn lock_path() -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, dir.join("output").join(".geoflat.lock"))
    }

    #[test]
    fn second_lock_fails_until_first_is_dropped() {
        let (_temp, path) = lock_path();

        let first = RunLock::acquire(&path).unwrap();
        let pid = fs::read_to_string(path.as_std_path()).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());
        assert_matches!(RunLock::acquire(&path), Err(GeoflatError::Locked(_)));

        drop(first);
        assert!(!path.as_std_path().exists());
        RunLock::acquire(&path).unwrap();
    }

    #[test]
    fn lock_of_dead_process_is_taken_over() {
        let (_temp, path) = lock_path();
        fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
        fs::write(path.as_std_path(), format!("{DEAD_PID}\n")).unwrap();

        let lock = RunLock::acquire(&path).unwrap();
        let pid = fs::read_to_string(path.as_std_path()).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());
        drop(lock);
        assert!(!path.as_std_path().exists());
    }

    #[test]
    fn lock_without_pid_stays_held() {
        let (_temp, path) = lock_path();
        fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
        fs::write(path.as_std_path(), "").unwrap();

        assert_matches!(RunLock::acquire(&path), Err(GeoflatError::Locked(_)));
        assert!(path.as_std_path().exists());
    }
}
