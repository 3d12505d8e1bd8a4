//! Root privilege check.
//!
//! The daemon writes under `/var/lock` and `/var/log` by default, so it
//! refuses to start without root unless the check is turned off
//! (`require_root = false` / `--no-root-check`).

/// Returns the effective user id of the current process.
pub fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() }
}

/// Fails unless the process runs with an effective uid of 0.
pub fn ensure_root() -> Result<(), PrivilegeError> {
    check_uid(effective_uid())
}

fn check_uid(uid: u32) -> Result<(), PrivilegeError> {
    if uid == 0 {
        Ok(())
    } else {
        Err(PrivilegeError::NotRoot { uid })
    }
}

/// Errors from the privilege check.
#[derive(Debug, thiserror::Error)]
pub enum PrivilegeError {
    #[error("linelogd must be run as root (effective uid {uid})")]
    NotRoot { uid: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_uid() {
        assert!(check_uid(0).is_ok());

        let err = check_uid(1000).unwrap_err();
        assert!(err.to_string().contains("must be run as root"));
        assert!(err.to_string().contains("1000"));
    }

    #[test]
    fn test_ensure_root_matches_effective_uid() {
        assert_eq!(ensure_root().is_ok(), effective_uid() == 0);
    }
}
