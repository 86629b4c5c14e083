/*!
 * Error Types
 * Contract violations (fatal) and recoverable configuration errors
 *
 * Every failure a primitive can detect at run time is a bug in the calling
 * code, so those are modelled as `ContractViolation` and surfaced through
 * [`fatal`], which never returns. `SyncError` is reserved for the few
 * operations that can legitimately fail, such as installing configuration.
 */

use miette::Diagnostic;
use thiserror::Error;

/// Result type for recoverable operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Misuse of a synchronization primitive detected at run time
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Diagnostic)]
pub enum ContractViolation {
    #[error("sync: unlock of unlocked mutex")]
    #[diagnostic(
        code(sync::mutex::unlock_of_unlocked),
        help("Every unlock must be paired with a preceding successful lock.")
    )]
    UnlockOfUnlockedMutex,

    #[error("sync: inconsistent mutex state")]
    #[diagnostic(
        code(sync::mutex::inconsistent_state),
        help("The mutex state word was corrupted. This indicates memory corruption or a bug in the lock.")
    )]
    InconsistentMutexState,

    #[error("sync: RUnlock of unlocked RWMutex")]
    #[diagnostic(
        code(sync::rwmutex::read_unlock_of_unlocked),
        help("read_unlock must be paired with a preceding read_lock.")
    )]
    ReadUnlockOfUnlocked,

    #[error("sync: Unlock of unlocked RWMutex")]
    #[diagnostic(
        code(sync::rwmutex::write_unlock_of_unlocked),
        help("write_unlock must be paired with a preceding write_lock.")
    )]
    WriteUnlockOfUnlocked,

    #[error("sync: negative WaitGroup counter")]
    #[diagnostic(
        code(sync::waitgroup::negative_counter),
        help("done() was called more times than add() accounted for.")
    )]
    NegativeWaitGroupCounter,

    #[error("sync: WaitGroup misuse: Add called concurrently with Wait")]
    #[diagnostic(
        code(sync::waitgroup::add_during_wait),
        help("Calls with a positive delta that start when the counter is zero must happen before wait().")
    )]
    AddConcurrentWithWait,

    #[error("sync: WaitGroup is reused before previous Wait has returned")]
    #[diagnostic(
        code(sync::waitgroup::reused_before_wait_returned),
        help("Wait for every wait() caller to return before adding to the group again.")
    )]
    ReusedBeforeWaitReturned,
}

/// Recoverable errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum SyncError {
    #[error("Sync configuration already installed")]
    #[diagnostic(
        code(sync::config::already_installed),
        help("SyncConfig::install must run before any primitive reads the global configuration.")
    )]
    ConfigAlreadyInstalled,

    #[error("Invalid sync configuration: {0}")]
    #[diagnostic(
        code(sync::config::invalid),
        help("Check the SYNC_* environment variables or the values passed to SyncConfig.")
    )]
    InvalidConfig(String),

    #[error("Failed to spawn {0} thread: {1}")]
    #[diagnostic(
        code(sync::thread::spawn_failed),
        help("The system may have reached its thread limit.")
    )]
    SpawnFailed(&'static str, String),
}

/// Report a contract violation and abort the offending task
///
/// The violation is logged before panicking so it shows up in structured logs
/// even when the panic is caught further up.
#[cold]
#[inline(never)]
#[track_caller]
pub fn fatal(violation: ContractViolation) -> ! {
    let location = std::panic::Location::caller();
    tracing::error!(
        code = ?violation,
        file = location.file(),
        line = location.line(),
        "{}",
        violation
    );
    panic!("{}", violation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_messages() {
        assert_eq!(
            ContractViolation::UnlockOfUnlockedMutex.to_string(),
            "sync: unlock of unlocked mutex"
        );
        assert_eq!(
            ContractViolation::NegativeWaitGroupCounter.to_string(),
            "sync: negative WaitGroup counter"
        );
    }

    #[test]
    #[should_panic(expected = "sync: RUnlock of unlocked RWMutex")]
    fn test_fatal_panics_with_message() {
        fatal(ContractViolation::ReadUnlockOfUnlocked);
    }

    #[test]
    fn test_diagnostic_code() {
        let code = ContractViolation::AddConcurrentWithWait
            .code()
            .map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("sync::waitgroup::add_during_wait"));
    }
}
