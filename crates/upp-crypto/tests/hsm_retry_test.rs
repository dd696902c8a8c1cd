//! Retry and recovery behaviour of HSM operations.
//!
//! Faults are scripted on `C_FindObjects`, which every key operation starts
//! with, and the recorded sleeps show which recovery path ran.

use std::time::Duration;

use cryptoki::error::RvError;
use upp_crypto::{Crypto, CryptoError, HsmError, RetryPolicy, hsm::SessionState};
use upp_harness::{SimEnv, SimOp, SimToken, TEST_RETRY_DELAY, config, hsm_backend, hsm_backend_with};
use uuid::Uuid;

fn within_jitter(sleep: Duration) -> bool {
    sleep >= TEST_RETRY_DELAY && sleep <= TEST_RETRY_DELAY.mul_f64(1.05)
}

#[test]
fn transient_failures_are_retried() {
    let token = SimToken::new();
    let env = SimEnv::with_seed(1);
    let backend = hsm_backend(&token, &env).unwrap();
    token.fail_times(SimOp::FindObjects, RvError::DeviceError, 2);

    assert!(!backend.private_key_exists(Uuid::new_v4()).unwrap());

    assert_eq!(token.call_count(SimOp::FindObjects), 3);
    let sleeps = env.sleeps();
    assert_eq!(sleeps.len(), 2);
    assert!(sleeps.iter().copied().all(within_jitter), "{sleeps:?}");
}

#[test]
fn exhausted_retries_report_last_error() {
    let token = SimToken::new();
    let env = SimEnv::with_seed(2);
    let backend = hsm_backend(&token, &env).unwrap();
    token.fail_times(SimOp::FindObjects, RvError::SessionCount, 3);

    let err = backend.private_key_exists(Uuid::new_v4()).unwrap_err();

    match err {
        CryptoError::Hsm(HsmError::RetriesExhausted { attempts, source }) => {
            assert_eq!(attempts, 3);
            assert_eq!(source.rv(), Some(RvError::SessionCount));
        },
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(token.call_count(SimOp::FindObjects), 3);
    // No wait after the final attempt
    assert_eq!(env.sleeps().len(), 2);
}

#[test]
fn fatal_errors_fail_immediately() {
    let token = SimToken::new();
    let env = SimEnv::default();
    let backend = hsm_backend(&token, &env).unwrap();
    token.fail_next(SimOp::FindObjects, RvError::MechanismInvalid);

    let err = backend.private_key_exists(Uuid::new_v4()).unwrap_err();

    assert!(matches!(err, CryptoError::Hsm(HsmError::Unrecoverable(_))));
    assert_eq!(token.call_count(SimOp::FindObjects), 1);
    assert!(env.sleeps().is_empty());
}

#[test]
fn unrecognized_codes_fail_immediately() {
    let token = SimToken::new();
    let env = SimEnv::default();
    let backend = hsm_backend(&token, &env).unwrap();
    token.fail_next(SimOp::FindObjects, RvError::Cancel);

    let err = backend.private_key_exists(Uuid::new_v4()).unwrap_err();

    assert!(matches!(err, CryptoError::Hsm(HsmError::UnrecognizedReturnCode(_))));
    assert_eq!(token.call_count(SimOp::FindObjects), 1);
    assert!(env.sleeps().is_empty());
}

#[test]
fn broken_session_is_reset_without_waiting() {
    let token = SimToken::new();
    let env = SimEnv::default();
    let backend = hsm_backend(&token, &env).unwrap();
    let id = Uuid::new_v4();
    backend.generate_key(id).unwrap();

    token.drop_session();
    token.clear_calls();

    assert!(backend.private_key_exists(id).unwrap());

    // Logout fails on the dead session, so the rest of teardown is skipped
    // and setup runs from scratch.
    assert_eq!(
        token.calls(),
        vec![
            SimOp::FindObjects,
            SimOp::Logout,
            SimOp::Initialize,
            SimOp::Slots,
            SimOp::OpenSession,
            SimOp::Login,
            SimOp::FindObjects,
        ]
    );
    assert!(env.sleeps().is_empty());
    assert_eq!(backend.session_state(), SessionState::Ready);
}

#[test]
fn scripted_session_error_resets_cleanly() {
    let token = SimToken::new();
    let env = SimEnv::default();
    let backend = hsm_backend(&token, &env).unwrap();
    token.fail_next(SimOp::FindObjects, RvError::SessionHandleInvalid);
    token.clear_calls();

    assert!(!backend.public_key_exists(Uuid::new_v4()).unwrap());

    assert_eq!(
        token.calls(),
        vec![
            SimOp::FindObjects,
            SimOp::Logout,
            SimOp::CloseSession,
            SimOp::Finalize,
            SimOp::Initialize,
            SimOp::Slots,
            SimOp::OpenSession,
            SimOp::Login,
            SimOp::FindObjects,
        ]
    );
}

#[test]
fn removed_device_waits_then_resets() {
    let token = SimToken::new();
    let env = SimEnv::with_seed(3);
    let backend = hsm_backend(&token, &env).unwrap();
    token.fail_next(SimOp::FindObjects, RvError::DeviceRemoved);
    token.clear_calls();

    assert!(!backend.private_key_exists(Uuid::new_v4()).unwrap());

    assert_eq!(env.sleeps().len(), 1);
    assert!(within_jitter(env.sleeps()[0]));
    assert_eq!(token.call_count(SimOp::Login), 1);
    assert_eq!(token.call_count(SimOp::FindObjects), 2);
}

#[test]
fn failed_reset_is_reported() {
    let token = SimToken::new();
    let backend = hsm_backend(&token, &SimEnv::default()).unwrap();
    token.fail_next(SimOp::FindObjects, RvError::UserNotLoggedIn);
    token.fail_next(SimOp::Login, RvError::PinLocked);

    let err = backend.private_key_exists(Uuid::new_v4()).unwrap_err();

    assert!(matches!(err, CryptoError::Hsm(HsmError::ResetFailed(_))));
    assert_eq!(backend.session_state(), SessionState::Initialized);

    // The next call sets the session up again before doing its work
    assert!(!backend.private_key_exists(Uuid::new_v4()).unwrap());
    assert_eq!(backend.session_state(), SessionState::Ready);
}

#[test]
fn zero_attempts_means_one() {
    let token = SimToken::new();
    let env = SimEnv::default();
    let mut config = config();
    config.retry = RetryPolicy { max_attempts: 0, delay: TEST_RETRY_DELAY };
    let backend = hsm_backend_with(&token, &env, &config).unwrap();
    token.fail_next(SimOp::FindObjects, RvError::DeviceError);

    let err = backend.private_key_exists(Uuid::new_v4()).unwrap_err();

    assert!(matches!(err, CryptoError::Hsm(HsmError::RetriesExhausted { attempts: 1, .. })));
    assert!(env.sleeps().is_empty());
}

#[test]
fn lookup_failure_is_assumed_present() {
    let token = SimToken::new();
    let backend = hsm_backend(&token, &SimEnv::default()).unwrap();
    token.fail_next(SimOp::FindObjects, RvError::GeneralError);

    assert!(backend.private_key_exists_or_assume(Uuid::new_v4()));
    assert!(!backend.private_key_exists_or_assume(Uuid::new_v4()));
}
