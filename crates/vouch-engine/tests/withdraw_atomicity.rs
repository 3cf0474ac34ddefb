//! Withdrawal atomicity: the rewards balance is zeroed before the external
//! transfer runs, a failed transfer restores it, and a claimed balance can
//! never be claimed twice.

use std::sync::{Arc, Mutex};

use vouch_core::{Address, Amount, FeeConfig, ProfileId, SubjectDescriptor, SubjectKey};
use vouch_engine::{
    EngineError, EnginePolicy, MockTransfer, TransferError, ValueTransfer, VouchEngine,
};
use vouch_ledger::{LedgerError, LedgerStorage};

const PAYOUT: Address = Address([0xAA; 20]);

fn engine_with(
    dir: &tempfile::TempDir,
    transfer: Arc<dyn ValueTransfer>,
) -> (LedgerStorage, VouchEngine) {
    let storage = LedgerStorage::open_at(dir.path()).expect("open ledger");
    let engine = VouchEngine::new(storage.clone(), EnginePolicy::default(), transfer);
    engine
        .set_fee_config(FeeConfig {
            entry_bps: 0,
            donation_bps: 500,
            pool_bps: 0,
        })
        .expect("fee config");
    (storage, engine)
}

fn fund(engine: &VouchEngine, profile: ProfileId) {
    // 5% donation on 1000 accrues 50 units of rewards for the subject.
    engine
        .create_vouch(
            ProfileId(1),
            SubjectDescriptor::Profile(profile),
            Amount(1000),
            1000,
        )
        .expect("fund subject");
}

/// Transfer hook that records the claimant's ledger balance as seen from
/// inside the external call.
struct BalanceProbe {
    storage: LedgerStorage,
    profile: ProfileId,
    observed: Mutex<Vec<Amount>>,
}

impl ValueTransfer for BalanceProbe {
    fn transfer(&self, _to: &Address, _amount: Amount) -> Result<(), TransferError> {
        let balance = self
            .storage
            .rewards_balance(SubjectKey::Profile(self.profile))
            .map_err(|e| TransferError::Rejected {
                reason: e.to_string(),
            })?;
        self.observed
            .lock()
            .expect("probe lock")
            .push(balance);
        Ok(())
    }
}

#[test]
fn balance_is_already_zero_while_the_transfer_runs() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let profile = ProfileId(42);
    let storage = LedgerStorage::open_at(dir.path()).expect("open ledger");
    let probe = Arc::new(BalanceProbe {
        storage: storage.clone(),
        profile,
        observed: Mutex::new(Vec::new()),
    });
    let engine = VouchEngine::new(storage, EnginePolicy::default(), probe.clone());
    engine
        .set_fee_config(FeeConfig {
            entry_bps: 0,
            donation_bps: 500,
            pool_bps: 0,
        })
        .expect("fee config");
    fund(&engine, profile);

    let claimed = engine
        .withdraw_rewards(SubjectDescriptor::Profile(profile), PAYOUT, 2000)
        .expect("withdraw");
    assert_eq!(claimed, Amount(50));

    // A concurrent claimant racing the transfer sees nothing left to take.
    let observed = probe.observed.lock().expect("probe lock").clone();
    assert_eq!(observed, vec![Amount::ZERO]);
}

#[test]
fn second_withdraw_fails_with_insufficient_balance() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let transfer = Arc::new(MockTransfer::new());
    let (_storage, engine) = engine_with(&dir, transfer.clone());
    let profile = ProfileId(42);
    fund(&engine, profile);

    engine
        .withdraw_rewards(SubjectDescriptor::Profile(profile), PAYOUT, 2000)
        .expect("first withdraw");

    let err = engine
        .withdraw_rewards(SubjectDescriptor::Profile(profile), PAYOUT, 3000)
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Ledger(LedgerError::InsufficientRewardsBalance { .. })
    ));
    assert_eq!(transfer.sent(), vec![(PAYOUT, Amount(50))]);
}

#[test]
fn failed_transfer_restores_the_balance_for_retry() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let transfer = Arc::new(MockTransfer::new());
    let (storage, engine) = engine_with(&dir, transfer.clone());
    let profile = ProfileId(42);
    fund(&engine, profile);

    transfer.fail();
    let err = engine
        .withdraw_rewards(SubjectDescriptor::Profile(profile), PAYOUT, 2000)
        .unwrap_err();
    assert!(matches!(err, EngineError::TransferFailed { .. }));

    // Nothing left the system and the balance is back in place.
    assert_eq!(
        storage
            .rewards_balance(SubjectKey::Profile(profile))
            .expect("balance"),
        Amount(50)
    );
    let totals = storage.audit_totals().expect("totals");
    assert_eq!(totals.total_withdrawn, Amount::ZERO);
    assert!(totals.conserves());

    // The retry goes through once the transfer side recovers.
    transfer.succeed();
    let claimed = engine
        .withdraw_rewards(SubjectDescriptor::Profile(profile), PAYOUT, 3000)
        .expect("retry");
    assert_eq!(claimed, Amount(50));
    assert_eq!(transfer.sent(), vec![(PAYOUT, Amount(50))]);
}

#[test]
fn withdrawing_with_nothing_accrued_is_rejected_before_any_transfer() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let transfer = Arc::new(MockTransfer::new());
    let (_storage, engine) = engine_with(&dir, transfer.clone());

    let err = engine
        .withdraw_rewards(SubjectDescriptor::Profile(ProfileId(7)), PAYOUT, 1000)
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Ledger(LedgerError::InsufficientRewardsBalance { .. })
    ));
    assert!(transfer.sent().is_empty());
}

#[test]
fn pending_accrual_is_locked_until_bound_then_fully_claimable() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let transfer = Arc::new(MockTransfer::new());
    let (_storage, engine) = engine_with(&dir, transfer.clone());

    // Rewards accrued under a pending key stay locked until the identity
    // registry binds that key to a profile.
    let addr = Address([0x22; 20]);
    engine
        .create_vouch(
            ProfileId(1),
            SubjectDescriptor::Address(addr),
            Amount(1000),
            1000,
        )
        .expect("vouch pending subject");

    let err = engine
        .withdraw_rewards(SubjectDescriptor::Address(addr), PAYOUT, 2000)
        .unwrap_err();
    assert!(matches!(err, EngineError::ProfileNotFoundForAddress(_)));
    assert!(transfer.sent().is_empty());

    // Once bound, the same descriptor yields the full accrual.
    let profile = ProfileId(42);
    engine.bind_address(addr, profile, 3000).expect("bind");
    let claimed = engine
        .withdraw_rewards(SubjectDescriptor::Address(addr), PAYOUT, 4000)
        .expect("claim after binding");
    assert_eq!(claimed, Amount(50));
    assert_eq!(transfer.sent(), vec![(PAYOUT, Amount(50))]);
}
