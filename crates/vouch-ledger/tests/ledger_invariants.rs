//! Ledger Accounting Invariant Tests
//!
//! This suite verifies the critical invariants of the vouch ledger:
//!
//! 1. Conservation: vouch balances + rewards balances + entry fees equal
//!    total deposited minus total withdrawn, exactly, after every operation
//! 2. Pending-to-resolved merge is idempotent
//! 3. Withdraw is read-and-zero: a second attempt fails
//! 4. Event sequence numbers strictly increase and survive reopen
//! 5. Schema version mismatches are detected on open

use vouch_core::{
    Address, Amount, AttestationHash, FeeConfig, LedgerEvent, ProfileId, SubjectDescriptor,
    SubjectKey,
};
use vouch_ledger::{LedgerError, LedgerStorage};

fn test_storage() -> (tempfile::TempDir, sled::Db, LedgerStorage) {
    let dir = tempfile::tempdir().expect("tmpdir");
    let db = sled::open(dir.path()).expect("open db");
    let storage = LedgerStorage::open(&db).expect("open ledger");
    (dir, db, storage)
}

fn fee_config() -> FeeConfig {
    FeeConfig {
        entry_bps: 100,
        donation_bps: 150,
        pool_bps: 150,
    }
}

fn assert_conserves(storage: &LedgerStorage) {
    let totals = storage.audit_totals().expect("audit totals");
    assert!(
        totals.conserves(),
        "conservation violated: {totals:?}"
    );
}

// ========== Invariant 1: Conservation ==========

#[test]
fn invariant_conservation_holds_across_operation_sequences() {
    let (_dir, _db, storage) = test_storage();
    let config = fee_config();
    let subject_addr = Address([0x22; 20]);
    let subject = SubjectDescriptor::Address(subject_addr);

    assert_conserves(&storage);

    let first = storage
        .create_vouch(ProfileId(1), subject, Amount(1_000_000), &config, 1000)
        .expect("first vouch");
    assert_conserves(&storage);

    storage
        .create_vouch(ProfileId(2), subject, Amount(333_337), &config, 2000)
        .expect("second vouch");
    assert_conserves(&storage);

    storage
        .increase_vouch(first.vouch.id, subject, Amount(99_999), &config, 3000)
        .expect("increase");
    assert_conserves(&storage);

    // Bind the address; the pending rewards merge into the profile.
    let subject_profile = ProfileId(50);
    storage
        .bind_and_merge(
            SubjectKey::PendingAddress(subject_addr),
            subject_profile,
            4000,
        )
        .expect("bind");
    assert_conserves(&storage);

    // Withdraw everything that accrued.
    let amount = storage.withdraw_zero(subject_profile).expect("withdraw");
    storage
        .finalize_withdraw(subject_profile, Address([0x01; 20]), amount, 5000)
        .expect("finalize");
    assert_conserves(&storage);

    storage
        .archive_profile_vouches(subject_profile, 6000)
        .expect("archive");
    assert_conserves(&storage);
}

#[test]
fn invariant_entry_fees_are_accounted_not_lost() {
    let (_dir, _db, storage) = test_storage();
    let config = FeeConfig {
        entry_bps: 500,
        donation_bps: 0,
        pool_bps: 0,
    };

    storage
        .create_vouch(
            ProfileId(1),
            SubjectDescriptor::Profile(ProfileId(2)),
            Amount(10_000),
            &config,
            1000,
        )
        .expect("create");

    let totals = storage.audit_totals().expect("totals");
    assert_eq!(totals.total_entry_fees, Amount(500));
    assert_eq!(totals.vouch_balances, Amount(9_500));
    assert_conserves(&storage);
}

// ========== Invariant 2: Merge idempotence ==========

#[test]
fn invariant_bind_and_merge_twice_equals_once() {
    let (_dir, _db, storage) = test_storage();
    let attestation = AttestationHash::derive("x.com", "subject");
    let pending = SubjectKey::PendingAttestation(attestation);
    let profile = ProfileId(7);

    storage
        .deposit_rewards(pending, Amount(1234), 1000)
        .expect("deposit");

    storage.bind_and_merge(pending, profile, 2000).expect("bind");
    let once = storage
        .rewards_balance(SubjectKey::Profile(profile))
        .expect("balance");

    storage
        .bind_and_merge(pending, profile, 3000)
        .expect("rebind is a no-op");
    let twice = storage
        .rewards_balance(SubjectKey::Profile(profile))
        .expect("balance");

    assert_eq!(once, twice);
    assert_eq!(once, Amount(1234));
    assert_eq!(
        storage.rewards_balance(pending).expect("pending balance"),
        Amount::ZERO
    );
    assert_conserves(&storage);
}

#[test]
fn deposits_after_binding_resolve_straight_to_the_profile() {
    let (_dir, _db, storage) = test_storage();
    let addr = Address([0x33; 20]);
    let profile = ProfileId(11);

    storage
        .bind_and_merge(SubjectKey::PendingAddress(addr), profile, 1000)
        .expect("bind");

    let receipt = storage
        .create_vouch(
            ProfileId(1),
            SubjectDescriptor::Address(addr),
            Amount(1000),
            &fee_config(),
            2000,
        )
        .expect("create");

    assert_eq!(receipt.vouch.subject, SubjectKey::Profile(profile));
    assert_eq!(
        storage
            .rewards_balance(SubjectKey::Profile(profile))
            .expect("balance"),
        receipt.split.donation_share
    );
}

// ========== Invariant 3: Withdraw atomicity ==========

#[test]
fn invariant_second_withdraw_fails_with_insufficient_balance() {
    let (_dir, _db, storage) = test_storage();
    let profile = ProfileId(3);

    storage
        .deposit_rewards(SubjectKey::Profile(profile), Amount(77), 1000)
        .expect("deposit");

    assert_eq!(storage.withdraw_zero(profile).expect("first"), Amount(77));
    assert!(matches!(
        storage.withdraw_zero(profile),
        Err(LedgerError::InsufficientRewardsBalance { .. })
    ));
}

// ========== Invariant 4: Event log ==========

#[test]
fn invariant_event_sequence_is_strictly_increasing_and_durable() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let config = fee_config();
    let subject = SubjectDescriptor::Profile(ProfileId(2));

    {
        let db = sled::open(dir.path()).expect("open db");
        let storage = LedgerStorage::open(&db).expect("open ledger");
        storage
            .create_vouch(ProfileId(1), subject, Amount(1000), &config, 1000)
            .expect("create");
        storage
            .create_vouch(ProfileId(3), subject, Amount(1000), &config, 2000)
            .expect("create");
        db.flush().expect("flush");
    }

    // Reopen: the sequence counter continues where it left off.
    let db = sled::open(dir.path()).expect("reopen db");
    let storage = LedgerStorage::open(&db).expect("reopen ledger");
    let before = storage.events_since(0).expect("events");
    assert!(!before.is_empty());

    let seqs: Vec<u64> = before.iter().map(|e| e.seq).collect();
    for pair in seqs.windows(2) {
        assert!(pair[1] == pair[0] + 1, "sequence gap: {seqs:?}");
    }

    storage
        .deposit_rewards(SubjectKey::Profile(ProfileId(2)), Amount(5), 3000)
        .expect("deposit");
    let after = storage.events_since(0).expect("events");
    assert_eq!(after.len(), before.len() + 1);
    assert_eq!(after.last().expect("last").seq, seqs.last().unwrap() + 1);
    assert!(matches!(
        after.last().unwrap().event,
        LedgerEvent::RewardsDeposited { .. }
    ));
}

#[test]
fn events_since_filters_by_sequence() {
    let (_dir, _db, storage) = test_storage();
    for i in 0..5u64 {
        storage
            .deposit_rewards(SubjectKey::Profile(ProfileId(1)), Amount(1), i * 100)
            .expect("deposit");
    }

    let tail = storage.events_since(3).expect("events");
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].seq, 3);
    assert_eq!(tail[1].seq, 4);
}

// ========== Invariant 5: Schema versioning ==========

#[test]
fn invariant_schema_mismatch_is_rejected_on_open() {
    let dir = tempfile::tempdir().expect("tmpdir");
    {
        let db = sled::open(dir.path()).expect("open db");
        let tree = db.open_tree("vouch_ledger").expect("tree");
        tree.insert(b"meta/state_version", b"999").expect("insert");
        db.flush().expect("flush");
    }

    let db = sled::open(dir.path()).expect("reopen db");
    assert!(matches!(
        LedgerStorage::open(&db),
        Err(LedgerError::SchemaMismatch { .. })
    ));
}

// ========== Failed payout rollback ==========

#[test]
fn failed_payout_restore_keeps_the_balance_claimable() {
    let (_dir, _db, storage) = test_storage();
    let profile = ProfileId(5);

    storage
        .deposit_rewards(SubjectKey::Profile(profile), Amount(900), 1000)
        .expect("deposit");

    let amount = storage.withdraw_zero(profile).expect("zero");
    // The transfer primitive failed; compensate.
    storage.restore_rewards(profile, amount).expect("restore");

    assert_eq!(
        storage
            .rewards_balance(SubjectKey::Profile(profile))
            .expect("balance"),
        Amount(900)
    );
    assert_conserves(&storage);

    // Retry then succeeds.
    let retry = storage.withdraw_zero(profile).expect("retry");
    assert_eq!(retry, Amount(900));
    storage
        .finalize_withdraw(profile, Address([0x01; 20]), retry, 2000)
        .expect("finalize");
    assert_conserves(&storage);
}
