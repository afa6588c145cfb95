// Integration tests for handshake operations racing from several threads.

use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

use strandconsent::notify::{NotificationKind, Outbox};
use strandconsent::participant::{Directory, Participant, ParticipantRole};
use strandconsent::protocol::{Decision, HandshakeProtocol, InitiateOptions};
use strandconsent::session::{field_set, HandshakeStatus};
use strandconsent::store::SessionStore;
use strandconsent::{ConsentError, HandshakeConfig, ManualClock, Result};

const START: u64 = 1_700_000_000;
const THREADS: usize = 8;

struct Fixture {
    protocol: HandshakeProtocol,
    outbox: Arc<Outbox>,
    alice: Participant,
    bob: Participant,
}

fn fixture_with(config: HandshakeConfig) -> Fixture {
    let alice = Participant::new("did:example:alice", "Alice", ParticipantRole::Verifier);
    let bob = Participant::new("did:example:bob", "Bob", ParticipantRole::Individual);
    let directory: Directory = [alice.clone(), bob.clone()].into_iter().collect();
    let outbox = Arc::new(Outbox::new(256));
    let protocol = HandshakeProtocol::builder(Arc::new(directory), outbox.clone())
        .config(config)
        .clock(Arc::new(ManualClock::new(START)))
        .build()
        .unwrap();
    Fixture {
        protocol,
        outbox,
        alice,
        bob,
    }
}

fn open(f: &Fixture) -> String {
    f.protocol
        .initiate_handshake(
            &f.alice,
            &f.bob.identifier,
            field_set(["name", "email"]),
            "KYC check",
            InitiateOptions::default(),
        )
        .unwrap()
        .id
}

/// Run `op(i)` on `n` threads released together; results in thread order.
fn race<T, F>(n: usize, op: F) -> Vec<Result<T>>
where
    T: Send,
    F: Fn(usize) -> Result<T> + Sync,
{
    let barrier = Barrier::new(n);
    thread::scope(|scope| {
        let handles: Vec<_> = (0..n)
            .map(|i| {
                let barrier = &barrier;
                let op = &op;
                scope.spawn(move || {
                    barrier.wait();
                    op(i)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("worker panicked"))
            .collect()
    })
}

fn assert_losers_invalid_state<T: std::fmt::Debug>(results: &[Result<T>]) {
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(
            matches!(result, Err(ConsentError::InvalidState { .. })),
            "unexpected outcome {result:?}"
        );
    }
}

// ── Respond / cancel ─────────────────────────────────────────────────────

#[test]
fn respond_and_cancel_race_has_one_winner() {
    let f = fixture_with(HandshakeConfig::default());
    let id = open(&f);

    let results = race(THREADS, |i| {
        if i % 2 == 0 {
            f.protocol
                .respond_to_handshake(
                    &id,
                    &f.bob,
                    Decision::new(field_set(["name"]), field_set(["email"]))
                        .with_selective_disclosure(),
                )
                .map(|_| HandshakeStatus::Approved)
        } else {
            f.protocol
                .cancel_handshake(&id, Some("superseded"))
                .map(|_| HandshakeStatus::Rejected)
        }
    });

    let winners: Vec<HandshakeStatus> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    assert_eq!(winners.len(), 1, "outcomes: {results:?}");
    assert_losers_invalid_state(&results);

    let session = f.protocol.get_handshake_session(&id).unwrap().unwrap();
    assert_eq!(session.status, winners[0]);
    assert_eq!(session.request.status, winners[0]);
    match winners[0] {
        HandshakeStatus::Approved => {
            assert!(session.response.is_some());
            assert!(!session.metadata.contains_key("cancellationReason"));
        }
        _ => {
            assert!(session.response.is_none());
            assert_eq!(session.metadata["cancellationReason"], "superseded");
        }
    }

    // One request notice plus exactly one outcome notice.
    let kinds: Vec<NotificationKind> = f.outbox.drain().into_iter().map(|n| n.kind).collect();
    assert_eq!(kinds.len(), 2);
    assert_eq!(kinds[0], NotificationKind::Request);
}

#[test]
fn concurrent_responses_record_exactly_one() {
    let f = fixture_with(HandshakeConfig::default());
    let id = open(&f);

    let results = race(THREADS, |i| {
        let decision = if i % 2 == 0 {
            Decision::new(field_set(["name", "email"]), BTreeSet::new())
        } else {
            Decision::new(BTreeSet::new(), field_set(["name", "email"]))
        };
        f.protocol.respond_to_handshake(&id, &f.bob, decision)
    });

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert_losers_invalid_state(&results);

    let session = f.protocol.get_handshake_session(&id).unwrap().unwrap();
    let stored = session.response.expect("winning response stored");
    assert_eq!(stored.id, winners[0].id);
    assert_eq!(stored.approved_fields, winners[0].approved_fields);
}

// ── Rate limit ───────────────────────────────────────────────────────────

#[test]
fn concurrent_initiates_respect_rate_limit() {
    const LIMIT: u32 = 5;
    let f = fixture_with(HandshakeConfig::default().max_requests_per_hour(LIMIT));

    let results = race(THREADS * 2, |_| {
        f.protocol.initiate_handshake(
            &f.alice,
            &f.bob.identifier,
            field_set(["name"]),
            "KYC check",
            InitiateOptions::default(),
        )
    });

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, LIMIT as usize);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(
            matches!(result, Err(ConsentError::RateLimitExceeded { limit: LIMIT, .. })),
            "unexpected outcome {result:?}"
        );
    }
    assert_eq!(
        f.protocol.get_participant_sessions("did:example:alice").unwrap().len(),
        LIMIT as usize
    );
    assert_eq!(f.protocol.store().len().unwrap(), LIMIT as usize);
}
