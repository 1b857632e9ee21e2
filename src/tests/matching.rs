use super::support::{self, anchor, at_similarity, bet, FakeProvider};
use crate::bets::Bet;
use crate::matching::{
    pair_key, LinkOutcome, MatchParams, MatchReport, Matcher, CONFLICT_REASON, QUEUE_REASON,
};
use crate::semantic::Embedder;
use crate::store::{CandidateStatus, EventAlias, EventGraph, SqliteStore};
use crate::sync::Reconciler;

fn sources(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn params(high: f64, low: f64) -> MatchParams {
    MatchParams {
        high,
        low,
        max_pairs_per_candidate: 2000,
    }
}

fn seed(store: &std::sync::Arc<SqliteStore>, bets: &[Bet]) {
    let reconciler = Reconciler::new(store.clone());
    for b in bets {
        reconciler.upsert(b).unwrap();
    }
}

fn matcher<'a>(store: &std::sync::Arc<SqliteStore>, embedder: &'a Embedder) -> Matcher<'a> {
    Matcher::new(store.clone(), store.clone(), embedder)
}

#[test]
fn test_auto_link_creates_one_event() {
    let (store, clock) = support::store();
    let provider = FakeProvider::new();
    let a = bet("x", "1", "Will BTC hit 100k in 2025?", None);
    let b = bet("y", "b-7", "Bitcoin above $100k by end of 2025", None);
    provider.set(a.text_for_embedding(), anchor());
    provider.set(b.text_for_embedding(), at_similarity(0.92));
    seed(&store, &[a.clone(), b.clone()]);
    let embedder = support::embedder(&store, &provider, &clock);
    let matcher = matcher(&store, &embedder);

    let report = matcher
        .propose_and_link(&sources(&["x", "y"]), &params(0.9, 0.83))
        .unwrap();
    assert_eq!(report.auto_links, 1);
    assert_eq!(report.queued, 0);

    let events = store.events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].alias_count, 2);
    assert_eq!(events[0].event.title.as_deref(), Some("Will BTC hit 100k in 2025?"));

    let event = store.event_for_bet("x", "1").unwrap().unwrap();
    assert_eq!(store.event_for_bet("y", "b-7").unwrap(), Some(event.clone()));
    let aliases = store.aliases(&event).unwrap();
    assert!(aliases.iter().all(|al| al.method == "auto-sim"));
    let sim = aliases[0].similarity.unwrap();
    assert!((sim - 0.92).abs() < 1e-6);

    // second run is a no-op
    let again = matcher
        .propose_and_link(&sources(&["x", "y"]), &params(0.9, 0.83))
        .unwrap();
    assert_eq!(again, MatchReport::default());
    assert_eq!(store.events().unwrap().len(), 1);
}

#[test]
fn test_mid_similarity_is_queued_once() {
    let (store, clock) = support::store();
    let provider = FakeProvider::new();
    let a = bet("x", "1", "Fed cuts rates in March?", None);
    let b = bet("y", "2", "March FOMC rate decision", None);
    provider.set(a.text_for_embedding(), anchor());
    provider.set(b.text_for_embedding(), at_similarity(0.85));
    seed(&store, &[a.clone(), b.clone()]);
    let embedder = support::embedder(&store, &provider, &clock);
    let matcher = matcher(&store, &embedder);

    let report = matcher
        .propose_and_link(&sources(&["x", "y"]), &params(0.9, 0.83))
        .unwrap();
    assert_eq!(report.auto_links, 0);
    assert_eq!(report.queued, 1);

    let candidates = store.candidates(None).unwrap();
    assert_eq!(candidates.len(), 1);
    let c = &candidates[0];
    assert_eq!(c.pair_key, pair_key(a.key(), b.key()));
    assert_eq!(c.status, CandidateStatus::Pending);
    assert_eq!(c.reason, QUEUE_REASON);
    assert_eq!((c.a_source.as_str(), c.b_source.as_str()), ("x", "y"));

    let again = matcher
        .propose_and_link(&sources(&["x", "y"]), &params(0.9, 0.83))
        .unwrap();
    assert_eq!(again.queued, 0);
    assert_eq!(store.candidates(None).unwrap().len(), 1);
    assert!(store.events().unwrap().is_empty());
}

#[test]
fn test_low_similarity_is_discarded() {
    let (store, clock) = support::store();
    let provider = FakeProvider::new();
    let a = bet("x", "1", "Rain in Paris?", None);
    let b = bet("y", "2", "Oscars best picture", None);
    provider.set(a.text_for_embedding(), anchor());
    provider.set(b.text_for_embedding(), at_similarity(0.4));
    seed(&store, &[a, b]);
    let embedder = support::embedder(&store, &provider, &clock);

    let report = matcher(&store, &embedder)
        .propose_and_link(&sources(&["x", "y"]), &params(0.9, 0.83))
        .unwrap();

    // compared once from each side
    assert_eq!(report.compared, 2);
    assert_eq!(report.auto_links + report.queued + report.conflicts, 0);
    assert!(store.candidates(None).unwrap().is_empty());
}

#[test]
fn test_vectors_resolved_in_one_batch_and_empty_text_skipped() {
    let (store, clock) = support::store();
    let provider = FakeProvider::new();
    let a = bet("x", "1", "Question A", None);
    let blank = bet("x", "2", "  ", Some(" "));
    let b = bet("y", "3", "Question B", None);
    seed(&store, &[a, blank, b]);
    let embedder = support::embedder(&store, &provider, &clock);

    let report = matcher(&store, &embedder)
        .propose_and_link(&sources(&["x", "y"]), &params(0.9, 0.83))
        .unwrap();

    assert_eq!(provider.calls().len(), 1);
    let mut sent = provider.embedded_texts();
    sent.sort();
    assert_eq!(sent, vec!["Question A".to_string(), "Question B".to_string()]);
    assert_eq!(report.compared, 2);
}

#[test]
fn test_single_source_compares_nothing() {
    let (store, clock) = support::store();
    let provider = FakeProvider::new();
    seed(&store, &[bet("x", "1", "A", None), bet("x", "2", "A", None)]);
    let embedder = support::embedder(&store, &provider, &clock);

    let report = matcher(&store, &embedder)
        .propose_and_link(&sources(&["x", "x"]), &params(0.9, 0.83))
        .unwrap();
    assert_eq!(report, MatchReport::default());
}

#[test]
fn test_comparisons_capped_per_bet_and_source() {
    let (store, clock) = support::store();
    let provider = FakeProvider::new();
    let a = bet("x", "1", "anchor", None);
    provider.set(a.text_for_embedding(), anchor());
    let mut bets = vec![a];
    for i in 0..3 {
        let b = bet("y", &i.to_string(), &format!("candidate {i}"), None);
        provider.set(b.text_for_embedding(), at_similarity(0.85));
        bets.push(b);
    }
    seed(&store, &bets);
    let embedder = support::embedder(&store, &provider, &clock);

    let capped = MatchParams {
        max_pairs_per_candidate: 2,
        ..params(0.9, 0.83)
    };
    let report = matcher(&store, &embedder)
        .propose_and_link(&sources(&["x", "y"]), &capped)
        .unwrap();

    // x:1 stops after two y bets; each y bet has a single x bet to compare with
    assert_eq!(report.compared, 2 + 3);
    assert_eq!(report.queued, 3);
}

#[test]
fn test_linked_side_pulls_in_the_other() {
    let (store, clock) = support::store();
    let provider = FakeProvider::new();
    let a = bet("x", "1", "A", None);
    let b = bet("y", "2", "B", None);
    seed(&store, &[a.clone(), b.clone()]);
    let embedder = support::embedder(&store, &provider, &clock);
    let matcher = matcher(&store, &embedder);

    let event = store.create_event(Some("existing")).unwrap();
    store
        .link_bet(&EventAlias {
            event_id: event.clone(),
            source: "y".to_string(),
            market_id: "2".to_string(),
            content_hash: b.content_hash().to_string(),
            similarity: None,
            confidence: Some(1.0),
            method: "manual".to_string(),
        })
        .unwrap();

    assert_eq!(
        matcher.link_pair(&a, &b, 0.95).unwrap(),
        LinkOutcome::Joined(event.clone())
    );
    assert_eq!(store.event_for_bet("x", "1").unwrap(), Some(event.clone()));
    assert_eq!(
        matcher.link_pair(&a, &b, 0.95).unwrap(),
        LinkOutcome::AlreadyLinked(event)
    );
    assert_eq!(store.events().unwrap().len(), 1);
}

#[test]
fn test_conflicting_events_are_not_merged() {
    let (store, clock) = support::store();
    let provider = FakeProvider::new();
    let a = bet("x", "1", "A", None);
    let b = bet("y", "2", "B", None);
    seed(&store, &[a.clone(), b.clone()]);
    let embedder = support::embedder(&store, &provider, &clock);
    let matcher = matcher(&store, &embedder);

    let first = matcher.link_pair(&a, &bet("z", "9", "C", None), 0.95).unwrap();
    let LinkOutcome::Created(a_event) = first else {
        panic!("expected a new event");
    };
    let second = matcher.link_pair(&b, &bet("z", "8", "D", None), 0.95).unwrap();
    let LinkOutcome::Created(b_event) = second else {
        panic!("expected a new event");
    };

    let outcome = matcher.link_pair(&a, &b, 0.97).unwrap();
    assert_eq!(
        outcome,
        LinkOutcome::Conflict {
            a_event: a_event.clone(),
            b_event: b_event.clone()
        }
    );
    assert_eq!(store.event_for_bet("x", "1").unwrap(), Some(a_event));
    assert_eq!(store.event_for_bet("y", "2").unwrap(), Some(b_event));

    matcher.link_pair(&b, &a, 0.97).unwrap();
    let conflicts = store.candidates(Some(CandidateStatus::Conflict)).unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].reason, CONFLICT_REASON);
    assert!(store.candidates(Some(CandidateStatus::Pending)).unwrap().is_empty());
}

#[test]
fn test_event_title_falls_back_to_other_side() {
    let (store, clock) = support::store();
    let provider = FakeProvider::new();
    let a = bet("x", "1", " ", Some("Only resolution rules"));
    let b = bet("y", "2", "Readable title", None);
    let embedder = support::embedder(&store, &provider, &clock);

    let LinkOutcome::Created(event) = matcher(&store, &embedder).link_pair(&a, &b, 0.99).unwrap()
    else {
        panic!("expected a new event");
    };
    let events = store.events().unwrap();
    assert_eq!(events[0].event.id, event);
    assert_eq!(events[0].event.title.as_deref(), Some("Readable title"));
}

#[test]
fn test_rank_similar_orders_other_sources() {
    let (store, clock) = support::store();
    let provider = FakeProvider::new();
    let target = bet("x", "1", "target", None);
    let close = bet("y", "close", "close", None);
    let far = bet("y", "far", "far", None);
    let closest = bet("z", "closest", "closest", None);
    let sibling = bet("x", "2", "sibling", None);
    provider.set(target.text_for_embedding(), anchor());
    provider.set(close.text_for_embedding(), at_similarity(0.9));
    provider.set(far.text_for_embedding(), at_similarity(0.2));
    provider.set(closest.text_for_embedding(), at_similarity(0.99));
    provider.set(sibling.text_for_embedding(), anchor());
    seed(&store, &[target, close, far, closest, sibling]);
    let embedder = support::embedder(&store, &provider, &clock);

    let ranked = matcher(&store, &embedder)
        .rank_similar("x", "1", &sources(&["x", "y", "z"]), 2)
        .unwrap();

    let ids: Vec<&str> = ranked.iter().map(|r| r.bet.bet.market_id()).collect();
    assert_eq!(ids, vec!["closest", "close"]);
    assert!(ranked[0].score > ranked[1].score);

    assert!(matcher(&store, &embedder)
        .rank_similar("x", "missing", &sources(&["y"]), 5)
        .is_err());
}
