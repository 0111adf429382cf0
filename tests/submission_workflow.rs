#![cfg(feature = "mock-bridge")]

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use quickpoll_client::bridge::{BridgeError, ContractCall};
use quickpoll_client::indexer::PollPage;
use quickpoll_client::types::PollId;
use quickpoll_client::workflow::{ActionKey, PollDraft, SubmissionPhase, SubmissionUpdate};
use quickpoll_client::ClientError;

mod fixtures;

use fixtures::{address, harness, yes_no_page, NEOX_T4, SEPOLIA};

const WAIT: Duration = Duration::from_secs(5);

async fn wait_for_submitted(
    updates: &mut broadcast::Receiver<SubmissionUpdate>,
    action: &ActionKey,
) {
    timeout(WAIT, async {
        loop {
            let update = updates.recv().await.expect("update channel open");
            if &update.action == action && matches!(update.phase, SubmissionPhase::Submitted { .. })
            {
                break;
            }
        }
    })
    .await
    .expect("submission reached Submitted");
}

#[tokio::test]
async fn create_poll_from_wrong_network_end_to_end() {
    let h = harness(vec![address(1)], SEPOLIA, PollPage::default());
    h.bridge.add_known_chain(NEOX_T4);

    let session = h.client.start().await;
    assert!(!session.is_connected());

    let session = h.client.connect().await.expect("connect");
    assert_eq!(session.address, Some(address(1)));
    assert_eq!(session.chain_id, Some(SEPOLIA));

    let mut updates = h.client.workflow().subscribe();
    let mut draft = PollDraft::new(
        "Pizza or tacos?",
        vec!["Pizza".to_string(), "Tacos".to_string()],
    );
    let report = h.client.create_poll(&mut draft).await.expect("create");

    let phases: Vec<&str> = report.history.iter().map(SubmissionPhase::name).collect();
    assert_eq!(
        phases,
        vec![
            "validating",
            "awaiting_wallet_confirmation",
            "submitted",
            "confirmed"
        ]
    );
    let mut published = Vec::new();
    while let Ok(update) = updates.try_recv() {
        assert_eq!(update.action, ActionKey::CreatePoll);
        published.push(update.phase);
    }
    assert_eq!(published, report.history);

    assert_eq!(draft, PollDraft::default());
    assert_eq!(h.bridge.current_chain(), NEOX_T4);
    assert_eq!(h.client.session().snapshot().chain_id, Some(NEOX_T4));
    match &h.bridge.sent_calls()[..] {
        [ContractCall::CreatePoll {
            poll_id,
            question,
            options,
        }] => {
            assert_eq!(poll_id, &report.poll_id);
            assert_eq!(question, "Pizza or tacos?");
            assert_eq!(options, &vec!["Pizza".to_string(), "Tacos".to_string()]);
        }
        other => panic!("unexpected calls: {other:?}"),
    }
    assert!(report.refresh_error.is_none());
    assert_eq!(h.indexer.fetch_count(), 2);

    h.client.shutdown().await;
}

#[tokio::test]
async fn second_vote_while_first_is_submitted_is_rejected_locally() {
    let h = harness(vec![address(1)], NEOX_T4, yes_no_page("p1"));
    h.client.start().await;
    h.client.connect().await.expect("connect");
    h.bridge.pause_receipts();

    let workflow = h.client.workflow().clone();
    let mut updates = workflow.subscribe();
    let p1 = PollId::new("p1");

    let first = tokio::spawn({
        let workflow = workflow.clone();
        let p1 = p1.clone();
        async move { workflow.vote(&p1, "Yes").await }
    });
    wait_for_submitted(&mut updates, &ActionKey::Vote(p1.clone())).await;

    let err = workflow.vote(&p1, "No").await.expect_err("busy");
    assert_eq!(
        err,
        ClientError::SubmissionInFlight {
            action: ActionKey::Vote(p1.clone())
        }
    );
    assert_eq!(h.bridge.call_count("send_transaction"), 1);

    // A different poll has its own slot.
    let p2 = PollId::new("p2");
    let other = tokio::spawn({
        let workflow = workflow.clone();
        let p2 = p2.clone();
        async move { workflow.vote(&p2, "Maybe").await }
    });
    wait_for_submitted(&mut updates, &ActionKey::Vote(p2)).await;
    assert_eq!(h.bridge.call_count("send_transaction"), 2);

    h.bridge.resume_receipts();
    let report = first.await.expect("join").expect("first vote");
    assert_eq!(report.vote, Some((p1.clone(), "Yes".to_string())));
    other.await.expect("join").expect("second poll vote");

    assert_eq!(h.client.cache().poll(&p1).expect("cached").votes, vec![4, 5]);
    assert!(!workflow.is_in_flight(&ActionKey::Vote(p1)));

    h.client.shutdown().await;
}

#[tokio::test]
async fn declined_network_switch_blocks_dispatch() {
    let h = harness(vec![address(1)], SEPOLIA, yes_no_page("p1"));
    h.client.start().await;
    h.client.connect().await.expect("connect");
    h.bridge
        .push_switch_response(Err(BridgeError::rejected("User rejected the request.")));

    let err = h
        .client
        .vote(&PollId::new("p1"), "Yes")
        .await
        .expect_err("mismatch");
    assert_eq!(
        err,
        ClientError::NetworkMismatch {
            expected: NEOX_T4,
            actual: Some(SEPOLIA)
        }
    );
    assert!(err.is_recoverable());
    assert_eq!(h.bridge.call_count("send_transaction"), 0);

    h.client.shutdown().await;
}

#[tokio::test]
async fn failed_refresh_after_create_still_confirms() {
    let h = harness(vec![address(1)], NEOX_T4, PollPage::default());
    h.client.start().await;
    h.client.connect().await.expect("connect");
    h.indexer
        .push_error(quickpoll_client::indexer::IndexerError::Status(503));

    let mut draft = PollDraft::from_comma_separated("Lunch?", "Pizza, Tacos");
    let report = h.client.create_poll(&mut draft).await.expect("confirmed");
    assert!(matches!(
        report.refresh_error,
        Some(ClientError::FetchFailed(_))
    ));
    assert_eq!(draft, PollDraft::default());

    h.client.shutdown().await;
}

#[tokio::test]
async fn rejected_create_keeps_draft_for_retry() {
    let h = harness(vec![address(1)], NEOX_T4, PollPage::default());
    h.client.start().await;
    h.client.connect().await.expect("connect");
    h.bridge
        .push_send_response(Err(BridgeError::rejected("User denied transaction signature")));

    let mut draft = PollDraft::new("Tabs or spaces?", vec!["Tabs".into(), "Spaces".into()]);
    let err = h.client.create_poll(&mut draft).await.expect_err("rejected");
    assert_eq!(err, ClientError::UserRejected);
    assert_eq!(draft.question(), "Tabs or spaces?");

    h.client.create_poll(&mut draft).await.expect("retry");
    assert_eq!(draft, PollDraft::default());

    h.client.shutdown().await;
}
