mod common;

use std::sync::Arc;

use common::*;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use custody_node::model::DepositStatus;
use custody_node::notify::DepositNotifier;
use custody_node::watcher::{DepositWatcher, WatchError, WatchStatus};

fn watcher(store: &custody_node::store::Store, chain: &Arc<MockChain>) -> DepositWatcher {
    DepositWatcher::new(
        store.clone(),
        test_config(),
        MockConnector::new(chain.clone()),
        DepositNotifier::disabled(),
    )
}

#[tokio::test]
async fn credits_new_transfer_with_token_decimals() {
    init_test_tracing();
    let (_dir, store) = temp_store();
    let chain = MockChain::new(1_000, 6);
    let a = issue(&store, "user-1", "usdt", "bsc");
    chain.push_log(USDT_BSC, transfer(&a, 12_345_678, 950, 1));

    let w = watcher(&store, &chain);
    let created = w.check_address(&a, 100).await.unwrap();

    assert_eq!(created.len(), 1);
    let rec = &created[0];
    assert_eq!(rec.amount, "12.345678");
    assert_eq!(rec.raw_amount, "12345678");
    assert_eq!(rec.status, DepositStatus::Completed);
    assert_eq!(rec.confirmations, 15);
    assert_eq!(rec.required_confirmations, 15);
    assert_eq!(rec.block_number, 950);
    assert!(rec.block_timestamp.is_some());
    assert_eq!(store.balance("user-1").unwrap(), 12_345_678_000_000_000_000u128);
    assert_eq!(store.deposits_for_user("user-1").unwrap().len(), 1);
    assert!(store.get_address(&a.id).unwrap().unwrap().last_used_at.is_some());
}

#[tokio::test]
async fn concurrent_checks_credit_once() {
    init_test_tracing();
    let (_dir, store) = temp_store();
    let chain = MockChain::new(1_000, 6);
    let a = issue(&store, "user-1", "usdt", "bsc");
    chain.push_log(USDT_BSC, transfer(&a, 5_000_000, 990, 7));

    let w = Arc::new(watcher(&store, &chain));
    let (w1, w2) = (w.clone(), w.clone());
    let (a1, a2) = (a.clone(), a.clone());
    let h1 = tokio::spawn(async move { w1.check_address(&a1, 100).await });
    let h2 = tokio::spawn(async move { w2.check_address(&a2, 100).await });
    let r1 = h1.await.unwrap().unwrap();
    let r2 = h2.await.unwrap().unwrap();

    assert_eq!(r1.len() + r2.len(), 1);
    assert_eq!(store.balance("user-1").unwrap(), 5_000_000_000_000_000_000u128);
    assert_eq!(store.deposits_for_user("user-1").unwrap().len(), 1);
}

#[tokio::test]
async fn repeated_check_is_a_no_op() {
    let (_dir, store) = temp_store();
    let chain = MockChain::new(1_000, 6);
    let a = issue(&store, "user-1", "usdt", "bsc");
    chain.push_log(USDT_BSC, transfer(&a, 2_000_000, 999, 3));

    let w = watcher(&store, &chain);
    assert_eq!(w.check_address(&a, 100).await.unwrap().len(), 1);
    assert!(w.check_address(&a, 100).await.unwrap().is_empty());
    assert_eq!(store.balance("user-1").unwrap(), 2_000_000_000_000_000_000u128);
}

#[tokio::test]
async fn cursor_drives_next_range_and_survives_failure() {
    let (_dir, store) = temp_store();
    let chain = MockChain::new(1_000, 6);
    let a = issue(&store, "user-1", "usdt", "bsc");
    let w = watcher(&store, &chain);

    w.check_address(&a, 100).await.unwrap();
    assert_eq!(store.scan_cursor(&a.id).unwrap(), Some(1_000));

    {
        let mut s = chain.state.lock();
        s.head = 1_010;
        s.fail_logs = true;
    }
    let err = w.check_address(&a, 100).await.unwrap_err();
    assert!(matches!(err, WatchError::Chain(_)));
    assert_eq!(store.scan_cursor(&a.id).unwrap(), Some(1_000));

    chain.state.lock().fail_logs = false;
    w.check_address(&a, 100).await.unwrap();
    assert_eq!(chain.log_queries(), vec![(900, 1_000), (1_001, 1_010)]);
    assert_eq!(store.scan_cursor(&a.id).unwrap(), Some(1_010));
}

#[tokio::test]
async fn first_scan_is_bounded_by_max_scan_blocks() {
    let (_dir, store) = temp_store();
    let chain = MockChain::new(10_000, 6);
    let a = issue(&store, "user-1", "usdt", "bsc");
    let w = watcher(&store, &chain);

    w.check_address(&a, 5_000).await.unwrap();
    assert_eq!(chain.log_queries(), vec![(5_000, 5_999)]);
    assert_eq!(store.scan_cursor(&a.id).unwrap(), Some(5_999));
}

#[tokio::test]
async fn below_minimum_is_recorded_failed_without_credit() {
    let (_dir, store) = temp_store();
    let chain = MockChain::new(1_000, 6);
    let a = issue(&store, "user-1", "usdt", "bsc");
    // 0.5 USDT against a 1.0 minimum
    chain.push_log(USDT_BSC, transfer(&a, 500_000, 990, 9));

    let w = watcher(&store, &chain);
    let created = w.check_address(&a, 100).await.unwrap();

    assert_eq!(created.len(), 1);
    assert_eq!(created[0].status, DepositStatus::Failed);
    assert_eq!(created[0].credited_units, 0);
    assert!(created[0].note.as_deref().unwrap().contains("minimum"));
    assert_eq!(store.balance("user-1").unwrap(), 0);
    assert!(store.get_address(&a.id).unwrap().unwrap().last_used_at.is_none());
}

#[tokio::test]
async fn decimals_fetched_only_when_something_is_new() {
    let (_dir, store) = temp_store();
    let chain = MockChain::new(1_000, 6);
    let a = issue(&store, "user-1", "usdt", "bsc");
    let w = watcher(&store, &chain);

    w.check_address(&a, 100).await.unwrap();
    assert_eq!(chain.state.lock().decimals_calls, 0);
}

#[tokio::test]
async fn unknown_network_is_skipped() {
    let (_dir, store) = temp_store();
    let chain = MockChain::new(1_000, 6);
    let a = issue(&store, "user-1", "usdt", "arbitrum");
    let w = watcher(&store, &chain);

    let err = w.check_address(&a, 100).await.unwrap_err();
    assert!(matches!(err, WatchError::UnknownNetwork { .. }));

    let outcomes = w.check_many(&[a.id.clone()]).await;
    assert_eq!(outcomes[0].status, WatchStatus::Skipped);
    assert_eq!(store.scan_cursor(&a.id).unwrap(), None);
}

#[tokio::test]
async fn native_network_returns_empty() {
    let (_dir, store) = temp_store();
    let chain = MockChain::new(1_000, 18);
    let a = issue(&store, "user-1", "eth", "ethereum");
    let w = watcher(&store, &chain);

    assert!(w.check_address(&a, 100).await.unwrap().is_empty());
    assert!(chain.log_queries().is_empty());
}

#[tokio::test]
async fn batch_reports_each_address() {
    let (_dir, store) = temp_store();
    let chain = MockChain::new(1_000, 6);
    let good = issue(&store, "user-1", "usdt", "bsc");
    let offline = issue(&store, "user-1", "usdt", "offline");
    chain.push_log(USDT_BSC, transfer(&good, 3_000_000, 995, 11));

    let w = watcher(&store, &chain);
    let outcomes = w
        .check_many(&[good.id.clone(), "missing".to_string(), offline.id.clone()])
        .await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].status, WatchStatus::Checked);
    assert_eq!(outcomes[0].deposits.len(), 1);
    assert_eq!(outcomes[1].status, WatchStatus::Error);
    assert_eq!(outcomes[1].message, "custodial address not found");
    assert_eq!(outcomes[2].status, WatchStatus::Skipped);
    assert!(outcomes[2].message.contains("missing rpc url"));

    let by_user = w.check_user("user-1").await.unwrap();
    assert_eq!(by_user.len(), 2);
}

#[tokio::test]
async fn explicit_success_unparks_address() {
    let (_dir, store) = temp_store();
    let chain = MockChain::new(1_000, 6);
    let a = issue(&store, "user-1", "usdt", "bsc");
    let w = watcher(&store, &chain);

    let now = std::time::Instant::now();
    for _ in 0..5 {
        w.backoff().record_failure(&a.id, now);
    }
    assert!(w.backoff().is_parked(&a.id));

    let outcomes = w.check_many(&[a.id.clone()]).await;
    assert_eq!(outcomes[0].status, WatchStatus::Checked);
    assert!(!w.backoff().is_parked(&a.id));
}

#[tokio::test]
async fn poll_round_backs_off_failing_addresses() {
    let (_dir, store) = temp_store();
    let chain = MockChain::new(1_000, 6);
    let good = issue(&store, "user-1", "usdt", "bsc");
    let offline = issue(&store, "user-1", "usdt", "offline");
    let native = issue(&store, "user-1", "eth", "ethereum");
    let w = watcher(&store, &chain);

    custody_node::poller::poll_once(&w).await;

    assert_eq!(store.scan_cursor(&good.id).unwrap(), Some(1_000));
    assert_eq!(w.backoff().fail_count(&offline.id), 1);
    assert!(!w.backoff().is_due(&offline.id, std::time::Instant::now()));
    assert_eq!(w.backoff().fail_count(&native.id), 0);

    // not due yet, so a second round leaves the count alone
    custody_node::poller::poll_once(&w).await;
    assert_eq!(w.backoff().fail_count(&offline.id), 1);
}

/// Accepts webhook POSTs on a local port and keeps each request body
async fn webhook_sink() -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/hooks/deposit", listener.local_addr().unwrap());
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let sink = bodies.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let body = loop {
                let n = socket.read(&mut chunk).await.unwrap_or(0);
                if n == 0 {
                    break None;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                let Some(split) = text.find("\r\n\r\n") else {
                    continue;
                };
                let length = text[..split]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= split + 4 + length {
                    break Some(text[split + 4..].to_string());
                }
            };
            if let Some(body) = body {
                sink.lock().push(body);
            }
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await;
        }
    });
    (url, bodies)
}

#[tokio::test]
async fn credited_deposit_is_posted_to_webhook() {
    let (_dir, store) = temp_store();
    let chain = MockChain::new(1_000, 6);
    let a = issue(&store, "user-1", "usdt", "bsc");
    chain.push_log(USDT_BSC, transfer(&a, 4_000_000, 990, 21));
    // below the 1.0 minimum, recorded failed and never announced
    chain.push_log(USDT_BSC, transfer(&a, 100_000, 991, 22));

    let (url, bodies) = webhook_sink().await;
    let w = DepositWatcher::new(
        store.clone(),
        test_config(),
        MockConnector::new(chain.clone()),
        DepositNotifier::new(Some(url)),
    );
    let created = w.check_address(&a, 100).await.unwrap();
    assert_eq!(created.len(), 2);
    w.notifier().drain().await;

    let bodies = bodies.lock().clone();
    assert_eq!(bodies.len(), 1);
    let event: serde_json::Value = serde_json::from_str(&bodies[0]).unwrap();
    assert_eq!(event["event"], "deposit.credited");
    assert_eq!(event["deposit"]["amount"], "4");
    assert_eq!(event["deposit"]["user_id"], "user-1");
    assert_eq!(
        event["deposit"]["tx_hash"],
        format!("0x{:064x}", 21)
    );
}

#[tokio::test]
async fn credit_stands_when_address_metadata_cannot_be_updated() {
    let (_dir, store) = temp_store();
    // issued elsewhere, so this store has no row to refresh
    let (_other_dir, other) = temp_store();
    let a = issue(&other, "user-1", "usdt", "bsc");
    let chain = MockChain::new(1_000, 6);
    chain.push_log(USDT_BSC, transfer(&a, 3_000_000, 990, 31));

    let w = watcher(&store, &chain);
    let created = w.check_address(&a, 100).await.unwrap();

    assert_eq!(created.len(), 1);
    assert_eq!(store.balance("user-1").unwrap(), 3_000_000_000_000_000_000u128);
    assert_eq!(store.scan_cursor(&a.id).unwrap(), Some(1_000));
}
