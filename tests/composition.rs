// Composition tests — the full reload path wired together.
//
// These tests exercise the data flow between modules:
//   Term Store -> Dictionary Cache -> Reload Coordinator -> Filter
// using a SQLite file in a temp directory, the in-process broker, and a
// backing dictionary file written by the cache itself.

use std::sync::Arc;
use std::time::Duration;

use muzzle::db::models::{NewTerm, TermUpdate};
use muzzle::db::TermStore;
use muzzle::dictionary::{DictionaryCache, DictionaryOptions, Filterer};
use muzzle::pubsub::{Broker, ListenerState, MemoryBroker};
use muzzle::reload::{publish_reload, ReloadCoordinator, ReloadPolicy, ReloadSettings};
use tokio_util::sync::CancellationToken;

struct Service {
    _dir: tempfile::TempDir,
    store: Arc<dyn TermStore>,
    broker: MemoryBroker,
    cache: Arc<DictionaryCache>,
    coordinator: Arc<ReloadCoordinator>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl Service {
    async fn start(values: &[&str], policy: ReloadPolicy) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("muzzle.db");
        let store = muzzle::db::initialize_sqlite(db_path.to_str().unwrap()).unwrap();
        for value in values {
            store.insert_term(&NewTerm::new(*value)).await.unwrap();
        }

        let options = DictionaryOptions::new(dir.path().join("dict").join("userdict.txt"));
        let cache = Arc::new(DictionaryCache::from_store(options, store.as_ref()).await.unwrap());
        let broker = MemoryBroker::new();
        let settings = ReloadSettings {
            policy,
            keepalive: Duration::from_millis(200),
            resubscribe_delay: Some(Duration::from_millis(20)),
            ..ReloadSettings::default()
        };
        let coordinator = Arc::new(ReloadCoordinator::new(
            cache.clone(),
            store.clone(),
            Arc::new(broker.clone()),
            settings,
        ));

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            async move { coordinator.run(cancel).await }
        });
        coordinator
            .watch_listener()
            .wait_for(|s| *s == ListenerState::Active)
            .await
            .unwrap();

        Self {
            _dir: dir,
            store,
            broker,
            cache,
            coordinator,
            cancel,
            task,
        }
    }

    /// Publish "up" and wait until the coordinator has processed it.
    async fn reload(&self) {
        let before = self.coordinator.status().read().await.reload_count;
        let receivers = publish_reload(&self.broker, "dictionary_up", "up").await.unwrap();
        assert_eq!(receivers, 1);

        let status = self.coordinator.status();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if status.read().await.reload_count > before {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("reload was not processed");
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.task.await.unwrap().unwrap();
        assert_eq!(self.coordinator.listener_state(), ListenerState::Terminated);
    }
}

// ============================================================
// Store edit -> publish -> reload -> filter
// ============================================================

#[tokio::test]
async fn added_term_is_masked_after_reload() {
    let service = Service::start(&["spam"], ReloadPolicy::Persistent).await;
    assert_eq!(service.cache.filter("buy spam now"), "buy **** now");

    service.store.insert_term(&NewTerm::new("now")).await.unwrap();
    // Not visible until the reload command arrives
    assert_eq!(service.cache.filter("buy spam now"), "buy **** now");

    service.reload().await;
    assert_eq!(service.cache.filter("buy spam now"), "buy **** ***");
    service.stop().await;
}

#[tokio::test]
async fn deleted_term_is_unmasked_and_leaves_the_file() {
    let service = Service::start(&["spam", "scam"], ReloadPolicy::Persistent).await;
    let term = service
        .store
        .get_term_by_fingerprint(&muzzle::dictionary::fingerprint::fingerprint("scam"))
        .await
        .unwrap()
        .unwrap();
    service.store.delete_term(&term.id).await.unwrap();

    service.reload().await;
    assert_eq!(service.cache.filter("spam scam"), "**** scam");

    let file = std::fs::read_to_string(&service.cache.options().user_dict_path).unwrap();
    assert_eq!(file, "spam 100000\n");
    service.stop().await;
}

#[tokio::test]
async fn renamed_term_swaps_masks() {
    let service = Service::start(&["spam"], ReloadPolicy::Persistent).await;
    let (_, terms) = service
        .store
        .find_terms(&Default::default())
        .await
        .unwrap();
    service
        .store
        .update_term(
            &terms[0].id,
            &TermUpdate {
                value: Some("垃圾".to_string()),
                ..TermUpdate::default()
            },
        )
        .await
        .unwrap();

    service.reload().await;
    assert_eq!(service.cache.filter("spam 垃圾"), "spam **");
    service.stop().await;
}

#[tokio::test]
async fn filterer_trait_object_sees_reloads() {
    let service = Service::start(&[], ReloadPolicy::Persistent).await;
    let filterer: Arc<dyn Filterer> = service.cache.clone();
    assert_eq!(filterer.filter("spam"), "spam");

    service.store.insert_term(&NewTerm::new("spam")).await.unwrap();
    service.reload().await;
    assert_eq!(filterer.filter("spam"), "****");
    service.stop().await;
}

#[tokio::test]
async fn one_shot_service_stops_listening() {
    let service = Service::start(&["spam"], ReloadPolicy::OneShot).await;
    service.store.insert_term(&NewTerm::new("now")).await.unwrap();
    service.reload().await;

    // The coordinator finishes on its own; cancelling afterwards is harmless
    let status = service.coordinator.status();
    tokio::time::timeout(Duration::from_secs(5), async {
        while service.broker.connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("one-shot listener kept its connection");
    assert_eq!(
        service.broker.publish("dictionary_up", "up").await.unwrap(),
        0
    );
    assert_eq!(status.read().await.reload_count, 1);
    assert_eq!(service.cache.filter("spam now"), "**** ***");
    service.stop().await;
}

// ============================================================
// Filtering under concurrent reloads
// ============================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn filters_during_reloads_see_whole_snapshots() {
    let service = Service::start(&["spam"], ReloadPolicy::Persistent).await;
    service.store.insert_term(&NewTerm::new("now")).await.unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cache = service.cache.clone();
            tokio::task::spawn_blocking(move || {
                for _ in 0..5_000 {
                    let out = cache.filter("buy spam now");
                    assert!(
                        out == "buy **** now" || out == "buy **** ***",
                        "unexpected output {out:?}"
                    );
                }
            })
        })
        .collect();

    for _ in 0..5 {
        service.reload().await;
    }
    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(service.cache.filter("buy spam now"), "buy **** ***");
    service.stop().await;
}
