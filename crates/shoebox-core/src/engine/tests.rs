use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tempfile::{tempdir, TempDir};
use tokio::sync::{broadcast, Notify, Semaphore};

use super::*;
use crate::assets::FsAssetStore;
use crate::connectivity::{ConnectivityMonitor, Reachability};
use crate::db::LibSqlRecordStore;
use crate::storage::{MemoryObjectStore, RemoteError};

/// Object store that counts calls, fails on demand and can hold uploads.
#[derive(Default)]
struct ScriptedObjectStore {
    bucket: MemoryObjectStore,
    uploads: AtomicUsize,
    deletes: AtomicUsize,
    lists: AtomicUsize,
    upload_failures: Mutex<VecDeque<RemoteError>>,
    delete_failures: Mutex<VecDeque<RemoteError>>,
    list_failures: Mutex<VecDeque<RemoteError>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    upload_started: Notify,
}

impl ScriptedObjectStore {
    fn fail_next_upload(&self, error: RemoteError) {
        self.upload_failures.lock().unwrap().push_back(error);
    }

    fn fail_next_delete(&self, error: RemoteError) {
        self.delete_failures.lock().unwrap().push_back(error);
    }

    fn fail_next_list(&self, error: RemoteError) {
        self.list_failures.lock().unwrap().push_back(error);
    }

    /// Block uploads until permits are added to the returned semaphore.
    fn hold_uploads(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    fn open_gate(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for ScriptedObjectStore {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> std::result::Result<String, RemoteError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.upload_started.notify_one();

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let failure = self.upload_failures.lock().unwrap().pop_front();
        match failure {
            Some(error) => Err(error),
            None => self.bucket.upload(key, bytes).await,
        }
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), RemoteError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let failure = self.delete_failures.lock().unwrap().pop_front();
        match failure {
            Some(error) => Err(error),
            None => self.bucket.delete(key).await,
        }
    }

    async fn list(&self) -> std::result::Result<Vec<String>, RemoteError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let failure = self.list_failures.lock().unwrap().pop_front();
        match failure {
            Some(error) => Err(error),
            None => self.bucket.list().await,
        }
    }
}

/// Record store that keeps every saved snapshot and can refuse writes.
struct RecordingStore {
    inner: LibSqlRecordStore,
    saved: Mutex<Vec<GallerySnapshot>>,
    fail_saves: AtomicBool,
}

impl RecordingStore {
    fn saved(&self) -> Vec<GallerySnapshot> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn load(&self) -> Result<GallerySnapshot> {
        self.inner.load().await
    }

    async fn save(&self, snapshot: &GallerySnapshot) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::StorageFull("database or disk is full".to_string()));
        }
        self.inner.save(snapshot).await?;
        self.saved.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}

struct Harness {
    engine: SyncEngine,
    remote: Arc<ScriptedObjectStore>,
    store: Arc<RecordingStore>,
    tmp: TempDir,
}

impl Harness {
    async fn open(connected: bool) -> Self {
        Self::open_in(
            tempdir().unwrap(),
            Arc::new(ScriptedObjectStore::default()),
            connected,
        )
        .await
    }

    async fn open_in(tmp: TempDir, remote: Arc<ScriptedObjectStore>, connected: bool) -> Self {
        let store = Arc::new(RecordingStore {
            inner: LibSqlRecordStore::open(tmp.path().join("gallery.db"))
                .await
                .unwrap(),
            saved: Mutex::new(Vec::new()),
            fail_saves: AtomicBool::new(false),
        });
        let deps = EngineDeps {
            record_store: store.clone(),
            asset_store: Arc::new(FsAssetStore::new(tmp.path().join("assets"))),
            object_store: remote.clone(),
        };
        let engine = SyncEngine::open(deps, connected).await.unwrap();
        Self {
            engine,
            remote,
            store,
            tmp,
        }
    }

    /// Drop the engine and start a new one over the same disk and bucket.
    async fn restart(self, connected: bool) -> Self {
        let Self {
            engine,
            remote,
            store,
            tmp,
        } = self;
        drop(engine);
        drop(store);
        Self::open_in(tmp, remote, connected).await
    }

    /// Simulate the image picker handing over a file.
    fn pick(&self, name: &str) -> PathBuf {
        let dir = self.tmp.path().join("picker");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, format!("bytes of {name}")).unwrap();
        path
    }

    async fn reconnect(&self) {
        self.engine.on_connectivity_changed(false).await;
        self.engine.on_connectivity_changed(true).await;
    }
}

fn drain_events(receiver: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

fn uploaded_keys(snapshot: &GallerySnapshot) -> BTreeSet<String> {
    snapshot
        .records
        .iter()
        .filter(|record| record.status == ImageStatus::Uploaded)
        .filter_map(|record| record.remote_key.clone())
        .collect()
}

fn bucket_keys(remote: &ScriptedObjectStore) -> BTreeSet<String> {
    remote.bucket.keys().into_iter().collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn connected_add_uploads_image() {
    let h = Harness::open(true).await;

    let ids = h.engine.add_images(vec![h.pick("cat.jpg")]).await;

    let records = h.engine.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, ids[0]);
    assert_eq!(records[0].status, ImageStatus::Uploaded);
    assert_eq!(records[0].remote_key, Some(ids[0].object_key(".jpg")));
    assert!(records[0].uploaded_at.is_some());
    assert_eq!(h.remote.bucket.len(), 1);
    assert!(h.engine.snapshot().queues.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_add_uploads_after_reconnect() {
    let h = Harness::open(false).await;

    let ids = h.engine.add_images(vec![h.pick("dog.png")]).await;

    let records = h.engine.records();
    assert_eq!(records[0].status, ImageStatus::Pending);
    assert!(records[0].local_path.as_ref().unwrap().exists());
    assert!(h.remote.bucket.is_empty());
    assert_eq!(h.remote.uploads(), 0);

    h.engine.on_connectivity_changed(true).await;

    let records = h.engine.records();
    assert_eq!(records[0].status, ImageStatus::Uploaded);
    assert_eq!(h.remote.bucket.keys(), vec![ids[0].object_key(".png")]);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_during_slow_upload_leaves_nothing_behind() {
    for failure in [
        None,
        Some(RemoteError::Server("HTTP 500".to_string())),
        Some(RemoteError::Network("timed out".to_string())),
    ] {
        let h = Harness::open(true).await;
        let mut events = h.engine.subscribe_events();
        let gate = h.remote.hold_uploads();
        if let Some(error) = failure.clone() {
            h.remote.fail_next_upload(error);
        }

        let engine = h.engine.clone();
        let source = h.pick("slow.jpg");
        let adding = tokio::spawn(async move { engine.add_images(vec![source]).await });
        h.remote.upload_started.notified().await;

        let id = h.engine.snapshot().records[0].id.clone();
        h.engine.remove_image(&id).await.unwrap();
        assert!(h.engine.records().is_empty());

        gate.add_permits(1);
        adding.await.unwrap();

        let snapshot = h.engine.snapshot();
        assert!(snapshot.records.is_empty(), "failure: {failure:?}");
        assert!(snapshot.queues.is_empty(), "failure: {failure:?}");
        assert!(h.remote.bucket.is_empty(), "failure: {failure:?}");
        assert!(!drain_events(&mut events)
            .iter()
            .any(|event| matches!(event, SyncEvent::Uploaded { .. })));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_that_landed_during_removal_is_deleted_remotely() {
    let h = Harness::open(true).await;
    let gate = h.remote.hold_uploads();

    let engine = h.engine.clone();
    let source = h.pick("race.jpg");
    let adding = tokio::spawn(async move { engine.add_images(vec![source]).await });
    h.remote.upload_started.notified().await;

    let id = h.engine.snapshot().records[0].id.clone();
    h.engine.remove_image(&id).await.unwrap();

    // Removal finished locally while the request is still on the wire.
    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.records[0].status, ImageStatus::DeletionQueued);
    assert!(snapshot.queues.is_empty());

    gate.add_permits(1);
    adding.await.unwrap();

    assert_eq!(h.remote.uploads(), 1);
    assert_eq!(h.remote.deletes(), 1);
    assert!(h.remote.bucket.is_empty());
    assert!(h.engine.snapshot().records.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn retried_upload_after_crash_reuses_remote_object() {
    let h = Harness::open(true).await;
    let ids = h.engine.add_images(vec![h.pick("crash.jpg")]).await;
    let key = ids[0].object_key(".jpg");

    // The upload landed but the process died before `Uploaded` was saved.
    let mut snapshot = h.engine.snapshot();
    snapshot.records[0].mark_uploading();
    h.store.inner.save(&snapshot).await.unwrap();

    let h = h.restart(true).await;
    assert_eq!(h.engine.records()[0].status, ImageStatus::Pending);
    h.engine.resume().await;

    let records = h.engine.records();
    assert_eq!(records[0].status, ImageStatus::Uploaded);
    assert_eq!(records[0].remote_key.as_deref(), Some(key.as_str()));
    assert_eq!(h.remote.uploads(), 1);
    assert_eq!(h.remote.bucket.keys(), vec![key]);
}

#[tokio::test(flavor = "multi_thread")]
async fn retried_upload_without_precheck_resolves_conflict() {
    let h = Harness::open(true).await;
    let ids = h.engine.add_images(vec![h.pick("again.jpg")]).await;

    let mut snapshot = h.engine.snapshot();
    snapshot.records[0].mark_uploading();
    h.store.inner.save(&snapshot).await.unwrap();

    let h = h.restart(true).await;
    h.remote
        .fail_next_list(RemoteError::Server("HTTP 503".to_string()));
    h.engine.resume().await;

    let records = h.engine.records();
    assert_eq!(records[0].status, ImageStatus::Uploaded);
    assert_eq!(records[0].remote_key, Some(ids[0].object_key(".jpg")));
    assert_eq!(h.remote.uploads(), 2);
    assert_eq!(h.remote.bucket.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_objects_match_uploaded_records_after_any_sequence() {
    let h = Harness::open(true).await;
    let mut seed: u64 = 0x5eed_cafe;
    let mut next = move || {
        seed = seed
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        usize::try_from(seed >> 33).unwrap()
    };

    for step in 0..48 {
        match next() % 5 {
            0 | 1 => {
                h.engine
                    .add_images(vec![h.pick(&format!("img-{step}.jpg"))])
                    .await;
            }
            2 | 3 => {
                let visible = h.engine.records();
                if !visible.is_empty() {
                    let victim = visible[next() % visible.len()].id.clone();
                    h.engine.remove_image(&victim).await.unwrap();
                }
            }
            _ => {
                let connected = h.engine.is_connected();
                h.engine.on_connectivity_changed(!connected).await;
            }
        }
    }
    if !h.engine.is_connected() {
        h.engine.on_connectivity_changed(true).await;
    }

    let snapshot = h.engine.snapshot();
    assert!(snapshot.queues.is_empty());
    assert!(snapshot
        .records
        .iter()
        .all(|record| record.status == ImageStatus::Uploaded));
    assert_eq!(bucket_keys(&h.remote), uploaded_keys(&snapshot));

    for saved in h.store.saved() {
        assert_eq!(saved.violations(), Vec::<String>::new());
        let mut restarted = saved.clone();
        restarted.normalize();
        assert_eq!(restarted.violations(), Vec::<String>::new());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn crash_mid_upload_recovers_on_restart() {
    let h = Harness::open(true).await;
    h.remote.hold_uploads();

    let engine = h.engine.clone();
    let source = h.pick("interrupted.jpg");
    let adding = tokio::spawn(async move { engine.add_images(vec![source]).await });
    h.remote.upload_started.notified().await;
    adding.abort();
    adding.await.unwrap_err();

    let last = h.store.saved().pop().unwrap();
    assert_eq!(last.records[0].status, ImageStatus::Uploading);

    h.remote.open_gate();
    let h = h.restart(true).await;
    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.records[0].status, ImageStatus::Pending);
    assert_eq!(snapshot.queues.upload.len(), 1);
    assert!(snapshot.violations().is_empty());

    h.engine.resume().await;
    assert_eq!(h.engine.records()[0].status, ImageStatus::Uploaded);
    assert_eq!(h.remote.bucket.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_delete_of_uploaded_image_finishes_on_reconnect() {
    let h = Harness::open(true).await;
    let ids = h.engine.add_images(vec![h.pick("beach.jpg")]).await;
    let local = h.engine.records()[0].local_path.clone().unwrap();
    h.engine.on_connectivity_changed(false).await;

    h.engine.remove_image(&ids[0]).await.unwrap();

    assert!(!local.exists());
    assert!(h.engine.records().is_empty());
    assert_eq!(h.remote.bucket.len(), 1);
    assert_eq!(h.remote.deletes(), 0);
    assert_eq!(h.engine.view().pending_remote_deletes, 1);

    h.engine.on_connectivity_changed(true).await;
    assert!(h.remote.bucket.is_empty());
    assert_eq!(h.remote.deletes(), 1);
    assert!(h.engine.snapshot().records.is_empty());

    h.reconnect().await;
    assert_eq!(h.remote.deletes(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn network_failure_keeps_record_pending_and_stops_drain() {
    let h = Harness::open(true).await;
    let mut events = h.engine.subscribe_events();
    h.remote
        .fail_next_upload(RemoteError::Network("connection reset".to_string()));

    h.engine
        .add_images(vec![h.pick("a.jpg"), h.pick("b.jpg")])
        .await;

    assert_eq!(h.remote.uploads(), 1);
    let snapshot = h.engine.snapshot();
    assert!(snapshot
        .records
        .iter()
        .all(|record| record.status == ImageStatus::Pending && record.last_error.is_none()));
    assert_eq!(snapshot.queues.upload.len(), 2);
    assert!(drain_events(&mut events).is_empty());

    h.reconnect().await;
    assert!(h
        .engine
        .records()
        .iter()
        .all(|record| record.status == ImageStatus::Uploaded));
    assert_eq!(h.remote.bucket.len(), 2);
}

/// Wait until no upload drain holds its slot.
async fn wait_for_upload_drain(engine: &SyncEngine) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let draining = engine.state().draining.contains(&QueueKind::Upload);
            if !draining {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

/// Three images were queued and the link dropped during the first upload.
async fn assert_drain_stopped_after_first_upload(h: &Harness) {
    assert_eq!(h.remote.uploads(), 1);
    let snapshot = h.engine.snapshot();
    let uploaded = snapshot
        .records
        .iter()
        .filter(|record| record.status == ImageStatus::Uploaded)
        .count();
    let pending: BTreeSet<ImageId> = snapshot
        .records
        .iter()
        .filter(|record| record.status == ImageStatus::Pending)
        .map(|record| record.id.clone())
        .collect();
    assert_eq!(uploaded, 1);
    assert_eq!(pending.len(), 2);
    assert_eq!(
        snapshot.queues.upload.iter().cloned().collect::<BTreeSet<_>>(),
        pending
    );

    h.reconnect().await;
    assert_eq!(h.remote.uploads(), 3);
    assert!(h
        .engine
        .records()
        .iter()
        .all(|record| record.status == ImageStatus::Uploaded));
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnect_during_upload_drain_leaves_rest_pending() {
    let h = Harness::open(false).await;
    h.engine
        .add_images(vec![h.pick("a.jpg"), h.pick("b.jpg"), h.pick("c.jpg")])
        .await;
    let _gate = h.remote.hold_uploads();

    let engine = h.engine.clone();
    let syncing = tokio::spawn(async move { engine.on_connectivity_changed(true).await });
    h.remote.upload_started.notified().await;

    h.engine.on_connectivity_changed(false).await;
    assert!(!h.engine.is_connected());
    h.remote.open_gate();
    syncing.await.unwrap();

    assert_drain_stopped_after_first_upload(&h).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn monitor_disconnect_reaches_running_upload_drain() {
    let h = Harness::open(false).await;
    h.engine
        .add_images(vec![h.pick("a.jpg"), h.pick("b.jpg"), h.pick("c.jpg")])
        .await;
    let _gate = h.remote.hold_uploads();
    let monitor = ConnectivityMonitor::new(false, 1);
    let task = h.engine.follow_connectivity(monitor.subscribe());

    monitor.observe(Reachability::ONLINE);
    tokio::time::timeout(Duration::from_secs(5), h.remote.upload_started.notified())
        .await
        .unwrap();

    monitor.observe(Reachability::OFFLINE);
    let mut connectivity = h.engine.subscribe_connectivity();
    tokio::time::timeout(
        Duration::from_secs(5),
        connectivity.wait_for(|connected| !*connected),
    )
    .await
    .unwrap()
    .unwrap();

    h.remote.open_gate();
    wait_for_upload_drain(&h.engine).await;
    task.abort();

    assert_drain_stopped_after_first_upload(&h).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn server_failure_marks_upload_failed_until_next_reconnect() {
    let h = Harness::open(true).await;
    let mut events = h.engine.subscribe_events();
    h.remote
        .fail_next_upload(RemoteError::Server("HTTP 500".to_string()));

    let ids = h.engine.add_images(vec![h.pick("sunset.jpg")]).await;

    let record = h.engine.records()[0].clone();
    assert_eq!(record.status, ImageStatus::UploadFailed);
    assert!(record.last_error.unwrap().contains("500"));
    assert!(matches!(
        drain_events(&mut events).as_slice(),
        [SyncEvent::UploadFailed { id, .. }] if id == &ids[0]
    ));
    assert_eq!(crate::SyncState::from_view(&h.engine.view()), crate::SyncState::Error);

    // Already connected: no edge, no retry.
    h.engine.on_connectivity_changed(true).await;
    assert_eq!(h.remote.uploads(), 1);

    h.reconnect().await;
    let record = h.engine.records()[0].clone();
    assert_eq!(record.status, ImageStatus::Uploaded);
    assert_eq!(record.last_error, None);
    assert_eq!(h.remote.uploads(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_remote_delete_stays_queued_until_reconnect() {
    let h = Harness::open(true).await;
    let mut events = h.engine.subscribe_events();
    let ids = h.engine.add_images(vec![h.pick("keep.jpg")]).await;
    h.remote
        .fail_next_delete(RemoteError::Server("HTTP 502".to_string()));

    h.engine.remove_image(&ids[0]).await.unwrap();

    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.queues.remote_delete, VecDeque::from([ids[0].clone()]));
    assert_eq!(h.remote.bucket.len(), 1);
    assert!(drain_events(&mut events)
        .iter()
        .any(|event| matches!(event, SyncEvent::RemoteDeleteFailed { .. })));

    h.reconnect().await;
    assert!(h.remote.bucket.is_empty());
    assert!(h.engine.snapshot().records.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn unreadable_pick_is_dropped_and_reported() {
    let h = Harness::open(true).await;
    let mut events = h.engine.subscribe_events();
    let missing = h.tmp.path().join("picker").join("missing.jpg");

    let ids = h.engine.add_images(vec![missing]).await;

    assert!(h.engine.snapshot().records.is_empty());
    assert_eq!(h.remote.uploads(), 0);
    assert!(matches!(
        drain_events(&mut events).as_slice(),
        [SyncEvent::LocalPersistFailed { id, .. }] if id == &ids[0]
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn ids_stay_unique_across_fast_batches() {
    let h = Harness::open(false).await;

    let first = h
        .engine
        .add_images(vec![h.pick("1.jpg"), h.pick("2.jpg")])
        .await;
    let second = h.engine.add_images(vec![h.pick("3.jpg")]).await;

    let all: BTreeSet<_> = first.iter().chain(&second).cloned().collect();
    assert_eq!(all.len(), 3);
    assert_eq!(first[0].batch_millis(), first[1].batch_millis());
    assert!(second[0].batch_millis() > first[0].batch_millis());

    let shown: Vec<ImageId> = h.engine.records().into_iter().map(|r| r.id).collect();
    assert_eq!(shown, vec![second[0].clone(), first[0].clone(), first[1].clone()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn removing_unknown_image_reports_not_found() {
    let h = Harness::open(false).await;
    let ids = h.engine.add_images(vec![h.pick("once.jpg")]).await;

    assert!(matches!(
        h.engine.remove_image(&ImageId::from_batch(1, 0)).await,
        Err(Error::NotFound(_))
    ));
    h.engine.remove_image(&ids[0]).await.unwrap();
    assert!(matches!(
        h.engine.remove_image(&ids[0]).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn removing_pending_image_offline_cancels_upload() {
    let h = Harness::open(false).await;
    let ids = h.engine.add_images(vec![h.pick("never.jpg")]).await;
    let local = h.engine.records()[0].local_path.clone().unwrap();

    h.engine.remove_image(&ids[0]).await.unwrap();
    assert!(!local.exists());
    assert!(h.engine.snapshot().records.is_empty());

    h.engine.on_connectivity_changed(true).await;
    assert_eq!(h.remote.uploads(), 0);
    assert_eq!(h.remote.lists(), 0);
    assert_eq!(h.remote.deletes(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn precheck_lists_once_per_drain() {
    let h = Harness::open(true).await;

    h.engine
        .add_images(vec![h.pick("x.jpg"), h.pick("y.jpg"), h.pick("z.jpg")])
        .await;

    assert_eq!(h.remote.lists(), 1);
    assert_eq!(h.remote.uploads(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_drops_records_whose_file_vanished() {
    let h = Harness::open(false).await;
    let ids = h
        .engine
        .add_images(vec![h.pick("stay.jpg"), h.pick("go.jpg")])
        .await;
    let gone = h.engine.snapshot().record(&ids[1]).unwrap().local_path.clone();
    std::fs::remove_file(gone.unwrap()).unwrap();

    let h = h.restart(false).await;

    let shown: Vec<ImageId> = h.engine.records().into_iter().map(|r| r.id).collect();
    assert_eq!(shown, vec![ids[0].clone()]);
    assert_eq!(h.engine.snapshot().queues.upload, VecDeque::from([ids[0].clone()]));
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_cleans_up_remote_copy_of_vanished_file() {
    let h = Harness::open(true).await;
    h.engine.add_images(vec![h.pick("lost.jpg")]).await;
    let local = h.engine.records()[0].local_path.clone().unwrap();
    std::fs::remove_file(local).unwrap();

    let h = h.restart(true).await;
    assert!(h.engine.records().is_empty());
    h.engine.resume().await;

    assert!(h.remote.bucket.is_empty());
    assert!(h.engine.snapshot().records.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_persist_blocks_upload() {
    let h = Harness::open(false).await;
    let mut events = h.engine.subscribe_events();
    h.engine.add_images(vec![h.pick("disk.jpg")]).await;

    h.store.fail_saves.store(true, Ordering::SeqCst);
    h.engine.on_connectivity_changed(true).await;

    assert_eq!(h.remote.uploads(), 0);
    assert_eq!(h.engine.records()[0].status, ImageStatus::Pending);
    assert!(drain_events(&mut events).iter().any(|event| matches!(
        event,
        SyncEvent::PersistFailed {
            storage_full: true,
            ..
        }
    )));

    h.store.fail_saves.store(false, Ordering::SeqCst);
    h.reconnect().await;
    assert_eq!(h.engine.records()[0].status, ImageStatus::Uploaded);
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribers_see_records_and_connectivity() {
    let h = Harness::open(false).await;
    let mut records = h.engine.subscribe_records();
    let mut connectivity = h.engine.subscribe_connectivity();

    h.engine.add_images(vec![h.pick("seen.jpg")]).await;
    assert!(records.has_changed().unwrap());
    assert_eq!(records.borrow_and_update().records.len(), 1);
    assert!(!connectivity.has_changed().unwrap());

    h.engine.on_connectivity_changed(true).await;
    assert!(*connectivity.borrow_and_update());
    assert!(records.borrow_and_update().connected);
}

#[tokio::test(flavor = "multi_thread")]
async fn follows_connectivity_monitor_edges() {
    let h = Harness::open(false).await;
    let monitor = ConnectivityMonitor::new(false, 1);
    let task = h.engine.follow_connectivity(monitor.subscribe());
    h.engine.add_images(vec![h.pick("later.jpg")]).await;

    let mut view = h.engine.subscribe_records();
    monitor.observe(Reachability::ONLINE);

    tokio::time::timeout(
        Duration::from_secs(5),
        view.wait_for(|view| {
            view.records
                .first()
                .is_some_and(|record| record.status == ImageStatus::Uploaded)
        }),
    )
    .await
    .unwrap()
    .unwrap();
    task.abort();
}
