//! End-to-end intake runs against in-memory and directory stores.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lopdf::{Document, Object, Stream, dictionary};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use slips_core::error::RemoteError;
use slips_core::{
    ClassificationService, DocumentStore, ErrorKind, ExtractedImage, IntakeRun, LocalStore,
    RelocationStatus, RunEvent, SlipsConfig, SourceItem,
};
use tokio_util::sync::CancellationToken;

type RemoteResult<T> = Result<T, RemoteError>;

fn jpeg(marker: u8) -> Vec<u8> {
    vec![0xFF, 0xD8, marker, 0xFF, 0xD9]
}

/// Single-page PDF, optionally carrying one DCT image.
fn receipt_pdf(image: Option<Vec<u8>>) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut xobjects = lopdf::Dictionary::new();
    if let Some(data) = image {
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 2,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            data,
        ));
        xobjects.set("Im0", image_id);
    }
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Resources" => dictionary! { "XObject" => xobjects },
        "MediaBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::from(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

struct Entry {
    folder: String,
    name: String,
    data: Vec<u8>,
}

/// In-memory store with named folders and an operation log.
#[derive(Default)]
struct MemoryStore {
    folders: Vec<String>,
    files: Mutex<BTreeMap<String, Entry>>,
    fail_upload: HashSet<String>,
    unlistable: HashSet<String>,
    log: Mutex<Vec<String>>,
}

impl MemoryStore {
    fn new(folders: &[&str]) -> Self {
        Self {
            folders: folders.iter().map(|f| f.to_string()).collect(),
            ..Self::default()
        }
    }

    fn put(&self, folder: &str, id: &str, name: &str, data: Vec<u8>) {
        self.files.lock().unwrap().insert(
            id.to_string(),
            Entry {
                folder: folder.to_string(),
                name: name.to_string(),
                data,
            },
        );
    }

    fn names_in(&self, folder: &str) -> Vec<String> {
        self.files
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.folder == folder)
            .map(|e| e.name.clone())
            .collect()
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_folder(&self, name: &str) -> RemoteResult<Option<String>> {
        Ok(self
            .folders
            .iter()
            .find(|f| f.as_str() == name)
            .map(|f| format!("folder-{}", f)))
    }

    async fn list(&self, folder_id: &str) -> RemoteResult<Vec<SourceItem>> {
        let folder = folder_id.trim_start_matches("folder-");
        if self.unlistable.contains(folder) {
            return Err(RemoteError::Network("connection reset".to_string()));
        }
        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.folder == folder)
            .map(|(id, e)| SourceItem::new(id.as_str(), e.name.as_str()))
            .collect())
    }

    async fn fetch(&self, id: &str) -> RemoteResult<Vec<u8>> {
        self.log.lock().unwrap().push(format!("fetch {}", id));
        self.files
            .lock()
            .unwrap()
            .get(id)
            .map(|e| e.data.clone())
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    async fn upload(
        &self,
        name: &str,
        _mime_type: &str,
        data: &[u8],
        folder_id: &str,
    ) -> RemoteResult<String> {
        self.log.lock().unwrap().push(format!("upload {}", name));
        if self.fail_upload.contains(name) {
            return Err(RemoteError::Status {
                status: 500,
                body: "internal error".to_string(),
            });
        }
        let id = format!("up-{}", name);
        self.put(folder_id.trim_start_matches("folder-"), &id, name, data.to_vec());
        Ok(id)
    }

    async fn delete(&self, id: &str) -> RemoteResult<()> {
        self.log.lock().unwrap().push(format!("delete {}", id));
        self.files
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }
}

/// Answers by the marker byte of the image: `A` is a Checkers receipt,
/// `S` a Spar receipt, anything else never answers.
#[derive(Default)]
struct MarkerClassifier {
    calls: AtomicUsize,
}

#[async_trait]
impl ClassificationService for MarkerClassifier {
    async fn classify(&self, image: &ExtractedImage, _schema: &Value) -> RemoteResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match image.data.get(2) {
            Some(b'A') => Ok(json!({
                "name": "checkers_2025-01-31_10.00zar",
                "merchant": "Checkers",
                "total": 10.0,
                "date": "2025-01-31",
                "currency": null,
            })),
            Some(b'S') => Ok(json!({
                "name": "spar_2025-02-14_54.02zar",
                "merchant": "SPAR",
                "total": 2.92,
                "date": "2025-02-14",
                "currency": "USD",
            })),
            _ => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Ok(Value::Null)
            }
        }
    }
}

fn config() -> SlipsConfig {
    let mut config = SlipsConfig::default();
    config.classifier.timeout_secs = 5;
    config
}

fn abc_store() -> MemoryStore {
    let store = MemoryStore::new(&["Inbox", "Slips"]);
    store.put("Inbox", "a", "a.pdf", receipt_pdf(Some(jpeg(b'A'))));
    store.put("Inbox", "b", "b.pdf", receipt_pdf(None));
    store.put("Inbox", "c", "c.pdf", receipt_pdf(Some(jpeg(b'C'))));
    store
}

#[tokio::test(start_paused = true)]
async fn test_mixed_batch_end_to_end() {
    let store = Arc::new(abc_store());
    let run = IntakeRun::new(store.clone(), Arc::new(MarkerClassifier::default()), &config());

    let report = run.execute(&CancellationToken::new(), |_| {}).await.unwrap();

    let processed: Vec<(&str, &str)> = report
        .pipeline
        .processed
        .iter()
        .map(|p| (p.source.id.as_str(), p.record.canonical_name.as_str()))
        .collect();
    assert_eq!(processed, vec![("a", "checkers_2025-01-31_10.00zar")]);

    let failures: Vec<(&str, ErrorKind)> = report
        .pipeline
        .failures
        .iter()
        .map(|f| (f.item.id.as_str(), f.error.kind))
        .collect();
    assert_eq!(
        failures,
        vec![("b", ErrorKind::NoImageFound), ("c", ErrorKind::ClassificationError)]
    );

    let writes: Vec<String> = store
        .log()
        .into_iter()
        .filter(|op| !op.starts_with("fetch "))
        .collect();
    assert_eq!(writes, vec!["upload checkers_2025-01-31_10.00zar.jpg", "delete a"]);
    assert_eq!(store.names_in("Inbox"), vec!["b.pdf", "c.pdf"]);
    assert_eq!(store.names_in("Slips"), vec!["checkers_2025-01-31_10.00zar.jpg"]);

    let summary = report.summary();
    assert_eq!(summary.listed, 3);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.relocated, 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.failures["b"].kind, ErrorKind::NoImageFound);
    assert_eq!(summary.failures["c"].kind, ErrorKind::ClassificationError);
}

#[tokio::test]
async fn test_failed_upload_keeps_source_for_next_run() {
    let mut store = MemoryStore::new(&["Inbox", "Slips"]);
    store
        .fail_upload
        .insert("checkers_2025-01-31_10.00zar.jpg".to_string());
    store.put("Inbox", "a", "a.pdf", receipt_pdf(Some(jpeg(b'A'))));
    store.put("Inbox", "s", "s.pdf", receipt_pdf(Some(jpeg(b'S'))));
    let store = Arc::new(store);

    let run = IntakeRun::new(store.clone(), Arc::new(MarkerClassifier::default()), &config());
    let report = run.execute(&CancellationToken::new(), |_| {}).await.unwrap();

    let statuses: Vec<(&str, Option<ErrorKind>)> = report
        .relocations
        .iter()
        .map(|o| (o.source.id.as_str(), o.error_kind()))
        .collect();
    assert_eq!(statuses, vec![("a", Some(ErrorKind::UploadError)), ("s", None)]);
    assert!(!store.log().contains(&"delete a".to_string()));

    let summary = report.summary();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.processed + summary.failed + summary.cancelled, summary.listed);

    // The next run sees the failed item again
    let relisted = store.list("folder-Inbox").await.unwrap();
    assert_eq!(relisted, vec![SourceItem::new("a", "a.pdf")]);
    assert_eq!(store.names_in("Slips"), vec!["spar_2025-02-14_54.02zar.jpg"]);
}

#[tokio::test]
async fn test_missing_folder_aborts_before_processing() {
    let store = Arc::new(MemoryStore::new(&["Inbox"]));
    store.put("Inbox", "a", "a.pdf", receipt_pdf(Some(jpeg(b'A'))));

    let run = IntakeRun::new(store.clone(), Arc::new(MarkerClassifier::default()), &config());
    let mut events = 0;
    let err = run
        .execute(&CancellationToken::new(), |_| events += 1)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RemoteUnavailable);
    assert_eq!(events, 0);
    assert!(store.log().is_empty());
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let store = MemoryStore::new(&["Inbox", "Slips"]);
    store.put("Inbox", "a", "a.pdf", receipt_pdf(Some(jpeg(b'A'))));
    let store = Arc::new(store);

    let run = IntakeRun::new(store.clone(), Arc::new(MarkerClassifier::default()), &config()).with_dry_run(true);
    let mut finished = Vec::new();
    let report = run
        .execute(&CancellationToken::new(), |event| {
            if let RunEvent::ItemFinished(outcome) = event {
                finished.push(outcome.item().id.clone());
            }
        })
        .await
        .unwrap();

    assert_eq!(finished, vec!["a"]);
    assert_eq!(report.pipeline.processed.len(), 1);
    assert!(report.relocations.is_empty());
    assert_eq!(store.log(), vec!["fetch a"]);
    assert_eq!(store.names_in("Inbox"), vec!["a.pdf"]);
}

#[tokio::test]
async fn test_local_directory_run() {
    let dir = tempfile::tempdir().unwrap();
    let inbox = dir.path().join("Inbox");
    let slips = dir.path().join("Slips");
    std::fs::create_dir(&inbox).unwrap();
    std::fs::create_dir(&slips).unwrap();
    std::fs::write(inbox.join("scan.pdf"), receipt_pdf(Some(jpeg(b'A')))).unwrap();
    std::fs::write(inbox.join("readme.txt"), b"not a receipt").unwrap();

    let store = Arc::new(LocalStore::new(dir.path()));
    let run = IntakeRun::new(store, Arc::new(MarkerClassifier::default()), &config());
    let report = run.execute(&CancellationToken::new(), |_| {}).await.unwrap();

    assert!(matches!(
        report.relocations[0].status,
        RelocationStatus::Moved { .. }
    ));
    assert!(!inbox.join("scan.pdf").exists());
    assert!(inbox.join("readme.txt").exists());
    assert_eq!(
        std::fs::read(slips.join("checkers_2025-01-31_10.00zar.jpg")).unwrap(),
        jpeg(b'A')
    );
    assert_eq!(
        report.summary().failures["Inbox/readme.txt"].kind,
        ErrorKind::NoImageFound
    );
}

#[tokio::test]
async fn test_unlistable_destination_aborts_before_processing() {
    let mut store = MemoryStore::new(&["Inbox", "Slips"]);
    store.unlistable.insert("Slips".to_string());
    store.put("Inbox", "a", "a.pdf", receipt_pdf(Some(jpeg(b'A'))));
    let store = Arc::new(store);
    let classifier = Arc::new(MarkerClassifier::default());

    let run = IntakeRun::new(store.clone(), classifier.clone(), &config());
    let mut events = 0;
    let err = run
        .execute(&CancellationToken::new(), |_| events += 1)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RemoteUnavailable);
    assert_eq!(events, 0);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    assert!(store.log().is_empty());
    assert_eq!(store.names_in("Inbox"), vec!["a.pdf"]);
}
