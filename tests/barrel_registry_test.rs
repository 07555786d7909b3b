use std::sync::Arc;

use tempfile::Builder;

use quiver::barrel::{
    BarrelEvent, BarrelInfo, BarrelRegistry, DiskBarrelReader, MemoryBarrel, TermOccurrence,
    merge_barrels,
};
use quiver::config::IndexConfig;
use quiver::error::QuiverError;
use quiver::posting::PostingCursor;
use quiver::storage::{FileStorage, MemoryStorage, Storage, StorageConfig};

fn file_registry(path: &std::path::Path) -> BarrelRegistry {
    let storage = FileStorage::new(path, StorageConfig::default()).unwrap();
    BarrelRegistry::open(Arc::new(storage)).unwrap()
}

fn flush_docs(registry: &BarrelRegistry, docs: std::ops::Range<u32>) -> String {
    let barrel = MemoryBarrel::create(registry, IndexConfig::default()).unwrap();
    for doc in docs {
        let occurrences = [TermOccurrence::new(1, 0), TermOccurrence::new(doc % 3 + 2, 1)];
        barrel.insert_document(0, doc, &occurrences).unwrap();
    }
    barrel.flush_into(registry).unwrap();
    barrel.name()
}

#[test]
fn test_names_stay_unique_after_remove() {
    let registry = BarrelRegistry::open(Arc::new(MemoryStorage::new_default())).unwrap();

    let first = registry.new_barrel().unwrap();
    registry.add_barrel(BarrelInfo::new(&first)).unwrap();
    let second = registry.new_barrel().unwrap();
    registry.remove_barrel(&first).unwrap();
    let third = registry.new_barrel().unwrap();

    let names = [first, second, third];
    let numbers: Vec<u64> = names
        .iter()
        .map(|n| n.trim_start_matches('_').parse().unwrap())
        .collect();
    assert!(numbers.windows(2).all(|w| w[0] < w[1]), "{names:?}");
}

#[test]
fn test_registry_survives_restart() {
    let dir = Builder::new().prefix("quiver_registry").tempdir().unwrap();

    {
        let registry = file_registry(dir.path());
        flush_docs(&registry, 0..50);
        flush_docs(&registry, 50..80);
        let live = MemoryBarrel::create(&registry, IndexConfig::default()).unwrap();
        live.insert_document(0, 80, &[TermOccurrence::new(1, 0)]).unwrap();
    }

    let registry = file_registry(dir.path());
    let snapshot = registry.snapshot();
    assert_eq!(snapshot.names(), vec!["_0", "_1", "_2"]);
    assert_eq!(snapshot.get("_1").unwrap().base_doc_id(), 50);
    assert_eq!(snapshot.max_doc, 79);
    assert!(snapshot.get("_2").unwrap().in_memory);
    assert_eq!(registry.new_barrel().unwrap(), "_3");

    let reader = DiskBarrelReader::from_registry(&registry, "_1").unwrap();
    let entries = reader.cursor(1).unwrap().unwrap().read_to_end(None).unwrap();
    assert_eq!(entries.len(), 30);
    assert_eq!(entries[0].doc.doc_id, 50);
}

#[test]
fn test_crash_leftovers_are_cleaned_on_open() {
    let dir = Builder::new().prefix("quiver_leftovers").tempdir().unwrap();
    {
        let registry = file_registry(dir.path());
        flush_docs(&registry, 0..5);
    }
    std::fs::write(dir.path().join("barrels.tmp"), b"<barrels_info>").unwrap();
    std::fs::write(dir.path().join("_4.dfp"), b"orphan").unwrap();

    let registry = file_registry(dir.path());
    assert!(!dir.path().join("barrels.tmp").exists());
    assert_eq!(registry.snapshot().len(), 1);
    assert_eq!(registry.new_barrel().unwrap(), "_5");
}

#[test]
fn test_removed_barrel_fails_open_cursors() {
    let registry = BarrelRegistry::open(Arc::new(MemoryStorage::new_default())).unwrap();
    let name = flush_docs(&registry, 0..40);

    let reader = DiskBarrelReader::from_registry(&registry, &name).unwrap();
    let mut cursor = reader.cursor(1).unwrap().unwrap();
    assert_eq!(registry.attached_readers(&name), 1);

    registry.remove_barrel(&name).unwrap();
    let err = cursor.decode_to(10, None).unwrap_err();
    assert!(matches!(err, QuiverError::StaleSegment(_)));
    assert!(err.is_recoverable());
    assert!(reader.cursor(1).is_err());
    assert!(!registry.storage().file_exists(&format!("{name}.dfp")));
}

#[test]
fn test_flush_stales_live_cursors_only() {
    let registry = BarrelRegistry::open(Arc::new(MemoryStorage::new_default())).unwrap();
    let events = registry.subscribe();

    let barrel = MemoryBarrel::create(&registry, IndexConfig::default()).unwrap();
    barrel.insert_document(0, 1, &[TermOccurrence::new(5, 3)]).unwrap();
    let mut live = barrel.cursor(5).unwrap();
    barrel.flush_into(&registry).unwrap();

    assert!(matches!(
        live.read_to_end(None),
        Err(QuiverError::StaleSegment(_))
    ));

    let reader = DiskBarrelReader::from_registry(&registry, &barrel.name()).unwrap();
    let entries = reader.cursor(5).unwrap().unwrap().read_to_end(None).unwrap();
    assert_eq!(entries[0].positions, vec![3]);

    let received: Vec<BarrelEvent> = events.try_iter().collect();
    assert_eq!(
        received,
        vec![
            BarrelEvent::Added("_0".into()),
            BarrelEvent::Flushed("_0".into())
        ]
    );
}

#[test]
fn test_merge_then_sort() {
    let dir = Builder::new().prefix("quiver_merge").tempdir().unwrap();
    let registry = file_registry(dir.path());
    let a = flush_docs(&registry, 0..20);
    let b = flush_docs(&registry, 20..45);
    let c = flush_docs(&registry, 45..50);

    let merged = merge_barrels(&registry, &[&b, &a], &IndexConfig::default()).unwrap();
    assert_eq!(merged.doc_count, 45);
    assert_eq!(registry.snapshot().names(), vec![c.as_str(), "_3"]);

    let renames = registry.sort().unwrap();
    assert_eq!(
        renames,
        vec![("_2".to_string(), "_4".to_string()), ("_3".to_string(), "_5".to_string())]
    );

    let reader = DiskBarrelReader::from_registry(&registry, "_5").unwrap();
    let docs: Vec<u32> = reader
        .cursor(1)
        .unwrap()
        .unwrap()
        .read_to_end(None)
        .unwrap()
        .iter()
        .map(|e| e.doc.doc_id)
        .collect();
    assert_eq!(docs, (0..45).collect::<Vec<_>>());

    drop(reader);
    let reopened = file_registry(dir.path());
    assert_eq!(reopened.snapshot().names(), vec!["_4", "_5"]);
}
