use std::collections::BTreeMap;
use std::sync::Arc;

use bit_vec::BitVec;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::Builder;

use quiver::barrel::{DiskBarrelReader, MemoryBarrel, TermOccurrence};
use quiver::config::IndexConfig;
use quiver::posting::{DirtyFlag, DocumentFilter, PostingCursor, PostingEntry};
use quiver::storage::{FileStorage, Storage, StorageConfig};
use quiver::{DocId, TermId};

/// Expected postings per term, as `(doc, positions)` lists.
type Expected = BTreeMap<TermId, Vec<(DocId, Vec<u32>)>>;

fn small_skip_config() -> IndexConfig {
    let mut config = IndexConfig::default();
    config.skip_list.skip_interval = 4;
    config.skip_list.level_factor = 2;
    config.skip_list.threshold = 4;
    config
}

/// Fill a barrel with a random corpus and return what each term should hold.
fn random_corpus(barrel: &MemoryBarrel, seed: u64, docs: u32, terms: u32) -> Expected {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut expected = Expected::new();
    let mut doc_id = 0;

    for _ in 0..docs {
        doc_id += rng.random_range(1..6);
        let mut occurrences = Vec::new();
        let mut per_term: BTreeMap<TermId, Vec<u32>> = BTreeMap::new();

        for term in 0..terms {
            if !rng.random_bool(0.4) {
                continue;
            }
            let mut position = rng.random_range(0..4);
            for _ in 0..rng.random_range(1..5) {
                occurrences.push(TermOccurrence::new(term, position));
                per_term.entry(term).or_default().push(position);
                position += rng.random_range(1..20);
            }
        }

        barrel.insert_document(0, doc_id, &occurrences).unwrap();
        for (term, positions) in per_term {
            expected.entry(term).or_default().push((doc_id, positions));
        }
    }
    expected
}

fn simplify(entries: &[PostingEntry]) -> Vec<(DocId, Vec<u32>)> {
    entries
        .iter()
        .map(|e| (e.doc.doc_id, e.positions.clone()))
        .collect()
}

fn decode_docs(cursor: &mut dyn PostingCursor, filter: Option<&dyn DocumentFilter>) -> Vec<DocId> {
    let mut docs = [0; 7];
    let mut freqs = [0; 7];
    let mut lens = [0; 7];
    let mut out = Vec::new();
    while let Some(n) = cursor
        .decode_next(&mut docs, &mut freqs, &mut lens, filter)
        .unwrap()
    {
        out.extend_from_slice(&docs[..n]);
    }
    out
}

#[test]
fn test_flush_round_trip_matches_live_decode() {
    let dir = Builder::new().prefix("quiver_round_trip").tempdir().unwrap();
    let storage: Arc<dyn Storage> =
        Arc::new(FileStorage::new(dir.path(), StorageConfig::default()).unwrap());

    let barrel = MemoryBarrel::new("_0", small_skip_config()).unwrap();
    let expected = random_corpus(&barrel, 17, 400, 12);

    let mut live = BTreeMap::new();
    for &term in expected.keys() {
        let entries = barrel.cursor(term).unwrap().read_to_end(None).unwrap();
        assert_eq!(simplify(&entries), expected[&term], "live term {term}");
        live.insert(term, entries);
    }

    barrel.flush(storage.as_ref()).unwrap();
    let reader = DiskBarrelReader::open(storage, "_0", DirtyFlag::new()).unwrap();
    assert_eq!(reader.term_count(), expected.len());

    for (term, live_entries) in &live {
        let mut cursor = reader.cursor(*term).unwrap().unwrap();
        let flushed = cursor.read_to_end(None).unwrap();
        assert_eq!(&flushed, live_entries, "flushed term {term}");

        let stats = cursor.term_stats().unwrap();
        assert_eq!(stats.df as usize, live_entries.len());
        assert_eq!(stats.tdf, stats.df);
        assert_eq!(
            stats.ctf,
            live_entries.iter().map(|e| e.doc.freq as u64).sum::<u64>()
        );
    }
}

#[test]
fn test_decode_next_is_strictly_increasing() {
    let barrel = MemoryBarrel::new("_0", IndexConfig::default()).unwrap();
    let expected = random_corpus(&barrel, 3, 300, 5);

    for &term in expected.keys() {
        let docs = decode_docs(&mut barrel.cursor(term).unwrap(), None);
        assert!(docs.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(docs.len(), expected[&term].len());
    }
}

#[test]
fn test_filter_is_transparent_to_statistics() {
    let storage: Arc<dyn Storage> = Arc::new(quiver::storage::MemoryStorage::new_default());
    let barrel = MemoryBarrel::new("_0", small_skip_config()).unwrap();
    let expected = random_corpus(&barrel, 99, 250, 4);
    barrel.flush(storage.as_ref()).unwrap();
    let reader = DiskBarrelReader::open(storage, "_0", DirtyFlag::new()).unwrap();

    let mut rng = StdRng::seed_from_u64(5);
    let max_doc = expected
        .values()
        .flat_map(|docs| docs.iter().map(|(d, _)| *d))
        .max()
        .unwrap();
    let mut deleted = BitVec::from_elem(max_doc as usize + 1, false);
    for doc in 0..=max_doc {
        if rng.random_bool(0.3) {
            deleted.set(doc as usize, true);
        }
    }

    for (&term, docs) in &expected {
        let mut plain = reader.cursor(term).unwrap().unwrap();
        let stats = plain.term_stats().unwrap();
        let all = decode_docs(&mut plain, None);

        let mut filtered_cursor = reader.cursor(term).unwrap().unwrap();
        let filtered = decode_docs(&mut filtered_cursor, Some(&deleted));

        let complement: Vec<DocId> = all
            .iter()
            .copied()
            .filter(|&d| !deleted.is_deleted(d))
            .collect();
        assert_eq!(filtered, complement);
        assert_eq!(filtered_cursor.term_stats().unwrap(), stats);
        assert_eq!(stats.df as usize, docs.len());
    }
}

#[test]
fn test_filtered_positions_follow_kept_documents() {
    let barrel = MemoryBarrel::new("_0", IndexConfig::default()).unwrap();
    for doc in 1..=6u32 {
        let occurrences: Vec<TermOccurrence> =
            (0..doc).map(|i| TermOccurrence::new(1, doc * 10 + i)).collect();
        barrel.insert_document(0, doc, &occurrences).unwrap();
    }

    let deleted: ahash::AHashSet<DocId> = [2, 3, 5].into_iter().collect();
    let entries = barrel
        .cursor(1)
        .unwrap()
        .read_to_end(Some(&deleted))
        .unwrap();
    let docs: Vec<DocId> = entries.iter().map(|e| e.doc.doc_id).collect();
    assert_eq!(docs, vec![1, 4, 6]);
    assert_eq!(entries[1].positions, vec![40, 41, 42, 43]);
    assert_eq!(entries[2].positions, (60..66).collect::<Vec<_>>());
}

#[test]
fn test_decode_to_agrees_with_linear_scan() {
    let storage: Arc<dyn Storage> = Arc::new(quiver::storage::MemoryStorage::new_default());
    let barrel = MemoryBarrel::new("_0", small_skip_config()).unwrap();
    let expected = random_corpus(&barrel, 41, 500, 3);
    barrel.flush(storage.as_ref()).unwrap();
    let reader = DiskBarrelReader::open(storage, "_0", DirtyFlag::new()).unwrap();

    for (&term, docs) in &expected {
        let cursor = reader.cursor(term).unwrap().unwrap();
        assert!(cursor.skip_list().is_some(), "term {term} should have a skip list");

        let last = docs.last().unwrap().0;
        for target in (0..=last + 3).step_by(7) {
            let linear = docs.iter().find(|(d, _)| *d >= target);

            let mut cursor = reader.cursor(term).unwrap().unwrap();
            let found = cursor.decode_to(target, None).unwrap();
            assert_eq!(found, linear.map(|(d, _)| *d), "term {term} target {target}");

            if let Some((_, positions)) = linear {
                let mut out = vec![0; positions.len()];
                cursor.decode_next_positions(&mut out).unwrap();
                assert_eq!(&out, positions, "positions of term {term} at {target}");
            }
        }

        // One cursor moving forward through increasing targets.
        let mut cursor = reader.cursor(term).unwrap().unwrap();
        for target in (0..=last + 3).step_by(13) {
            let linear = docs.iter().map(|(d, _)| *d).find(|&d| d >= target);
            let found = cursor.decode_to(target, None).unwrap();
            assert_eq!(found, linear);
            if let Some(found) = found {
                assert!(found >= target);
            }
        }
    }
}

#[test]
fn test_single_term_scenario() {
    let storage: Arc<dyn Storage> = Arc::new(quiver::storage::MemoryStorage::new_default());
    let barrel = MemoryBarrel::new("_0", IndexConfig::default()).unwrap();
    barrel
        .insert_document(0, 1, &[TermOccurrence::new(7, 0), TermOccurrence::new(7, 5)])
        .unwrap();
    barrel
        .insert_document(0, 3, &[TermOccurrence::new(7, 2)])
        .unwrap();

    let check = |cursor: &mut dyn PostingCursor| {
        let stats = cursor.term_stats().unwrap();
        assert_eq!((stats.df, stats.ctf), (2, 3));

        let mut docs = [0; 4];
        let mut freqs = [0; 4];
        let mut lens = [0; 4];
        let n = cursor
            .decode_next(&mut docs, &mut freqs, &mut lens, None)
            .unwrap()
            .unwrap();
        assert_eq!((&docs[..n], &freqs[..n]), (&[1, 3][..], &[2, 1][..]));
    };
    check(&mut barrel.cursor(7).unwrap());

    let mut live = barrel.cursor(7).unwrap();
    assert_eq!(live.decode_to(3, None).unwrap(), Some(3));
    let mut positions = [0; 1];
    live.decode_next_positions(&mut positions).unwrap();
    assert_eq!(positions, [2]);

    barrel.flush(storage.as_ref()).unwrap();
    let reader = DiskBarrelReader::open(storage, "_0", DirtyFlag::new()).unwrap();
    check(&mut reader.cursor(7).unwrap().unwrap());

    let mut flushed = reader.cursor(7).unwrap().unwrap();
    assert_eq!(flushed.decode_to(3, None).unwrap(), Some(3));
    flushed.decode_next_positions(&mut positions).unwrap();
    assert_eq!(positions, [2]);
    assert_eq!(flushed.decode_to(4, None).unwrap(), None);
}

#[test]
fn test_live_reads_while_writing() {
    let barrel = Arc::new(MemoryBarrel::new("_0", IndexConfig::default()).unwrap());
    barrel
        .insert_document(0, 0, &[TermOccurrence::new(1, 0)])
        .unwrap();

    let writer = {
        let barrel = Arc::clone(&barrel);
        std::thread::spawn(move || {
            for doc in 1..2_000u32 {
                let occurrences = [TermOccurrence::new(1, doc % 7), TermOccurrence::new(2, 1)];
                barrel.insert_document(0, doc, &occurrences).unwrap();
            }
        })
    };

    let mut cursor = barrel.cursor(1).unwrap();
    let mut seen: Vec<DocId> = Vec::new();
    while seen.len() < 2_000 {
        let batch = decode_docs(&mut cursor, None);
        if let (Some(last), Some(first)) = (seen.last(), batch.first()) {
            assert!(first > last);
        }
        seen.extend(batch);
        if writer.is_finished() && seen.len() < 2_000 {
            seen.extend(decode_docs(&mut cursor, None));
            break;
        }
    }
    writer.join().unwrap();

    assert_eq!(seen, (0..2_000).collect::<Vec<_>>());
}
