//! End-to-end manifest scenarios through the public API.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use atoll_manifest::{ManifestError, Node};
use atoll_store::{Loader, MemoryStore, Saver, SlowStore, StoreError};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

/// Path zero-padded on the left to 32 bytes.
fn padded(path: &[u8]) -> Vec<u8> {
    let mut e = vec![0u8; 32 - path.len()];
    e.extend_from_slice(path);
    e
}

/// Mock load/saver addressing chunks by SHA-256.
#[derive(Default)]
struct Sha256Store {
    chunks: Mutex<HashMap<Vec<u8>, Bytes>>,
}

#[async_trait::async_trait]
impl Loader for Sha256Store {
    async fn load(&self, reference: &[u8]) -> Result<Bytes, StoreError> {
        self.chunks
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(reference.to_vec()))
    }
}

#[async_trait::async_trait]
impl Saver for Sha256Store {
    async fn save(&self, data: Bytes) -> Result<Vec<u8>, StoreError> {
        let reference = Sha256::digest(&data).to_vec();
        self.chunks.lock().unwrap().insert(reference.clone(), data);
        Ok(reference)
    }
}

/// Saver handing out sequential 32-byte references `0x00..00`,
/// `0x00..01`, …, recording every blob in save order.
#[derive(Default)]
struct CountingSaver {
    saved: Mutex<Vec<Bytes>>,
}

#[async_trait::async_trait]
impl Saver for CountingSaver {
    async fn save(&self, data: Bytes) -> Result<Vec<u8>, StoreError> {
        let mut saved = self.saved.lock().unwrap();
        let mut reference = [0u8; 32];
        reference[31] = saved.len() as u8;
        saved.push(data);
        Ok(reference.to_vec())
    }
}

#[tokio::test]
async fn test_add_and_lookup_nine_paths() {
    let paths: [&[u8]; 9] = [
        b"aaaaaa", b"aaaaab", b"abbbb", b"abbba", b"bbbbba", b"bbbaaa", b"bbbaab", b"aa", b"b",
    ];

    let mut n = Node::new();
    for path in paths {
        n.add(path, &padded(path), BTreeMap::new(), None)
            .await
            .unwrap();
    }

    for path in paths {
        let (entry, _) = n.lookup(path, None).await.unwrap();
        assert_eq!(&entry[..], &padded(path)[..], "wrong value for {path:?}");
    }
    assert_eq!(n.fork_keys(), vec![b'a', b'b']);
}

#[tokio::test]
async fn test_subsumed_path_splits_fork() {
    let mut n = Node::new();
    n.add(b"aaaaaa", &padded(b"aaaaaa"), BTreeMap::new(), None)
        .await
        .unwrap();
    n.add(b"aa", &padded(b"aa"), BTreeMap::new(), None)
        .await
        .unwrap();

    let f = n.fork(b'a').expect("fork under 'a'");
    assert_eq!(f.prefix(), b"aa");
    let inner = f.node().fork(b'a').expect("chained fork");
    assert_eq!(inner.prefix(), b"aaaa");

    let (entry, _) = n.lookup(b"aa", None).await.unwrap();
    assert_eq!(&entry[..], &padded(b"aa")[..]);
    let (entry, _) = n.lookup(b"aaaaaa", None).await.unwrap();
    assert_eq!(&entry[..], &padded(b"aaaaaa")[..]);
}

/// Canonical four-fork serialization: fixed obfuscation key (the first
/// 32 bytes of the expected output), deterministic child references.
const MARSHAL_VECTOR: &str = "52fdfc072182654f163f5f0f9a621d729566c74d10037c4d7bbb0407d1e2c64950ac787fbce1061870e8d34e0a638bc7e812c7ca4ebd31d626a572ba47b06f6952fdfc072182654f163f5f0f9a621d729566c74d10037c4d7bbb0407d1e2c64952fdfc072182654f163f5f0fa0621d729566c74d10037c4d7bbb0407d1e2c64950f89d6640e3044f163f5f0f9a621d729566c74d10037c4d7bbb0407d1e2c64952fdfc072182654f163f5f0f9a621d729566c74d10037c4d7bbb0407d1e2c64950ff9f642182654f163f5f0f9a621d729566c74d10037c4d7bbb0407d1e2c64952fdfc072182654f163f5f0f9a621d729566c74d10037c4d7bbb0407d1e2c64850fc98072182654f163f5f0f9a621d729566c74d10037c4d7bbb0407d1e2c64952fdfc072182654f163f5f0f9a621d729566c74d10037c4d7bbb0407d1e2c64b50ff99622182654f163f5f0f9a621d729566c74d10037c4d7bbb0407d1e2c64952fdfc072182654f163f5f0f9a621d729566c74d10037c4d7bbb0407d1e2c64a";

#[tokio::test]
async fn test_save_produces_canonical_bytes() {
    let mut key = [0u8; 32];
    key.copy_from_slice(&hex::decode(MARSHAL_VECTOR).unwrap()[..32]);

    let mut n = Node::new();
    for path in [b"aaaaa".as_slice(), b"cc", b"d", b"ee"] {
        n.add(path, &padded(path), BTreeMap::new(), None)
            .await
            .unwrap();
    }
    n.set_obfuscation_key(key);

    let saver = CountingSaver::default();
    let root = n.save(Some(&saver)).await.unwrap();

    // Children persist before the root (ascending fork order with an
    // instant saver), so the root blob is the last one saved and its
    // reference carries the counter value 4.
    let saved = saver.saved.lock().unwrap();
    assert_eq!(saved.len(), 5);
    assert_eq!(hex::encode(saved.last().unwrap()), MARSHAL_VECTOR);
    let mut expected_root = [0u8; 32];
    expected_root[31] = 4;
    assert_eq!(&root[..], &expected_root[..]);
}

#[tokio::test]
async fn test_metadata_survives_sibling_removal() {
    let mut n = Node::new();
    let metadata = BTreeMap::from([("index-document".to_string(), "index.html".to_string())]);

    n.add(b"/", b"", metadata.clone(), None).await.unwrap();
    n.add(b"index.html", &padded(b"index.html"), BTreeMap::new(), None)
        .await
        .unwrap();
    n.add(b"img/1.png", &padded(b"img/1.png"), BTreeMap::new(), None)
        .await
        .unwrap();
    n.remove(b"img/1.png", None).await.unwrap();

    let (_, got) = n.lookup(b"/", None).await.unwrap();
    assert_eq!(got, metadata);

    let (entry, _) = n.lookup(b"index.html", None).await.unwrap();
    assert_eq!(&entry[..], &padded(b"index.html")[..]);

    let err = n.lookup(b"img/1.png", None).await.unwrap_err();
    assert!(matches!(err, ManifestError::NotFound(_)));
}

#[tokio::test]
async fn test_persist_through_sha256_store() {
    let store = Sha256Store::default();
    let mut n = Node::new();

    n.save(Some(&store)).await.unwrap();
    n.add(b"aa", &padded(b"aa"), BTreeMap::new(), Some(&store))
        .await
        .unwrap();
    n.save(Some(&store)).await.unwrap();

    let (entry, _) = n.lookup(b"aa", Some(&store)).await.unwrap();
    assert_eq!(&entry[..], &padded(b"aa")[..]);

    // Every node of the persisted tree resolves through Load.
    let references = Arc::new(Mutex::new(Vec::new()));
    let references_cb = references.clone();
    n.walk_nodes(b"", Some(&store), &move |_, node| {
        references_cb.lock().unwrap().push(node.reference().to_vec());
        Ok(())
    })
    .await
    .unwrap();

    let references = Arc::try_unwrap(references).unwrap().into_inner().unwrap();
    assert!(!references.is_empty());
    for reference in references {
        assert!(!reference.is_empty(), "walked node missing a reference");
        store.load(&reference).await.unwrap();
    }
}

#[tokio::test]
async fn test_persist_idempotence_through_sha256_store() {
    let store = Sha256Store::default();
    let mut n = Node::new();
    for path in [b"img/1.png".as_slice(), b"img/2.png", b"index.html"] {
        n.add(path, &padded(path), BTreeMap::new(), Some(&store))
            .await
            .unwrap();
    }

    let first = n.save(Some(&store)).await.unwrap();
    let second = n.save(Some(&store)).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_reference_stub_roundtrip() {
    let store = Sha256Store::default();
    let root = {
        let mut n = Node::new();
        for path in [b"docs/a".as_slice(), b"docs/b", b"readme"] {
            n.add(path, &padded(path), BTreeMap::new(), Some(&store))
                .await
                .unwrap();
        }
        n.save(Some(&store)).await.unwrap()
    };

    let mut reloaded = Node::new_ref(root);
    for path in [b"docs/a".as_slice(), b"docs/b", b"readme"] {
        let (entry, _) = reloaded.lookup(path, Some(&store)).await.unwrap();
        assert_eq!(&entry[..], &padded(path)[..], "lost {path:?} after reload");
    }
    assert!(reloaded.has_prefix(b"docs/", Some(&store)).await.unwrap());
    assert!(!reloaded.has_prefix(b"video/", Some(&store)).await.unwrap());
}

#[tokio::test]
async fn test_walk_paths_async_over_persisted_tree() {
    let store = MemoryStore::new();
    let mut n = Node::new();
    for path in [
        b"site/index.html".as_slice(),
        b"site/img/logo.png",
        b"site/img/banner.png",
        b"notes.txt",
    ] {
        n.add(path, &padded(path), BTreeMap::new(), Some(&store))
            .await
            .unwrap();
    }
    let root = n.save(Some(&store)).await.unwrap();

    let mut reloaded = Node::new_ref(root);
    let files = Arc::new(Mutex::new(Vec::new()));
    let files_cb = files.clone();
    reloaded
        .walk_paths_async(
            b"",
            Some(&store),
            &move |path, is_dir| {
                if !is_dir {
                    files_cb.lock().unwrap().push(path.to_vec());
                }
                Ok(())
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let mut files = Arc::try_unwrap(files).unwrap().into_inner().unwrap();
    files.sort();
    assert_eq!(
        files,
        vec![
            b"notes.txt".to_vec(),
            b"site/img/banner.png".to_vec(),
            b"site/img/logo.png".to_vec(),
            b"site/index.html".to_vec(),
        ]
    );
}

#[tokio::test]
async fn test_cancellation_lands_between_recursion_frames() {
    // A slow store keeps each chunk write suspended long enough for the
    // cancellation to land while child saves are in flight; the save must
    // observe it before persisting the root.
    let store = SlowStore::new(std::sync::Arc::new(MemoryStore::new()))
        .save_latency(100, 100)
        .seed(1);

    let mut n = Node::new();
    for path in [b"a/one".as_slice(), b"a/two", b"b"] {
        n.add(path, &padded(path), BTreeMap::new(), None)
            .await
            .unwrap();
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let err = n
        .save_with_cancellation(Some(&store), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ManifestError::Cancelled));
    assert!(n.reference().is_empty(), "root must stay dirty");
}

#[tokio::test]
async fn test_unmarshal_rejects_tampered_version() {
    let data = hex::decode(MARSHAL_VECTOR).unwrap();

    // Bytes [32..63) carry the version hash; flip one bit in each and
    // expect rejection every time.
    for offset in [32usize, 45, 62] {
        let mut tampered = data.clone();
        tampered[offset] ^= 0x01;
        let err = Node::unmarshal_binary(&tampered).unwrap_err();
        assert!(matches!(err, ManifestError::Invalid(_)), "offset {offset}");
    }

    // The untampered vector parses.
    Node::unmarshal_binary(&data).unwrap();
}

#[tokio::test]
async fn test_randomized_tree_survives_persist_and_removal() {
    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    // Fixed-length paths over a small alphabet force heavy prefix sharing
    // and splitting; equal length keeps every path prefix-free of the
    // others, so removals never take a sibling subtree with them.
    let mut rng = StdRng::seed_from_u64(42);
    let mut paths: Vec<Vec<u8>> = Vec::new();
    while paths.len() < 150 {
        let path: Vec<u8> = (0..8).map(|_| b'a' + rng.random_range(0..4u8)).collect();
        if !paths.contains(&path) {
            paths.push(path);
        }
    }

    let store = MemoryStore::new();
    let mut n = Node::new();
    for path in &paths {
        n.add(path, &padded(path), BTreeMap::new(), Some(&store))
            .await
            .unwrap();
    }
    let root = n.save(Some(&store)).await.unwrap();

    // Reload from the root reference and drop every other path.
    let mut reloaded = Node::new_ref(root);
    let (removed, kept): (Vec<_>, Vec<_>) = paths
        .iter()
        .enumerate()
        .partition(|(i, _)| i % 2 == 0);

    for (_, path) in &removed {
        reloaded.remove(path, Some(&store)).await.unwrap();
    }
    let new_root = reloaded.save(Some(&store)).await.unwrap();

    let mut fresh = Node::new_ref(new_root);
    for (_, path) in &removed {
        let err = fresh.lookup(path, Some(&store)).await.unwrap_err();
        assert!(
            matches!(err, ManifestError::NotFound(_)),
            "removed path {path:?} still resolves"
        );
    }
    for (_, path) in &kept {
        let (entry, _) = fresh.lookup(path, Some(&store)).await.unwrap();
        assert_eq!(&entry[..], &padded(path)[..], "kept path {path:?} lost");
    }
}

#[tokio::test]
async fn test_metadata_roundtrips_through_store() {
    let store = Sha256Store::default();
    let metadata = BTreeMap::from([
        ("content-type".to_string(), "image/png".to_string()),
        ("filename".to_string(), "logo.png".to_string()),
    ]);

    let root = {
        let mut n = Node::new();
        n.add(
            b"img/logo.png",
            &padded(b"img/logo.png"),
            metadata.clone(),
            Some(&store),
        )
        .await
        .unwrap();
        n.save(Some(&store)).await.unwrap()
    };

    let mut reloaded = Node::new_ref(root);
    let (entry, got) = reloaded.lookup(b"img/logo.png", Some(&store)).await.unwrap();
    assert_eq!(&entry[..], &padded(b"img/logo.png")[..]);
    assert_eq!(got, metadata);
}
