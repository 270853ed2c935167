//! Integration tests: arena flush/extract, flush coalescing, and
//! cross-process-style hot swap over a real SQLite image.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use leyline::arena::{extract_active_db, Arena};
use leyline::control::ControlBlock;
use leyline::flusher::ArenaFlusher;
use leyline::graph::{GenerationWatcher, GraphNode, HotSwapGraph, IndexedGraph, NodeSink, NodeStore};
use rusqlite::Connection;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn create_master(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("master.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA journal_mode = DELETE;").unwrap();
    conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, val TEXT NOT NULL);")
        .unwrap();
    conn.execute("INSERT INTO t (id, val) VALUES (1, 'v1')", [])
        .unwrap();
    path
}

fn read_val(db_path: &Path) -> String {
    let conn = Connection::open(db_path).unwrap();
    conn.query_row("SELECT val FROM t WHERE id = 1", [], |row| row.get(0))
        .unwrap()
}

fn set_val(db_path: &Path, val: &str) {
    let conn = Connection::open(db_path).unwrap();
    conn.execute_batch("PRAGMA journal_mode = DELETE;").unwrap();
    conn.execute("UPDATE t SET val = ?1 WHERE id = 1", [val])
        .unwrap();
}

// ---------------------------------------------------------------------------
// Arena flush and extract
// ---------------------------------------------------------------------------

#[test]
fn flush_and_extract_roundtrip() {
    let dir = TempDir::new().unwrap();
    let master = create_master(&dir);
    let arena_path = dir.path().join("view.arena");
    let mut arena = Arena::create(&master, &arena_path).unwrap();

    set_val(&master, "v2");
    arena.flush(&master).unwrap();

    let header = arena.header().unwrap();
    assert_eq!(header.active_buffer, 1, "flush must flip the active buffer");
    assert_eq!(header.sequence, 2, "flush must increment the sequence");

    let extracted = extract_active_db(&arena_path).unwrap();
    assert_eq!(read_val(&extracted), "v2");
    std::fs::remove_file(extracted).unwrap();
}

// ---------------------------------------------------------------------------
// Extract returns the master image as of flush start
// ---------------------------------------------------------------------------

#[test]
fn extracted_bytes_match_master_at_flush() {
    let dir = TempDir::new().unwrap();
    let master = create_master(&dir);
    let arena_path = dir.path().join("view.arena");
    let mut arena = Arena::create(&master, &arena_path).unwrap();

    set_val(&master, "frozen");
    let master_bytes = std::fs::read(&master).unwrap();
    arena.flush(&master).unwrap();

    // Mutate the master afterwards; the arena must not see it.
    set_val(&master, "later");

    let extracted = extract_active_db(&arena_path).unwrap();
    let extracted_bytes = std::fs::read(&extracted).unwrap();
    assert_eq!(&extracted_bytes[..master_bytes.len()], &master_bytes[..]);
    assert!(extracted_bytes[master_bytes.len()..].iter().all(|&b| b == 0));
    std::fs::remove_file(extracted).unwrap();
}

// ---------------------------------------------------------------------------
// Flush coalescing
// ---------------------------------------------------------------------------

#[test]
fn rapid_flush_requests_coalesce() {
    let dir = TempDir::new().unwrap();
    let master = create_master(&dir);
    let arena_path = dir.path().join("view.arena");
    Arena::create(&master, &arena_path).unwrap();

    let flusher = ArenaFlusher::start(
        Arena::open(&arena_path).unwrap(),
        master.clone(),
        None,
        Duration::from_millis(50),
    );
    for _ in 0..10 {
        flusher.request_flush();
    }
    std::thread::sleep(Duration::from_millis(200));
    drop(flusher);

    // Exactly one flush: creation wrote sequence 1, the burst adds 1.
    let sequence = Arena::open(&arena_path)
        .unwrap()
        .header()
        .unwrap()
        .sequence;
    assert_eq!(sequence, 2);
}

// ---------------------------------------------------------------------------
// Hot swap: a read after swap sees only the new state
// ---------------------------------------------------------------------------

fn create_graph_image(dir: &TempDir, name: &str, greeting: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    let mut graph = IndexedGraph::create(&path).unwrap();
    graph
        .insert_node(GraphNode::file("greeting", greeting.to_vec(), 1))
        .unwrap();
    path
}

fn read_greeting(store: &dyn NodeStore) -> String {
    let mut buf = [0u8; 64];
    let n = store.read_content("greeting", &mut buf, 0).unwrap();
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

#[test]
fn reads_after_swap_observe_new_generation_only() {
    let dir = TempDir::new().unwrap();
    let master = create_graph_image(&dir, "master.db", b"gen-1");
    let arena_path = dir.path().join("view.arena");
    let mut arena = Arena::create(&master, &arena_path).unwrap();

    let control_path = dir.path().join("view.leyc");
    let mut control = ControlBlock::open_or_create(&control_path).unwrap();
    control.set_arena(&arena_path, 0, 1).unwrap();

    // Reader process: extract + watch.
    let temp = arena.extract_active_db().unwrap();
    let swap = Arc::new(HotSwapGraph::new(
        Arc::new(IndexedGraph::open(&temp).unwrap()),
        Some(temp),
    ));
    let _watcher = GenerationWatcher::spawn(
        control_path.clone(),
        Arc::clone(&swap),
        Duration::from_millis(10),
        1,
    )
    .unwrap();
    assert_eq!(read_greeting(swap.as_ref()), "gen-1");

    // Writer process: two generations in sequence.
    for (generation, content) in [(2u64, "gen-2"), (3, "gen-3")] {
        let writer = IndexedGraph::open(&master).unwrap();
        writer
            .update_content("greeting", content.as_bytes(), generation)
            .unwrap();
        drop(writer);
        arena.flush(&master).unwrap();
        control.bump_generation();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            let seen = read_greeting(swap.as_ref());
            if seen == content {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "swap to generation {generation} not observed (still '{seen}')"
            );
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

// ---------------------------------------------------------------------------
// Control block + flusher: generation follows sequence
// ---------------------------------------------------------------------------

#[test]
fn flusher_publishes_generation_with_arena_flip() {
    let dir = TempDir::new().unwrap();
    let master = create_master(&dir);
    let arena_path = dir.path().join("view.arena");
    Arena::create(&master, &arena_path).unwrap();

    let control_path = dir.path().join("view.leyc");
    let control = ControlBlock::open_or_create(&control_path).unwrap();
    let flusher = ArenaFlusher::start(
        Arena::open(&arena_path).unwrap(),
        master.clone(),
        Some(control),
        Duration::from_secs(3600),
    );

    set_val(&master, "published");
    flusher.flush_now().unwrap();
    drop(flusher);

    let reader = ControlBlock::open_or_create(&control_path).unwrap();
    assert_eq!(reader.generation(), 1);

    let extracted = extract_active_db(&arena_path).unwrap();
    assert_eq!(read_val(&extracted), "published");
    std::fs::remove_file(extracted).unwrap();
}
