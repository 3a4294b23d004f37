//! Golden tests for the walk pipeline.
//!
//! These tests verify determinism and artifact formats across full runs.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use threadwalk::minimize::{load_exclusions, minimize_corpus};
use threadwalk::partition::{partition_by_user, PartitionConfig};
use threadwalk::{
    BatchDriver, HandleDiscipline, PipelineConfig, PostId, ReverseIndex, WalkEngine, WalkPipeline,
    WalkRecord,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Six-post reply tree: 2 replies to 1; 3, 5, 6 reply to 2; 4 replies to 3.
const REPLY_TREE: &[&str] = &[
    r#"{"post_id": 1, "user_id": 100}"#,
    r#"{"post_id": 2, "user_id": 200, "reply_to": 1}"#,
    r#"{"post_id": 3, "user_id": 100, "reply_to": 2}"#,
    r#"{"post_id": 4, "user_id": 300, "reply_to": 3}"#,
    r#"{"post_id": 5, "user_id": 200, "reply_to": 2}"#,
    r#"{"post_id": 6, "user_id": 100, "reply_to": 2}"#,
];

fn make_config(dir: &Path, corpus: &[&str]) -> PipelineConfig {
    let posts = dir.join("posts.jsonl");
    std::fs::write(&posts, corpus.join("\n") + "\n").unwrap();

    PipelineConfig {
        posts,
        edges: dir.join("edges.jsonl"),
        roots: dir.join("roots.jsonl"),
        threadless: dir.join("threadless.jsonl"),
        snapshot: dir.join("reverse_edges.jsonl"),
        walks: dir.join("walks.jsonl"),
        walks_dir: dir.join("reverse_walks"),
        workers: 2,
        batch_size: 2,
        max_open: 4,
        max_depth: None,
    }
}

fn read_walks(path: &Path) -> Vec<WalkRecord> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Full Pipeline
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn full_run_produces_expected_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let config = make_config(dir.path(), REPLY_TREE);

    let summary = WalkPipeline::new(config.clone()).unwrap().run().unwrap();
    assert_eq!(summary.roots_total, 1);
    assert_eq!(summary.walks_written, 1);

    // Edge artifact in extraction order
    let edges = std::fs::read_to_string(&config.edges).unwrap();
    assert_eq!(
        edges,
        concat!(
            r#"{"src":2,"dst":1}"#, "\n",
            r#"{"src":3,"dst":2}"#, "\n",
            r#"{"src":4,"dst":3}"#, "\n",
            r#"{"src":5,"dst":2}"#, "\n",
            r#"{"src":6,"dst":2}"#, "\n",
        )
    );

    // Roots artifact: one JSON integer per line, ascending
    assert_eq!(std::fs::read_to_string(&config.roots).unwrap(), "1\n");

    // Snapshot preserves per-target source order
    let snapshot = std::fs::read_to_string(&config.snapshot).unwrap();
    assert!(snapshot.contains(r#"{"target":2,"sources":[3,5,6]}"#));

    // Walk record layers group by depth in discovery order
    let walks = read_walks(&config.walks);
    assert_eq!(walks.len(), 1);
    let walk = &walks[0];
    assert_eq!(walk.start_node, PostId::new(1));
    assert_eq!(walk.walk_length, 6);
    assert_eq!(walk.walk_depth, 3);
    assert_eq!(walk.layer(2), [PostId::new(3), PostId::new(5), PostId::new(6)]);

    // Per-root mirror matches the aggregated record
    let mirror: WalkRecord = serde_json::from_str(
        &std::fs::read_to_string(config.walks_dir.join("1.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(&mirror, walk);
}

#[test]
fn forest_corpus_walks_every_root() {
    let dir = tempfile::tempdir().unwrap();
    // Two threads plus an isolated post
    let config = make_config(
        dir.path(),
        &[
            r#"{"post_id": 1}"#,
            r#"{"post_id": 2, "reply_to": 1}"#,
            r#"{"post_id": 10}"#,
            r#"{"post_id": 11, "quotes": 10}"#,
            r#"{"post_id": 99}"#,
        ],
    );

    let summary = WalkPipeline::new(config.clone()).unwrap().run().unwrap();
    assert_eq!(summary.roots_total, 3);
    assert_eq!(summary.walks_written, 3);

    let starts: HashSet<PostId> = read_walks(&config.walks)
        .iter()
        .map(|w| w.start_node)
        .collect();
    assert_eq!(
        starts,
        HashSet::from([PostId::new(1), PostId::new(10), PostId::new(99)])
    );

    // The isolated post is both a root and threadless
    assert_eq!(std::fs::read_to_string(&config.threadless).unwrap(), "99\n");
}

#[test]
fn interrupted_run_resumes_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let config = make_config(
        dir.path(),
        &[
            r#"{"post_id": 1}"#,
            r#"{"post_id": 2, "reply_to": 1}"#,
            r#"{"post_id": 10}"#,
            r#"{"post_id": 11, "reply_to": 10}"#,
        ],
    );

    // Simulate a killed run: one finished record plus a torn partial line
    std::fs::write(
        &config.walks,
        concat!(
            r#"{"start_node":1,"walk_length":2,"walk_depth":1,"walk_path":{"0":[1],"1":[2]}}"#,
            "\n",
            r#"{"start_node":10,"walk_le"#,
        ),
    )
    .unwrap();

    let summary = WalkPipeline::new(config.clone()).unwrap().run().unwrap();
    assert_eq!(summary.skipped_existing, 1);
    assert_eq!(summary.walks_written, 1);

    let starts: Vec<PostId> = read_walks(&config.walks)
        .iter()
        .map(|w| w.start_node)
        .collect();
    assert_eq!(starts, vec![PostId::new(1), PostId::new(10)]);
}

#[test]
fn repeated_extraction_is_deterministic() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let config_a = make_config(dir_a.path(), REPLY_TREE);
    let config_b = make_config(dir_b.path(), REPLY_TREE);

    WalkPipeline::new(config_a.clone()).unwrap().run().unwrap();
    WalkPipeline::new(config_b.clone()).unwrap().run().unwrap();

    for (a, b) in [
        (&config_a.edges, &config_b.edges),
        (&config_a.roots, &config_b.roots),
        (&config_a.snapshot, &config_b.snapshot),
        (&config_a.walks, &config_b.walks),
    ] {
        assert_eq!(std::fs::read(a).unwrap(), std::fs::read(b).unwrap());
    }
}

#[test]
fn snapshot_reload_preserves_walk_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = make_config(dir.path(), REPLY_TREE);

    WalkPipeline::new(config.clone()).unwrap().run().unwrap();
    let built = ReverseIndex::from_edge_file(&config.edges).unwrap();
    let loaded = ReverseIndex::load(&config.snapshot).unwrap();

    let from_built = WalkEngine::new(Arc::new(built)).traverse(PostId::new(1));
    let from_loaded = WalkEngine::new(Arc::new(loaded)).traverse(PostId::new(1));
    assert_eq!(from_built, from_loaded);
}

// ─────────────────────────────────────────────────────────────────────────────
// Partition + Minimize
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn partition_then_minimize_drops_threadless_posts() {
    let dir = tempfile::tempdir().unwrap();
    let config = make_config(
        dir.path(),
        &[
            r#"{"post_id": 1, "user_id": 100}"#,
            r#"{"post_id": 2, "user_id": 200, "reply_to": 1}"#,
            r#"{"post_id": 99, "user_id": 100}"#,
        ],
    );

    // Pipeline run writes the threadless lookup
    WalkPipeline::new(config.clone()).unwrap().run().unwrap();

    let driver = BatchDriver::new(2, 1).unwrap();
    let by_user = dir.path().join("by_user");
    let partition = PartitionConfig {
        input: config.posts.clone(),
        out_dir: by_user.clone(),
        max_open: 2,
        discipline: HandleDiscipline::GlobalLocked,
        checkpoint: None,
    };
    let (stats, report) = partition_by_user(&driver, &partition).unwrap();
    assert!(report.all_ok());
    assert_eq!(stats.written, 3);

    let exclusions = load_exclusions(&config.threadless).unwrap();
    assert_eq!(exclusions, HashSet::from([PostId::new(99)]));

    let minimized = dir.path().join("minimized.jsonl");
    let (stats, report) = minimize_corpus(&driver, &by_user, &minimized, exclusions).unwrap();
    assert!(report.all_ok());
    assert_eq!(stats.kept, 2);
    assert_eq!(stats.removed, 1);

    let content = std::fs::read_to_string(&minimized).unwrap();
    assert!(!content.contains("\"post_id\": 99"));
}
