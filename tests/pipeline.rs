use std::sync::Arc;

use vaultctx::{
    Candidate,
    Config,
    DataDir,
    LocalFileStore,
    MatchKind,
    MemoryFileStore,
    Pipeline,
    RunOptions,
    SearchFlags,
    boost::MetadataBooster,
    store::FileRef,
};

fn readme_vault(notes_content: &str) -> Arc<MemoryFileStore> {
    Arc::new(
        MemoryFileStore::new()
            .with_file("docs/readme.md", "BM25 ranking explained", 1_000)
            .with_file("notes/readme.md", notes_content, 2_000)
            .with_file("journal/monday.md", "went for a long walk", 500),
    )
}

fn paths(output: &vaultctx::RunOutput) -> Vec<&str> {
    output.results.iter().map(|r| r.path.as_str()).collect()
}

#[tokio::test]
async fn distinct_readmes_both_survive() {
    let pipeline = Pipeline::new(
        readme_vault("BM25 ranking explained in detail"),
        Config::default(),
    );
    let output = pipeline.run("BM25", RunOptions::default()).await.unwrap();

    let mut found = paths(&output);
    found.sort();
    assert_eq!(found, vec!["docs/readme.md", "notes/readme.md"]);
    assert_eq!(output.stats.duplicates_removed, 0);
    assert!(
        output
            .results
            .iter()
            .all(|r| r.match_kind == MatchKind::Deduplicated)
    );
}

#[tokio::test]
async fn identical_readmes_keep_the_fresher() {
    let pipeline =
        Pipeline::new(readme_vault("BM25 ranking explained"), Config::default());
    let output = pipeline.run("BM25", RunOptions::default()).await.unwrap();

    assert_eq!(paths(&output), vec!["notes/readme.md"]);
    assert_eq!(output.stats.duplicates_removed, 1);
}

#[test]
fn readme_and_docs_paths_are_boosted() {
    let booster = MetadataBooster::default();
    let boost = |path: &str| {
        booster.path_boost(&Candidate::new(
            FileRef::new(path, 0, 0),
            MatchKind::Content,
        ))
    };
    assert_eq!(boost("docs/readme.md"), 2.0);
    assert_eq!(boost("docs/setup.md"), 1.5);
    assert_eq!(boost("journal/monday.md"), 1.0);
}

#[tokio::test]
async fn docs_path_boost_reorders_results() {
    let vault = || {
        Arc::new(
            MemoryFileStore::new()
                .with_file("aa/log.md", "plan plan for the week", 1_000)
                .with_file("docs/zeta.md", "plan for the year", 1_000),
        )
    };

    let boosted = Pipeline::new(vault(), Config::default())
        .run("plan", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(paths(&boosted), vec!["docs/zeta.md", "aa/log.md"]);

    let mut config = Config::default();
    config.stages.boost = false;
    let unboosted = Pipeline::new(vault(), config)
        .run("plan", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(paths(&unboosted), vec!["aa/log.md", "docs/zeta.md"]);
}

#[tokio::test]
async fn empty_query_browses_every_file() {
    let mut config = Config::default();
    config.stages.boost = false;
    let pipeline = Pipeline::new(
        Arc::new(
            MemoryFileStore::new()
                .with_file("a.md", "apples and pears", 1)
                .with_file("b/c.md", "a short story about boats", 2)
                .with_file("d.txt", "grocery list: milk, eggs", 3),
        ),
        config,
    );

    let output = pipeline.run("", RunOptions::default()).await.unwrap();
    assert_eq!(output.files_scanned, 3);
    assert_eq!(output.results_found, 3);
    assert!(output.results.iter().all(|r| r.score == 1.0));
    assert!(output.composed_query.is_empty());
}

#[tokio::test]
async fn misspelled_query_is_corrected_before_retrieval() {
    let mut config = Config::default();
    config
        .query
        .corrections
        .insert("recieve".into(), "receive".into());
    let pipeline = Pipeline::new(
        Arc::new(
            MemoryFileStore::new()
                .with_file("mail.md", "how to receive mail at home", 10)
                .with_file("other.md", "nothing relevant", 10),
        ),
        config,
    );

    let output = pipeline.run("recieve", RunOptions::default()).await.unwrap();
    assert_eq!(output.composed_query.corrected, "receive");
    assert_eq!(output.composed_query.confidence, 0.9);
    assert_eq!(paths(&output), vec!["mail.md"]);
    assert!(
        output
            .assembled_context
            .rendered
            .contains("how to receive mail at home")
    );
}

#[tokio::test]
async fn context_stays_within_budget() {
    let long = "word ".repeat(2_000);
    let pipeline = Pipeline::new(
        Arc::new(
            MemoryFileStore::new()
                .with_file("long.md", &long, 1)
                .with_file("short.md", "word", 2),
        ),
        Config::default(),
    );
    let options = RunOptions {
        token_budget: 300,
        ..Default::default()
    };

    let output = pipeline.run("word", options).await.unwrap();
    let context = &output.assembled_context;
    assert!(context.total_tokens <= 300);
    assert!(context.budget_exhausted);
}

#[tokio::test]
async fn search_and_context_share_one_indexed_vault() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
    let store = Arc::new(
        MemoryFileStore::new()
            .with_file("projects/rust.md", "# Rust\n#project\nownership rules", 5)
            .with_file("notes/cooking.md", "pasta with garlic", 6),
    );
    let pipeline = Pipeline::open(store, Config::default(), &data_dir).unwrap();

    let outcome = pipeline.refresh_index(true, None).await.unwrap();
    assert_eq!(outcome.documents, 2);

    let output = pipeline.run("ownership", RunOptions::default()).await.unwrap();
    assert!(output.stats.used_index);
    assert_eq!(paths(&output), vec!["projects/rust.md"]);

    let report = pipeline
        .search(
            "GARLIC",
            SearchFlags {
                whole_word: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!report.timed_out);
    assert_eq!(report.files_scanned, 2);
    let hits = &report.hits;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].file.path, "notes/cooking.md");
    assert_eq!(hits[0].match_type, MatchKind::Content);

    let suggestions = pipeline.complete("proj", 5).await.unwrap();
    let terms: Vec<_> = suggestions.iter().map(|s| s.term.as_str()).collect();
    assert!(terms.contains(&"projects"));
    assert!(terms.contains(&"project"));
}

#[tokio::test]
async fn vaults_sharing_a_data_dir_keep_separate_indexes() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
    let first = Arc::new(
        MemoryFileStore::new().with_file("a/secret.md", "alpha launch codes", 1),
    );
    let second = Arc::new(
        MemoryFileStore::new().with_file("b/public.md", "alpha release notes", 2),
    );

    let output = Pipeline::open(first, Config::default(), &data_dir)
        .unwrap()
        .run("alpha", RunOptions::default())
        .await
        .unwrap();
    assert!(output.stats.used_index);
    assert_eq!(paths(&output), vec!["a/secret.md"]);

    let pipeline = Pipeline::open(second, Config::default(), &data_dir).unwrap();
    let output = pipeline.run("alpha", RunOptions::default()).await.unwrap();
    assert!(output.stats.used_index);
    assert_eq!(paths(&output), vec!["b/public.md"]);
    let suggestions = pipeline.complete("", 10).await.unwrap();
    assert!(suggestions.iter().all(|s| s.term != "a"));
}

#[tokio::test]
async fn local_vaults_get_their_own_index_files() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = DataDir::resolve(Some(tmp.path().join("data").as_path())).unwrap();
    let mut index_files = Vec::new();

    for (name, body) in [("work", "alpha budget"), ("home", "alpha garden")] {
        let root = tmp.path().join(name);
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join(format!("{name}.md")), body).unwrap();

        let store = Arc::new(LocalFileStore::new(&root));
        let pipeline = Pipeline::open(store, Config::default(), &data_dir).unwrap();
        let output = pipeline.run("alpha", RunOptions::default()).await.unwrap();
        assert_eq!(paths(&output), vec![format!("{name}.md")]);
        index_files.push(pipeline.index().unwrap().path().to_path_buf());
    }

    assert_ne!(index_files[0], index_files[1]);
    assert!(index_files.iter().all(|p| p.exists()));
}
