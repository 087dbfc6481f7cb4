use std::path::Path;

use tempfile::TempDir;

use loam_knowledge::{
    ContextQuery, KnowledgeEngine, KnowledgeError, KnowledgeItem, KnowledgeSettings,
    ProjectContext, RecentActivityQuery, SearchItemType, SearchMode, SearchQuery,
};

async fn setup(files: &[(&str, &str)]) -> (KnowledgeEngine, ProjectContext, TempDir) {
    let temp = TempDir::new().expect("tempdir");
    let settings = KnowledgeSettings {
        data_root_override: Some(temp.path().join("data")),
        ..Default::default()
    };
    let engine = KnowledgeEngine::open(settings).await.expect("open engine");
    let project = engine
        .register_project("main", &temp.path().join("notes"))
        .await
        .expect("register project");
    for (relative, content) in files {
        write(&project.root, relative, content).await;
    }
    engine.sync(&project).await.expect("initial sync");
    (engine, project, temp)
}

async fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.unwrap();
    }
    tokio::fs::write(path, content).await.unwrap();
}

fn entity_permalinks(hits: &[loam_knowledge::SearchHit]) -> Vec<String> {
    let mut permalinks: Vec<String> = hits
        .iter()
        .filter(|hit| hit.item.item_type() == SearchItemType::Entity)
        .map(|hit| hit.item.permalink().to_string())
        .collect();
    permalinks.sort();
    permalinks
}

#[tokio::test]
async fn boolean_operators_are_whole_tokens() {
    let (engine, project, _temp) = setup(&[
        ("both.md", "Building web apps with python and flask.\n"),
        ("only-python.md", "Scripting in python.\n"),
        ("only-flask.md", "A flask of tea.\n"),
        ("grand.md", "The GRAND tour.\n"),
    ])
    .await;

    let mut query = SearchQuery::text("python AND flask");
    query.types = Some(vec![SearchItemType::Entity]);
    let response = engine.search(&project, &query).await.unwrap();
    assert_eq!(entity_permalinks(&response.results), vec!["both"]);

    let response = engine.search(&project, &SearchQuery::text("AND")).await.unwrap();
    assert!(
        response.results.iter().all(|hit| hit.item.permalink() != "grand"),
        "AND matched GRAND"
    );

    let mut query = SearchQuery::text("python OR flask");
    query.types = Some(vec![SearchItemType::Entity]);
    let response = engine.search(&project, &query).await.unwrap();
    assert_eq!(
        entity_permalinks(&response.results),
        vec!["both", "only-flask", "only-python"]
    );

    let mut query = SearchQuery::text("python NOT flask");
    query.types = Some(vec![SearchItemType::Entity]);
    let response = engine.search(&project, &query).await.unwrap();
    assert_eq!(entity_permalinks(&response.results), vec!["only-python"]);
}

#[tokio::test]
async fn search_modes_and_filters() {
    let (engine, project, _temp) = setup(&[
        ("specs/auth.md", "---\ntitle: Auth\ntype: spec\n---\n- [decision] Use tokens\n"),
        ("specs/billing.md", "---\ntitle: Billing\ntype: spec\n---\nInvoices.\n"),
        ("journal/today.md", "---\ntitle: Today\n---\nNothing about specs.\n"),
    ])
    .await;

    let response = engine
        .search(&project, &SearchQuery::new(SearchMode::Permalink("specs/auth".into())))
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert!(matches!(response.results[0].item, KnowledgeItem::Entity(_)));

    let mut query = SearchQuery::new(SearchMode::PermalinkPattern("specs/*".into()));
    query.types = Some(vec![SearchItemType::Entity]);
    let response = engine.search(&project, &query).await.unwrap();
    assert_eq!(entity_permalinks(&response.results), vec!["specs/auth", "specs/billing"]);

    let mut query = SearchQuery::text("tokens");
    query.types = Some(vec![SearchItemType::Observation]);
    let response = engine.search(&project, &query).await.unwrap();
    assert_eq!(response.results.len(), 1);
    match &response.results[0].item {
        KnowledgeItem::Observation(observation) => {
            assert_eq!(observation.category, "decision");
            assert_eq!(observation.title, "Auth");
        }
        other => panic!("expected observation, got {other:?}"),
    }

    let mut query = SearchQuery::new(SearchMode::PermalinkPattern("*".into()));
    query.types = Some(vec![SearchItemType::Entity]);
    query.entity_types = Some(vec!["spec".to_string()]);
    let response = engine.search(&project, &query).await.unwrap();
    assert_eq!(response.results.len(), 2);

    let mut query = SearchQuery::new(SearchMode::PermalinkPattern("*".into()));
    query.types = Some(vec![SearchItemType::Entity]);
    query.page_size = Some(2);
    let first = engine.search(&project, &query).await.unwrap();
    assert_eq!(first.results.len(), 2);
    assert!(first.has_more);
    query.page = 2;
    let second = engine.search(&project, &query).await.unwrap();
    assert_eq!(second.results.len(), 1);
    assert!(!second.has_more);
}

#[tokio::test]
async fn unbalanced_query_is_still_searchable() {
    let (engine, project, _temp) = setup(&[("a.md", "open paren text\n")]).await;
    let result = engine.search(&project, &SearchQuery::text("(open paren")).await;
    match result {
        Ok(response) => assert!(!response.results.is_empty()),
        Err(err) => assert!(matches!(err, KnowledgeError::InvalidQuery(_))),
    }
}

#[tokio::test]
async fn resolver_prefers_permalink_then_title() {
    let (engine, project, _temp) = setup(&[
        ("alpha.md", "---\ntitle: beta\n---\n"),
        ("beta.md", "---\ntitle: Gamma\n---\n"),
        ("sub/Deep Note.md", "deep\n"),
    ])
    .await;

    let hit = engine.resolve_link(&project, "beta", true).await.unwrap().unwrap();
    assert_eq!(hit.file_path, "beta.md");
    let hit = engine.resolve_link(&project, "Gamma", true).await.unwrap().unwrap();
    assert_eq!(hit.file_path, "beta.md");
    let hit = engine
        .resolve_link(&project, "[[sub/Deep Note.md|alias]]", true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.file_path, "sub/Deep Note.md");
    assert!(engine.resolve_link(&project, "nothing here", true).await.unwrap().is_none());
}

#[tokio::test]
async fn exact_title_beats_slugged_permalink() {
    let (engine, project, _temp) = setup(&[
        ("x.md", "---\ntitle: Foo Bar\n---\n"),
        ("foo-bar.md", "---\ntitle: Something Else\n---\n"),
    ])
    .await;

    let hit = engine.resolve_link(&project, "Foo Bar", true).await.unwrap().unwrap();
    assert_eq!(hit.file_path, "x.md");
    // With no title match the slug still finds the permalink.
    let hit = engine.resolve_link(&project, "Foo-Bar!", true).await.unwrap().unwrap();
    assert_eq!(hit.file_path, "foo-bar.md");
}

#[tokio::test]
async fn fuzzy_resolution_takes_highest_score() {
    let (engine, project, _temp) = setup(&[
        ("short.md", "---\ntitle: Rust Programming\n---\n"),
        (
            "long.md",
            "---\ntitle: Rust Programming Language Guide For Absolute Beginners\n---\n",
        ),
    ])
    .await;

    assert!(engine.resolve_link(&project, "programming rust", true).await.unwrap().is_none());
    let hit = engine
        .resolve_link(&project, "programming rust", false)
        .await
        .unwrap()
        .expect("fuzzy hit");
    assert_eq!(hit.file_path, "short.md");

    let mut query = SearchQuery::new(SearchMode::Title("programming rust".into()));
    query.types = Some(vec![SearchItemType::Entity]);
    let response = engine.search(&project, &query).await.unwrap();
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.results[0].item.permalink(), "short");
    assert!(response.results[0].score > response.results[1].score);
}

#[tokio::test]
async fn context_walks_relations_to_depth() {
    let (engine, project, _temp) = setup(&[
        ("a.md", "---\ntitle: A\n---\n- [fact] A is first\n- leads_to [[B]]\n"),
        ("b.md", "---\ntitle: B\n---\n- leads_to [[C]]\n"),
        ("c.md", "---\ntitle: C\n---\nend\n"),
    ])
    .await;

    let mut query = ContextQuery::new("memory://a");
    query.depth = Some(1);
    let context = engine.build_context(&project, &query).await.unwrap();
    assert_eq!(context.results.len(), 1);
    let result = &context.results[0];
    assert_eq!(result.primary_result.permalink(), "a");
    assert_eq!(result.observations.len(), 1);
    let reached: Vec<(u8, String)> = result
        .related_results
        .iter()
        .filter(|r| r.item.item_type() == SearchItemType::Entity)
        .map(|r| (r.depth, r.item.permalink().to_string()))
        .collect();
    assert_eq!(reached, vec![(1, "b".to_string())]);
    assert_eq!(context.metadata.primary_count, 1);
    assert_eq!(context.metadata.total_observations, 1);

    query.depth = Some(2);
    let context = engine.build_context(&project, &query).await.unwrap();
    let reached: Vec<(u8, String)> = context.results[0]
        .related_results
        .iter()
        .filter(|r| r.item.item_type() == SearchItemType::Entity)
        .map(|r| (r.depth, r.item.permalink().to_string()))
        .collect();
    assert_eq!(reached, vec![(1, "b".to_string()), (2, "c".to_string())]);

    query.depth = Some(200);
    let context = engine.build_context(&project, &query).await.unwrap();
    assert_eq!(context.metadata.depth, engine.settings().context.max_depth);

    let related = engine
        .build_context(&project, &ContextQuery::new("related/b"))
        .await
        .unwrap();
    let mut primaries: Vec<&str> = related
        .results
        .iter()
        .map(|r| r.primary_result.permalink())
        .collect();
    primaries.sort();
    assert_eq!(primaries, vec!["a", "c"]);

    let fuzzy = engine
        .build_context(&project, &ContextQuery::new("context/[[C]]"))
        .await
        .unwrap();
    assert_eq!(fuzzy.results[0].primary_result.permalink(), "c");
}

#[tokio::test]
async fn context_without_match_is_empty() {
    let (engine, project, _temp) = setup(&[("a.md", "text\n")]).await;
    for url in ["nothing/*", "missing", "related/missing", "memory://"] {
        let context = engine
            .build_context(&project, &ContextQuery::new(url))
            .await
            .unwrap();
        assert!(context.results.is_empty(), "{url} matched something");
        assert_eq!(context.metadata.primary_count, 0);
        assert_eq!(context.metadata.related_count, 0);
        assert!(!context.has_more);
    }
}

#[tokio::test]
async fn recent_activity_lists_new_items() {
    let (engine, project, _temp) = setup(&[
        ("one.md", "- [fact] first\n"),
        ("two.md", "links to [[one]]\n"),
    ])
    .await;

    // File timestamps drive updated_at, and the files were written just now.
    let recent = engine
        .recent_activity(&project, &RecentActivityQuery::default())
        .await
        .unwrap();
    let mut permalinks: Vec<&str> = recent
        .results
        .iter()
        .map(|r| r.primary_result.permalink())
        .collect();
    permalinks.sort();
    assert_eq!(permalinks, vec!["one", "two"]);
    assert_eq!(recent.metadata.types, vec![SearchItemType::Entity]);

    let query = RecentActivityQuery {
        timeframe: Some("next tuesday".to_string()),
        ..Default::default()
    };
    let err = engine.recent_activity(&project, &query).await.unwrap_err();
    assert!(matches!(err, KnowledgeError::InvalidTimeframe(_)));
}

#[tokio::test]
async fn exactly_one_default_project() {
    let (engine, main, temp) = setup(&[]).await;
    let side = engine
        .register_project("side", &temp.path().join("side"))
        .await
        .unwrap();

    assert!(engine.set_default_project(&main.name).await.unwrap());
    assert!(engine.set_default_project(&side.name).await.unwrap());
    let defaults: Vec<String> = engine
        .list_projects()
        .await
        .unwrap()
        .into_iter()
        .filter(|p| p.is_default)
        .map(|p| p.name)
        .collect();
    assert_eq!(defaults, vec!["side".to_string()]);

    assert!(!engine.set_default_project("missing").await.unwrap());
    assert_eq!(engine.default_project().await.unwrap(), Some(side));
}

#[tokio::test]
async fn reads_during_sync_see_whole_files() {
    let (engine, project, _temp) = setup(&[("hub.md", "# Hub\n")]).await;

    let unresolved = |engine: KnowledgeEngine| async move {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM relations WHERE to_id IS NULL")
            .fetch_one(engine.pool())
            .await
            .unwrap();
        count
    };

    let mut query = SearchQuery::text("marker");
    query.types = Some(vec![SearchItemType::Observation]);
    query.page_size = Some(100);

    for round in ["first", "second"] {
        for i in 0..30 {
            write(
                &project.root,
                &format!("batch/note-{i:02}.md"),
                &format!(
                    "- [fact] marker number {i} {round}\n- [fact] marker again {i}\n- about [[hub]]\n"
                ),
            )
            .await;
        }

        let syncing = {
            let engine = engine.clone();
            let project = project.clone();
            tokio::spawn(async move { engine.sync(&project).await })
        };

        let mut last = 0;
        loop {
            let response = engine.search(&project, &query).await.unwrap();
            let count = response.results.len();
            // Observations of one file commit together.
            assert_eq!(count % 2, 0, "saw half a file: {count}");
            assert!(count >= last);
            last = count;
            // Links of a committed file are already pointing at their target.
            assert_eq!(unresolved(engine.clone()).await, 0, "{round} pass");
            if syncing.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let report = syncing.await.unwrap().unwrap();
        assert_eq!(report.total(), 30);
        let response = engine.search(&project, &query).await.unwrap();
        assert_eq!(response.results.len(), 60);
    }
}
