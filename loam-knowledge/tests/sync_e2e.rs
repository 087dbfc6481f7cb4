use std::path::Path;

use tempfile::TempDir;

use loam_knowledge::models::RelationTarget;
use loam_knowledge::{KnowledgeEngine, KnowledgeSettings, ProjectContext};

struct Fixture {
    engine: KnowledgeEngine,
    project: ProjectContext,
    _temp: TempDir,
}

impl Fixture {
    async fn setup() -> Self {
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
        Self {
            engine,
            project,
            _temp: temp,
        }
    }

    fn root(&self) -> &Path {
        &self.project.root
    }

    async fn write(&self, relative: &str, content: &str) {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, content).await.unwrap();
    }
}

#[tokio::test]
async fn second_sync_without_changes_is_empty() {
    let fx = Fixture::setup().await;
    fx.write("a.md", "---\ntitle: Alpha\n---\n- [idea] first #x\n- uses [[Beta]]\n")
        .await;
    fx.write("specs/beta.md", "---\ntitle: Beta\n---\nBack to [[Alpha]].\n")
        .await;
    fx.write("img/logo.png", "\u{89}PNG").await;

    let first = fx.engine.sync(&fx.project).await.unwrap();
    assert_eq!(first.new.len(), 3);
    assert_eq!(first.checksums.len(), 3);
    assert!(first.errors.is_empty());

    let dump = |engine: KnowledgeEngine| async move {
        let rows: Vec<(i64, String, String, String)> = sqlx::query_as(
            "SELECT id, permalink, checksum, updated_at FROM entities ORDER BY id",
        )
        .fetch_all(engine.pool())
        .await
        .unwrap();
        let relations: Vec<(i64, Option<i64>, String)> =
            sqlx::query_as("SELECT from_id, to_id, to_name FROM relations ORDER BY id")
                .fetch_all(engine.pool())
                .await
                .unwrap();
        (rows, relations)
    };
    let before = dump(fx.engine.clone()).await;

    let second = fx.engine.sync(&fx.project).await.unwrap();
    assert!(second.is_empty(), "unexpected changes: {second:?}");
    assert_eq!(second.total(), 0);
    assert_eq!(dump(fx.engine.clone()).await, before);
}

#[tokio::test]
async fn rename_is_reported_as_move() {
    let fx = Fixture::setup().await;
    fx.write("drafts/plan.md", "# Plan\n\nShip it.\n").await;
    fx.engine.sync(&fx.project).await.unwrap();
    let before = fx
        .engine
        .resolve_link(&fx.project, "drafts/plan", true)
        .await
        .unwrap()
        .expect("indexed");

    tokio::fs::create_dir_all(fx.root().join("done")).await.unwrap();
    tokio::fs::rename(
        fx.root().join("drafts/plan.md"),
        fx.root().join("done/plan.md"),
    )
    .await
    .unwrap();

    let report = fx.engine.sync(&fx.project).await.unwrap();
    assert!(report.new.is_empty());
    assert!(report.deleted.is_empty());
    assert_eq!(
        report.moves.get("drafts/plan.md").map(String::as_str),
        Some("done/plan.md")
    );

    let after = fx
        .engine
        .resolve_link(&fx.project, "done/plan", true)
        .await
        .unwrap()
        .expect("moved entity");
    assert_eq!(after.id, before.id);
    assert_eq!(after.file_path, "done/plan.md");
    assert!(
        fx.engine
            .resolve_link(&fx.project, "drafts/plan", true)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn forward_references_resolve_in_one_batch() {
    let fx = Fixture::setup().await;
    // "a-source" is processed before its target, "z-source" after.
    fx.write("a-source.md", "- depends_on [[Middle]]\n").await;
    fx.write("middle.md", "---\ntitle: Middle\n---\nplain\n").await;
    fx.write("z-source.md", "- depends_on [[Middle]]\n").await;

    let report = fx.engine.sync(&fx.project).await.unwrap();
    assert_eq!(report.new.len(), 3);

    let middle = fx
        .engine
        .resolve_link(&fx.project, "Middle", true)
        .await
        .unwrap()
        .expect("middle");
    for source in ["a-source", "z-source"] {
        let doc = fx
            .engine
            .read_note(&fx.project, source)
            .await
            .unwrap()
            .expect("source note");
        assert_eq!(doc.relations.len(), 1);
        assert_eq!(doc.relations[0].relation_type, "depends_on");
        assert_eq!(doc.relations[0].target, RelationTarget::Resolved(middle.id));
    }
}

#[tokio::test]
async fn late_target_upgrades_unresolved_relation() {
    let fx = Fixture::setup().await;
    fx.write("source.md", "See [[Later]].\n").await;
    fx.engine.sync(&fx.project).await.unwrap();

    let doc = fx.engine.read_note(&fx.project, "source").await.unwrap().unwrap();
    assert_eq!(
        doc.relations[0].target,
        RelationTarget::Unresolved("Later".to_string())
    );

    fx.write("later.md", "---\ntitle: Later\n---\n").await;
    fx.engine.sync(&fx.project).await.unwrap();
    let doc = fx.engine.read_note(&fx.project, "source").await.unwrap().unwrap();
    assert!(matches!(doc.relations[0].target, RelationTarget::Resolved(_)));

    tokio::fs::remove_file(fx.root().join("later.md")).await.unwrap();
    let report = fx.engine.sync(&fx.project).await.unwrap();
    assert!(report.deleted.contains("later.md"));
    let doc = fx.engine.read_note(&fx.project, "source").await.unwrap().unwrap();
    assert_eq!(doc.relations.len(), 1);
    assert_eq!(
        doc.relations[0].target,
        RelationTarget::Unresolved("Later".to_string())
    );
}

#[tokio::test]
async fn modified_file_is_reindexed() {
    let fx = Fixture::setup().await;
    fx.write("note.md", "- [fact] one\n").await;
    fx.engine.sync(&fx.project).await.unwrap();

    fx.write("note.md", "- [fact] one\n- [fact] two and more\n").await;
    let report = fx.engine.sync(&fx.project).await.unwrap();
    assert!(report.modified.contains("note.md"));

    let doc = fx.engine.read_note(&fx.project, "note").await.unwrap().unwrap();
    let contents: Vec<&str> = doc.observations.iter().map(|o| o.content.as_str()).collect();
    assert_eq!(contents, vec!["one", "two and more"]);
}

#[tokio::test]
async fn duplicate_permalinks() {
    let fx = Fixture::setup().await;
    fx.write("a b.md", "first\n").await;
    fx.write("a-b.md", "second\n").await;
    fx.write("x.md", "---\npermalink: shared\n---\n").await;
    fx.write("y.md", "---\npermalink: shared\n---\n").await;

    let report = fx.engine.sync(&fx.project).await.unwrap();
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].path, "y.md");

    let first = fx.engine.resolve_link(&fx.project, "a-b", true).await.unwrap().unwrap();
    assert_eq!(first.file_path, "a b.md");
    let second = fx.engine.resolve_link(&fx.project, "a-b-1", true).await.unwrap().unwrap();
    assert_eq!(second.file_path, "a-b.md");
    let shared = fx.engine.resolve_link(&fx.project, "shared", true).await.unwrap().unwrap();
    assert_eq!(shared.file_path, "x.md");
}

#[tokio::test]
async fn hidden_and_temp_files_are_ignored() {
    let fx = Fixture::setup().await;
    fx.write(".obsidian/workspace.md", "ignored\n").await;
    fx.write(".draft.md", "ignored\n").await;
    fx.write("note.md.tmp", "ignored\n").await;
    fx.write("visible.md", "kept\n").await;

    let report = fx.engine.sync(&fx.project).await.unwrap();
    assert_eq!(report.new.iter().collect::<Vec<_>>(), vec!["visible.md"]);
}

#[tokio::test]
async fn last_sync_is_recorded() {
    let fx = Fixture::setup().await;
    assert!(fx.engine.last_sync(&fx.project).await.unwrap().is_none());

    // Nothing to do, nothing recorded.
    assert!(fx.engine.sync(&fx.project).await.unwrap().is_empty());
    assert!(fx.engine.last_sync(&fx.project).await.unwrap().is_none());

    fx.write("a.md", "# A\n").await;
    fx.engine.sync(&fx.project).await.unwrap();
    let recorded = fx.engine.last_sync(&fx.project).await.unwrap();
    assert!(recorded.is_some());

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(fx.engine.sync(&fx.project).await.unwrap().is_empty());
    assert_eq!(fx.engine.last_sync(&fx.project).await.unwrap(), recorded);
}

/// (source path, target path) for every relation, by file rather than id.
async fn relation_targets(engine: &KnowledgeEngine) -> Vec<(String, String, Option<String>)> {
    sqlx::query_as(
        r#"SELECT src.file_path, r.to_name, dst.file_path
           FROM relations r
           JOIN entities src ON src.id = r.from_id
           LEFT JOIN entities dst ON dst.id = r.to_id
           ORDER BY src.file_path, r.to_name"#,
    )
    .fetch_all(engine.pool())
    .await
    .unwrap()
}

#[tokio::test]
async fn incremental_sync_matches_fresh_rebuild() {
    let fx = Fixture::setup().await;
    fx.write("a.md", "- uses [[foo]]\n- cites [[Guide]]\n").await;
    fx.write("x.md", "---\ntitle: foo\n---\nbody\n").await;
    fx.engine.sync(&fx.project).await.unwrap();
    assert_eq!(
        relation_targets(&fx.engine).await[1],
        ("a.md".to_string(), "foo".to_string(), Some("x.md".to_string()))
    );

    // A permalink match outranks the title match already linked.
    fx.write("foo.md", "# foo\n").await;
    fx.write("docs/guide.md", "---\ntitle: Guide\n---\n").await;
    fx.engine.sync(&fx.project).await.unwrap();
    let incremental = relation_targets(&fx.engine).await;

    let rebuilt = Fixture::setup().await;
    for (path, body) in [
        ("a.md", "- uses [[foo]]\n- cites [[Guide]]\n"),
        ("x.md", "---\ntitle: foo\n---\nbody\n"),
        ("foo.md", "# foo\n"),
        ("docs/guide.md", "---\ntitle: Guide\n---\n"),
    ] {
        rebuilt.write(path, body).await;
    }
    rebuilt.engine.sync(&rebuilt.project).await.unwrap();

    assert_eq!(incremental, relation_targets(&rebuilt.engine).await);
    assert!(incremental.contains(&(
        "a.md".to_string(),
        "foo".to_string(),
        Some("foo.md".to_string())
    )));

    // Removing the better target falls back to the title match again.
    tokio::fs::remove_file(fx.root().join("foo.md")).await.unwrap();
    fx.engine.sync(&fx.project).await.unwrap();
    assert!(relation_targets(&fx.engine).await.contains(&(
        "a.md".to_string(),
        "foo".to_string(),
        Some("x.md".to_string())
    )));
}
