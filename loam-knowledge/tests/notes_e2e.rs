use tempfile::TempDir;

use loam_knowledge::models::RelationTarget;
use loam_knowledge::{
    KnowledgeEngine, KnowledgeError, KnowledgeSettings, NoteWriteRequest, ProjectContext,
};

async fn setup() -> (KnowledgeEngine, ProjectContext, TempDir) {
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
    (engine, project, temp)
}

fn test_note_request() -> NoteWriteRequest {
    let mut request = NoteWriteRequest::new(
        "Test Note",
        "test",
        "# Test Note\n\nThis is test content.\n",
    );
    request.tags = vec!["test".to_string(), "integration".to_string()];
    request
}

#[tokio::test]
async fn write_then_read_test_note() {
    let (engine, project, _temp) = setup().await;

    let written = engine.write_note(&project, test_note_request()).await.unwrap();
    assert!(written.created);
    assert_eq!(written.file_path, "test/Test Note.md");
    assert_eq!(written.entity.permalink, "test/test-note");
    assert_eq!(written.entity.title, "Test Note");

    let doc = engine
        .read_note(&project, "test/test-note")
        .await
        .unwrap()
        .expect("note exists");
    assert!(doc.content.contains("# Test Note"));
    assert!(doc.content.contains("This is test content."));
    assert!(doc.content.contains("permalink: test/test-note"));
    assert_eq!(doc.entity.permalink, "test/test-note");
    assert_eq!(doc.entity.metadata["tags"], serde_json::json!(["test", "integration"]));
    assert_eq!(doc.entity.checksum, written.checksum);

    // Reading by title goes through the same resolver.
    let by_title = engine.read_note(&project, "Test Note").await.unwrap().unwrap();
    assert_eq!(by_title.entity.id, doc.entity.id);

    // The note is already indexed, so a sync has nothing to do.
    assert!(engine.sync(&project).await.unwrap().is_empty());
}

#[tokio::test]
async fn stale_checksum_refuses_write() {
    let (engine, project, _temp) = setup().await;
    let written = engine.write_note(&project, test_note_request()).await.unwrap();
    let c1 = written.checksum.clone();

    let path = project.root.join(&written.file_path);
    let edited = "---\ntitle: Test Note\n---\nEdited elsewhere.\n";
    tokio::fs::write(&path, edited).await.unwrap();

    let mut request = test_note_request();
    request.content = "overwrite attempt".to_string();
    request.expected_checksum = Some(c1);
    let err = engine.write_note(&project, request).await.unwrap_err();
    assert!(matches!(err, KnowledgeError::DirtyFile { .. }), "got {err:?}");

    let on_disk = tokio::fs::read_to_string(&path).await.unwrap();
    assert_eq!(on_disk, edited);
}

#[tokio::test]
async fn matching_checksum_allows_update() {
    let (engine, project, _temp) = setup().await;
    let written = engine.write_note(&project, test_note_request()).await.unwrap();

    let mut request = test_note_request();
    request.content = "- [decision] keep it small\n".to_string();
    request.expected_checksum = Some(written.checksum.clone());
    let updated = engine.write_note(&project, request).await.unwrap();
    assert!(!updated.created);
    assert_eq!(updated.entity.id, written.entity.id);
    assert_ne!(updated.checksum, written.checksum);

    let doc = engine.read_note(&project, "test/test-note").await.unwrap().unwrap();
    assert_eq!(doc.observations.len(), 1);
    assert_eq!(doc.observations[0].category, "decision");
}

#[tokio::test]
async fn explicit_permalink_collision_is_rejected() {
    let (engine, project, _temp) = setup().await;
    engine.write_note(&project, test_note_request()).await.unwrap();

    let mut other = NoteWriteRequest::new("Other", "", "body\n");
    other.permalink = Some("test/test-note".to_string());
    let err = engine.write_note(&project, other).await.unwrap_err();
    assert!(err.is_integrity());
    assert!(!project.root.join("Other.md").exists());
}

#[tokio::test]
async fn written_links_resolve_and_delete_demotes_them() {
    let (engine, project, _temp) = setup().await;
    engine.write_note(&project, test_note_request()).await.unwrap();
    engine
        .write_note(
            &project,
            NoteWriteRequest::new("Index", "", "- covers [[Test Note]]\n"),
        )
        .await
        .unwrap();

    let index = engine.read_note(&project, "index").await.unwrap().unwrap();
    assert!(matches!(index.relations[0].target, RelationTarget::Resolved(_)));
    let target = engine.read_note(&project, "test/test-note").await.unwrap().unwrap();
    assert_eq!(target.backlinks.len(), 1);
    assert_eq!(target.backlinks[0].from_id, index.entity.id);

    assert!(engine.delete_note(&project, "test/test-note").await.unwrap());
    assert!(!project.root.join("test/Test Note.md").exists());
    assert!(engine.read_note(&project, "test/test-note").await.unwrap().is_none());

    let index = engine.read_note(&project, "index").await.unwrap().unwrap();
    assert_eq!(
        index.relations[0].target,
        RelationTarget::Unresolved("Test Note".to_string())
    );
    assert!(!engine.delete_note(&project, "test/test-note").await.unwrap());
}

#[tokio::test]
async fn metadata_and_type_land_in_front_matter() {
    let (engine, project, _temp) = setup().await;
    let mut request = NoteWriteRequest::new("Auth Flow", "specs", "Login steps.\n");
    request.entity_type = Some("spec".to_string());
    request
        .metadata
        .insert("status".to_string(), serde_json::json!("draft"));
    let written = engine.write_note(&project, request).await.unwrap();
    assert_eq!(written.entity.entity_type, "spec");

    let doc = engine.read_note(&project, "specs/auth-flow").await.unwrap().unwrap();
    assert!(doc.content.contains("type: spec"));
    assert!(doc.content.contains("status: draft"));
    assert_eq!(doc.entity.metadata["status"], serde_json::json!("draft"));
}
