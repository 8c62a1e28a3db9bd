//! Error handling tests: validation, missing records, locking and damaged files.

use knit_store::{
    Draft, Model, NewCalculation, NewNote, NewPhoto, NewProject, Note, NotePatch, Project,
    ProjectPatch, ProjectStatus, Query, RowId, SortOrder, Store, StoreConfig, StoreError,
};
use std::fs;
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        sync_on_commit: false,
        ..StoreConfig::at(dir.path().join("store"))
    }
}

fn test_store(dir: &TempDir) -> Store {
    Store::open_or_create(test_config(dir)).unwrap()
}

fn invalid_field<T: std::fmt::Debug>(result: Result<T, StoreError>) -> String {
    match result {
        Err(StoreError::Validation { field, .. }) => field,
        other => panic!("expected a validation error, got {:?}", other),
    }
}

// --- Validation ---

#[test]
fn test_validation_names_the_field() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    assert_eq!(
        invalid_field(store.create_project(NewProject::new("", ProjectStatus::Planned))),
        "name"
    );
    assert_eq!(
        invalid_field(store.create_project(NewProject {
            progress: Some(150.0),
            ..NewProject::new("Светр", ProjectStatus::InProgress)
        })),
        "progress"
    );

    let project = store
        .create_project(NewProject::new("Светр", ProjectStatus::InProgress))
        .unwrap();
    assert_eq!(
        invalid_field(store.add_calculation_to_project(project.id(), NewCalculation::new("", "t"))),
        "calculator_type"
    );
    assert_eq!(
        invalid_field(store.add_note(project.id(), NewNote::new("", ""))),
        "content"
    );
    assert_eq!(
        invalid_field(store.add_photo(project.id(), NewPhoto::new("", "front"))),
        "uri"
    );
    assert_eq!(
        invalid_field(store.update_project(
            project.id(),
            ProjectPatch {
                name: Some(String::new()),
                ..Default::default()
            }
        )),
        "name"
    );

    // Nothing invalid reached storage.
    assert_eq!(store.stats().row_count, 1);
}

#[test]
fn test_negative_progress_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let project = store
        .create_project(NewProject::new("Шапка", ProjectStatus::Planned))
        .unwrap();

    let result = store.update_project(
        project.id(),
        ProjectPatch {
            progress: Some(Some(-1.0)),
            ..Default::default()
        },
    );
    assert_eq!(invalid_field(result), "progress");
    assert_eq!(store.get_project(project.id()).unwrap(), project);
}

#[test]
fn test_update_cannot_empty_a_note() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let project = store
        .create_project(NewProject::new("Шарф", ProjectStatus::Planned))
        .unwrap();

    let note = store.add_note(project.id(), NewNote::new("", "k2p2")).unwrap();
    let result = store.update_note(
        note.id(),
        NotePatch {
            content: Some(String::new()),
            ..Default::default()
        },
    );
    assert_eq!(invalid_field(result), "content");
    assert_eq!(store.find::<Note>(note.id()).unwrap(), note);

    let renamed = store
        .update_note(
            note.id(),
            NotePatch {
                title: Some("Rib".into()),
                content: Some(String::new()),
            },
        )
        .unwrap();
    assert_eq!(renamed.title, "Rib");
    assert!(renamed.content.is_empty());
}

// --- Missing Records ---

#[test]
fn test_not_found() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let missing = RowId::from("no-such-project");

    assert!(matches!(
        store.get_project(&missing),
        Err(StoreError::NotFound { .. })
    ));
    assert!(matches!(
        store.update_project(&missing, ProjectPatch::default()),
        Err(StoreError::NotFound { .. })
    ));
    assert!(matches!(
        store.delete_project(&missing),
        Err(StoreError::NotFound { .. })
    ));
    assert!(matches!(
        store.destroy_project(&missing),
        Err(StoreError::NotFound { .. })
    ));
    assert!(matches!(
        store.toggle_favorite(&missing),
        Err(StoreError::NotFound { .. })
    ));
}

#[test]
fn test_child_of_missing_or_deleted_project() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let result = store.add_note(&RowId::from("ghost"), NewNote::new("a", "b"));
    assert!(matches!(result, Err(StoreError::NotFound { table, .. }) if table == "projects"));

    let project = store
        .create_project(NewProject::new("Шарф", ProjectStatus::Planned))
        .unwrap();
    store.delete_project(project.id()).unwrap();

    let result = store.add_calculation_to_project(project.id(), NewCalculation::new("yarn", "y"));
    assert!(matches!(result, Err(StoreError::NotFound { .. })));
    assert!(store.list_calculations(project.id()).unwrap().is_empty());
}

// --- Queries ---

#[test]
fn test_unknown_column_is_a_schema_error() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let by_colour = Query::<Project>::all().where_eq("colour", "red");
    assert!(matches!(store.fetch(&by_colour), Err(StoreError::Schema(_))));
    assert!(matches!(store.observe(&by_colour), Err(StoreError::Schema(_))));

    let sorted = Query::<Note>::all().sort_by("colour", SortOrder::Asc);
    assert!(matches!(store.count(&sorted), Err(StoreError::Schema(_))));
    assert_eq!(store.subscription_count(), 0);
}

#[test]
fn test_failed_transaction_rolls_back_every_write() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let result = store.write(|w| {
        let project = w.create(NewProject::new("Светр", ProjectStatus::Planned))?;
        w.create(NewNote::new("first", "ok").attach(project.id()))?;
        w.create(NewNote::new("", "").attach(project.id()))
    });
    assert!(matches!(result, Err(StoreError::Validation { .. })));
    assert_eq!(store.stats().row_count, 0);
}

// --- Opening ---

#[test]
fn test_open_uninitialized() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        Store::open(test_config(&dir)),
        Err(StoreError::NotInitialized)
    ));
}

#[test]
fn test_second_store_is_locked_out() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    assert!(matches!(
        Store::open_or_create(test_config(&dir)),
        Err(StoreError::Locked)
    ));

    drop(store);
    assert!(Store::open(test_config(&dir)).is_ok());
}

#[test]
fn test_bad_manifest() {
    let dir = TempDir::new().unwrap();
    drop(test_store(&dir));

    fs::write(dir.path().join("store").join("MANIFEST"), b"NOPE\x01").unwrap();
    assert!(matches!(
        Store::open(test_config(&dir)),
        Err(StoreError::InvalidFormat(_))
    ));
}

#[test]
fn test_damaged_batch_is_detected() {
    let dir = TempDir::new().unwrap();
    {
        let store = test_store(&dir);
        store
            .create_project(NewProject::new("a", ProjectStatus::Planned))
            .unwrap();
        store
            .create_project(NewProject::new("b", ProjectStatus::Planned))
            .unwrap();
    }

    // Flip a byte inside the first batch's payload.
    let path = dir.path().join("store").join("knit.db");
    let mut bytes = fs::read(&path).unwrap();
    bytes[11] ^= 0xff;
    fs::write(&path, bytes).unwrap();

    let result = Store::open(test_config(&dir));
    assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
    assert!(result.err().is_some_and(|e| e.is_storage()));
}

#[test]
fn test_torn_last_batch_is_dropped() {
    let dir = TempDir::new().unwrap();
    let kept = {
        let store = test_store(&dir);
        let kept = store
            .create_project(NewProject::new("kept", ProjectStatus::Planned))
            .unwrap();
        store
            .create_project(NewProject::new("torn", ProjectStatus::Planned))
            .unwrap();
        kept
    };

    let path = dir.path().join("store").join("knit.db");
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

    let store = Store::open(test_config(&dir)).unwrap();
    let projects = store.fetch(&Query::<Project>::all()).unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0], kept);
}
