mod common;

use std::sync::Arc;

use chrono::Utc;
use common::Fixture;
use geosync::config::GeoFeatures;
use geosync::error::Result;
use geosync::geo::{HealthCheck, StatusAggregator};
use geosync::store::Store;
use geosync::types::{FileRegistry, FileType, NewEvent, EventType, NewUpload, UploadModel};

struct Healthy;

impl HealthCheck for Healthy {
    fn process_checks(&self, _tags: &[&str]) -> Result<String> {
        Ok(String::new())
    }

    fn db_replication_lag(&self) -> Result<Option<i64>> {
        Ok(Some(7))
    }
}

fn aggregator(fixture: &Fixture) -> StatusAggregator {
    StatusAggregator::new(fixture.dyn_store(), Arc::new(Healthy), GeoFeatures::default())
}

#[test]
fn test_restricted_node_counts_only_selected_namespaces() {
    let fixture = Fixture::new();
    let secondary = fixture.secondary("http://secondary.example.com/", 10);

    let selected = fixture.namespace("selected", None);
    let other = fixture.namespace("other", None);
    let a = fixture.project(&selected, "a");
    let _b = fixture.project(&selected, "b");
    let c = fixture.project(&other, "c");
    let _d = fixture.project(&other, "d");

    let secondary = fixture.restrict(&secondary, &[selected.id]);
    fixture.mark_synced(&secondary, &a);
    // Outside the selection, so invisible to the counts.
    fixture.mark_synced(&secondary, &c);

    let status = aggregator(&fixture).compute(&secondary);

    assert!(status.healthy);
    assert_eq!(status.db_replication_lag, Some(7));
    assert_eq!(status.repositories_count, 2);
    assert_eq!(status.repositories_synced_count, 1);
    assert_eq!(status.repositories_failed_count, 0);
    assert!((status.repositories_synced_in_percentage - 50.0).abs() < 1e-9);
}

#[test]
fn test_restriction_never_grows_counts() {
    let fixture = Fixture::new();
    let secondary = fixture.secondary("http://secondary.example.com/", 10);

    let parent = fixture.namespace("parent", None);
    let child = fixture.namespace("child", Some(&parent));
    let other = fixture.namespace("other", None);
    let synced = fixture.project(&child, "nested");
    let failed = fixture.project(&other, "elsewhere");
    fixture.project(&parent, "top");

    fixture.mark_synced(&secondary, &synced);
    fixture.mark_failed(&secondary, &failed);

    let unrestricted = aggregator(&fixture).compute(&secondary);
    let restricted_node = fixture.restrict(&secondary, &[parent.id]);
    let restricted = aggregator(&fixture).compute(&restricted_node);

    assert_eq!(unrestricted.repositories_count, 3);
    assert_eq!(unrestricted.repositories_failed_count, 1);
    // Descendant namespaces stay visible.
    assert_eq!(restricted.repositories_count, 2);
    assert_eq!(restricted.repositories_synced_count, 1);
    assert_eq!(restricted.repositories_failed_count, 0);

    assert!(restricted.repositories_count <= unrestricted.repositories_count);
    assert!(restricted.repositories_synced_count <= unrestricted.repositories_synced_count);
}

#[test]
fn test_empty_event_log_reports_unknown_events() {
    let fixture = Fixture::new();
    let secondary = fixture.secondary("http://secondary.example.com/", 10);

    let status = aggregator(&fixture).compute(&secondary);

    assert_eq!(status.last_event_id, None);
    assert_eq!(status.last_event_date, None);
    assert_eq!(status.cursor_last_event_id, None);
    assert_eq!(status.repositories_count, 0);
    assert_eq!(status.repositories_synced_in_percentage, 0.0);
}

#[test]
fn test_last_event_and_cursor() {
    let fixture = Fixture::new();
    let secondary = fixture.secondary("http://secondary.example.com/", 10);
    let ns = fixture.namespace("group", None);
    let project = fixture.project(&ns, "repo");

    let first = fixture
        .store
        .append_event(&NewEvent {
            event_type: EventType::RepositoryUpdated,
            project_id: project.id,
            source: None,
        })
        .unwrap();
    let second = fixture
        .store
        .append_event(&NewEvent {
            event_type: EventType::RepositoryUpdated,
            project_id: project.id,
            source: None,
        })
        .unwrap();
    fixture.store.advance_event_cursor(secondary.id, first.id).unwrap();

    let status = aggregator(&fixture).compute(&secondary);
    assert_eq!(status.last_event_id, Some(second.id));
    assert_eq!(status.cursor_last_event_id, Some(first.id));
    assert!(status.cursor_last_event_date.is_some());

    // The primary has no cursor of its own.
    let primary_status = aggregator(&fixture).compute(&fixture.primary);
    assert_eq!(primary_status.last_event_id, Some(second.id));
    assert_eq!(primary_status.cursor_last_event_id, None);
    assert!(primary_status.healthy);
}

#[test]
fn test_file_counts() {
    let fixture = Fixture::new();
    let secondary = fixture.secondary("http://secondary.example.com/", 10);
    let ns = fixture.namespace("group", None);
    let project = fixture.project(&ns, "repo");
    let store = &fixture.store;

    let lfs: Vec<_> = (0..4)
        .map(|i| {
            let object = store.create_lfs_object(&format!("{i:064x}"), 100).unwrap();
            store.link_lfs_object(object.id, project.id).unwrap();
            object
        })
        .collect();

    let upload = |model_type, model_id, path: &str| {
        store
            .create_upload(&NewUpload {
                model_type,
                model_id,
                uploader: "AttachmentUploader".to_string(),
                path: path.to_string(),
                size: 10,
            })
            .unwrap()
    };
    let attachment = upload(UploadModel::Project, project.id, "uploads/a.png");
    let avatar = upload(UploadModel::Namespace, ns.id, "uploads/avatar.png");

    let synced = |file_type, file_id| {
        store
            .record_file_synced(&FileRegistry {
                node_id: secondary.id,
                file_type,
                file_id,
                bytes: 100,
                sha256: None,
                created_at: Utc::now(),
            })
            .unwrap();
    };
    synced(FileType::Lfs, lfs[0].id);
    synced(FileType::Lfs, lfs[1].id);
    synced(FileType::Attachment, attachment.id);
    store
        .record_file_failure(secondary.id, FileType::Lfs, lfs[2].id, "checksum mismatch")
        .unwrap();
    store
        .record_file_failure(secondary.id, FileType::Avatar, avatar.id, "timeout")
        .unwrap();

    let status = aggregator(&fixture).compute(&secondary);

    assert_eq!(status.lfs_objects_count, 4);
    assert_eq!(status.lfs_objects_synced_count, 2);
    assert_eq!(status.lfs_objects_failed_count, 1);
    assert!((status.lfs_objects_synced_in_percentage - 50.0).abs() < 1e-9);

    assert_eq!(status.attachments_count, 2);
    assert_eq!(status.attachments_synced_count, 1);
    assert_eq!(status.attachments_failed_count, 1);
}
