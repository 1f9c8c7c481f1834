use lumen_photos::entities::{AiItemStatus, AiQueueStatus, AiTaskType, MigrationStatus};

#[test]
fn per_model_task_types_derive_compound_queue_keys() {
    assert_eq!(
        AiTaskType::ImageEmbedding.queue_key(Some("clip-vit-b32")),
        "image-embedding|clip-vit-b32"
    );
    assert_eq!(
        AiTaskType::TagEmbedding.queue_key(Some("clip-vit-b32")),
        "tag-embedding|clip-vit-b32"
    );
}

#[test]
fn aesthetic_scoring_ignores_the_model_in_its_key() {
    assert_eq!(
        AiTaskType::AestheticScoring.queue_key(Some("clip-vit-b32")),
        "aesthetic-scoring"
    );
    assert_eq!(AiTaskType::AestheticScoring.queue_key(None), "aesthetic-scoring");
}

#[test]
fn task_types_round_trip_through_their_string_form() {
    for task_type in [
        AiTaskType::ImageEmbedding,
        AiTaskType::TagEmbedding,
        AiTaskType::AestheticScoring,
    ] {
        let parsed: AiTaskType = task_type.as_str().parse().expect("parse failed");
        assert_eq!(parsed, task_type);
    }
    assert!("face-recognition".parse::<AiTaskType>().is_err());
}

#[test]
fn status_strings_match_their_wire_form() {
    assert_eq!(AiQueueStatus::Idle.as_str(), "idle");
    assert_eq!(AiQueueStatus::Processing.as_str(), "processing");
    assert_eq!(AiItemStatus::Pending.as_str(), "pending");
    assert_eq!(AiItemStatus::Failed.as_str(), "failed");
}

#[test]
fn migration_terminal_states_are_exactly_completed_failed_cancelled() {
    for status in [
        MigrationStatus::Completed,
        MigrationStatus::Failed,
        MigrationStatus::Cancelled,
    ] {
        assert!(status.is_terminal(), "{status} should be terminal");
    }
    for status in [
        MigrationStatus::Pending,
        MigrationStatus::Running,
        MigrationStatus::Paused,
    ] {
        assert!(!status.is_terminal(), "{status} should not be terminal");
    }
}
