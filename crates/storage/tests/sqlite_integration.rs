use mastery_core::model::{CourseId, QuestionId, QuestionProgress, StudentId};
use mastery_core::time::fixed_now;
use storage::repository::{ProgressRecord, ProgressRepository, StorageError};
use storage::sqlite::SqliteRepository;

fn build_record(student: u64, course: u64, question: u64, active: bool) -> ProgressRecord {
    let progress = if active {
        QuestionProgress::new_active(QuestionId::new(question))
    } else {
        QuestionProgress::new_inactive(QuestionId::new(question))
    };
    ProgressRecord::new(
        StudentId::new(student),
        CourseId::new(course),
        &progress,
        fixed_now(),
    )
}

#[tokio::test]
async fn sqlite_roundtrip_preserves_flags_and_order() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_roundtrip?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    repo.insert_progress(&[
        build_record(1, 1, 2, false),
        build_record(1, 1, 1, true),
        build_record(1, 1, 3, true),
    ])
    .await
    .unwrap();

    let fetched = repo
        .get_progress(StudentId::new(1), CourseId::new(1))
        .await
        .expect("fetch");
    assert_eq!(fetched.len(), 3);
    let ids: Vec<u64> = fetched.iter().map(|r| r.question_id.value()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(fetched[0].is_active);
    assert!(!fetched[1].is_active);
    assert!(fetched.iter().all(|r| r.version == 1 && r.streak == 0));

    // Another pair sees nothing.
    let other = repo
        .get_progress(StudentId::new(2), CourseId::new(1))
        .await
        .unwrap();
    assert!(other.is_empty());
}

#[tokio::test]
async fn sqlite_rejects_duplicate_initialization() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_duplicate?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    repo.insert_progress(&[build_record(1, 1, 1, true)])
        .await
        .unwrap();

    let err = repo
        .insert_progress(&[build_record(1, 1, 2, true), build_record(1, 1, 1, true)])
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict));

    // The failed batch must not have written its first row either.
    let fetched = repo
        .get_progress(StudentId::new(1), CourseId::new(1))
        .await
        .unwrap();
    assert_eq!(fetched.len(), 1);
}

#[tokio::test]
async fn sqlite_update_answer_commits_mastery_and_promotion_together() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_update?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    repo.insert_progress(&[
        build_record(1, 1, 1, true),
        build_record(1, 1, 2, true),
        build_record(1, 1, 3, false),
    ])
    .await
    .unwrap();

    let stored = repo
        .get_progress(StudentId::new(1), CourseId::new(1))
        .await
        .unwrap();
    let mut update = stored[0].clone();
    update.streak = 3;
    update.is_mastered = true;
    update.is_active = false;

    repo.update_answer(&update, &[QuestionId::new(3)])
        .await
        .unwrap();

    let after = repo
        .get_progress(StudentId::new(1), CourseId::new(1))
        .await
        .unwrap();
    assert!(after[0].is_mastered);
    assert!(!after[0].is_active);
    assert_eq!(after[0].version, 2);
    assert!(after[2].is_active);
    assert_eq!(after[2].version, 2);
}

#[tokio::test]
async fn sqlite_stale_version_loses_the_race() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_stale?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    repo.insert_progress(&[build_record(1, 1, 1, true)])
        .await
        .unwrap();

    let stored = repo
        .get_progress(StudentId::new(1), CourseId::new(1))
        .await
        .unwrap();

    let mut first = stored[0].clone();
    first.streak = 1;
    repo.update_answer(&first, &[]).await.unwrap();

    let mut second = stored[0].clone();
    second.streak = 1;
    let err = repo.update_answer(&second, &[]).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict));

    let after = repo
        .get_progress(StudentId::new(1), CourseId::new(1))
        .await
        .unwrap();
    assert_eq!(after[0].streak, 1);
    assert_eq!(after[0].version, 2);
}

#[tokio::test]
async fn sqlite_aborts_when_promotion_target_taken() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_promotion?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    repo.insert_progress(&[build_record(1, 1, 1, true), build_record(1, 1, 2, true)])
        .await
        .unwrap();

    let stored = repo
        .get_progress(StudentId::new(1), CourseId::new(1))
        .await
        .unwrap();
    let mut update = stored[0].clone();
    update.streak = 3;
    update.is_mastered = true;
    update.is_active = false;

    // q2 is already active: the promotion misses and the mastery rolls back.
    let err = repo
        .update_answer(&update, &[QuestionId::new(2)])
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict));

    let after = repo
        .get_progress(StudentId::new(1), CourseId::new(1))
        .await
        .unwrap();
    assert!(!after[0].is_mastered);
    assert_eq!(after[0].version, 1);
}

#[tokio::test]
async fn sqlite_update_of_unknown_record_is_not_found() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_missing?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    let ghost = build_record(9, 9, 9, true);
    let err = repo.update_answer(&ghost, &[]).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
}
