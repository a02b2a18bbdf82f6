use mastery_core::model::{CourseId, QuestionId, StudentId};
use sqlx::Row;

use crate::repository::{ProgressRecord, StorageError};

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn student_id_from_i64(v: i64) -> Result<StudentId, StorageError> {
    Ok(StudentId::new(i64_to_u64("student_id", v)?))
}

pub(crate) fn course_id_from_i64(v: i64) -> Result<CourseId, StorageError> {
    Ok(CourseId::new(i64_to_u64("course_id", v)?))
}

pub(crate) fn question_id_from_i64(v: i64) -> Result<QuestionId, StorageError> {
    Ok(QuestionId::new(i64_to_u64("question_id", v)?))
}

pub(crate) fn id_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn map_progress_row(row: &sqlx::sqlite::SqliteRow) -> Result<ProgressRecord, StorageError> {
    let streak_i64: i64 = row.try_get("streak").map_err(ser)?;
    let streak: u32 = u32::try_from(streak_i64)
        .map_err(|_| StorageError::Serialization(format!("invalid streak: {streak_i64}")))?;

    let record = ProgressRecord {
        student_id: student_id_from_i64(row.try_get::<i64, _>("student_id").map_err(ser)?)?,
        course_id: course_id_from_i64(row.try_get::<i64, _>("course_id").map_err(ser)?)?,
        question_id: question_id_from_i64(row.try_get::<i64, _>("question_id").map_err(ser)?)?,
        streak,
        is_active: row.try_get("is_active").map_err(ser)?,
        is_mastered: row.try_get("is_mastered").map_err(ser)?,
        version: row.try_get("version").map_err(ser)?,
        created_at: row.try_get("created_at").map_err(ser)?,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    };

    // Surface invariant-violating rows as corruption rather than letting them
    // flow into the domain layer.
    record.to_progress().map_err(ser)?;

    Ok(record)
}
