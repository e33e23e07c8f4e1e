//! Diesel ORM models for database tables.
//!
//! These models provide compile-time type checking for database operations.
//! Conversion to domain types lives with the repositories.

use diesel::prelude::*;

use crate::schema;

/// Document record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::documents)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocumentRecord {
    pub id: String,
    pub content_hash: String,
    pub original_name: String,
    pub raw_path: String,
    pub processed_path: Option<String>,
    pub mime_type: String,
    pub size_bytes: i64,
    pub is_duplicate: i32,
    pub duplicate_of_id: Option<String>,
    pub extracted_text: Option<String>,
    pub extracted_metadata: Option<String>,
    pub skew_angles: Option<String>,
    pub quality_score: Option<f32>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// New document for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::documents)]
pub struct NewDocument<'a> {
    pub id: &'a str,
    pub content_hash: &'a str,
    pub original_name: &'a str,
    pub raw_path: &'a str,
    pub processed_path: Option<&'a str>,
    pub mime_type: &'a str,
    pub size_bytes: i64,
    pub is_duplicate: i32,
    pub duplicate_of_id: Option<&'a str>,
    pub extracted_text: Option<&'a str>,
    pub extracted_metadata: Option<&'a str>,
    pub skew_angles: Option<&'a str>,
    pub quality_score: Option<f32>,
    pub status: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Processing step record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::processing_steps)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProcessingStepRecord {
    pub id: i32,
    pub document_id: String,
    pub stage: String,
    pub status: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
    pub detail: Option<String>,
}

/// New processing step for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::processing_steps)]
pub struct NewProcessingStep<'a> {
    pub document_id: &'a str,
    pub stage: &'a str,
    pub status: &'a str,
    pub started_at: Option<&'a str>,
    pub completed_at: Option<&'a str>,
    pub error_message: Option<&'a str>,
    pub detail: Option<&'a str>,
}
