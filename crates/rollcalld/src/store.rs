//! SQLite persistence for persons, encodings and attendance records.
//!
//! All access goes through [`Store`], a thin async wrapper over a
//! `tokio_rusqlite` connection. The schema enforces the two uniqueness
//! invariants the service relies on: one person per `student_id` and at
//! most one attendance record per `(student_id, date)`.

use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::{Encoding, KnownFace};
use rusqlite::types::Type;
use rusqlite::OptionalExtension;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("person already exists: {0}")]
    PersonExists(String),
    #[error("encoding serialization: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
}

type Result<T> = std::result::Result<T, StoreError>;

/// A registered person, without encodings.
#[derive(Debug, Clone, Serialize)]
pub struct Person {
    pub student_id: String,
    pub name: String,
    pub email: Option<String>,
    pub department: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// One attendance record to insert.
#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub id: String,
    pub student_id: String,
    pub timestamp: DateTime<Utc>,
    pub date: NaiveDate,
    pub check_in_time: String,
    pub confidence: f32,
    pub location: String,
}

/// Outcome of an attendance insert.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkResult {
    Marked { attendance_id: String },
    /// The `(student_id, date)` constraint fired: a record already exists
    /// for this person today.
    AlreadyMarked,
}

/// One row of today's attendance, joined with the person's display name.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceEntry {
    pub student_id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub check_in_time: String,
    pub confidence: f32,
    pub location: String,
}

/// Per-person aggregate over a date range.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceGroup {
    pub student_id: String,
    pub name: String,
    pub days_present: i64,
    pub dates: Vec<NaiveDate>,
}

/// One historical record for a single person.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub date: NaiveDate,
    pub check_in_time: String,
    pub confidence: f32,
    pub location: String,
    pub status: String,
}

/// Overall attendance statistics.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total_registered: i64,
    pub present_today: i64,
    pub absent_today: i64,
    /// Mean of per-day attendance counts for the current month, 2 decimals.
    pub average_daily: f64,
    /// present / total × 100, 2 decimals. 0 when nobody is registered.
    pub attendance_rate: f64,
}

#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    pub async fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).await?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Ok(Self { conn })
    }

    /// Apply pending schema migrations, keyed off `pragma user_version`.
    pub async fn migrate(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                let version: usize =
                    conn.query_row("SELECT user_version FROM pragma_user_version;", [], |row| {
                        row.get(0)
                    })?;

                if version < 1 {
                    conn.execute_batch(include_str!("sql/001-initial.sql"))?;
                    conn.pragma_update(None, "user_version", 1)?;
                    tracing::info!("database schema migrated to version 1");
                }

                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Load every enrolled (encoding, name, identifier) triple in enrollment
    /// order, for the in-memory gallery.
    pub async fn load_known_faces(&self) -> Result<Vec<KnownFace>> {
        let faces = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT e.student_id, p.name, e.vector
                     FROM encodings e
                     JOIN persons p ON p.student_id = e.student_id
                     ORDER BY e.id ASC",
                )?;
                let rows = stmt.query_map([], |row| {
                    let vector: String = row.get(2)?;
                    let values: Vec<f32> = serde_json::from_str(&vector).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
                    })?;
                    Ok(KnownFace {
                        student_id: row.get(0)?,
                        name: row.get(1)?,
                        encoding: Encoding::new(values),
                    })
                })?;
                Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(faces)
    }

    pub async fn get_person(&self, student_id: &str) -> Result<Option<Person>> {
        let student_id = student_id.to_string();
        let person = self
            .conn
            .call(move |conn| {
                let person = conn
                    .query_row(
                        "SELECT student_id, name, email, department, registered_at, last_seen
                         FROM persons WHERE student_id = ?1",
                        [&student_id],
                        person_from_row,
                    )
                    .optional()?;
                Ok(person)
            })
            .await?;
        Ok(person)
    }

    /// Create a person record. A `student_id` collision — including one
    /// raced in by a concurrent registration — reports `PersonExists`.
    pub async fn create_person(
        &self,
        student_id: &str,
        name: &str,
        email: Option<String>,
        department: Option<String>,
        registered_at: DateTime<Utc>,
    ) -> Result<()> {
        let id = student_id.to_string();
        let id_for_error = student_id.to_string();
        let name = name.to_string();
        let created = self
            .conn
            .call(move |conn| {
                let result = conn.execute(
                    "INSERT INTO persons (student_id, name, email, department, registered_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![id, name, email, department, registered_at.to_rfc3339()],
                );
                match result {
                    Ok(_) => Ok(true),
                    Err(e) if is_constraint_violation(&e) => Ok(false),
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        if created {
            Ok(())
        } else {
            Err(StoreError::PersonExists(id_for_error))
        }
    }

    /// Append one encoding (and its reference image path) to a person.
    pub async fn append_encoding(
        &self,
        student_id: &str,
        encoding: &Encoding,
        image_path: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let vector = serde_json::to_string(&encoding.values)?;
        let student_id = student_id.to_string();
        let image_path = image_path.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO encodings (student_id, vector, image_path, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![student_id, vector, image_path, created_at.to_rfc3339()],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn list_persons(&self) -> Result<Vec<Person>> {
        let persons = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT student_id, name, email, department, registered_at, last_seen
                     FROM persons ORDER BY name ASC",
                )?;
                let rows = stmt.query_map([], person_from_row)?;
                Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(persons)
    }

    /// Insert an attendance record, relying on the `(student_id, date)`
    /// uniqueness constraint for once-per-day semantics. On success the
    /// person's `last_seen` is advanced; a constraint violation is the
    /// benign "already marked" outcome, not an error.
    pub async fn mark_attendance(&self, record: NewAttendance) -> Result<MarkResult> {
        let result = self
            .conn
            .call(move |conn| {
                let inserted = conn.execute(
                    "INSERT INTO attendance
                       (id, student_id, timestamp, date, check_in_time, confidence, location)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        record.id,
                        record.student_id,
                        record.timestamp.to_rfc3339(),
                        record.date.to_string(),
                        record.check_in_time,
                        record.confidence as f64,
                        record.location,
                    ],
                );
                match inserted {
                    Ok(_) => {
                        conn.execute(
                            "UPDATE persons SET last_seen = ?1 WHERE student_id = ?2",
                            rusqlite::params![record.timestamp.to_rfc3339(), record.student_id],
                        )?;
                        Ok(MarkResult::Marked {
                            attendance_id: record.id,
                        })
                    }
                    Err(e) if is_constraint_violation(&e) => Ok(MarkResult::AlreadyMarked),
                    Err(e) => Err(e.into()),
                }
            })
            .await?;
        Ok(result)
    }

    /// All records for the given date, newest first, with display names.
    pub async fn attendance_for_date(&self, date: NaiveDate) -> Result<Vec<AttendanceEntry>> {
        let date = date.to_string();
        let entries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT a.student_id, p.name, a.timestamp, a.check_in_time,
                            a.confidence, a.location
                     FROM attendance a
                     JOIN persons p ON p.student_id = a.student_id
                     WHERE a.date = ?1
                     ORDER BY a.timestamp DESC",
                )?;
                let rows = stmt.query_map([&date], |row| {
                    Ok(AttendanceEntry {
                        student_id: row.get(0)?,
                        name: row.get(1)?,
                        timestamp: timestamp_from_column(row.get(2)?, 2)?,
                        check_in_time: row.get(3)?,
                        confidence: row.get::<_, f64>(4)? as f32,
                        location: row.get(5)?,
                    })
                })?;
                Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(entries)
    }

    /// Inclusive date-range aggregate: days present and the attended dates
    /// per person, ordered by display name.
    pub async fn attendance_report(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AttendanceGroup>> {
        let start = start.to_string();
        let end = end.to_string();
        let groups = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT a.student_id, p.name, COUNT(*), GROUP_CONCAT(a.date)
                     FROM attendance a
                     JOIN persons p ON p.student_id = a.student_id
                     WHERE a.date >= ?1 AND a.date <= ?2
                     GROUP BY a.student_id
                     ORDER BY p.name ASC",
                )?;
                let rows = stmt.query_map([&start, &end], |row| {
                    let concatenated: String = row.get(3)?;
                    let mut dates = concatenated
                        .split(',')
                        .map(|d| {
                            NaiveDate::parse_from_str(d, "%Y-%m-%d").map_err(|e| {
                                rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e))
                            })
                        })
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    dates.sort_unstable();
                    Ok(AttendanceGroup {
                        student_id: row.get(0)?,
                        name: row.get(1)?,
                        days_present: row.get(2)?,
                        dates,
                    })
                })?;
                Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(groups)
    }

    /// Most recent records for one person, newest first.
    pub async fn attendance_history(
        &self,
        student_id: &str,
        limit: u32,
    ) -> Result<Vec<AttendanceRecord>> {
        let student_id = student_id.to_string();
        let records = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, timestamp, date, check_in_time, confidence, location, status
                     FROM attendance
                     WHERE student_id = ?1
                     ORDER BY date DESC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(rusqlite::params![student_id, limit], |row| {
                    Ok(AttendanceRecord {
                        id: row.get(0)?,
                        timestamp: timestamp_from_column(row.get(1)?, 1)?,
                        date: date_from_column(row.get(2)?, 2)?,
                        check_in_time: row.get(3)?,
                        confidence: row.get::<_, f64>(4)? as f32,
                        location: row.get(5)?,
                        status: row.get(6)?,
                    })
                })?;
                Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(records)
    }

    /// Headline numbers for the dashboard. `month_start` bounds the
    /// average-daily-attendance window to the current calendar month.
    pub async fn statistics(&self, today: NaiveDate, month_start: NaiveDate) -> Result<Statistics> {
        let today = today.to_string();
        let month_start = month_start.to_string();
        let stats = self
            .conn
            .call(move |conn| {
                let total_registered: i64 =
                    conn.query_row("SELECT COUNT(*) FROM persons", [], |row| row.get(0))?;
                let present_today: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM attendance WHERE date = ?1",
                    [&today],
                    |row| row.get(0),
                )?;
                // AVG over the per-day counts; NULL when the month has no records.
                let average_daily: Option<f64> = conn.query_row(
                    "SELECT AVG(n) FROM
                       (SELECT COUNT(*) AS n FROM attendance WHERE date >= ?1 GROUP BY date)",
                    [&month_start],
                    |row| row.get(0),
                )?;

                let attendance_rate = if total_registered > 0 {
                    present_today as f64 / total_registered as f64 * 100.0
                } else {
                    0.0
                };

                Ok(Statistics {
                    total_registered,
                    present_today,
                    absent_today: total_registered - present_today,
                    average_daily: round2(average_daily.unwrap_or(0.0)),
                    attendance_rate: round2(attendance_rate),
                })
            })
            .await?;
        Ok(stats)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn is_constraint_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn person_from_row(row: &rusqlite::Row) -> rusqlite::Result<Person> {
    Ok(Person {
        student_id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        department: row.get(3)?,
        registered_at: timestamp_from_column(row.get(4)?, 4)?,
        last_seen: row
            .get::<_, Option<String>>(5)?
            .map(|s| timestamp_from_column(s, 5))
            .transpose()?,
    })
}

fn timestamp_from_column(value: String, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn date_from_column(value: String, index: usize) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&value, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn open_store() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn encoding(fill: f32) -> Encoding {
        Encoding::new(vec![fill; 4])
    }

    fn attendance(id: &str, student_id: &str, date: NaiveDate, hour: u32) -> NewAttendance {
        NewAttendance {
            id: id.to_string(),
            student_id: student_id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 8, 6, hour, 0, 0).unwrap(),
            date,
            check_in_time: format!("{hour:02}:00:00"),
            confidence: 0.82,
            location: "Main Campus".to_string(),
        }
    }

    async fn add_person(store: &Store, student_id: &str, name: &str) {
        store
            .create_person(student_id, name, None, None, Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_and_get_person() {
        let store = open_store().await;
        store
            .create_person(
                "S1",
                "Alice",
                Some("alice@example.edu".into()),
                Some("Physics".into()),
                Utc::now(),
            )
            .await
            .unwrap();

        let person = store.get_person("S1").await.unwrap().unwrap();
        assert_eq!(person.name, "Alice");
        assert_eq!(person.email.as_deref(), Some("alice@example.edu"));
        assert!(person.last_seen.is_none());

        assert!(store.get_person("S2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_person_reports_exists() {
        let store = open_store().await;
        add_person(&store, "S1", "Alice").await;
        let err = store
            .create_person("S1", "Impostor", None, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PersonExists(id) if id == "S1"));
    }

    #[tokio::test]
    async fn known_faces_load_in_enrollment_order() {
        let store = open_store().await;
        add_person(&store, "S1", "Alice").await;
        add_person(&store, "S2", "Bob").await;

        store
            .append_encoding("S1", &encoding(0.1), "faces/S1_a.png", Utc::now())
            .await
            .unwrap();
        store
            .append_encoding("S2", &encoding(0.2), "faces/S2_a.png", Utc::now())
            .await
            .unwrap();
        store
            .append_encoding("S1", &encoding(0.3), "faces/S1_b.png", Utc::now())
            .await
            .unwrap();

        let faces = store.load_known_faces().await.unwrap();
        assert_eq!(faces.len(), 3);
        assert_eq!(faces[0].student_id, "S1");
        assert_eq!(faces[1].student_id, "S2");
        assert_eq!(faces[2].student_id, "S1");
        assert_eq!(faces[1].name, "Bob");
        assert_eq!(faces[2].encoding, encoding(0.3));
    }

    #[tokio::test]
    async fn second_mark_same_day_is_already_marked() {
        let store = open_store().await;
        add_person(&store, "S1", "Alice").await;
        let date = NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();

        let first = store
            .mark_attendance(attendance("a-1", "S1", date, 9))
            .await
            .unwrap();
        assert_eq!(
            first,
            MarkResult::Marked {
                attendance_id: "a-1".into()
            }
        );

        let second = store
            .mark_attendance(attendance("a-2", "S1", date, 10))
            .await
            .unwrap();
        assert_eq!(second, MarkResult::AlreadyMarked);

        // Exactly one record survived.
        let history = store.attendance_history("S1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, "a-1");
    }

    #[tokio::test]
    async fn marking_advances_last_seen() {
        let store = open_store().await;
        add_person(&store, "S1", "Alice").await;
        let date = NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        store
            .mark_attendance(attendance("a-1", "S1", date, 9))
            .await
            .unwrap();

        let person = store.get_person("S1").await.unwrap().unwrap();
        assert_eq!(
            person.last_seen,
            Some(Utc.with_ymd_and_hms(2026, 8, 6, 9, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn todays_entries_newest_first() {
        let store = open_store().await;
        add_person(&store, "S1", "Alice").await;
        add_person(&store, "S2", "Bob").await;
        let date = NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        let other = NaiveDate::from_ymd_opt(2026, 8, 5).unwrap();

        store
            .mark_attendance(attendance("a-1", "S1", date, 8))
            .await
            .unwrap();
        store
            .mark_attendance(attendance("a-2", "S2", date, 11))
            .await
            .unwrap();
        store
            .mark_attendance(attendance("a-3", "S1", other, 9))
            .await
            .unwrap();

        let entries = store.attendance_for_date(date).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Bob");
        assert_eq!(entries[1].name, "Alice");
    }

    #[tokio::test]
    async fn report_groups_and_sorts() {
        let store = open_store().await;
        add_person(&store, "S1", "Zoe").await;
        add_person(&store, "S2", "Ann").await;
        let d1 = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 8, 2).unwrap();
        let d3 = NaiveDate::from_ymd_opt(2026, 8, 4).unwrap();

        // Zoe present on all three days, Ann on one; one record outside range.
        for (i, date) in [d1, d2, d3].iter().enumerate() {
            store
                .mark_attendance(attendance(&format!("z-{i}"), "S1", *date, 9))
                .await
                .unwrap();
        }
        store
            .mark_attendance(attendance("a-0", "S2", d2, 9))
            .await
            .unwrap();
        store
            .mark_attendance(attendance(
                "z-out",
                "S1",
                NaiveDate::from_ymd_opt(2026, 7, 30).unwrap(),
                9,
            ))
            .await
            .unwrap();

        let groups = store.attendance_report(d1, d3).await.unwrap();
        assert_eq!(groups.len(), 2);
        // Ordered by name: Ann before Zoe.
        assert_eq!(groups[0].name, "Ann");
        assert_eq!(groups[0].days_present, 1);
        assert_eq!(groups[1].name, "Zoe");
        assert_eq!(groups[1].days_present, 3);
        assert_eq!(groups[1].dates, vec![d1, d2, d3]);
    }

    #[tokio::test]
    async fn history_honors_limit_newest_first() {
        let store = open_store().await;
        add_person(&store, "S1", "Alice").await;
        for day in 1..=5 {
            let date = NaiveDate::from_ymd_opt(2026, 8, day).unwrap();
            store
                .mark_attendance(attendance(&format!("a-{day}"), "S1", date, 9))
                .await
                .unwrap();
        }

        let records = store.attendance_history("S1", 3).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].date, NaiveDate::from_ymd_opt(2026, 8, 5).unwrap());
        assert_eq!(records[2].date, NaiveDate::from_ymd_opt(2026, 8, 3).unwrap());
    }

    #[tokio::test]
    async fn statistics_with_no_persons_has_zero_rate() {
        let store = open_store().await;
        let today = NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        let month_start = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();

        let stats = store.statistics(today, month_start).await.unwrap();
        assert_eq!(stats.total_registered, 0);
        assert_eq!(stats.present_today, 0);
        assert_eq!(stats.absent_today, 0);
        assert_eq!(stats.average_daily, 0.0);
        assert_eq!(stats.attendance_rate, 0.0);
    }

    #[tokio::test]
    async fn statistics_counts_and_averages() {
        let store = open_store().await;
        add_person(&store, "S1", "Alice").await;
        add_person(&store, "S2", "Bob").await;
        add_person(&store, "S3", "Cara").await;
        let today = NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        let month_start = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();

        // Two present today, one present on an earlier day this month.
        store
            .mark_attendance(attendance("a-1", "S1", today, 9))
            .await
            .unwrap();
        store
            .mark_attendance(attendance("a-2", "S2", today, 10))
            .await
            .unwrap();
        store
            .mark_attendance(attendance(
                "a-3",
                "S1",
                NaiveDate::from_ymd_opt(2026, 8, 3).unwrap(),
                9,
            ))
            .await
            .unwrap();

        let stats = store.statistics(today, month_start).await.unwrap();
        assert_eq!(stats.total_registered, 3);
        assert_eq!(stats.present_today, 2);
        assert_eq!(stats.absent_today, 1);
        // Day counts: [1, 2] → mean 1.5.
        assert_eq!(stats.average_daily, 1.5);
        assert_eq!(stats.attendance_rate, 66.67);
    }
}
