//! The attendance service: every operation the daemon exposes, independent
//! of transport. Owns the gallery, the store handle and the engine handle;
//! the D-Bus layer only maps arguments and results.

use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};
use crate::gallery::Gallery;
use crate::store::{
    AttendanceEntry, AttendanceGroup, AttendanceRecord, MarkResult, NewAttendance, Person,
    Statistics, Store, StoreError,
};
use chrono::{DateTime, Datelike, Local, NaiveDate, Utc};
use image::RgbImage;
use rollcall_core::quality::{self, QualityThresholds};
use rollcall_core::{KnownFace, MatchOutcome, Matcher, NearestMatcher};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid image payload: {0}")]
    InvalidImage(String),
    #[error("image quality too low: {0}")]
    PoorImageQuality(String),
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("multiple faces detected; submit an image with exactly one face")]
    MultipleFacesDetected,
    #[error("face already registered as {student_id}")]
    AlreadyRegistered { student_id: String },
    #[error("a person with id {0} already exists")]
    UserAlreadyExists(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("face analysis failed: {0}")]
    Extraction(String),
    #[error("inference engine unavailable")]
    EngineUnavailable,
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl ServiceError {
    /// Stable machine-readable kind for the JSON envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::InvalidImage(_) => "invalid_image",
            ServiceError::PoorImageQuality(_) => "poor_image_quality",
            ServiceError::NoFaceDetected => "no_face_detected",
            ServiceError::MultipleFacesDetected => "multiple_faces_detected",
            ServiceError::AlreadyRegistered { .. } => "already_registered",
            ServiceError::UserAlreadyExists(_) => "user_already_exists",
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::Extraction(_) => "extraction_failed",
            ServiceError::EngineUnavailable => "engine_unavailable",
            ServiceError::StorageUnavailable(_) => "storage_unavailable",
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::PersonExists(id) => ServiceError::UserAlreadyExists(id),
            other => ServiceError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<EngineError> for ServiceError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Extract(e) => ServiceError::Extraction(e.to_string()),
            EngineError::ChannelClosed => ServiceError::EngineUnavailable,
        }
    }
}

/// Transport-independent knobs, extracted from [`Config`].
#[derive(Clone)]
pub struct ServiceSettings {
    pub tolerance: f32,
    pub default_location: String,
    pub multi_face: bool,
    pub quality_checks: bool,
    pub thresholds: QualityThresholds,
    pub faces_dir: PathBuf,
    pub history_limit: u32,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tolerance: config.tolerance,
            default_location: config.default_location.clone(),
            multi_face: config.multi_face,
            quality_checks: config.quality_checks,
            thresholds: QualityThresholds {
                blur_threshold: config.blur_threshold,
                min_brightness: config.min_brightness,
                max_brightness: config.max_brightness,
            },
            faces_dir: config.faces_dir.clone(),
            history_limit: config.history_limit,
        }
    }
}

/// Details to enroll alongside a face image.
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub name: String,
    pub student_id: String,
    pub email: Option<String>,
    pub department: Option<String>,
}

/// A successful enrollment.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub student_id: String,
    pub name: String,
}

/// Outcome of an attendance-marking request.
#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceOutcome {
    Marked {
        attendance_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Attendance was recorded earlier today; nothing was written.
    AlreadyMarkedToday,
}

pub struct AttendanceService {
    engine: EngineHandle,
    store: Store,
    gallery: Arc<Gallery>,
    matcher: NearestMatcher,
    settings: ServiceSettings,
}

impl AttendanceService {
    pub fn new(
        engine: EngineHandle,
        store: Store,
        gallery: Arc<Gallery>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            engine,
            store,
            gallery,
            matcher: NearestMatcher,
            settings,
        }
    }

    /// Enroll a face for a person, creating the person on first enrollment.
    ///
    /// The image must contain exactly one face, and that face must not
    /// already be enrolled — under any identifier.
    pub async fn register(
        &self,
        image_bytes: &[u8],
        request: RegisterRequest,
    ) -> Result<Registration, ServiceError> {
        let image = decode_image(image_bytes)?;

        if self.settings.quality_checks {
            quality::assess(&image, &self.settings.thresholds)
                .map_err(|issue| ServiceError::PoorImageQuality(issue.to_string()))?;
        }

        let faces = self.engine.extract(image.clone()).await?;
        let face = match faces.as_slice() {
            [] => return Err(ServiceError::NoFaceDetected),
            [face] => face,
            _ => return Err(ServiceError::MultipleFacesDetected),
        };

        if let MatchOutcome::Match { student_id, .. } = self.matcher.best_match(
            &face.encoding,
            &self.gallery.snapshot(),
            self.settings.tolerance,
        ) {
            return Err(ServiceError::AlreadyRegistered { student_id });
        }

        let now = Utc::now();
        let student_id = request.student_id;
        if self.store.get_person(&student_id).await?.is_none() {
            // A concurrent registration can still win the insert; the unique
            // constraint surfaces that as UserAlreadyExists.
            self.store
                .create_person(
                    &student_id,
                    &request.name,
                    request.email,
                    request.department,
                    now,
                )
                .await?;
            tracing::info!(%student_id, name = %request.name, "person created");
        }

        let image_path = self
            .settings
            .faces_dir
            .join(format!("{student_id}_{}.png", now.format("%Y%m%d%H%M%S%3f")));
        let image_path_str = image_path.to_string_lossy().into_owned();

        self.store
            .append_encoding(&student_id, &face.encoding, &image_path_str, now)
            .await?;

        // The enrollment itself is already durable; losing the reference
        // image only costs later re-training material.
        if let Err(error) = std::fs::create_dir_all(&self.settings.faces_dir)
            .and_then(|()| image.save(&image_path).map_err(std::io::Error::other))
        {
            tracing::warn!(%error, path = %image_path.display(), "failed to write reference image");
        }

        self.gallery.append(KnownFace {
            student_id: student_id.clone(),
            name: request.name.clone(),
            encoding: face.encoding.clone(),
        });

        tracing::info!(%student_id, gallery = self.gallery.len(), "face enrolled");
        Ok(Registration {
            student_id,
            name: request.name,
        })
    }

    /// Match the faces in an image against the enrolled set.
    ///
    /// Zero faces is an error; an image with several faces is fine. In
    /// single-face mode (the default) the first face that matches wins; in
    /// multi-face mode every face is matched and the highest confidence
    /// wins.
    pub async fn recognize(&self, image_bytes: &[u8]) -> Result<MatchOutcome, ServiceError> {
        let image = decode_image(image_bytes)?;
        let faces = self.engine.extract(image).await?;
        if faces.is_empty() {
            return Err(ServiceError::NoFaceDetected);
        }

        let known = self.gallery.snapshot();
        let mut best = MatchOutcome::NoMatch;

        for face in &faces {
            let outcome = self
                .matcher
                .best_match(&face.encoding, &known, self.settings.tolerance);
            if let MatchOutcome::Match { confidence, .. } = &outcome {
                if !self.settings.multi_face {
                    return Ok(outcome);
                }
                let improves = match &best {
                    MatchOutcome::Match {
                        confidence: current, ..
                    } => confidence > current,
                    MatchOutcome::NoMatch => true,
                };
                if improves {
                    best = outcome;
                }
            }
        }

        Ok(best)
    }

    /// Record today's attendance for a matched identity — at most once per
    /// calendar day.
    pub async fn record_attendance(
        &self,
        student_id: &str,
        confidence: f32,
        location: Option<String>,
    ) -> Result<AttendanceOutcome, ServiceError> {
        if self.store.get_person(student_id).await?.is_none() {
            return Err(ServiceError::InvalidInput(format!(
                "unknown student_id: {student_id}"
            )));
        }

        let now_utc = Utc::now();
        let now_local = Local::now();
        let record = NewAttendance {
            id: uuid::Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            timestamp: now_utc,
            date: now_local.date_naive(),
            check_in_time: now_local.format("%H:%M:%S").to_string(),
            confidence,
            location: location.unwrap_or_else(|| self.settings.default_location.clone()),
        };

        match self.store.mark_attendance(record).await? {
            MarkResult::Marked { attendance_id } => {
                tracing::info!(student_id, %attendance_id, "attendance marked");
                Ok(AttendanceOutcome::Marked {
                    attendance_id,
                    timestamp: now_utc,
                })
            }
            MarkResult::AlreadyMarked => {
                tracing::debug!(student_id, "attendance already marked today");
                Ok(AttendanceOutcome::AlreadyMarkedToday)
            }
        }
    }

    pub async fn today(&self) -> Result<Vec<AttendanceEntry>, ServiceError> {
        Ok(self
            .store
            .attendance_for_date(Local::now().date_naive())
            .await?)
    }

    pub async fn report(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AttendanceGroup>, ServiceError> {
        if start > end {
            return Err(ServiceError::InvalidInput(format!(
                "start date {start} is after end date {end}"
            )));
        }
        Ok(self.store.attendance_report(start, end).await?)
    }

    pub async fn history(
        &self,
        student_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<AttendanceRecord>, ServiceError> {
        let limit = limit.unwrap_or(self.settings.history_limit);
        Ok(self.store.attendance_history(student_id, limit).await?)
    }

    pub async fn statistics(&self) -> Result<Statistics, ServiceError> {
        let today = Local::now().date_naive();
        let month_start = today.with_day(1).unwrap_or(today);
        Ok(self.store.statistics(today, month_start).await?)
    }

    pub async fn list_persons(&self) -> Result<Vec<Person>, ServiceError> {
        Ok(self.store.list_persons().await?)
    }

    pub fn gallery_size(&self) -> usize {
        self.gallery.len()
    }
}

fn decode_image(bytes: &[u8]) -> Result<RgbImage, ServiceError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| ServiceError::InvalidImage(e.to_string()))
}
