//! D-Bus interface for the Rollcall attendance daemon.
//!
//! Bus name: org.rollcall.Rollcall1
//! Object path: /org/rollcall/Rollcall1
//!
//! Every method returns a JSON envelope: a success payload, or
//! `{"success": false, "error": <kind>, "message": <text>}`. Request
//! failures are data, not D-Bus errors — kiosk clients branch on the
//! `error` kind.

use crate::service::{AttendanceOutcome, AttendanceService, RegisterRequest, ServiceError};
use chrono::NaiveDate;
use rollcall_core::MatchOutcome;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use zbus::interface;

pub struct RollcallInterface {
    service: Arc<AttendanceService>,
}

impl RollcallInterface {
    pub fn new(service: Arc<AttendanceService>) -> Self {
        Self { service }
    }
}

#[interface(name = "org.rollcall.Rollcall1")]
impl RollcallInterface {
    /// Enroll a face image for a person. Empty email/department are treated
    /// as absent.
    async fn register(
        &self,
        image: Vec<u8>,
        name: &str,
        student_id: &str,
        email: &str,
        department: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(student_id, name, bytes = image.len(), "register requested");
        let request = RegisterRequest {
            name: name.to_string(),
            student_id: student_id.to_string(),
            email: non_empty(email),
            department: non_empty(department),
        };

        let envelope = match self.service.register(&image, request).await {
            Ok(registration) => json!({
                "success": true,
                "message": "Face registered successfully",
                "student_id": registration.student_id,
                "name": registration.name,
            }),
            Err(error) => failure(&error),
        };
        Ok(envelope.to_string())
    }

    /// Match a face image against the enrolled set; with `mark` set, a
    /// successful match also records today's attendance.
    async fn recognize(&self, image: Vec<u8>, mark: bool) -> zbus::fdo::Result<String> {
        tracing::debug!(bytes = image.len(), mark, "recognize requested");

        let envelope = match self.service.recognize(&image).await {
            Ok(MatchOutcome::Match {
                student_id,
                name,
                confidence,
            }) => {
                let mut envelope = json!({
                    "success": true,
                    "student_id": student_id,
                    "name": name,
                    "confidence": confidence,
                });
                if mark {
                    let attendance = match self
                        .service
                        .record_attendance(&student_id, confidence, None)
                        .await
                    {
                        Ok(AttendanceOutcome::Marked {
                            attendance_id,
                            timestamp,
                        }) => json!({
                            "marked": true,
                            "attendance_id": attendance_id,
                            "timestamp": timestamp.to_rfc3339(),
                        }),
                        Ok(AttendanceOutcome::AlreadyMarkedToday) => json!({
                            "marked": false,
                            "reason": "already_marked_today",
                        }),
                        Err(error) => json!({
                            "marked": false,
                            "reason": error.kind(),
                        }),
                    };
                    envelope["attendance"] = attendance;
                }
                envelope
            }
            Ok(MatchOutcome::NoMatch) => json!({
                "success": false,
                "error": "no_match",
                "message": "Face not recognized",
            }),
            Err(error) => failure(&error),
        };
        Ok(envelope.to_string())
    }

    /// Mark attendance for an already-identified person. An empty location
    /// selects the configured default.
    async fn record_attendance(
        &self,
        student_id: &str,
        confidence: f64,
        location: &str,
    ) -> zbus::fdo::Result<String> {
        let envelope = match self
            .service
            .record_attendance(student_id, confidence as f32, non_empty(location))
            .await
        {
            Ok(AttendanceOutcome::Marked {
                attendance_id,
                timestamp,
            }) => json!({
                "success": true,
                "attendance_id": attendance_id,
                "timestamp": timestamp.to_rfc3339(),
            }),
            Ok(AttendanceOutcome::AlreadyMarkedToday) => json!({
                "success": false,
                "error": "already_marked_today",
                "message": "Attendance already marked today",
            }),
            Err(error) => failure(&error),
        };
        Ok(envelope.to_string())
    }

    /// Today's attendance, newest first.
    async fn today(&self) -> zbus::fdo::Result<String> {
        Ok(records_envelope(self.service.today().await).to_string())
    }

    /// Per-person attendance aggregate over an inclusive date range
    /// (`YYYY-MM-DD` bounds).
    async fn report(&self, start_date: &str, end_date: &str) -> zbus::fdo::Result<String> {
        let envelope = match (parse_date(start_date), parse_date(end_date)) {
            (Ok(start), Ok(end)) => records_envelope(self.service.report(start, end).await),
            (Err(error), _) | (_, Err(error)) => failure(&error),
        };
        Ok(envelope.to_string())
    }

    /// Most recent attendance records for one person. Limit 0 selects the
    /// configured default.
    async fn history(&self, student_id: &str, limit: u32) -> zbus::fdo::Result<String> {
        let limit = (limit > 0).then_some(limit);
        Ok(records_envelope(self.service.history(student_id, limit).await).to_string())
    }

    /// Overall attendance statistics.
    async fn statistics(&self) -> zbus::fdo::Result<String> {
        let envelope = match self.service.statistics().await {
            Ok(stats) => json!({ "success": true, "statistics": to_json(&stats) }),
            Err(error) => failure(&error),
        };
        Ok(envelope.to_string())
    }

    /// All registered persons, without encodings.
    async fn list_persons(&self) -> zbus::fdo::Result<String> {
        Ok(records_envelope(self.service.list_persons().await).to_string())
    }

    /// Daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "enrolled_faces": self.service.gallery_size(),
        })
        .to_string())
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_date(value: &str) -> Result<NaiveDate, ServiceError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| ServiceError::InvalidInput(format!("bad date '{value}': {e}")))
}

fn failure(error: &ServiceError) -> serde_json::Value {
    json!({
        "success": false,
        "error": error.kind(),
        "message": error.to_string(),
    })
}

fn records_envelope<T: Serialize>(result: Result<Vec<T>, ServiceError>) -> serde_json::Value {
    match result {
        Ok(records) => json!({ "success": true, "records": to_json(&records) }),
        Err(error) => failure(&error),
    }
}

fn to_json<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_envelope_carries_kind_and_message() {
        let envelope = failure(&ServiceError::NoFaceDetected);
        assert_eq!(envelope["success"], false);
        assert_eq!(envelope["error"], "no_face_detected");
        assert!(envelope["message"]
            .as_str()
            .is_some_and(|m| m.contains("no face")));
    }

    #[test]
    fn empty_strings_map_to_absent() {
        assert_eq!(non_empty(""), None);
        assert_eq!(non_empty("Physics"), Some("Physics".to_string()));
    }

    #[test]
    fn date_parsing() {
        assert!(parse_date("2026-08-06").is_ok());
        assert!(parse_date("06/08/2026").is_err());
        assert!(parse_date("").is_err());
    }
}
