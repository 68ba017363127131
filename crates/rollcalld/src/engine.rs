//! Engine thread: single owner of the extractor session, the gallery store,
//! and the database connection.
//!
//! D-Bus handlers talk to the engine over an mpsc channel and await a
//! oneshot reply; the handle applies the request timeout, so a stuck
//! extraction surfaces as a request-level failure with no side effect.

use chrono::Local;
use rollcall_core::{
    DimensionMismatch, EnrolledGallery, Extractor, MatchDecision, Matcher, NearestGalleryMatcher,
};
use rollcall_store::{AttendanceOutcome, AttendanceRow, Database, GalleryStore, Person};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("extraction failed: {0}")]
    Extract(#[from] rollcall_core::ExtractError),
    #[error(transparent)]
    Dimension(#[from] DimensionMismatch),
    #[error("gallery store error: {0}")]
    Gallery(#[from] rollcall_store::GalleryError),
    #[error("database error: {0}")]
    Db(#[from] rollcall_store::DbError),
    #[error("request timed out")]
    Timeout,
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("internal: {0}")]
    Internal(String),
}

/// Counts reported back from one enrollment run.
#[derive(Debug, Serialize)]
pub struct EnrollmentSummary {
    pub roll_number: String,
    pub gallery_path: String,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize)]
pub struct PersonIdentity {
    pub id: i64,
    pub name: String,
    pub roll_number: String,
}

/// Identify response payload, serialized as-is over the bus.
#[derive(Debug, Serialize)]
pub struct IdentifyResponse {
    pub matched: bool,
    pub already_marked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person: Option<PersonIdentity>,
    pub message: String,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Register {
        name: String,
        roll_number: String,
        department: String,
        year: i64,
        reply: oneshot::Sender<Result<Person, EngineError>>,
    },
    Enroll {
        roll_number: String,
        photo_paths: Vec<String>,
        reply: oneshot::Sender<Result<EnrollmentSummary, EngineError>>,
    },
    Identify {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<IdentifyResponse, EngineError>>,
    },
    ListPersons {
        reply: oneshot::Sender<Result<Vec<Person>, EngineError>>,
    },
    ListAttendance {
        reply: oneshot::Sender<Result<Vec<AttendanceRow>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    request_timeout: Duration,
}

impl EngineHandle {
    pub async fn register(
        &self,
        name: String,
        roll_number: String,
        department: String,
        year: i64,
    ) -> Result<Person, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Register {
                name,
                roll_number,
                department,
                year,
                reply,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        self.await_reply(rx).await
    }

    pub async fn enroll(
        &self,
        roll_number: String,
        photo_paths: Vec<String>,
    ) -> Result<EnrollmentSummary, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                roll_number,
                photo_paths,
                reply,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        self.await_reply(rx).await
    }

    pub async fn identify(&self, image: Vec<u8>) -> Result<IdentifyResponse, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Identify { image, reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        self.await_reply(rx).await
    }

    pub async fn list_persons(&self) -> Result<Vec<Person>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ListPersons { reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        self.await_reply(rx).await
    }

    pub async fn list_attendance(&self) -> Result<Vec<AttendanceRow>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ListAttendance { reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        self.await_reply(rx).await
    }

    async fn await_reply<T>(
        &self,
        rx: oneshot::Receiver<Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EngineError::ChannelClosed),
            Err(_) => Err(EngineError::Timeout),
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread takes ownership of every stateful resource and serves
/// requests until the last handle is dropped.
pub fn spawn_engine(
    extractor: Box<dyn Extractor>,
    store: GalleryStore,
    db: Database,
    distance_threshold: f32,
    request_timeout: Duration,
) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            let mut extractor = extractor;
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Register {
                        name,
                        roll_number,
                        department,
                        year,
                        reply,
                    } => {
                        let _ = reply.send(run_register(&db, &name, &roll_number, &department, year));
                    }
                    EngineRequest::Enroll {
                        roll_number,
                        photo_paths,
                        reply,
                    } => {
                        let _ = reply.send(run_enroll(
                            extractor.as_mut(),
                            &store,
                            &db,
                            &roll_number,
                            &photo_paths,
                        ));
                    }
                    EngineRequest::Identify { image, reply } => {
                        let _ = reply.send(run_identify(
                            extractor.as_mut(),
                            &store,
                            &db,
                            distance_threshold,
                            &image,
                        ));
                    }
                    EngineRequest::ListPersons { reply } => {
                        let _ = reply.send(db.list_persons().map_err(EngineError::from));
                    }
                    EngineRequest::ListAttendance { reply } => {
                        let _ = reply.send(db.list_attendance().map_err(EngineError::from));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle {
        tx,
        request_timeout,
    }
}

fn run_register(
    db: &Database,
    name: &str,
    roll_number: &str,
    department: &str,
    year: i64,
) -> Result<Person, EngineError> {
    let id = db.insert_person(name, roll_number, department, year)?;
    tracing::info!(roll_number, id, "person registered");
    Ok(Person {
        id,
        name: name.to_string(),
        roll_number: roll_number.to_string(),
        department: department.to_string(),
        year,
        gallery_path: None,
    })
}

/// Enrollment pipeline: extract every photo, skip failures, commit the
/// survivors as one gallery write.
///
/// Zero successful photos still commits an empty gallery; the person stays
/// enrolled-but-unmatchable and a later re-enroll simply overwrites.
fn run_enroll(
    extractor: &mut dyn Extractor,
    store: &GalleryStore,
    db: &Database,
    roll_number: &str,
    photo_paths: &[String],
) -> Result<EnrollmentSummary, EngineError> {
    let person = db.person_by_roll(roll_number)?;

    let mut embeddings = Vec::with_capacity(photo_paths.len());
    let mut failed = 0usize;
    for path in photo_paths {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "enroll: unreadable photo, skipping");
                failed += 1;
                continue;
            }
        };
        match extractor.extract(&bytes) {
            Ok(embedding) => embeddings.push(embedding),
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "enroll: extraction failed, skipping");
                failed += 1;
            }
        }
    }

    let gallery_path = store.write(&person.roll_number, &embeddings)?;
    let gallery_path = gallery_path.to_string_lossy().into_owned();
    db.set_gallery_path(person.id, &gallery_path)?;
    db.replace_photos(person.id, photo_paths)?;

    tracing::info!(
        roll_number,
        attempted = photo_paths.len(),
        succeeded = embeddings.len(),
        failed,
        "enrollment committed"
    );

    Ok(EnrollmentSummary {
        roll_number: person.roll_number,
        gallery_path,
        attempted: photo_paths.len(),
        succeeded: embeddings.len(),
        failed,
    })
}

/// Identify one probe frame and mark attendance for the winner.
///
/// A single person's unreadable gallery is skipped with a warning; a probe
/// whose dimensionality disagrees with the enrolled galleries aborts the
/// whole request before any attendance write.
fn run_identify(
    extractor: &mut dyn Extractor,
    store: &GalleryStore,
    db: &Database,
    distance_threshold: f32,
    image: &[u8],
) -> Result<IdentifyResponse, EngineError> {
    let probe = extractor.extract(image)?;

    let enrolled = db.list_enrolled()?;
    let mut galleries = Vec::with_capacity(enrolled.len());
    for person in &enrolled {
        let Some(path) = person.gallery_path.as_deref() else {
            continue;
        };
        match store.read(Path::new(path)) {
            Ok(embeddings) => galleries.push(EnrolledGallery {
                person_id: person.id,
                embeddings,
            }),
            Err(err) => {
                tracing::warn!(
                    roll_number = %person.roll_number,
                    error = %err,
                    "skipping unreadable gallery"
                );
            }
        }
    }

    let decision = NearestGalleryMatcher.identify(&probe, &galleries, distance_threshold)?;

    let (person_id, distance) = match decision {
        MatchDecision::NoMatch => {
            tracing::info!("no gallery within threshold");
            return Ok(IdentifyResponse {
                matched: false,
                already_marked: false,
                person: None,
                message: "No match found".to_string(),
            });
        }
        MatchDecision::Identified {
            person_id,
            distance,
        } => (person_id, distance),
    };

    let person = enrolled
        .iter()
        .find(|p| p.id == person_id)
        .ok_or_else(|| EngineError::Internal(format!("matched unknown person id {person_id}")))?;

    let now = Local::now();
    let outcome = db.mark_attendance(person.id, now.date_naive(), now.time())?;
    let already_marked = outcome == AttendanceOutcome::AlreadyMarked;

    tracing::info!(
        roll_number = %person.roll_number,
        distance,
        already_marked,
        "identified"
    );

    let message = if already_marked {
        format!(
            "Attendance already marked for {} ({})",
            person.name, person.roll_number
        )
    } else {
        format!("Attendance marked for {} ({})", person.name, person.roll_number)
    };

    Ok(IdentifyResponse {
        matched: true,
        already_marked,
        person: Some(PersonIdentity {
            id: person.id,
            name: person.name.clone(),
            roll_number: person.roll_number.clone(),
        }),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{Embedding, ExtractError};
    use tempfile::TempDir;

    /// Reads the image bytes as UTF-8 comma-separated floats; the token
    /// "fail" simulates a model that finds no usable face.
    struct StubExtractor;

    impl Extractor for StubExtractor {
        fn extract(&mut self, image_bytes: &[u8]) -> Result<Embedding, ExtractError> {
            let text = std::str::from_utf8(image_bytes)
                .map_err(|e| ExtractError::InferenceFailed(e.to_string()))?;
            if text.trim() == "fail" {
                return Err(ExtractError::InferenceFailed("no face found".into()));
            }
            let values = text
                .split(',')
                .map(|v| v.trim().parse::<f32>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ExtractError::InferenceFailed(e.to_string()))?;
            Ok(Embedding::new(values))
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: GalleryStore,
        db: Database,
        photos_dir: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = GalleryStore::open(dir.path().join("galleries")).unwrap();
        let db = Database::open_in_memory().unwrap();
        let photos_dir = dir.path().join("photos");
        std::fs::create_dir_all(&photos_dir).unwrap();
        Fixture {
            store,
            db,
            photos_dir,
            _dir: dir,
        }
    }

    fn write_photo(fixture: &Fixture, name: &str, content: &str) -> String {
        let path = fixture.photos_dir.join(name);
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_enroll_skips_failed_photos_and_keeps_order() {
        let fx = fixture();
        fx.db.insert_person("Asha Rao", "R1", "CSE", 3).unwrap();

        let photos = vec![
            write_photo(&fx, "p1", "1.0, 0.0"),
            write_photo(&fx, "p2", "fail"),
            write_photo(&fx, "p3", "0.0, 1.0"),
            write_photo(&fx, "p4", "fail"),
            write_photo(&fx, "p5", "0.5, 0.5"),
        ];

        let summary =
            run_enroll(&mut StubExtractor, &fx.store, &fx.db, "R1", &photos).unwrap();
        assert_eq!(summary.attempted, 5);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 2);

        let gallery = fx.store.read(Path::new(&summary.gallery_path)).unwrap();
        assert_eq!(
            gallery,
            vec![
                Embedding::new(vec![1.0, 0.0]),
                Embedding::new(vec![0.0, 1.0]),
                Embedding::new(vec![0.5, 0.5]),
            ]
        );

        let person = fx.db.person_by_roll("R1").unwrap();
        assert_eq!(person.gallery_path.as_deref(), Some(summary.gallery_path.as_str()));
    }

    #[test]
    fn test_enroll_with_all_failures_commits_empty_gallery() {
        let fx = fixture();
        fx.db.insert_person("Asha Rao", "R2", "CSE", 3).unwrap();

        let photos = vec![write_photo(&fx, "p1", "fail"), "/no/such/file.jpg".to_string()];
        let summary =
            run_enroll(&mut StubExtractor, &fx.store, &fx.db, "R2", &photos).unwrap();
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 2);

        // Empty gallery committed: the person is enrolled but unmatchable.
        let gallery = fx.store.read(Path::new(&summary.gallery_path)).unwrap();
        assert!(gallery.is_empty());
        assert!(fx.db.person_by_roll("R2").unwrap().gallery_path.is_some());
    }

    #[test]
    fn test_enroll_unknown_roll_number_fails() {
        let fx = fixture();
        let result = run_enroll(&mut StubExtractor, &fx.store, &fx.db, "ghost", &[]);
        assert!(matches!(
            result,
            Err(EngineError::Db(rollcall_store::DbError::UnknownRollNumber(_)))
        ));
    }

    fn enroll_with_vector(fx: &Fixture, name: &str, roll: &str, vector: &str) {
        fx.db.insert_person(name, roll, "CSE", 3).unwrap();
        let photo = write_photo(fx, &format!("{roll}.txt"), vector);
        run_enroll(&mut StubExtractor, &fx.store, &fx.db, roll, &[photo]).unwrap();
    }

    #[test]
    fn test_identify_marks_attendance_once_per_day() {
        let fx = fixture();
        enroll_with_vector(&fx, "Asha Rao", "R1", "1.0, 0.0");
        enroll_with_vector(&fx, "Ben Kim", "R2", "0.0, 1.0");

        let first = run_identify(&mut StubExtractor, &fx.store, &fx.db, 0.35, b"0.99, 0.05")
            .unwrap();
        assert!(first.matched);
        assert!(!first.already_marked);
        assert_eq!(first.person.as_ref().unwrap().roll_number, "R1");

        let second = run_identify(&mut StubExtractor, &fx.store, &fx.db, 0.35, b"0.99, 0.05")
            .unwrap();
        assert!(second.matched);
        assert!(second.already_marked);

        assert_eq!(fx.db.list_attendance().unwrap().len(), 1);
    }

    #[test]
    fn test_identify_below_threshold_writes_nothing() {
        let fx = fixture();
        enroll_with_vector(&fx, "Asha Rao", "R1", "1.0, 0.0");

        let response =
            run_identify(&mut StubExtractor, &fx.store, &fx.db, 0.35, b"0.0, 1.0").unwrap();
        assert!(!response.matched);
        assert!(response.person.is_none());
        assert!(fx.db.list_attendance().unwrap().is_empty());
    }

    #[test]
    fn test_identify_dimension_mismatch_aborts_without_side_effect() {
        let fx = fixture();
        enroll_with_vector(&fx, "Asha Rao", "R1", "1.0, 0.0");

        let result =
            run_identify(&mut StubExtractor, &fx.store, &fx.db, 0.35, b"1.0, 0.0, 0.0");
        assert!(matches!(result, Err(EngineError::Dimension(_))));
        assert!(fx.db.list_attendance().unwrap().is_empty());
    }

    #[test]
    fn test_identify_probe_extraction_failure_aborts() {
        let fx = fixture();
        enroll_with_vector(&fx, "Asha Rao", "R1", "1.0, 0.0");

        let result = run_identify(&mut StubExtractor, &fx.store, &fx.db, 0.35, b"fail");
        assert!(matches!(result, Err(EngineError::Extract(_))));
        assert!(fx.db.list_attendance().unwrap().is_empty());
    }

    #[test]
    fn test_identify_skips_person_with_corrupt_gallery() {
        let fx = fixture();
        enroll_with_vector(&fx, "Asha Rao", "R1", "0.0, 1.0");
        enroll_with_vector(&fx, "Ben Kim", "R2", "1.0, 0.0");

        // Corrupt R1's gallery in place; R2 must still be identifiable.
        let r1 = fx.db.person_by_roll("R1").unwrap();
        std::fs::write(r1.gallery_path.unwrap(), b"garbage").unwrap();

        let response =
            run_identify(&mut StubExtractor, &fx.store, &fx.db, 0.35, b"1.0, 0.0").unwrap();
        assert!(response.matched);
        assert_eq!(response.person.unwrap().roll_number, "R2");
    }

    #[test]
    fn test_identify_ignores_empty_gallery_person() {
        let fx = fixture();
        fx.db.insert_person("Asha Rao", "R1", "CSE", 3).unwrap();
        run_enroll(&mut StubExtractor, &fx.store, &fx.db, "R1", &[]).unwrap();

        let response =
            run_identify(&mut StubExtractor, &fx.store, &fx.db, 2.0, b"1.0, 0.0").unwrap();
        assert!(!response.matched);
    }
}
