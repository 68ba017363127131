use crate::engine::EngineHandle;
use zbus::interface;

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Rollcall1
/// Object path: /org/rollcall/Rollcall1
///
/// Methods return JSON payloads so the wire contract stays stable while the
/// Rust types evolve.
pub struct RollcallService {
    engine: EngineHandle,
    distance_threshold: f32,
}

impl RollcallService {
    pub fn new(engine: EngineHandle, distance_threshold: f32) -> Self {
        Self {
            engine,
            distance_threshold,
        }
    }
}

fn fdo_err(err: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(err.to_string())
}

fn to_json(value: &impl serde::Serialize) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(fdo_err)
}

#[interface(name = "org.rollcall.Rollcall1")]
impl RollcallService {
    /// Register a new person. Fails only if the roll number is taken.
    async fn register_person(
        &self,
        name: &str,
        roll_number: &str,
        department: &str,
        year: i64,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(roll_number, "register requested");
        let person = self
            .engine
            .register(
                name.to_string(),
                roll_number.to_string(),
                department.to_string(),
                year,
            )
            .await
            .map_err(fdo_err)?;
        to_json(&person)
    }

    /// Enroll photos for a registered person. Per-photo failures are
    /// reported as counts in the summary, never as a hard failure.
    async fn enroll(
        &self,
        roll_number: &str,
        photo_paths: Vec<String>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(roll_number, photos = photo_paths.len(), "enroll requested");
        let summary = self
            .engine
            .enroll(roll_number.to_string(), photo_paths)
            .await
            .map_err(fdo_err)?;
        to_json(&summary)
    }

    /// Identify one probe frame and mark attendance for the best match.
    async fn identify(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), "identify requested");
        let response = self.engine.identify(image).await.map_err(fdo_err)?;
        to_json(&response)
    }

    /// List registered persons with their enrollment state.
    async fn list_persons(&self) -> zbus::fdo::Result<String> {
        let persons = self.engine.list_persons().await.map_err(fdo_err)?;
        to_json(&persons)
    }

    /// List attendance records joined with person attributes, newest first.
    async fn list_attendance(&self) -> zbus::fdo::Result<String> {
        let rows = self.engine.list_attendance().await.map_err(fdo_err)?;
        to_json(&rows)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "distance_threshold": self.distance_threshold,
        })
        .to_string())
    }
}
