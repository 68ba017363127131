//! rollcall — thin D-Bus client for the attendance daemon.
//!
//! All heavy lifting (extraction, matching, the ledger) happens in
//! rollcalld; this binary just shapes requests and pretty-prints the JSON
//! payloads the daemon returns.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.rollcall.Rollcall1",
    default_service = "org.rollcall.Rollcall1",
    default_path = "/org/rollcall/Rollcall1"
)]
trait Rollcall {
    async fn register_person(
        &self,
        name: &str,
        roll_number: &str,
        department: &str,
        year: i64,
    ) -> zbus::Result<String>;
    async fn enroll(&self, roll_number: &str, photo_paths: Vec<String>) -> zbus::Result<String>;
    async fn identify(&self, image: Vec<u8>) -> zbus::Result<String>;
    async fn list_persons(&self) -> zbus::Result<String>;
    async fn list_attendance(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new person
    Register {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        roll_number: String,
        #[arg(short, long)]
        department: String,
        #[arg(short, long)]
        year: i64,
    },
    /// Enroll photos for a registered person
    Enroll {
        roll_number: String,
        /// Photo files, in enrollment order
        #[arg(required = true)]
        photos: Vec<PathBuf>,
    },
    /// Identify a probe image and mark attendance
    Identify {
        /// Captured frame to identify
        image: PathBuf,
    },
    /// List registered persons
    Persons,
    /// List attendance records (newest first)
    Attendance,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::system()
        .await
        .context("connecting to the system bus (is rollcalld running?)")?;
    let proxy = RollcallProxy::new(&conn).await?;

    let payload = match cli.command {
        Commands::Register {
            name,
            roll_number,
            department,
            year,
        } => {
            proxy
                .register_person(&name, &roll_number, &department, year)
                .await?
        }
        Commands::Enroll {
            roll_number,
            photos,
        } => {
            let paths = photos
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>();
            proxy.enroll(&roll_number, paths).await?
        }
        Commands::Identify { image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading probe image {}", image.display()))?;
            proxy.identify(bytes).await?
        }
        Commands::Persons => proxy.list_persons().await?,
        Commands::Attendance => proxy.list_attendance().await?,
        Commands::Status => proxy.status().await?,
    };

    print_json(&payload)
}

fn print_json(payload: &str) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(payload).context("daemon returned malformed JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
