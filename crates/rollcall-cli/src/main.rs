//! rollcall — admin CLI for the attendance daemon.
//!
//! Thin D-Bus client: every subcommand is one method call on rollcalld,
//! printed as pretty JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a face image for a person
    Register {
        /// Path to the face image (one face only)
        #[arg(short, long)]
        image: PathBuf,
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Unique person identifier (e.g. student ID)
        #[arg(long)]
        id: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long, default_value = "")]
        department: String,
    },
    /// Recognize the face in an image
    Recognize {
        /// Path to the image
        #[arg(short, long)]
        image: PathBuf,
        /// Also mark today's attendance on a successful match
        #[arg(long)]
        mark: bool,
    },
    /// Mark attendance for an already-identified person
    Mark {
        /// Person identifier
        #[arg(long)]
        id: String,
        /// Match confidence to record
        #[arg(long, default_value_t = 1.0)]
        confidence: f64,
        /// Location tag (daemon default when omitted)
        #[arg(long, default_value = "")]
        location: String,
    },
    /// Show today's attendance
    Today,
    /// Per-person attendance report over a date range
    Report {
        /// Start date, YYYY-MM-DD (inclusive)
        #[arg(long)]
        start: String,
        /// End date, YYYY-MM-DD (inclusive)
        #[arg(long)]
        end: String,
    },
    /// Attendance history for one person
    History {
        /// Person identifier
        #[arg(long)]
        id: String,
        /// Maximum records (0 = daemon default)
        #[arg(long, default_value_t = 0)]
        limit: u32,
    },
    /// Overall attendance statistics
    Stats,
    /// List registered persons
    Persons,
    /// Show daemon status
    Status,
}

#[zbus::proxy(
    interface = "org.rollcall.Rollcall1",
    default_service = "org.rollcall.Rollcall1",
    default_path = "/org/rollcall/Rollcall1"
)]
trait Rollcall {
    async fn register(
        &self,
        image: &[u8],
        name: &str,
        student_id: &str,
        email: &str,
        department: &str,
    ) -> zbus::Result<String>;
    async fn recognize(&self, image: &[u8], mark: bool) -> zbus::Result<String>;
    async fn record_attendance(
        &self,
        student_id: &str,
        confidence: f64,
        location: &str,
    ) -> zbus::Result<String>;
    async fn today(&self) -> zbus::Result<String>;
    async fn report(&self, start_date: &str, end_date: &str) -> zbus::Result<String>;
    async fn history(&self, student_id: &str, limit: u32) -> zbus::Result<String>;
    async fn statistics(&self) -> zbus::Result<String>;
    async fn list_persons(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::session()
        .await
        .context("connecting to session bus — is rollcalld running?")?;
    let proxy = RollcallProxy::new(&connection).await?;

    let reply = match cli.command {
        Commands::Register {
            image,
            name,
            id,
            email,
            department,
        } => {
            let bytes = read_image(&image)?;
            proxy.register(&bytes, &name, &id, &email, &department).await?
        }
        Commands::Recognize { image, mark } => {
            let bytes = read_image(&image)?;
            proxy.recognize(&bytes, mark).await?
        }
        Commands::Mark {
            id,
            confidence,
            location,
        } => proxy.record_attendance(&id, confidence, &location).await?,
        Commands::Today => proxy.today().await?,
        Commands::Report { start, end } => proxy.report(&start, &end).await?,
        Commands::History { id, limit } => proxy.history(&id, limit).await?,
        Commands::Stats => proxy.statistics().await?,
        Commands::Persons => proxy.list_persons().await?,
        Commands::Status => proxy.status().await?,
    };

    println!("{}", pretty(&reply));
    Ok(())
}

fn read_image(path: &PathBuf) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading image {}", path.display()))
}

/// Re-indent a JSON reply for the terminal; non-JSON passes through as-is.
fn pretty(reply: &str) -> String {
    serde_json::from_str::<serde_json::Value>(reply)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| reply.to_string())
}
