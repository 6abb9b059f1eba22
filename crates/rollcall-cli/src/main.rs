use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn process_upload(&self, image: &[u8], context_json: &str) -> zbus::Result<String>;
    async fn register_face(&self, identity: &str, image: &[u8]) -> zbus::Result<String>;
    async fn list_known_faces(&self) -> zbus::Result<String>;
    async fn remove_known_face(&self, identity: &str) -> zbus::Result<bool>;
    async fn put_identity(&self, record_json: &str) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Photo-based class attendance")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a class photo and record attendance for recognized students
    Upload {
        image: PathBuf,
        /// Class or section the photo was taken in
        #[arg(long)]
        cohort: Option<String>,
        /// Session period (daemon default when omitted)
        #[arg(long)]
        period: Option<String>,
        /// Who is submitting the photo (defaults to $USER)
        #[arg(long)]
        requester: Option<String>,
    },
    /// Register or replace the reference face for a student
    Register {
        #[arg(short, long)]
        name: String,
        image: PathBuf,
    },
    /// List registered faces
    List,
    /// Remove a registered face; attendance history is kept
    Remove { name: String },
    /// Set roster metadata for a student
    Roster(RosterArgs),
    /// Show daemon status
    Status,
}

#[derive(Args)]
struct RosterArgs {
    #[arg(short, long)]
    name: String,
    #[arg(long)]
    cohort: Option<String>,
    #[arg(long)]
    program: Option<String>,
    #[arg(long)]
    program_code: Option<String>,
    #[arg(long)]
    course: Option<String>,
    #[arg(long)]
    course_code: Option<String>,
    #[arg(long)]
    faculty: Option<String>,
    #[arg(long)]
    faculty_id: Option<String>,
    #[arg(long)]
    registration_no: Option<String>,
}

impl RosterArgs {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "identity": self.name,
            "cohort": self.cohort,
            "program": self.program,
            "program_code": self.program_code,
            "course": self.course,
            "course_code": self.course_code,
            "faculty": self.faculty,
            "faculty_id": self.faculty_id,
            "registration_no": self.registration_no,
        })
    }
}

/// Same rule the daemon applies to its `ROLLCALL_*` flags.
fn flag_enabled(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_json(reply: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(reply).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn upload_context(requester: Option<String>, period: Option<String>, cohort: Option<String>) -> serde_json::Value {
    let requester = requester
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "unknown".to_string());
    serde_json::json!({
        "requester": requester,
        "period": period,
        "cohort": cohort,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let session = cli.session || std::env::var("ROLLCALL_SESSION_BUS").is_ok_and(|v| flag_enabled(&v));
    let conn = if session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")?;

    match cli.command {
        Commands::Upload {
            image,
            cohort,
            period,
            requester,
        } => {
            let bytes = read_image(&image)?;
            let ctx = upload_context(requester, period, cohort);
            tracing::debug!(path = %image.display(), bytes = bytes.len(), "uploading");
            print_json(&proxy.process_upload(&bytes, &ctx.to_string()).await?)?;
        }
        Commands::Register { name, image } => {
            let bytes = read_image(&image)?;
            print_json(&proxy.register_face(&name, &bytes).await?)?;
        }
        Commands::List => {
            print_json(&proxy.list_known_faces().await?)?;
        }
        Commands::Remove { name } => {
            if proxy.remove_known_face(&name).await? {
                println!("Removed {name}");
            } else {
                println!("No registered face for {name}");
            }
        }
        Commands::Roster(args) => {
            proxy.put_identity(&args.to_json().to_string()).await?;
            println!("Roster updated for {}", args.name);
        }
        Commands::Status => {
            print_json(&proxy.status().await?)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_upload_args_parse() {
        let cli = Cli::try_parse_from(["rollcall", "upload", "class.jpg", "--cohort", "CSE-A", "--requester", "prof"])
            .unwrap();
        match cli.command {
            Commands::Upload {
                image,
                cohort,
                period,
                requester,
            } => {
                assert_eq!(image, PathBuf::from("class.jpg"));
                assert_eq!(cohort.as_deref(), Some("CSE-A"));
                assert_eq!(period, None);
                assert_eq!(requester.as_deref(), Some("prof"));
            }
            _ => panic!("expected upload"),
        }
    }

    #[test]
    fn test_session_flag_values() {
        for on in ["1", "true", "TRUE", "yes", " on "] {
            assert!(flag_enabled(on), "{on}");
        }
        for off in ["0", "false", "no", "", "2"] {
            assert!(!flag_enabled(off), "{off}");
        }
    }

    #[test]
    fn test_upload_context_json() {
        let ctx = upload_context(Some("prof".into()), None, Some("EEE-B".into()));
        assert_eq!(ctx["requester"], "prof");
        assert!(ctx["period"].is_null());
        assert_eq!(ctx["cohort"], "EEE-B");
    }

    #[test]
    fn test_roster_json_carries_every_field() {
        let cli = Cli::try_parse_from(["rollcall", "roster", "--name", "amy", "--course", "Databases"]).unwrap();
        let Commands::Roster(args) = cli.command else {
            panic!("expected roster");
        };
        let json = args.to_json();
        assert_eq!(json["identity"], "amy");
        assert_eq!(json["course"], "Databases");
        assert!(json["cohort"].is_null());
    }
}
