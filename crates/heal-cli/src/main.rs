use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use heal_core::{AttemptOutcome, FinalizeReport, RecoveryOutcome, Tag};
use heal_runner::Runner;

#[derive(Parser)]
#[command(name = "heal", version, about = "Self-healing snapshot recovery on top of restic")]
struct Cli {
    /// Directory holding heal.toml and the default layout
    #[arg(long, global = true, default_value = ".")]
    base_dir: PathBuf,

    /// Config file (defaults to <base-dir>/heal.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, overrides RUST_LOG (e.g. `debug`, `heal_recovery=trace`)
    #[arg(long, global = true)]
    log: Option<String>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write heal.toml, create the directory layout and the repository
    Init,

    /// Check secret, repository and layout before running unattended
    Doctor,

    /// List snapshots, newest first
    Snapshots {
        #[arg(long)]
        tag: Option<String>,
    },

    /// Snapshot the data directory with a tag
    Capture {
        #[arg(long, default_value = "baseline")]
        tag: String,
    },

    /// Record the current (compromised) state as an `attack` snapshot
    MarkIncident,

    /// Run the baseline scheduler and change watcher until Ctrl-C
    Run,

    /// Promote the newest verifiable baseline into the restore directory
    Recover,

    /// Purge artifacts and replace live data with the promoted restore
    Finalize,

    /// Recover, then finalize
    Heal,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log {
        Some(f) => EnvFilter::try_new(f)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let config = cli.config.as_deref();

    match cli.cmd {
        Command::Init => {
            let path = Runner::init_layout(&cli.base_dir, config)?;
            let r = Runner::open(&cli.base_dir, config)?;
            let created = r.init_repository()?;
            println!("Config: {}", path.display());
            if created {
                println!("Initialized repository at {}", r.cfg.repository_location());
            } else {
                println!("Repository already initialized at {}", r.cfg.repository_location());
            }
        }
        Command::Doctor => {
            let r = Runner::open(&cli.base_dir, config)?;
            r.doctor()?;
            println!("OK");
        }
        Command::Snapshots { tag } => {
            let r = Runner::open(&cli.base_dir, config)?;
            let tag = tag.as_deref().map(Tag::parse);
            let snaps = r.snapshots(tag.as_ref())?;
            if cli.json {
                print_json(&snaps)?;
            } else {
                for s in &snaps {
                    let tags: Vec<_> = s.tags.iter().map(Tag::as_str).collect();
                    println!("{}  {}  [{}]", s.id.short(), s.time, tags.join(","));
                }
                println!("{} snapshot(s)", snaps.len());
            }
        }
        Command::Capture { tag } => {
            let r = Runner::open(&cli.base_dir, config)?;
            let snap = r.capture(Tag::parse(&tag))?;
            println!("Captured {} tagged {}", snap.id, tag);
        }
        Command::MarkIncident => {
            let r = Runner::open(&cli.base_dir, config)?;
            let snap = r.mark_incident()?;
            println!("Incident marked as snapshot {}", snap.id);
        }
        Command::Run => {
            let r = Runner::open(&cli.base_dir, config)?;
            r.doctor()?;
            let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
            rt.block_on(async {
                let lifecycle = r.start_background()?;
                info!(tasks = ?lifecycle.task_names(), "background tasks running; Ctrl-C to stop");
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown requested");
                lifecycle.shutdown().await;
                anyhow::Ok(())
            })?;
        }
        Command::Recover => {
            let r = Runner::open(&cli.base_dir, config)?;
            let outcome = r.recover()?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                print_recovery(&outcome);
            }
        }
        Command::Finalize => {
            let r = Runner::open(&cli.base_dir, config)?;
            let report = r.finalize()?;
            if cli.json {
                print_json(&report)?;
            } else {
                print_finalize(&report);
            }
        }
        Command::Heal => {
            let r = Runner::open(&cli.base_dir, config)?;
            let (outcome, report) = r.heal()?;
            if cli.json {
                print_json(&HealReport { recovery: &outcome, finalize: &report })?;
            } else {
                print_recovery(&outcome);
                print_finalize(&report);
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct HealReport<'a> {
    recovery: &'a RecoveryOutcome,
    finalize: &'a FinalizeReport,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_recovery(outcome: &RecoveryOutcome) {
    for a in &outcome.attempts {
        match &a.outcome {
            AttemptOutcome::Promoted => println!("  {} ({}) promoted", a.snapshot.short(), a.time),
            AttemptOutcome::Rejected(r) => println!("  {} ({}) rejected: {}", a.snapshot.short(), a.time, r),
        }
    }
    for v in &outcome.verified {
        println!("  verified {} ({} bytes) sha256={}", v.path.display(), v.bytes, v.sha256);
    }
    println!("Promoted {} into {}", outcome.promoted, outcome.promoted_root.display());
}

fn print_finalize(report: &FinalizeReport) {
    let deleted = report.purged.iter().filter(|r| r.is_deleted()).count();
    println!("Purged {deleted} malicious file(s)");
    if let Some(kept) = &report.kept_log {
        println!("Kept log {}", kept.display());
    }
    for f in report.failures() {
        println!("  incomplete: {} {:?}", f.path.display(), f.outcome);
    }
    println!("Live data replaced");
}
