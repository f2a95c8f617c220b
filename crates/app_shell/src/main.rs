//! `slideapp`: command-line shell over the SlideApp notebook.

mod commands;
mod landing;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::{AppConfig, ConfigStore};
use core_types::{
    AntibodyRole, AppMode, EntityKind, ExperimentId, ExperimentStatus, MemberRole, NoteType,
    ProtocolSettings, SlideId, SlideStatus, TreatmentGroupId, UserId,
};
use notebook::{Notebook, NotebookSettings};
use storage_sqlite::SqliteStore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "slideapp")]
#[command(about = "Lab notebook for immunohistochemistry slides")]
#[command(version)]
struct Cli {
    /// Data directory holding the database, config and logs (default: `SLIDEAPP_DATA_DIR`
    /// or the platform data directory)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Landing fields every session-scoped command takes.
#[derive(Args, Clone)]
struct SessionArgs {
    /// User id, email or display name
    #[arg(long)]
    user: String,

    /// `researcher` or `admin` (default from config)
    #[arg(long)]
    mode: Option<AppMode>,

    /// Where exports are written (default from config)
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config, database and bootstrap admin
    Init,
    /// User administration (Admin mode)
    Users {
        #[command(subcommand)]
        command: UserCommands,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Resolve the landing form and print the session
    Begin {
        #[command(flatten)]
        session: SessionArgs,
    },
    Experiments {
        #[command(subcommand)]
        command: ExperimentCommands,
        #[command(flatten)]
        session: SessionArgs,
    },
    Members {
        #[command(subcommand)]
        command: MemberCommands,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Treatment groups
    Groups {
        #[command(subcommand)]
        command: GroupCommands,
        #[command(flatten)]
        session: SessionArgs,
    },
    Slides {
        #[command(subcommand)]
        command: SlideCommands,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Antibody catalog
    Antibodies {
        #[command(subcommand)]
        command: AntibodyCommands,
        #[command(flatten)]
        session: SessionArgs,
    },
    Notes {
        #[command(subcommand)]
        command: NoteCommands,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Audit history: one entity's trail (Admin mode) or your own changes
    Audit {
        #[arg(long, requires = "id")]
        entity: Option<EntityKind>,
        #[arg(long, requires = "entity")]
        id: Option<String>,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Write a JSON snapshot of an experiment to the output directory
    Export {
        experiment: ExperimentId,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Print the primary and secondary staining protocol for an experiment
    Protocol {
        experiment: ExperimentId,
        #[command(flatten)]
        session: SessionArgs,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    Add {
        display_name: String,
        #[arg(long)]
        email: Option<String>,
        /// Create an admin account
        #[arg(long, default_value_t = false)]
        admin: bool,
    },
    List,
    Remove { id: UserId },
}

#[derive(Subcommand)]
enum ExperimentCommands {
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "type")]
        experiment_type: Option<String>,
    },
    List,
    Status {
        id: ExperimentId,
        status: ExperimentStatus,
    },
    Delete { id: ExperimentId },
}

#[derive(Subcommand)]
enum MemberCommands {
    Add {
        experiment: ExperimentId,
        /// Member's id, email or display name
        member: String,
        #[arg(long, default_value = "viewer")]
        role: MemberRole,
        #[arg(long, default_value_t = false)]
        can_add_notes: bool,
    },
}

#[derive(Subcommand)]
enum GroupCommands {
    Add {
        experiment: ExperimentId,
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value_t = 0)]
        sort_order: i64,
    },
}

#[derive(Subcommand)]
enum SlideCommands {
    Add {
        experiment: ExperimentId,
        group: TreatmentGroupId,
        label: String,
        /// Freezer, box or shelf the slide is kept in
        #[arg(long)]
        location: Option<String>,
    },
    List { experiment: ExperimentId },
    Status { id: SlideId, status: SlideStatus },
    /// Check the slide's antibody panel and suggest secondaries per channel
    Panel { id: SlideId },
}

#[derive(Subcommand)]
enum AntibodyCommands {
    Add {
        name: String,
        /// Host species
        host: String,
        /// Species a secondary binds; marks the antibody as secondary
        #[arg(long, requires = "fluorophore")]
        anti: Option<String>,
        #[arg(long)]
        fluorophore: Option<String>,
        /// Stock dilution, e.g. 1/500
        #[arg(long)]
        stock: Option<String>,
        #[arg(long)]
        catalog_number: Option<String>,
        #[arg(long)]
        igg: Option<String>,
    },
    List {
        #[arg(long)]
        role: Option<AntibodyRole>,
    },
    /// Import a CSV catalog (default: the catalog path in config)
    Import {
        role: AntibodyRole,
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum NoteCommands {
    Add {
        slide: SlideId,
        body: String,
        #[arg(long = "type", default_value = "general")]
        note_type: NoteType,
    },
    /// Imaging notes and appended notes in time order
    Feed { slide: SlideId },
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let data_dir = match cli.data_dir.clone() {
        Some(dir) => dir,
        None => config::resolve_data_dir()?,
    };
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to prepare data dir {}", data_dir.display()))?;

    let config_store = if cli.data_dir.is_some() {
        ConfigStore::from_dir(&data_dir)
    } else {
        ConfigStore::from_default_location()?
    };
    let loaded = config_store.load_or_init();
    let config = match &loaded {
        Ok(cfg) => cfg.clone(),
        Err(_) => AppConfig::default(),
    };
    let _log_guard = init_local_logger(&data_dir.join("logs"), &config.log_filter);
    if let Err(err) = &loaded {
        error!("failed to load config: {err:#}");
    }

    let db_path = config.database_path(&data_dir);
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    let notebook = build_notebook(store, &config, &data_dir);
    if let Some(admin) = &config.bootstrap_admin {
        if let Some(user) =
            notebook.ensure_bootstrap_admin(&admin.display_name, admin.email.as_deref())?
        {
            info!(user_id = %user.id, "created bootstrap admin");
        }
    }

    let app = commands::App {
        notebook,
        config,
        config_path: config_store.path().to_path_buf(),
        db_path,
    };
    app.dispatch(cli.command)
}

fn build_notebook(store: SqliteStore, config: &AppConfig, data_dir: &Path) -> Notebook {
    Notebook::new(Arc::new(store), notebook_settings(config, data_dir))
        .with_panel_width(config.panel.default_width)
}

fn notebook_settings(config: &AppConfig, data_dir: &Path) -> NotebookSettings {
    NotebookSettings {
        default_output_dir: config.output_dir(data_dir),
        protocol: ProtocolSettings {
            serum_type: Some(config.panel.serum_type.clone()),
            primary_volume_ul: Some(config.protocol.primary_volume_ul),
            primary_incubation: Some(config.protocol.primary_incubation.clone()),
            secondary_volume_ul: Some(config.protocol.secondary_volume_ul),
            secondary_incubation: Some(config.protocol.secondary_incubation.clone()),
            ..ProtocolSettings::default()
        },
        panel_width: config.panel.default_width,
        recent_locations: config.recent_locations,
    }
}

fn init_local_logger(
    log_dir: &Path,
    default_filter: &str,
) -> tracing_appender::non_blocking::WorkerGuard {
    if let Err(err) = fs::create_dir_all(log_dir) {
        eprintln!("failed to create log dir `{}`: {err}", log_dir.display());
    }
    let file_appender = tracing_appender::rolling::daily(log_dir, "slideapp.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_writer(writer)
        .init();

    guard
}
