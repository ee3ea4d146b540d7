use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{gallery, PersonRecord, RegisteredFace, WholeImageDetector};
use rollcall_engine::{
    spawn_from_config, AttendanceWorkflow, CaptureOutcome, Collaborators, Config, EngineHandle,
    FaceRegistry, PersonKind, SqliteStore, WorkflowSettings,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face recognition attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register (or replace) the face of a person from a cropped photo
    Enroll {
        /// Person ID the face belongs to
        #[arg(short, long)]
        person: String,
        /// Photo of the face
        image: PathBuf,
        /// Skip the photo plausibility check
        #[arg(long)]
        no_check: bool,
    },
    /// List registered faces
    List,
    /// Remove a registered face
    Remove {
        /// Person ID to remove
        id: String,
    },
    /// Manage student and volunteer records
    Person {
        #[command(subcommand)]
        command: PersonCommands,
    },
    /// Recognize a photo and optionally mark the best match present today
    Recognize {
        image: PathBuf,
        /// Mark attendance for the top candidate
        #[arg(long)]
        mark: bool,
    },
    /// Run the photo classifier on an image
    Classify {
        image: PathBuf,
        /// Number of classes to print
        #[arg(short, long, default_value_t = 5)]
        top: usize,
    },
    /// Show configuration, model and database status
    Status,
}

#[derive(Subcommand)]
enum PersonCommands {
    /// Add or update a person record
    Add {
        id: String,
        #[arg(short, long)]
        name: String,
        /// student or volunteer
        #[arg(short, long)]
        kind: PersonKind,
        #[arg(long, default_value = "")]
        subtitle: String,
        #[arg(long)]
        photo_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Enroll {
            person,
            image,
            no_check,
        } => enroll(&config, &person, &image, no_check).await?,
        Commands::List => {
            let store = open_store(&config)?;
            let faces = store.snapshot().await?;
            if faces.is_empty() {
                println!("No faces registered");
            }
            for face in faces {
                println!(
                    "{}\t{}\t{}",
                    face.person_id,
                    face.embedding.model_version.as_deref().unwrap_or("-"),
                    face.image_ref
                );
            }
        }
        Commands::Remove { id } => {
            let store = open_store(&config)?;
            if store.remove_face(&id).await? {
                println!("Removed face for {id}");
            } else {
                bail!("no face registered for {id}");
            }
        }
        Commands::Person {
            command:
                PersonCommands::Add {
                    id,
                    name,
                    kind,
                    subtitle,
                    photo_url,
                },
        } => {
            let store = open_store(&config)?;
            let record = PersonRecord {
                person_id: id.clone(),
                display_name: name,
                subtitle,
                profile_image_url: photo_url,
            };
            store.upsert_person(kind, record).await?;
            println!("Saved {kind} {id}");
        }
        Commands::Recognize { image, mark } => recognize(&config, &image, mark).await?,
        Commands::Classify { image, top } => {
            let engine = spawn_from_config(&config)?;
            let photo = load_photo(&image)?;
            let ranked = engine.classify(photo).await?;
            let sensible = config.photo_filter().is_sensible(&ranked);
            let ranked: Vec<_> = ranked.into_iter().take(top).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "classes": ranked,
                    "sensible": sensible,
                }))?
            );
        }
        Commands::Status => status(&config).await?,
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(SqliteStore::open(&config.db_path)?)
}

fn load_photo(path: &Path) -> Result<image::RgbImage> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(gallery::decode_upright(&bytes)?)
}

async fn enroll(config: &Config, person: &str, image: &Path, no_check: bool) -> Result<()> {
    let store = open_store(config)?;
    let engine = spawn_from_config(config)?;
    let photo = load_photo(image)?;

    if !no_check {
        check_photo(&engine, config, &photo).await?;
    }

    let embedding = engine.embed(photo).await?;
    store
        .upsert_face(RegisteredFace {
            person_id: person.to_string(),
            embedding,
            image_ref: image.display().to_string(),
        })
        .await?;
    println!("Enrolled face for {person}");
    Ok(())
}

/// Reject implausible photos. A missing classifier only warns.
async fn check_photo(
    engine: &EngineHandle,
    config: &Config,
    photo: &image::RgbImage,
) -> Result<()> {
    match engine.check_photo(photo.clone(), &config.photo_filter()).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            bail!("photo does not look like a usable face photo (use --no-check to override)")
        }
        Err(e) if e.is_resource_error() => {
            tracing::warn!(error = %e, "photo check skipped");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn recognize(config: &Config, image: &Path, mark: bool) -> Result<()> {
    let store = open_store(config)?;
    let engine = spawn_from_config(config)?;
    let collab = Collaborators {
        detector: Arc::new(WholeImageDetector),
        registry: Arc::new(store.clone()),
        students: Arc::new(store.directory(PersonKind::Student)),
        volunteers: Arc::new(store.directory(PersonKind::Volunteer)),
        attendance: Arc::new(store.clone()),
    };
    let workflow = AttendanceWorkflow::new(engine, collab, WorkflowSettings::from_config(config));

    let bytes = std::fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let candidates = match workflow.process_image_from_gallery(bytes).await? {
        CaptureOutcome::Candidates(people) => people,
        CaptureOutcome::Rejected(issue) => bail!("{issue}"),
        CaptureOutcome::Abandoned => bail!("recognition was abandoned"),
    };
    println!("{}", serde_json::to_string_pretty(&candidates)?);

    if mark {
        let Some(top) = candidates.first() else {
            bail!("no candidates to mark");
        };
        let outcome = workflow
            .mark_attendance(&top.person_id, top.is_student)
            .await?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        if let Some(message) = workflow.snapshot().message {
            println!("{message}");
        }
    }
    Ok(())
}

async fn status(config: &Config) -> Result<()> {
    let model = |path: PathBuf| {
        serde_json::json!({
            "path": path.display().to_string(),
            "present": path.exists(),
        })
    };
    let counts = open_store(config)?.counts().await?;
    let report = serde_json::json!({
        "embedding_model": model(config.embedding_model_path()),
        "classifier_model": model(config.classifier_model_path()),
        "model_variant": config.model_variant,
        "database": config.db_path.display().to_string(),
        "similarity_threshold": config.similarity_threshold,
        "live_top_n": config.live_top_n,
        "counts": counts,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
