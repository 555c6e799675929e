use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use veriface_core::{
    matcher, DecodedImage, DetectedFace, DetectionOutcome, Embedding, ExifSummary,
    IdentifyResult, LivenessEngine, LivenessPolicy, MatchCandidate,
};

#[derive(Parser)]
#[command(name = "veriface", about = "Veriface liveness and matching diagnostics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the anti-spoofing battery on an image and print the JSON report.
    ///
    /// The neural detector is an external service; supply its output as a
    /// JSON list of detected faces via --detection. Without it the report is
    /// scored as if no face was found (image-quality diagnostics are still
    /// measured). Exits with status 1 on a not-live verdict.
    Liveness {
        /// Image file (JPEG, PNG, ...)
        image: PathBuf,
        /// Detector output: JSON list of {bbox: {x,y,width,height}, confidence}
        #[arg(long)]
        detection: Option<PathBuf>,
        /// Policy TOML file (defaults to the reference policy)
        #[arg(long)]
        policy: Option<PathBuf>,
        /// Pretty-print the report
        #[arg(long)]
        pretty: bool,
    },
    /// Scan a gallery for a duplicate of the probe embedding.
    DuplicateCheck {
        /// Probe embedding: JSON {"values": [...]}
        #[arg(long)]
        probe: PathBuf,
        /// Gallery: JSON list of {user_id, username, email, embedding}
        #[arg(long)]
        gallery: PathBuf,
        /// Distance threshold
        #[arg(long, default_value_t = 0.4)]
        threshold: f32,
        #[arg(long)]
        policy: Option<PathBuf>,
    },
    /// Identify the closest gallery entry for the probe embedding.
    Identify {
        #[arg(long)]
        probe: PathBuf,
        #[arg(long)]
        gallery: PathBuf,
        #[arg(long, default_value_t = 0.4)]
        threshold: f32,
    },
    /// Print the effective policy as TOML.
    Policy {
        #[arg(long)]
        policy: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Liveness {
            image,
            detection,
            policy,
            pretty,
        } => run_liveness(&image, detection.as_deref(), policy.as_deref(), pretty),
        Commands::DuplicateCheck {
            probe,
            gallery,
            threshold,
            policy,
        } => run_duplicate_check(&probe, &gallery, threshold, policy.as_deref()),
        Commands::Identify {
            probe,
            gallery,
            threshold,
        } => run_identify(&probe, &gallery, threshold),
        Commands::Policy { policy } => {
            let policy = load_policy(policy.as_deref())?;
            print!("{}", toml::to_string_pretty(&policy)?);
            Ok(())
        }
    }
}

fn run_liveness(
    image: &Path,
    detection: Option<&Path>,
    policy: Option<&Path>,
    pretty: bool,
) -> Result<()> {
    let bytes =
        std::fs::read(image).with_context(|| format!("reading image {}", image.display()))?;
    let exif = ExifSummary::from_bytes(&bytes);
    let decoded = DecodedImage::from_bytes(&bytes)?;
    let outcome = match detection {
        Some(path) => DetectionOutcome::from_faces(read_json::<Vec<DetectedFace>>(path)?),
        None => DetectionOutcome::NoFace,
    };

    let engine = LivenessEngine::new(load_policy(policy)?)?;
    let report = engine.evaluate(&decoded, &exif, &outcome);

    let out = if pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{out}");

    if !report.is_live {
        std::process::exit(1);
    }
    Ok(())
}

fn run_duplicate_check(
    probe: &Path,
    gallery: &Path,
    threshold: f32,
    policy: Option<&Path>,
) -> Result<()> {
    let probe: Embedding = read_json(probe)?;
    let gallery: Vec<MatchCandidate> = read_json(gallery)?;
    let policy = load_policy(policy)?;

    match matcher::find_duplicate(&probe, &gallery, threshold, policy.max_distance)? {
        Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
        None => println!("{}", serde_json::json!({ "matched": false })),
    }
    Ok(())
}

fn run_identify(probe: &Path, gallery: &Path, threshold: f32) -> Result<()> {
    let probe: Embedding = read_json(probe)?;
    let gallery: Vec<MatchCandidate> = read_json(gallery)?;

    let result = match matcher::find_best_match(&probe, &gallery, threshold)? {
        Some(m) => IdentifyResult {
            identified: true,
            user_id: Some(m.candidate.user_id.clone()),
            confidence: (1.0 - m.distance / threshold).max(0.0),
            distance: m.distance,
        },
        None => IdentifyResult::none(),
    };
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn load_policy(path: Option<&Path>) -> Result<LivenessPolicy> {
    match path {
        Some(path) => LivenessPolicy::from_toml_file(path)
            .with_context(|| format!("loading policy {}", path.display())),
        None => Ok(LivenessPolicy::default()),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}
