//! Bulk gallery enrollment from a folder of face images
//!
//! Every `.jpg`/`.jpeg`/`.png` file is enrolled under its file stem;
//! re-running replaces existing entries.

use anyhow::Context;
use clap::Parser;
use face_gallery::SqliteGallery;
use face_service::{init_logging, run_enrollment, ServiceConfig};
use identity_engine::{ArcFaceExtractor, EnrollmentSummary};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "enroll-faces",
    version,
    about = "Enroll every face image in a folder into the gallery",
    long_about = None
)]
struct Args {
    /// Folder of images, one person per file
    dir: PathBuf,

    /// Configuration file (gallery and extractor sections are used)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ServiceConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    init_logging(&config.logging)?;

    let gallery = Arc::new(
        SqliteGallery::connect(
            &config.gallery.url,
            config.gallery.max_connections,
            config.gallery.metric,
        )
        .await
        .context("failed to open gallery")?,
    );
    let extractor = Arc::new(
        ArcFaceExtractor::new(&config.extractor).context("failed to load embedding model")?,
    );

    let reports = run_enrollment(gallery.clone(), extractor, &args.dir)
        .await
        .with_context(|| format!("failed to enroll from {}", args.dir.display()))?;

    for report in &reports {
        println!("{}", report);
    }
    println!("{}", EnrollmentSummary::from_reports(&reports));

    gallery.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_dir_and_config() {
        let args =
            Args::try_parse_from(["enroll-faces", "faces", "--config", "gallery.toml"]).unwrap();
        assert_eq!(args.dir, PathBuf::from("faces"));
        assert_eq!(args.config, Some(PathBuf::from("gallery.toml")));
    }

    #[test]
    fn test_help_is_not_taken_as_a_directory() {
        let err = Args::try_parse_from(["enroll-faces", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);

        let err = Args::try_parse_from(["enroll-faces"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }
}
