//! Tell a story about a picture on disk, without running the server.
//!
//! Minimal UX:
//!   tell_story ./holiday.jpg

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use pixtale::cli::CliOptions;
use pixtale::config::setup_logging;
use pixtale::normalize::normalize;
use pixtale::speech::{Synthesizer, TranslateSpeech};
use pixtale::storage::{RequestId, UploadStore};
use pixtale::story::{ChatStoryTeller, StoryTeller};

#[derive(Parser, Debug)]
#[command(name = "tell_story")]
#[command(about = "Write and narrate a short story about an image")]
struct Args {
    /// Image to tell a story about (JPG or PNG)
    image: PathBuf,

    /// Print the story but skip narration
    #[arg(long)]
    no_audio: bool,

    #[command(flatten)]
    options: CliOptions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.options.debug).map_err(|err| anyhow!("logging setup failed: {err}"))?;
    let config = args.options.to_config();

    let (max_dimension, quality) = (config.max_dimension, config.quality);
    let image = args.image.clone();
    let payload = tokio::task::spawn_blocking(move || normalize(&image, max_dimension, quality))
        .await?
        .with_context(|| format!("Failed to prepare {}", args.image.display()))?;

    let teller = ChatStoryTeller::from_config(&config);
    let story = teller
        .tell_story(&payload)
        .await
        .context("Story generation failed")?;
    println!("{story}");

    if args.no_audio {
        return Ok(());
    }

    let speech = TranslateSpeech::from_config(&config).context("Bad speech service URL")?;
    let synthesizer = Synthesizer::new(Arc::new(speech), UploadStore::new(&config.upload_dir));
    let audio_path = synthesizer
        .synthesize(&story, RequestId::next())
        .await
        .context("Narration failed")?;

    eprintln!("Saved: {}", audio_path.display());
    Ok(())
}
