use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use tourmap::config;
use tourmap::elevation::HttpDownloader;
use tourmap::render::Nik4Renderer;
use tourmap::tool::CommandRunner;
use tourmap::Pipeline;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Area to map, as named in areas.json
    #[arg(value_name = "AREA", required_unless_present = "list_areas")]
    area: Option<String>,

    /// Output format name from output_formats.json
    #[arg(short, long, default_value = "A3")]
    format: String,

    /// Map style to render with
    #[arg(short, long, default_value = "tourist")]
    style: String,

    /// Directory holding areas.json and output_formats.json
    #[arg(long, value_name = "DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Directory for downloaded data and generated artifacts
    #[arg(long, value_name = "DIR", default_value = "data")]
    data_dir: PathBuf,

    /// List configured areas and exit
    #[arg(long)]
    list_areas: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    if args.list_areas {
        for area in config::list_areas(&args.config_dir)? {
            println!("{area}");
        }
        return Ok(());
    }
    // required_unless_present guarantees the positional is there.
    let area = args.area.clone().unwrap_or_default();

    let start_time = std::time::Instant::now();

    let tools = CommandRunner;
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(30))
        .build();
    let downloader = HttpDownloader::new(agent);
    let engine = Nik4Renderer::new(&tools);

    let pipeline = Pipeline::new(
        args.config_dir.clone(),
        args.data_dir.clone(),
        &tools,
        &engine,
        &downloader,
    )
    .with_style(args.style.clone());

    match pipeline.run(&area, &args.format) {
        Ok(output) => {
            info!("Total processing time: {:?}", start_time.elapsed());
            println!("Map written to {}", output.display());
            Ok(())
        }
        Err(e) => {
            error!("Map generation failed during the {} stage", e.stage);
            Err(e.into())
        }
    }
}
