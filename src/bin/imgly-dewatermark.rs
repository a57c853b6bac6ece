//! IMG.LY Watermark Removal CLI Tool
//!
//! Command-line interface for the imgly-dewatermark batch pipeline.

#[cfg(feature = "cli")]
use imgly_dewatermark::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
