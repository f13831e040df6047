//! retina-classify - classify a single retinal image file

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use retina_live::config::RetinaConfig;
use retina_live::ui::{describe_upload, Ui};
use retina_live::{classify_file, HttpClassifier};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image file to classify (JPEG, PNG, ...).
    image: PathBuf,
    /// Classification endpoint (overrides RETINA_ENDPOINT and the config file).
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,
    /// Request timeout in seconds.
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,
    /// Print the result as JSON on stdout.
    #[arg(long)]
    json: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let mut cfg = RetinaConfig::load()?;
    if let Some(endpoint) = args.endpoint {
        cfg.classifier.endpoint = endpoint;
    }
    if let Some(secs) = args.timeout_secs {
        cfg.classifier.timeout = std::time::Duration::from_secs(secs);
    }
    cfg.validate()?;

    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let classifier = HttpClassifier::new(&cfg.classifier.endpoint, cfg.classifier.timeout);
    let state = {
        let _stage = ui.stage("Analyze image");
        classify_file(&classifier, &args.image)
    };

    if args.json {
        let body = match (state.result(), state.error()) {
            (Some(result), _) => serde_json::json!({
                "prediction": result.stage,
                "label": result.stage.info().label,
                "risk": result.stage.info().risk.to_string(),
                "confidence": result.confidence,
            }),
            (None, error) => serde_json::json!({ "error": error }),
        };
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("{}", describe_upload(&state));
    }

    match state.error() {
        Some(error) => Err(anyhow!("{}", error)),
        None => Ok(()),
    }
}
