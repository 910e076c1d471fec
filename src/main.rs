use std::{path::PathBuf, time::Duration};

use clap::Parser;
use slidecast::{
    OpenAiPipeline, PipelineError, QaChainConfig, QaOutcome, Result, RunControl, Stage,
    config::AppConfig,
    util::{format_local, now_local},
};
use tokio::{
    fs,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::{format::Writer, time::FormatTime};

/// Narrated lecture video from a folder of slide images, then questions
/// about the lecture on stdin.
#[derive(Debug, Parser)]
#[command(name = "slidecast")]
#[command(version)]
struct Cli {
    /// Directory of slide images named `page_<n>.png` / `.jpg`
    #[arg(value_name = "IMAGES_DIR")]
    images_dir: PathBuf,

    /// Where to copy the finished video
    #[arg(value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Config file (default: APP_CONFIG_PATH or config/app_config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Abort the run after this many seconds, overriding `[run] timeout_seconds`
    #[arg(short, long, value_name = "SECONDS")]
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();

    init_tracing();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    let timeout = cli.timeout.map(Duration::from_secs).or(config.run.timeout);
    let pipeline = OpenAiPipeline::from_config(&config, Some(cli.images_dir)).await?;

    let progress_task = {
        let mut progress = pipeline.subscribe_progress();
        tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let current = progress.borrow_and_update().clone();
                if current.stage != Stage::Idle {
                    info!(
                        target: "pipeline",
                        stage = %current.stage,
                        percent = current.percent,
                        "{}",
                        current.details
                    );
                }
            }
        })
    };

    let control = RunControl::with_timeout(timeout);
    let run = pipeline.run(&control);
    tokio::pin!(run);
    let report = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            warn!(target: "pipeline", "interrupt received; stopping after the current step");
            control.cancel();
            run.await
        }
    };
    progress_task.abort();

    let report = match report {
        Ok(report) => report,
        Err(err) => {
            error!(target: "pipeline", error = %err, external = err.is_external(), "run failed");
            return Err(err);
        }
    };

    let video_path = match cli.output {
        Some(output) => {
            fs::copy(&report.video_path, &output).await?;
            output
        }
        None => report.video_path.clone(),
    };
    println!("{}", video_path.display());

    qa_loop(&pipeline).await
}

/// Answers questions from stdin until `quit` or end of input.
/// `/threshold <value>` and `/instructions <text>` change QA settings.
async fn qa_loop(pipeline: &OpenAiPipeline) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("quit") {
            break;
        }

        let reply = if let Some(value) = line.strip_prefix("/threshold") {
            match value.trim().parse::<f64>() {
                Ok(threshold) => {
                    let settings = QaChainConfig {
                        threshold,
                        ..pipeline.qa_settings().await
                    };
                    pipeline
                        .update_qa_settings(settings)
                        .await
                        .map(|_| format!("threshold set to {threshold}"))
                }
                Err(_) => Err(PipelineError::InvalidInput(format!(
                    "not a number: {}",
                    value.trim()
                ))),
            }
        } else if let Some(text) = line.strip_prefix("/instructions") {
            let settings = QaChainConfig {
                safety_instructions: text.trim().to_string(),
                ..pipeline.qa_settings().await
            };
            pipeline
                .update_qa_settings(settings)
                .await
                .map(|_| "instructions updated".to_string())
        } else {
            pipeline.ask(line).await.map(|outcome| match outcome {
                QaOutcome::Answered(answer) => answer,
                QaOutcome::Rejected(refusal) => refusal,
            })
        };

        match reply {
            Ok(text) => stdout.write_all(format!("{text}\n").as_bytes()).await?,
            Err(err) => stdout.write_all(format!("error: {err}\n").as_bytes()).await?,
        }
    }

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .with_timer(LocalTimer)
        .with_writer(std::io::stderr)
        .init();

    info!("tracing initialized");
}

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = now_local();
        write!(w, "{}", format_local(&now, "%Y-%m-%d %H:%M:%S%:z"))
    }
}
