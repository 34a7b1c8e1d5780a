//! BeamFocus controller binary.
//!
//! Watches the camera's image directory, optimizes the mirror focus for
//! maximum beam brightness and uploads each new focus to the mirror
//! computer.

use anyhow::Context;
use bf_controller::FocusController;
use bf_io::{
    ActuatorSink, BrightnessMetric, DirectorySink, FtpSink, ImageWatcher, ParameterStore,
    RecordingSink,
};
use bf_types::{FocusConfig, SinkKind};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Closed-loop focus optimizer for the deformable mirror.
#[derive(Parser, Debug)]
#[command(name = "beamfocus")]
#[command(version)]
#[command(about = "Tune the mirror focus to maximize beam brightness")]
struct Cli {
    /// JSON configuration file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory the camera writes images into
    #[arg(long)]
    image_dir: Option<PathBuf>,

    /// Mirror parameter file (first value is the focus)
    #[arg(long)]
    parameter_file: Option<PathBuf>,

    /// Images averaged per decision
    #[arg(long)]
    group_size: Option<usize>,

    /// Focus step per decision
    #[arg(long)]
    step_size: Option<i64>,

    /// Relative change from the record treated as converged
    #[arg(long)]
    tolerance: Option<f64>,

    /// Seed for the initial search direction
    #[arg(long)]
    seed: Option<u64>,

    /// Also measure images already in the directory at startup
    #[arg(long)]
    process_existing: bool,

    /// How new targets reach the mirror
    #[arg(long, value_enum)]
    sink: Option<SinkArg>,

    /// Log targets instead of sending them; same as `--sink dry-run`
    #[arg(long, conflicts_with = "sink")]
    dry_run: bool,

    /// Mirror computer host (ftp sink)
    #[arg(long)]
    host: Option<String>,

    /// Login user (ftp sink)
    #[arg(long)]
    user: Option<String>,

    /// Login password (ftp sink)
    #[arg(long, env = "BEAMFOCUS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Destination directory (directory sink)
    #[arg(long)]
    target_dir: Option<PathBuf>,

    /// Write the round history as JSON lines on exit
    #[arg(long)]
    history_out: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SinkArg {
    Ftp,
    Directory,
    DryRun,
}

impl From<SinkArg> for SinkKind {
    fn from(arg: SinkArg) -> Self {
        match arg {
            SinkArg::Ftp => SinkKind::Ftp,
            SinkArg::Directory => SinkKind::Directory,
            SinkArg::DryRun => SinkKind::DryRun,
        }
    }
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<FocusConfig> {
        let mut config = match &self.config {
            Some(path) => FocusConfig::from_file(path)?,
            None => FocusConfig::default(),
        };

        if let Some(dir) = &self.image_dir {
            config.image_directory = dir.clone();
        }
        if let Some(path) = &self.parameter_file {
            config.parameter_file_path = path.clone();
        }
        if let Some(size) = self.group_size {
            config.image_group_size = size;
        }
        if let Some(step) = self.step_size {
            config.step_size = step;
        }
        if let Some(tolerance) = self.tolerance {
            config.convergence_tolerance = tolerance;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.process_existing {
            config.process_existing = true;
        }
        if let Some(sink) = self.sink {
            config.actuator.kind = sink.into();
        }
        if self.dry_run {
            config.actuator.kind = SinkKind::DryRun;
        }
        if let Some(host) = &self.host {
            config.actuator.host = host.clone();
        }
        if let Some(user) = &self.user {
            config.actuator.user = user.clone();
        }
        if let Some(password) = &self.password {
            config.actuator.password = password.clone();
        }
        if let Some(dir) = &self.target_dir {
            config.actuator.target_directory = Some(dir.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.load_config().context("invalid configuration")?;
    let store = ParameterStore::open(&config.parameter_file_path)?;
    info!(
        path = %store.path().display(),
        initial_focus = store.target(),
        "parameter file loaded"
    );

    match config.actuator.kind {
        SinkKind::Ftp => {
            let sink = FtpSink::new(&config.actuator, store.path());
            drive(&config, sink, store, cli.history_out).await
        }
        SinkKind::Directory => {
            let target_dir = config
                .actuator
                .target_directory
                .clone()
                .context("directory sink needs a target directory")?;
            let sink = DirectorySink::new(store.path(), target_dir);
            drive(&config, sink, store, cli.history_out).await
        }
        SinkKind::DryRun => drive(&config, RecordingSink::new(), store, cli.history_out).await,
    }
}

async fn drive<S: ActuatorSink>(
    config: &FocusConfig,
    sink: S,
    store: ParameterStore,
    history_out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let metric = BrightnessMetric::new(config.median_kernel)?;
    let mut controller = FocusController::from_config(config, metric, sink, store)?;

    let mut watcher = ImageWatcher::from_config(config);
    if config.process_existing {
        anyhow::ensure!(
            watcher.directory().is_dir(),
            "image directory {} does not exist",
            watcher.directory().display()
        );
    } else {
        let skipped = watcher.prime()?;
        info!(skipped, "ignoring images already present");
    }

    let (image_tx, image_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let watcher_task = tokio::spawn(watcher.run(image_tx, shutdown_rx.clone()));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
        }
        let _ = shutdown_tx.send(true);
    });

    let outcome = controller.run(image_rx, shutdown_rx).await;

    match watcher_task.await {
        Ok(Err(e)) => warn!(error = %e, "image watcher stopped with an error"),
        Err(e) => warn!(error = %e, "image watcher task panicked"),
        Ok(Ok(())) => {}
    }

    let history = controller.history();
    if let Some(best) = history.best() {
        info!(
            rounds = history.len(),
            best_focus = best.target,
            best_group_value = best.group_value,
            final_focus = controller.climber().current_target(),
            in_sync = controller.actuator_in_sync(),
            "optimization summary"
        );
    }
    if let Some(path) = history_out {
        let file = std::fs::File::create(&path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        history.write_json_lines(std::io::BufWriter::new(file))?;
        info!(path = %path.display(), "history written");
    }

    if let Err(e) = &outcome {
        error!(error = %e, "focus controller stopped");
    }
    outcome.map_err(Into::into)
}
