use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use mvreg_core::consts::REFERENCE_INDEX;
use mvreg_core::registration::config::{MetricName, RegistrationConfig};
use mvreg_core::registration::{
    register_all, BatchResult, IterationReport, JobInfo, MultiViewRegistration,
    RegistrationObserver, RegistrationOutcome,
};
use mvreg_core::{Archive, MvregError};
use tracing::debug;

use crate::summary::{print_batch_results, print_registration_summary};

#[derive(Args)]
pub struct RegisterArgs {
    /// Archive directory
    #[arg(short, long)]
    pub archive: PathBuf,

    /// TOML registration config (see `mvreg config`)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Similarity metric: mattes, correlation or mean-squared-difference
    #[arg(long)]
    pub metric: Option<String>,

    /// Array axis the acquisition rotation is about (0, 1 or 2)
    #[arg(long)]
    pub rot_axis: Option<usize>,

    /// Manual translation in physical units, as x,y,z
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub offset: Option<Vec<f64>>,

    /// Image scale in percent
    #[arg(long)]
    pub scale: Option<u32>,

    /// Channel to register
    #[arg(long)]
    pub channel: Option<u32>,

    /// Register only these view indices (default: every non-reference view)
    #[arg(long, num_args = 1..)]
    pub moving: Vec<u32>,

    /// Re-register views that already have a registered result
    #[arg(long)]
    pub overwrite: bool,

    /// Run without writing results to the archive
    #[arg(long)]
    pub dry_run: bool,
}

/// Drives a progress bar from optimizer iterations.
struct ProgressObserver {
    pb: ProgressBar,
}

impl RegistrationObserver for ProgressObserver {
    fn on_start(&self, job: &JobInfo) {
        self.pb.reset();
        self.pb.set_message(format!("View {}", job.moving_index));
    }

    fn on_iteration(&self, report: &IterationReport) {
        self.pb.set_length(report.max_iterations as u64);
        self.pb.set_position(report.iteration as u64);
        self.pb.set_message(format!("metric {:.4e}", report.metric_value));
    }
}

fn build_config(args: &RegisterArgs) -> Result<RegistrationConfig> {
    let mut config: RegistrationConfig = if let Some(ref config_path) = args.config {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config {}", config_path.display()))?;
        toml::from_str(&contents).context("Invalid registration config")?
    } else {
        RegistrationConfig::default()
    };

    if let Some(ref metric) = args.metric {
        config.metric = MetricName(metric.clone());
    }
    if let Some(axis) = args.rot_axis {
        config.rot_axis = axis;
    }
    if let Some(ref offset) = args.offset {
        let [x, y, z] = offset.as_slice() else {
            bail!("--offset needs three comma-separated values, got {}", offset.len());
        };
        config.offset = [*x, *y, *z];
    }
    if let Some(scale) = args.scale {
        config.scale = scale;
    }
    if let Some(channel) = args.channel {
        config.channel = channel;
    }
    if args.overwrite {
        config.skip_existing = false;
    }
    if args.dry_run {
        config.write_results = false;
    }
    Ok(config)
}

pub fn run(args: &RegisterArgs) -> Result<()> {
    let config = build_config(args)?;
    // Surface a bad metric name before any work starts.
    config.metric.resolve()?;
    config.validate()?;
    debug!(?config, "Resolved registration config");

    let mut archive = Archive::open(&args.archive)
        .with_context(|| format!("Failed to open archive {}", args.archive.display()))?;

    print_registration_summary(&config, &args.archive);

    let pb = ProgressBar::new(config.optimizer.max_iterations as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg:24} [{bar:40}] {pos}/{len}")?
            .progress_chars("=> "),
    );
    let observer: Arc<dyn RegistrationObserver> = Arc::new(ProgressObserver { pb: pb.clone() });

    let results = if args.moving.is_empty() {
        register_all(&mut archive, &config, &[observer])?
    } else {
        let mut registration = MultiViewRegistration::new(&mut archive, config.clone());
        registration.add_observer(observer);
        registration.set_fixed(REFERENCE_INDEX);

        let mut results = Vec::with_capacity(args.moving.len());
        for &index in &args.moving {
            registration.set_moving(index);
            let entry = match registration.execute() {
                Ok(RegistrationOutcome::Registered(summary)) => BatchResult::Registered(summary),
                Ok(RegistrationOutcome::Skipped) => BatchResult::Skipped,
                Err(MvregError::Convergence(reason)) => BatchResult::Failed(reason),
                Err(e) => return Err(e).with_context(|| format!("Failed to register view {index}")),
            };
            results.push((index, entry));
        }
        results
    };
    pb.finish_and_clear();

    print_batch_results(&results);
    archive.close()?;
    Ok(())
}
