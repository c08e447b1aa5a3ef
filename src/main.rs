//! blt: manage a local BOSH Lit environment.
//!
//! Thin command-line surface over the `blt` library. All output to stdout is
//! produced by a single rendering task per invocation so progress lines, step
//! headings and the spinner never interleave.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use blt::assets::{AssetPipeline, BUILD_ASSET_VERSION, ProgressEvent, ProgressSink};
use blt::config::BltConfig;
use blt::deploy::CommandDeployer;
use blt::paths::BltPaths;
use blt::up::{UpContext, UpOptions, UpOutcome, UpStage};
use blt::vm::{Supervisor, VmStatus};
use blt::{logging, up};

const PROGRESS_CAPACITY: usize = 64;

/// Local BOSH Lit environment
#[derive(Parser, Debug)]
#[command(name = "blt", version, about = "Manage a local BOSH Lit VM")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the VM status
    Status,
    /// Fetch assets if needed, start the VM and deploy the director
    Up {
        /// Number of cores to allocate to the VM
        #[arg(short, long)]
        cpu: Option<u32>,
        /// Memory to allocate to the VM, in megabytes
        #[arg(short, long)]
        memory: Option<u32>,
        /// Disk space to allocate to the VM, in gigabytes
        #[arg(short, long)]
        disk: Option<u32>,
        /// Asset bundle version to run
        #[arg(long, default_value = BUILD_ASSET_VERSION)]
        asset_version: String,
    },
    /// Stop the VM
    Down,
    /// Delete all VM and director state (the VM must be stopped)
    Destroy {
        /// Required; there is no interactive confirmation
        #[arg(long)]
        force: bool,
    },
    /// Download and install an asset bundle
    Fetch {
        #[arg(long, default_value = BUILD_ASSET_VERSION)]
        asset_version: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let paths = BltPaths::resolve().context("could not determine home directory (set BLT_HOME or HOME)")?;
    let _log_guard = logging::init(&paths.logs);
    paths
        .ensure()
        .with_context(|| format!("failed to prepare {}", paths.home.display()))?;
    let config = BltConfig::load(&paths.config_file())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    runtime.block_on(run(args.command, paths, config))
}

async fn run(command: Command, paths: BltPaths, config: BltConfig) -> Result<()> {
    let supervisor = Supervisor::new(&paths, &config.health);

    match command {
        Command::Status => {
            println!("{}", supervisor.status().await);
        }
        Command::Down => {
            if supervisor.status().await == VmStatus::Stopped {
                println!("BOSH Lit is not running");
                return Ok(());
            }
            print_flush("Stopping VM...   ");
            supervisor.stop().await;
            println!("{}", supervisor.status().await);
        }
        Command::Destroy { force } => {
            if !force {
                bail!("destroying deletes the director and all its deployments; pass --force to confirm");
            }
            supervisor.destroy_state(&paths).await?;
            println!("Destroyed {}", paths.state.display());
        }
        Command::Fetch { asset_version } => {
            let pipeline = AssetPipeline::from_config(&config.assets)?;
            let (sink, events) = ProgressSink::channel(PROGRESS_CAPACITY);
            let (stages, stage_rx) = mpsc::unbounded_channel();
            let renderer = tokio::spawn(render(stage_rx, events));

            let result = pipeline.fetch_and_install(&asset_version, &paths, &sink).await;
            drop(sink);
            drop(stages);
            let _ = renderer.await;
            result?;
        }
        Command::Up {
            cpu,
            memory,
            disk,
            asset_version,
        } => {
            let mut resources = config.vm.clone();
            if let Some(cpus) = cpu {
                resources.cpus = cpus;
            }
            if let Some(memory_mb) = memory {
                resources.memory_mb = memory_mb;
            }
            if let Some(disk_gb) = disk {
                resources.disk_gb = disk_gb;
            }

            let pipeline = AssetPipeline::from_config(&config.assets)?;
            let deployer = CommandDeployer::default();
            let ctx = UpContext {
                paths: &paths,
                config: &config,
                supervisor: &supervisor,
                pipeline: &pipeline,
                deployer: &deployer,
            };
            let options = UpOptions {
                resources,
                asset_version,
                search_path: None,
                host_addrs: None,
            };

            let (sink, events) = ProgressSink::channel(PROGRESS_CAPACITY);
            let (stages, stage_rx) = mpsc::unbounded_channel();
            let renderer = tokio::spawn(render(stage_rx, events));

            let result = up::up(&ctx, &options, &sink, |stage| {
                let _ = stages.send(stage);
            })
            .await;
            drop(sink);
            drop(stages);
            let _ = renderer.await;

            match result? {
                UpOutcome::AlreadyRunning => println!("BOSH Lit is already running..."),
                UpOutcome::Started { elapsed, .. } => println!("\nCompleted in {elapsed:.1?}\n"),
            }
        }
    }

    Ok(())
}

/// Write every stage heading and progress event to stdout until both
/// channels close.
async fn render(
    mut stages: mpsc::UnboundedReceiver<UpStage>,
    mut events: mpsc::Receiver<ProgressEvent>,
) {
    let mut spinner: Option<Spinner> = None;
    let mut stages_open = true;
    let mut events_open = true;

    while stages_open || events_open {
        tokio::select! {
            stage = stages.recv(), if stages_open => match stage {
                Some(stage) => render_stage(stage, &mut spinner).await,
                None => stages_open = false,
            },
            event = events.recv(), if events_open => match event {
                Some(event) => render_event(&event),
                None => events_open = false,
            },
        }
    }

    if let Some(spinner) = spinner.take() {
        spinner.stop().await;
        println!();
    }
}

async fn render_stage(stage: UpStage, spinner: &mut Option<Spinner>) {
    match stage {
        UpStage::Preflight => print_flush("Validating Prerequisites...   "),
        UpStage::CheckingAssets => {
            println!("Success");
            print_flush("Checking Assets...   ");
        }
        UpStage::AssetsCurrent => println!("Success"),
        UpStage::DownloadingAssets { version } => println!("Needs Updates ({version})"),
        UpStage::StartingVm => {
            print_flush("Starting VM");
            *spinner = Some(Spinner::start());
        }
        UpStage::VmRunning => {
            if let Some(spinner) = spinner.take() {
                spinner.stop().await;
            }
            println!("Success");
        }
        UpStage::Deploying => println!("Deploying Director...  "),
    }
}

fn render_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::Fetching { .. } => print_flush(&format!("\r\x1b[K{event}")),
        _ => println!("\r\x1b[K{event}"),
    }
}

fn print_flush(text: &str) {
    let mut stdout = std::io::stdout();
    let _ = write!(stdout, "{text}");
    let _ = stdout.flush();
}

/// Indeterminate progress dots, stopped through a oneshot.
struct Spinner {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Spinner {
    fn start() -> Self {
        let (stop, mut stopped) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(500));
            let mut toggle = false;
            print_flush("...   ");
            loop {
                tokio::select! {
                    _ = &mut stopped => {
                        print_flush("\x08\x08\x08\x08\x08\x08...   ");
                        return;
                    }
                    _ = ticker.tick() => {
                        let dots = if toggle { "...   " } else { "..    " };
                        print_flush(&format!("\x08\x08\x08\x08\x08\x08{dots}"));
                        toggle = !toggle;
                    }
                }
            }
        });
        Self { stop, handle }
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.handle.await;
    }
}
