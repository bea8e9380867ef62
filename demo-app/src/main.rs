#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

//! Headless driver for the `rframe` pool: brings up an instance and
//! device, then pumps empty submissions through a small frame pool to
//! exercise the acquire → record → submit → recycle cycle end to end.

use std::{
    fs::{self, File},
    sync::Arc,
    time::Instant,
};

use clap::Parser;
use rframe::{
    device::Device,
    instance::Instance,
    pool::{AcquireFrameError, FramePool, FramePoolConfig},
};
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default, clap::ValueEnum)]
enum TracingLogLevel {
    Off,
    Trace,
    Info,
    Debug,
    Warn,
    #[default]
    Error,
}

impl From<TracingLogLevel> for tracing::Level {
    fn from(value: TracingLogLevel) -> Self {
        match value {
            //We clamp this to the lowest possible level but this shouldn't happen
            TracingLogLevel::Off => tracing::Level::TRACE,
            TracingLogLevel::Trace => tracing::Level::TRACE,
            TracingLogLevel::Info => tracing::Level::INFO,
            TracingLogLevel::Debug => tracing::Level::DEBUG,
            TracingLogLevel::Warn => tracing::Level::WARN,
            TracingLogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliVulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl From<CliVulkanLogLevel> for rframe::log::VulkanLogLevel {
    fn from(value: CliVulkanLogLevel) -> Self {
        match value {
            CliVulkanLogLevel::Verbose => rframe::log::VulkanLogLevel::Verbose,
            CliVulkanLogLevel::Info => rframe::log::VulkanLogLevel::Info,
            CliVulkanLogLevel::Warning => rframe::log::VulkanLogLevel::Warning,
            CliVulkanLogLevel::Error => rframe::log::VulkanLogLevel::Error,
        }
    }
}

#[derive(clap::Parser, Debug)]
struct CliArgs {
    #[arg(short, long, default_value = "error")]
    tracing_log_level: TracingLogLevel,
    #[arg(short, long)]
    graphics_debug_level: Option<CliVulkanLogLevel>,
    /// Number of submissions to pump through the pool.
    #[arg(short, long, default_value_t = 240)]
    frames: u32,
    /// Frame-slot ceiling for the pool.
    #[arg(short, long, default_value_t = 3)]
    pool_capacity: usize,
}

fn main() -> eyre::Result<()> {
    let app_dirs = directories::ProjectDirs::from("", "rframe", "demo-app");

    let log_dir = match app_dirs
        .as_ref()
        .and_then(|x| x.runtime_dir().or_else(|| Some(x.data_dir())))
        .map(|p| p.to_owned())
    {
        Some(path) => path,
        None => std::env::current_dir()?,
    };

    let cli_args = CliArgs::parse();

    if cli_args.tracing_log_level != TracingLogLevel::Off {
        fs::create_dir_all(&log_dir)?;

        let mut log_file_path = log_dir.clone();
        log_file_path.push("log-file");
        log_file_path.set_extension("txt");
        let log_file = File::create(&log_file_path)?;
        let file_log = tracing_subscriber::fmt::layer()
            .with_writer(log_file)
            .with_ansi(false);

        println!("log_file_path: {}", log_file_path.display());
        println!("cli_args: {:#?}", cli_args);

        let stdout_log = tracing_subscriber::fmt::layer().pretty();

        tracing_subscriber::registry()
            .with(
                stdout_log
                    .with_filter(tracing_subscriber::filter::LevelFilter::from_level(
                        cli_args.tracing_log_level.into(),
                    ))
                    .and_then(file_log),
            )
            .init();
    }

    //SAFETY: Loads vulkan via libloading which is kinda unsafe but we're fine
    let instance = Arc::new(unsafe {
        Instance::new("demo-app", cli_args.graphics_debug_level.map(Into::into))
    }?);

    let device = Arc::new(Device::create(&instance)?);
    let queue = device.queue();

    let mut pool = FramePool::new(
        &device,
        device.queue_family(),
        FramePoolConfig {
            max_frames: cli_args.pool_capacity,
        },
    )?;

    tracing::trace!("Entering frame loop");
    let started = Instant::now();

    for frame_index in 0..cli_args.frames {
        // Probe for exhaustion first so the borrow of the probe does not
        // pin the pool across the drain.
        if matches!(
            pool.acquire(),
            Err(AcquireFrameError::Exhausted { .. })
        ) {
            tracing::debug!("All frame slots in flight; draining before continuing");
            pool.drain_all()?;
        }

        let frame = pool.acquire()?;
        if frame.submitted() {
            // The fence has signaled (acquire only returns available
            // slots), but the transition back to Idle is explicit.
            frame.reset()?;
        }

        //SAFETY: The slot is Idle, nothing is recorded between begin and
        //end, and this thread is the only one touching the queue.
        unsafe {
            frame.begin()?;
            frame.end()?;
            frame.submit(&queue)?;
        }

        if frame_index % 60 == 0 {
            tracing::info!(
                "Submitted frame {frame_index} ({} slots, {} in flight)",
                pool.len(),
                pool.in_flight()
            );
        }
    }

    pool.reset()?;
    tracing::info!(
        "Pumped {} submissions through {} slots in {:.2?}",
        cli_args.frames,
        pool.len(),
        started.elapsed()
    );

    drop(pool);
    device.wait_idle()?;
    Ok(())
}
