//! Echo kernel over stdio.
//!
//! Reads one JSON wire message per line from stdin and writes every message
//! the kernel sends (replies and iopub publications) to stdout, one per line.

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    cli::run()
}

#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
mod cli {
    use std::io::{self, BufRead, Write};
    use std::path::PathBuf;
    use std::rc::Rc;

    use anyhow::{Context, Result};
    use clap::Parser;
    use kernel_lite::{init_logging, register_echo_handlers, Kernel, KernelConfig, KernelState};
    use kernel_wire::wire;
    use log::{error, info};

    #[derive(Parser, Debug)]
    #[command(name = "kernel-lite")]
    #[command(about = "Echo kernel speaking JSON wire messages over stdio")]
    struct Cli {
        /// Path to a JSON kernel config
        #[arg(long)]
        config: Option<PathBuf>,

        /// Log level (overrides the config)
        #[arg(long)]
        log_level: Option<String>,
    }

    pub fn run() -> Result<()> {
        let cli = Cli::parse();

        let mut config = match &cli.config {
            Some(path) => KernelConfig::load(path)?,
            None => KernelConfig::default(),
        };
        if let Some(level) = cli.log_level {
            config.log_level = level;
        }
        init_logging(&config.log_level);

        let kernel = Rc::new(Kernel::new(config));
        kernel.get_server().register_host_callback(|topic, envelope| {
            let line = wire::to_json(envelope, topic)?;
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{line}")?;
            stdout.flush()?;
            Ok(())
        })?;
        register_echo_handlers(&kernel);
        kernel.start()?;

        for line in io::stdin().lock().lines() {
            let line = line.context("Failed to read stdin")?;
            if line.trim().is_empty() {
                continue;
            }
            match wire::from_json(&line) {
                Ok(envelope) => {
                    kernel.get_server().notify_listener(&envelope);
                }
                Err(e) => error!("[kernel-lite] rejected message: {}", e),
            }
            if kernel.state() == KernelState::Stopped {
                break;
            }
        }

        if kernel.state() == KernelState::Started {
            kernel.stop()?;
        }
        info!("[kernel-lite] exiting");
        Ok(())
    }
}
