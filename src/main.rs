//! Vuelta CLI
//!
//! Runs, validates and inspects training loop configurations.
//!
//! # Usage
//!
//! ```bash
//! # Simulate a run from config
//! vuelta simulate loop.yaml
//!
//! # Simulate with overrides, printing a JSON summary
//! vuelta simulate loop.yaml --epochs 3 --json
//!
//! # Validate config
//! vuelta validate loop.yaml
//!
//! # Show config info
//! vuelta info loop.yaml --format yaml
//! ```

use clap::Parser;
use std::process::ExitCode;
use tracing::Level;
use vuelta::config::{
    apply_overrides, load_config, simulate, validate_config, Cli, Command, InfoArgs,
    OutputFormat, SimulateArgs, ValidateArgs,
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Configure output based on verbose/quiet flags
    let log_level = if cli.quiet {
        LogLevel::Quiet
    } else if cli.verbose {
        LogLevel::Verbose
    } else {
        LogLevel::Normal
    };
    init_tracing(log_level);

    let result = match cli.command {
        Command::Simulate(args) => run_simulate(args, log_level),
        Command::Validate(args) => run_validate(args, log_level),
        Command::Info(args) => run_info(args, log_level),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum LogLevel {
    Quiet,
    Normal,
    Verbose,
}

fn init_tracing(level: LogLevel) {
    let max_level = match level {
        LogLevel::Quiet => Level::ERROR,
        LogLevel::Normal => Level::WARN,
        LogLevel::Verbose => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn log(level: LogLevel, required: LogLevel, msg: &str) {
    if level != LogLevel::Quiet && (level == required || required == LogLevel::Normal) {
        println!("{msg}");
    }
}

fn run_simulate(args: SimulateArgs, level: LogLevel) -> Result<(), String> {
    log(
        level,
        LogLevel::Normal,
        &format!("Vuelta: Simulating {}", args.config.display()),
    );

    let mut spec = load_config(&args.config).map_err(|e| format!("Config error: {e}"))?;
    apply_overrides(&mut spec, &args);

    let report = simulate(&spec).map_err(|e| format!("Simulation error: {e}"))?;

    if args.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| format!("JSON serialization error: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    let fit = &report.fit;
    log(level, LogLevel::Normal, "Simulation complete!");
    log(
        level,
        LogLevel::Normal,
        &format!(
            "  Epochs: {} ({:?})",
            fit.epochs_completed, fit.stop_reason
        ),
    );
    log(
        level,
        LogLevel::Normal,
        &format!(
            "  Global step: {} (batches: {})",
            fit.progress.global_step, fit.progress.total_batch_idx
        ),
    );
    if let Some(best) = fit.best_loss {
        log(level, LogLevel::Normal, &format!("  Best epoch loss: {best:.4}"));
    }
    if !report.learning_rates.is_empty() {
        log(
            level,
            LogLevel::Normal,
            &format!("  Learning rates: {:?}", report.learning_rates),
        );
    }
    for (epoch, metrics) in report.epoch_history.iter().enumerate() {
        log(
            level,
            LogLevel::Verbose,
            &format!("  Epoch {epoch}: {metrics:?}"),
        );
    }
    log(
        level,
        LogLevel::Verbose,
        &format!("  Elapsed: {:.3}s", fit.elapsed_secs),
    );
    Ok(())
}

fn run_validate(args: ValidateArgs, level: LogLevel) -> Result<(), String> {
    log(
        level,
        LogLevel::Normal,
        &format!("Validating config: {}", args.config.display()),
    );

    let spec = load_config(&args.config).map_err(|e| format!("Config error: {e}"))?;

    validate_config(&spec).map_err(|e| format!("Validation failed: {e}"))?;

    log(level, LogLevel::Normal, "Configuration is valid");

    if args.detailed {
        let trainer = &spec.trainer;
        println!();
        println!("Configuration Summary:");
        println!("  Epochs: {}..={}", trainer.min_epochs, trainer.max_epochs);
        if let Some(max_steps) = trainer.max_steps {
            println!("  Max steps: {max_steps}");
        }
        println!("  Train batches: {:?}", trainer.limit_train_batches);
        println!("  Validation interval: {:?}", trainer.val_check_interval);
        println!("  Accumulate grad batches: {}", trainer.accumulate_grad_batches);
        println!(
            "  Logging: every {} steps, flush every {}",
            trainer.log_every_n_steps, trainer.flush_logs_every_n_steps
        );

        if !spec.schedulers.is_empty() {
            println!();
            println!("  Schedulers:");
            for s in &spec.schedulers {
                println!("    {} (lr={}, interval={})", s.name, s.lr, s.interval);
                if let Some(monitor) = &s.monitor {
                    println!("      Monitor: {monitor}");
                }
            }
        }

        if let Some(es) = &spec.early_stopping {
            println!();
            println!("  Early stopping:");
            println!("    Monitor: {}", es.monitor);
            println!("    Patience: {}", es.patience);
        }
    }

    Ok(())
}

fn run_info(args: InfoArgs, level: LogLevel) -> Result<(), String> {
    let spec = load_config(&args.config).map_err(|e| format!("Config error: {e}"))?;

    match args.format {
        OutputFormat::Text => {
            log(level, LogLevel::Normal, "Configuration Info:");
            println!();
            println!("Max epochs: {}", spec.trainer.max_epochs);
            println!("Batches per epoch: {}", spec.simulation.model.batches_per_epoch);
            println!("Optimizers: {}", spec.simulation.model.num_optimizers);
            println!("Schedulers: {}", spec.schedulers.len());

            if spec.simulation.evaluate {
                println!("Validation: enabled");
            }
            if spec.early_stopping.is_some() {
                println!("Early stopping: enabled");
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&spec)
                .map_err(|e| format!("JSON serialization error: {e}"))?;
            println!("{json}");
        }
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(&spec)
                .map_err(|e| format!("YAML serialization error: {e}"))?;
            println!("{yaml}");
        }
    }

    Ok(())
}
