//! NDT7 speed test - command-line front-end
//!
//! Discovers the nearest M-Lab server, runs the requested directions and
//! prints progress plus a final summary. Ctrl-C cancels the running test.

use anyhow::Context;
use clap::Parser;
use ndt7_client::{
    cli::{Cli, ConsolePrinter},
    config::{display_config_summary, load_config},
    error::ErrorReporter,
    logging::LoggerFactory,
    models::{Config, TestDirection},
    SpeedTestClient, PKG_NAME, VERSION,
};
use std::process;
use std::sync::Arc;

/// Exit code after a user-requested cancel
const EXIT_CANCELLED: i32 = 130;

fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panic: {}", panic_info);
        process::exit(1);
    }));

    let cli = Cli::parse();

    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    process::exit(exit_code);
}

/// Resolve configuration, then drive the test on a runtime sized by `io_threads`
fn run(cli: Cli) -> anyhow::Result<i32> {
    cli.validate().map_err(anyhow::Error::msg)?;

    let config = match load_config(cli.clone()) {
        Ok(config) => config,
        Err(e) => {
            ErrorReporter::new(cli.use_colors(), true).report_error(&e);
            return Ok(e.exit_code());
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.io_threads)
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    runtime.block_on(run_test(cli, config))
}

async fn run_test(cli: Cli, config: Config) -> anyhow::Result<i32> {
    colored::control::set_override(config.enable_color);

    if config.debug {
        eprintln!(
            "{} v{} ({}, {}, built {})",
            PKG_NAME,
            VERSION,
            env!("GIT_COMMIT"),
            env!("TARGET_TRIPLE"),
            env!("BUILD_TIME")
        );
        eprintln!("{}", display_config_summary(&config));
    }

    let factory = LoggerFactory::new(config.clone());
    let protocol_logger = factory.create_protocol_logger().await;
    let error_logger = factory.create_error_logger();

    let printer = Arc::new(ConsolePrinter::new(cli.json, config.enable_color, config.verbose));
    let client = SpeedTestClient::new(config.clone())
        .context("Invalid configuration")?
        .with_logger(protocol_logger)
        .on_download_progress({
            let printer = printer.clone();
            move |progress| printer.progress(&progress)
        })
        .on_download_measurement({
            let printer = printer.clone();
            move |measurement| printer.measurement(TestDirection::Download, &measurement)
        })
        .on_download_finish({
            let printer = printer.clone();
            move |progress, error| printer.finish(progress, error)
        })
        .on_upload_progress({
            let printer = printer.clone();
            move |progress| printer.progress(&progress)
        })
        .on_upload_measurement({
            let printer = printer.clone();
            move |measurement| printer.measurement(TestDirection::Upload, &measurement)
        })
        .on_upload_finish({
            let printer = printer.clone();
            move |progress, error| printer.finish(progress, error)
        });
    let client = Arc::new(client);

    let interrupt = {
        let client = client.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling...");
                client.cancel();
            }
        })
    };

    let outcome = client.start(cli.test).await;
    interrupt.abort();

    match outcome {
        Ok(server) => {
            println!("{}", printer.summary(&server));
            if client.is_cancelled() {
                return Ok(EXIT_CANCELLED);
            }
            let failed = printer.results().into_iter().find_map(|result| result.error);
            Ok(failed.map(|error| error.exit_code()).unwrap_or(0))
        }
        Err(error) => {
            if config.debug {
                error_logger
                    .log_error(&error, Some("Speed test failed"), Some(factory.session_id()))
                    .await;
            }
            ErrorReporter::new(config.enable_color, config.verbose).report_error(&error);
            Ok(error.exit_code())
        }
    }
}
