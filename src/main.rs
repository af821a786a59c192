use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use lmitest::config::{Args, Config};
use lmitest::{harness, logger};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            let _ = err.print();
            let _ = Args::command().print_help();
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = logger::init_logging() {
        eprintln!("{}", err);
        return ExitCode::FAILURE;
    }

    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            let _ = Args::command().print_help();
            return ExitCode::FAILURE;
        }
    };

    match harness::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("[Fatal] {}", err);
            ExitCode::FAILURE
        }
    }
}
