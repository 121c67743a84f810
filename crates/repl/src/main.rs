mod session;

use clap::Parser;
use database::Database;
use log::error;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;

const DEFAULT_DB_DIR: &str = "./tests/testfront";

#[derive(Parser, Debug)]
#[command(name = "blockdb", about = "A tiny block-structured relational database")]
struct Args {
    /// Message level: f(atal), e(rror), w(arn), i(nfo) or d(ebug)
    #[arg(short = 'm', value_name = "LEVEL", default_value = "i")]
    msg_level: String,
    /// Database directory
    #[arg(short = 'd', value_name = "DIR", default_value = DEFAULT_DB_DIR)]
    db_dir: PathBuf,
    /// Command script to run; defaults to stdin
    #[arg(short = 'c', value_name = "FILE")]
    cmd_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.msg_level);

    let mut interactive = true;
    let mut input: Box<dyn BufRead> = match &args.cmd_file {
        Some(path) => match File::open(path) {
            Ok(file) => {
                interactive = false;
                Box::new(BufReader::new(file))
            }
            Err(err) => {
                error!(
                    "cannot open file {}: {}, falling back to stdin",
                    path.display(),
                    err
                );
                Box::new(BufReader::new(io::stdin()))
            }
        },
        None => Box::new(BufReader::new(io::stdin())),
    };

    let db = match Database::open(&args.db_dir) {
        Ok(db) => db,
        Err(err) => {
            error!("cannot set database at {}: {}", args.db_dir.display(), err);
            return ExitCode::from(1);
        }
    };

    match session::run(db, &mut input, interactive) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::from(1)
        }
    }
}

fn init_logging(level: &str) {
    let filter = match level.chars().next() {
        // No level below error exists; fatal conditions are reported there
        // before the statement (or the process) is abandoned.
        Some('f') | Some('e') => log::LevelFilter::Error,
        Some('w') => log::LevelFilter::Warn,
        Some('d') => log::LevelFilter::Debug,
        _ => log::LevelFilter::Info,
    };
    env_logger::Builder::new()
        .filter_level(filter)
        .format_timestamp(None)
        .format_target(false)
        .init();
}
