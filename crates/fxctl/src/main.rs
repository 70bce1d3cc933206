mod args;
mod check;
mod effects;

use std::process::ExitCode;

use util::log::{self, Level};

use args::{Args, Command};

fn main() -> ExitCode {
    let args = Args::default();
    if args.verbose {
        log::set_level(Level::Debug);
    }

    match args.command {
        Command::Effects { json } => effects::list(json),
        Command::Check(check) => check::check(&check),
        Command::Paths => {
            let paths = compositor::config::candidate_paths(|k| std::env::var_os(k));
            for path in paths {
                let marker = if path.is_file() { "*" } else { " " };
                println!("{marker} {}", path.display());
            }
            ExitCode::SUCCESS
        }
    }
}
