use crate::cli::{Args, Process};
use crate::helpers::fmt_error;
use clap::{Command, CommandFactory, Parser};
use clap_complete::{Generator, generate};
use std::ffi::OsString;
use std::io;

pub mod cli;
pub mod commands;
pub mod config;
pub mod drain;
pub mod helpers;
pub mod memory;
#[cfg(feature = "python")]
pub mod python;
pub mod s3_store;
pub mod store;

pub use drain::{DrainError, DrainReport, drain, flush_bucket};
pub use store::{ListPage, ObjectStore, VersionEntry};

pub fn print_completions<G: Generator>(
    generator: G,
    cmd: &mut Command,
) {
    // get_name returns a str, to_owned = to_string (but restriction::str_to_string)
    generate(generator, cmd, cmd.get_name().to_owned(), &mut io::stdout());
}

/// Parse `args` (including the program name) and run the chosen command.
/// Returns the process exit code.
pub async fn run<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = Args::parse_from(args);

    if let Some(generator) = args.generator {
        let mut cmd = Args::command();

        print_completions(generator, &mut cmd);
        return 0;
    }

    let Some(cmd) = args.cmd else {
        // no subcommand: show what is available
        if let Err(err) = Args::command().print_help() {
            eprintln!("{}", fmt_error(&err.into()));
            return 1;
        }
        return 2;
    };

    cmd.process().await.unwrap_or_else(|err| {
        eprintln!("{}", fmt_error(&err));
        1
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_subcommand_shows_help() {
        assert_eq!(run(["s3-flush"]).await, 2);
    }

    #[tokio::test]
    async fn generates_completions() {
        assert_eq!(run(["s3-flush", "--generate", "bash"]).await, 0);
    }
}
