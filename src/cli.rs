use clap::{Parser, Subcommand};
use clap_complete::Shell;

pub const fn get_styles() -> clap::builder::Styles {
    clap::builder::Styles::styled()
        .usage(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
        )
        .header(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
        )
        .literal(
            anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
        .invalid(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
        )
        .error(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
        )
        .valid(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
        .placeholder(
            anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))),
        )
}

pub trait Process {
    async fn process(self) -> anyhow::Result<i32>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Parser)]
#[clap(version, styles=get_styles())]
pub struct Args {
    #[arg(long = "generate", value_enum)]
    pub generator: Option<Shell>,

    #[clap(subcommand)]
    pub cmd: Option<Commands>,
}

/// Delete every object, version and delete marker in a bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Parser)]
pub struct FlushOptions {
    /// Bucket to empty (defaults to `S3_BUCKET`)
    #[arg(short, long)]
    pub bucket: Option<String>,

    /// Don't ask, just flush
    #[arg(short, long)]
    pub yes: bool,

    /// Print the report as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

/// Exit with 0 if a bucket holds no versions or delete markers, 1 otherwise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Parser)]
pub struct CheckOptions {
    /// Bucket to inspect (defaults to `S3_BUCKET`)
    #[arg(short, long)]
    pub bucket: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Subcommand)]
pub enum Commands {
    Flush(FlushOptions),
    Check(CheckOptions),
}

impl Process for Commands {
    async fn process(self) -> anyhow::Result<i32> {
        match self {
            Self::Flush(opts) => opts.process().await,
            Self::Check(opts) => opts.process().await,
        }
    }
}
