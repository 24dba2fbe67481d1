use std::path::PathBuf;

use structopt::StructOpt;

#[derive(Debug, StructOpt, Clone)]
#[structopt(
    name = "fortsema",
    about = "Semantic analysis core of a Fortran front-end"
)]
pub struct Cli {
    #[structopt(
        long = "quiet",
        short = "q",
        help = "Suppress all output except errors"
    )]
    pub quiet: bool,

    #[structopt(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, StructOpt, Clone)]
pub enum Command {
    /// Run semantic analysis over a pickled parse tree and report
    /// diagnostics.
    Check {
        input: PathBuf,

        #[structopt(
            long,
            help = "Original Fortran source, for rendered diagnostics"
        )]
        source: Option<PathBuf>,
    },

    /// Run semantic analysis and dump the typed IR.
    Lower {
        input: PathBuf,

        #[structopt(
            long,
            help = "Original Fortran source, for rendered diagnostics"
        )]
        source: Option<PathBuf>,
    },
}
