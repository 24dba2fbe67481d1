use std::path::Path;

use anyhow::Result;
use structopt::StructOpt;

use fortsema::{asr, ast, errors, intrinsics, sema, utils};

mod cli;

fn main() -> Result<()> {
    env_logger::init();
    let args = cli::Cli::from_args();

    match args.cmd.clone() {
        cli::Command::Check { input, source } => {
            let unit = load_unit(&input)?;
            let mut arena = asr::Arena::new();
            let mut loader = intrinsics::IntrinsicModules;
            match sema::ast_to_asr(&mut arena, &unit, &mut loader) {
                Ok(_) => {
                    if !args.quiet {
                        println!("No problems found.");
                    }
                }
                Err(e) => {
                    report(&e, &input, source.as_deref())?;
                    std::process::exit(1);
                }
            }
        }
        cli::Command::Lower { input, source } => {
            let unit = load_unit(&input)?;
            let mut arena = asr::Arena::new();
            let mut loader = intrinsics::IntrinsicModules;
            match sema::ast_to_asr(&mut arena, &unit, &mut loader) {
                Ok(tu) => {
                    println!("{:#?}", tu);
                    println!("{:#?}", arena);
                }
                Err(e) => {
                    report(&e, &input, source.as_deref())?;
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}

fn load_unit(path: &Path) -> Result<ast::TranslationUnit> {
    let text = utils::read_file_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn report(e: &errors::SemanticError, input: &Path, source: Option<&Path>) -> Result<()> {
    if let Some(src_path) = source {
        let src = utils::read_file_to_string(src_path)?;

        use codespan_reporting::diagnostic::{Diagnostic, Label};
        use codespan_reporting::files::SimpleFile;
        use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
        use codespan_reporting::term::{emit, Config};

        let mut stderr = StandardStream::stderr(ColorChoice::Auto);
        let file = SimpleFile::new(src_path.display().to_string(), &src);
        let diag = Diagnostic::error()
            .with_message(&e.message)
            .with_labels(vec![Label::primary((), utils::byte_range(&src, &e.loc))]);
        let _ = emit(&mut stderr, &Config::default(), &file, &diag);
    } else {
        eprintln!(
            "{}:{}:{}: error: {}",
            input.display(),
            e.loc.first_line,
            e.loc.first_column,
            e.message
        );
    }
    Ok(())
}
