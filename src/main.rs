use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use livebug::agent::breakpoint::SourceLocation;
use livebug::agent::config::AgentConfig;
use livebug::agent::format;
use livebug::agent::location::{LocationResolver, NoSourceMaps, ScriptIndex, ScriptInfo};
use livebug::agent::validate::{validate_expression, ExpressionError};
use livebug::agent::Error;
use std::fs::read_to_string;
use std::path::Path;
use walkdir::WalkDir;

const SCRIPT_EXTENSIONS: &[&str] = &["js", "cjs", "mjs"];

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Agent configuration file (default: ~/.config/livebug/agent.toml)
    #[clap(long, env = "LIVEBUG_CONFIG", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a breakpoint location against scripts of a directory
    Resolve {
        /// Directory with deployed scripts (default: configured working directory)
        #[clap(long)]
        root: Option<String>,
        path: String,
        line: u32,
        #[clap(long)]
        column: Option<u32>,
    },
    /// Check that an expression may be used as a condition or a watch expression
    Check { expression: String },
    /// Format a logpoint message
    Format {
        template: String,
        values: Vec<String>,
    },
    /// Print effective configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    livebug::log::init("info");
    let args = Args::parse();
    let config = AgentConfig::from_file(args.config.as_deref());

    match args.command {
        Command::Resolve {
            root,
            path,
            line,
            column,
        } => {
            let root = root.unwrap_or_else(|| config.working_directory.clone());
            let root = Path::new(&root)
                .canonicalize()
                .with_context(|| format!("invalid root directory {root}"))?;
            let scripts = scan_scripts(&root)?;
            let root = root.to_string_lossy();
            log::debug!(target: "lb", "{} scripts found in {root}", scripts.len());

            let resolver = LocationResolver::new(
                scripts,
                Box::new(NoSourceMaps),
                &root,
                config.module_wrapper_prefix_len,
            );
            let mut location = SourceLocation::new(path, line);
            location.column = column;
            match resolver.resolve(&location) {
                Ok(resolved) => println!("{resolved}"),
                Err(e) => {
                    let status = Error::from(e).status(Some(&location));
                    bail!(status.description.format);
                }
            }
        }
        Command::Check { expression } => match validate_expression(&expression) {
            Ok(()) => println!("ok"),
            Err(ExpressionError::Disallowed(token)) => {
                bail!("{}: `{token}`", format::DISALLOWED_EXPRESSION)
            }
            Err(e @ ExpressionError::Compile(_)) => {
                bail!("{} {e}", format::ERROR_COMPILING_EXPRESSION)
            }
        },
        Command::Format { template, values } => {
            println!("{}", format::format_message(&template, values.as_slice()));
        }
        Command::Config => {
            print!("{}", config.to_toml().context("serialize configuration")?);
        }
    }

    Ok(())
}

/// Index scripts of a directory. CommonJS scripts are treated as wrapped modules.
fn scan_scripts(root: &Path) -> anyhow::Result<ScriptIndex> {
    let mut scripts = ScriptIndex::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.with_context(|| format!("scan {}", root.display()))?;
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
            continue;
        };
        if !entry.file_type().is_file() || !SCRIPT_EXTENSIONS.contains(&ext) {
            continue;
        }

        let Some(source) = livebug::weak_error!(read_to_string(path), "skip script:") else {
            continue;
        };
        let line_count = source.lines().count().max(1) as u32;
        let info = if ext == "mjs" {
            ScriptInfo::new(line_count)
        } else {
            ScriptInfo::wrapped(line_count)
        };
        let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        scripts.insert(&absolute.to_string_lossy(), info);
    }
    Ok(scripts)
}
