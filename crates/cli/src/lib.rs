use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use loglens_engine::{
    detect_tool_kind, is_v2v_log_with, parse_log_bytes_with, ParseResult, ParserConfig,
};
use serde_json::json;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

mod flags;
mod report;

use flags::OutputFormat;

#[derive(Parser)]
#[command(name = "loglens")]
#[command(about = "Structured view of virt-v2v family diagnostic logs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a log into tool runs
    Parse(ParseArgs),

    /// Check whether input looks like a virt-v2v family log
    Detect(DetectArgs),
}

#[derive(Args)]
struct ParseArgs {
    /// Log file, or `-` for stdin
    input: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Shorthand for `--format summary`
    #[arg(long, conflicts_with = "format")]
    summary: bool,

    /// Drop the verbatim line buffer from JSON output
    #[arg(long)]
    no_lines: bool,

    /// Parse independent tool runs on worker threads
    #[arg(long)]
    parallel: bool,

    /// Refuse inputs with more lines than this
    #[arg(long)]
    max_lines: Option<usize>,

    /// Exit non-zero when no tool run was recognised
    #[arg(long)]
    strict: bool,
}

#[derive(Args)]
struct DetectArgs {
    /// Log file, or `-` for stdin
    input: PathBuf,

    /// Bytes inspected from the start of the input
    #[arg(long)]
    precheck_bytes: Option<usize>,
}

pub fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    match cli.command {
        Commands::Parse(args) => run_parse(args),
        Commands::Detect(args) => run_detect(args),
    }
}

fn run_parse(args: ParseArgs) -> Result<()> {
    let format = if args.summary {
        OutputFormat::Summary
    } else {
        args.format
    };

    let mut config = if format.needs_lines() {
        ParserConfig::for_display()
    } else {
        ParserConfig::for_summary()
    };
    if args.no_lines {
        config.keep_line_buffer = false;
    }
    if args.parallel {
        config.parallel_sections = true;
    }
    if let Some(max_lines) = args.max_lines {
        config.max_input_lines = max_lines;
    }
    if let Err(err) = config.validate() {
        bail!("invalid parser configuration: {err}");
    }

    let bytes = read_input(&args.input)?;
    let source = source_label(&args.input);
    log::debug!(
        "parsing {} bytes from {source} (format={})",
        bytes.len(),
        format.as_str()
    );

    let result = parse_log_bytes_with(&bytes, &config);
    if result.is_empty() {
        log::warn!("no tool runs recognised in {source}");
    } else {
        log::info!(
            "{source}: {} lines, {} tool runs",
            result.total_lines,
            result.runs.len()
        );
    }

    write_stdout(&render(format, &source, &result)?)?;

    if args.strict && result.is_empty() {
        bail!("no tool runs recognised in {source}");
    }
    Ok(())
}

fn render(format: OutputFormat, source: &str, result: &ParseResult) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => result
            .to_json_pretty()
            .context("failed to serialise parse result")?,
        OutputFormat::Counts => serde_json::to_string(&json!({
            "total_lines": result.total_lines,
            "runs": result.summary(),
        }))?,
        OutputFormat::Summary => report::render_summary(source, result),
    })
}

fn run_detect(args: DetectArgs) -> Result<()> {
    let mut config = ParserConfig::default();
    if let Some(bytes) = args.precheck_bytes {
        config.precheck_bytes = bytes;
    }
    if let Err(err) = config.validate() {
        bail!("invalid parser configuration: {err}");
    }

    let bytes = read_input(&args.input)?;
    let text = String::from_utf8_lossy(&bytes);
    let v2v_log = is_v2v_log_with(&text, &config);
    let tool = v2v_log.then(|| detect_tool_kind(&text));
    log::debug!("{}: v2v_log={v2v_log}", source_label(&args.input));

    let body = json!({
        "v2v_log": v2v_log,
        "tool": tool,
    });
    write_stdout(&serde_json::to_string(&body)?)
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        io::stdin()
            .read_to_end(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn source_label(path: &Path) -> String {
    if path == Path::new("-") {
        "<stdin>".to_string()
    } else {
        path.display().to_string()
    }
}

fn write_stdout(text: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn stdin_has_a_readable_label() {
        assert_eq!(source_label(Path::new("-")), "<stdin>");
        assert_eq!(source_label(Path::new("v2v.log")), "v2v.log");
    }
}
