pub mod cli;
pub mod config;
pub mod filter;
pub mod input;
pub mod logging;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod plugins;
pub mod queue;
pub mod render;
pub mod request;
pub mod segment;

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, Write};
use tracing::debug;

pub use cli::Cli;
pub use config::{ConfigError, SieveConfig, load_config};
pub use filter::{Filter, FilterParseError};
pub use output::{JsonSink, SessionSink, TemplateSink};
pub use parser::{Session, parse_session};
pub use pipeline::{Pipeline, PipelineError, PipelineOptions, PipelineReport};
pub use plugins::{HookSet, PluginError, SessionHook};
pub use render::{DEFAULT_FORMAT, Template, TemplateError};
pub use request::{FieldGroup, FieldRequest};

/// Exit status for configuration and input errors
pub const EXIT_FAILURE: u8 = 100;

/// Everything needed for a run, resolved from the command line and the
/// configuration file before any input is read
struct Run {
    options: PipelineOptions,
    request: FieldRequest,
    filter: Option<Filter>,
    hooks: HookSet,
    format: String,
    json: bool,
    buffered: bool,
}

impl Run {
    fn prepare(cli: &Cli, config: &SieveConfig) -> Result<Self> {
        let mut options = config
            .pipeline
            .to_options()
            .context("Invalid pipeline configuration")?;
        if let Some(threads) = cli.threads {
            options.threads = if threads == 0 {
                pipeline::default_threads()
            } else {
                threads
            };
        }

        let mut request = FieldRequest::new();
        if cli.parse_all {
            request.request_all();
        }

        let filter = match cli.filter.as_deref().map(str::trim) {
            Some(expression) if !expression.is_empty() => Some(
                Filter::compile(expression, &mut request)
                    .with_context(|| format!("Invalid filter '{}'", expression))?,
            ),
            _ => None,
        };

        let mut hooks = HookSet::new();
        for spec in config.plugins.iter().chain(&cli.plugins) {
            hooks
                .load(spec, &mut request)
                .with_context(|| format!("Cannot load plugin '{}'", spec))?;
        }

        Ok(Run {
            options,
            request,
            filter,
            hooks,
            format: cli
                .output
                .clone()
                .unwrap_or_else(|| config.output.format.clone()),
            json: cli.json || config.output.json,
            buffered: config.output.buffered && !cli.no_buffer,
        })
    }
}

/// Runs the tool for parsed arguments; logging must already be set up
pub fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let Run {
        options,
        mut request,
        filter,
        hooks,
        format,
        json,
        buffered,
    } = Run::prepare(cli, &config)?;

    if cli.dump_filter {
        match &filter {
            Some(filter) => print!("{}", filter.dump_pretty()),
            None => println!("No filter"),
        }
        return Ok(());
    }

    let template = if json {
        for group in FieldGroup::ALL {
            if group != FieldGroup::Plain {
                request.request(group);
            }
        }
        None
    } else {
        Some(
            Template::compile(&format, &mut request)
                .with_context(|| format!("Invalid output format '{}'", format))?,
        )
    };

    let writer: Box<dyn Write + Send> = match &cli.write {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("Cannot create output file '{}'", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };

    let mut input = input::open(&cli.file, cli.gzip, cli.progress)
        .with_context(|| format!("Cannot open input '{}'", cli.file))?;

    debug!("Parsing field groups {:?}", request);
    let pipeline = Pipeline::new(options, request, filter, hooks);
    let report = match template {
        Some(template) => {
            pipeline.run(&mut input, &mut TemplateSink::new(template, writer, buffered))
        }
        None => pipeline.run(&mut input, &mut JsonSink::new(writer, buffered)),
    };
    input.finish();

    let report = report?;
    debug!("{} of {} sessions written", report.emitted, report.read);
    Ok(())
}
