mod audit;
mod bash_parser;
mod catalog;
mod config;
mod dispatcher;
mod error;
mod fuzzy_matcher;
mod i18n;
mod interpreter;
mod invoker;
mod logging;
mod redirect;
mod request;
mod resolver;
mod sanitizer;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use unicode_width::UnicodeWidthStr;

use audit::{AuditLog, AuditQuery, AuditRecord, OutcomeKind};
use bash_parser::{ast_outline, BashParser};
use catalog::Operation;
use config::Config;
use dispatcher::{DispatchResponse, Dispatcher};
use i18n::I18n;
use redirect::SessionContext;
use request::{Binding, OperationRequest};
use resolver::CommandResolver;

#[derive(Parser)]
#[command(name = "panelctl")]
#[command(about = "Dispatch privileged control-panel operations to administrative scripts")]
struct Cli {
    /// Config file [default: $PANELCTL_CONFIG or ~/.panelctl/config.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one operation and print the redirect response
    Dispatch {
        /// Operation name from the allow-list (see `panelctl ops`)
        operation: String,
        /// Session user issuing the request
        #[arg(long)]
        operator: String,
        /// Raw query string, e.g. "user=jdoe&job=3"
        #[arg(long, short = 'q', default_value = "")]
        query: String,
        /// Extra parameter as key=value (repeatable)
        #[arg(long = "param", short = 'p', value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Page stored in the session as the "back" location
        #[arg(long)]
        back: Option<String>,
        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the operations in the allow-list
    Ops,
    /// Show the command a request would run, without running it
    Explain {
        operation: String,
        #[arg(long, short = 'q', default_value = "")]
        query: String,
        #[arg(long = "param", short = 'p', value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Also print the bash syntax tree of the rendered command
        #[arg(long)]
        tree: bool,
    },
    /// Inspect or maintain the audit trail
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
}

#[derive(Subcommand)]
enum AuditAction {
    /// Show recent records, newest first
    List {
        #[arg(long)]
        operator: Option<String>,
        #[arg(long)]
        operation: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Move records past the retention window into yearly archives
    Prune,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    logging::init_tracing(&config.logging);
    let i18n = I18n::new(&config.get_effective_language());

    match cli.command {
        Commands::Dispatch {
            operation,
            operator,
            query,
            params,
            back,
            json,
        } => {
            let request = build_request(operation, operator.clone(), &query, params);
            let session = SessionContext::new(operator, back);
            let dispatcher = Dispatcher::from_config(&config)?;
            let response = dispatcher.dispatch(&request, &session);
            print_response(&response, json)?;
            if response.audit_error.is_some() {
                return Err(anyhow!(i18n.t("audit_write_failed")));
            }
        }
        Commands::Ops => print_operations(&i18n),
        Commands::Explain {
            operation,
            query,
            params,
            tree,
        } => explain(&config, &i18n, build_request(operation, String::new(), &query, params), tree)?,
        Commands::Audit { action } => {
            let log = AuditLog::open(config.audit.clone())?;
            match action {
                AuditAction::List {
                    operator,
                    operation,
                    limit,
                    json,
                } => {
                    let records = log.query(&AuditQuery {
                        operator,
                        operation,
                        limit: Some(limit),
                    })?;
                    print_records(&log, &records, json, &i18n)?;
                }
                AuditAction::Prune => {
                    let moved = log.prune()?;
                    println!("{}", i18n.t_format("audit_pruned", &[&moved.to_string()]).green());
                }
            }
        }
    }

    Ok(())
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

fn build_request(operation: String, operator: String, query: &str, params: Vec<(String, String)>) -> OperationRequest {
    params
        .into_iter()
        .fold(OperationRequest::from_query(operation, operator, query), |req, (k, v)| {
            req.with_param(k, v)
        })
}

fn print_response(response: &DispatchResponse, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&response.to_json())?);
        return Ok(());
    }
    println!("Status: {}", response.status);
    println!("Location: {}", response.location);
    if let Some(message) = &response.flash_error {
        println!("Flash-Error: {}", message);
    }
    Ok(())
}

fn print_operations(i18n: &I18n) {
    let header = [
        i18n.t("ops_operation"),
        i18n.t("ops_script"),
        i18n.t("ops_params"),
        i18n.t("ops_page"),
    ];
    let rows: Vec<[String; 4]> = Operation::ALL
        .iter()
        .map(|op| {
            let params = op
                .params()
                .iter()
                .map(|p| if p.required { p.key.to_string() } else { format!("[{}]", p.key) })
                .collect::<Vec<_>>()
                .join(" ");
            [
                op.name().to_string(),
                op.script().to_string(),
                params,
                op.category().listing_page().to_string(),
            ]
        })
        .collect();

    let mut widths = [0usize; 4];
    for row in std::iter::once(&header).chain(rows.iter()) {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(UnicodeWidthStr::width(cell.as_str()));
        }
    }

    let render = |row: &[String; 4]| -> String {
        row.iter()
            .enumerate()
            .map(|(i, cell)| {
                let pad = widths[i] - UnicodeWidthStr::width(cell.as_str());
                format!("{}{}", cell, " ".repeat(pad))
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    println!("{}", render(&header).bold());
    for row in &rows {
        println!("{}", render(row));
    }
}

fn explain(config: &Config, i18n: &I18n, request: OperationRequest, tree: bool) -> Result<()> {
    let Some(operation) = Operation::lookup(&request.operation) else {
        let suggestions = Operation::suggest(&request.operation);
        if suggestions.is_empty() {
            return Err(anyhow!(i18n.t_format("unknown_operation", &[&request.operation])));
        }
        return Err(anyhow!(i18n.t_format(
            "did_you_mean",
            &[&request.operation, &suggestions.join(", ")]
        )));
    };

    let resolver = CommandResolver::from_config(&config.dispatch);
    let command = match request.bind(operation, config.dispatch.strict_params) {
        Ok(Binding::Idle { param }) => {
            println!("{}", i18n.t_format("explain_idle", &[param]).yellow());
            return Ok(());
        }
        Ok(Binding::Targets(targets)) => resolver.resolve(operation.name(), targets),
        Err(e) => Err(e),
    };
    let command = match command {
        Ok(command) => command,
        Err(e) => {
            println!("{}", i18n.t_format("explain_rejected", &[&e.to_string()]).yellow());
            return Ok(());
        }
    };

    let line = command.command_line();
    println!("{}", i18n.t("explain_command").cyan().bold());
    println!("{}", line);

    let mut parser = BashParser::new()?;
    let check = parser.check_command_line(&line)?;
    let expected = command.argv().len();
    if check.is_literal() && check.argument_count == expected {
        println!("{}", i18n.t_format("explain_literal", &[&expected.to_string()]).green());
    } else {
        println!("{}", i18n.t("explain_not_literal").red().bold());
    }

    if tree {
        let ast = parser.parse_to_ast(&line)?;
        let mut out = String::new();
        ast_outline(&ast, 0, &mut out);
        print!("{}", out.dimmed());
    }
    Ok(())
}

fn print_records(log: &AuditLog, records: &[AuditRecord], json: bool, i18n: &I18n) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("{}", i18n.t_format("audit_none", &[&log.path().display().to_string()]).yellow());
        return Ok(());
    }
    for record in records {
        let outcome = match record.outcome {
            OutcomeKind::Success => "success".green(),
            OutcomeKind::NotAttempted => "not_attempted".yellow(),
            OutcomeKind::Skipped => "skipped".dimmed(),
            OutcomeKind::Failure => "failure".red(),
            OutcomeKind::Timeout => "timeout".red().bold(),
            OutcomeKind::Fault => "fault".red().bold(),
        };
        println!(
            "{}  {}  {} {}  {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            record.operator.cyan(),
            record.operation,
            record.targets.join(" "),
            outcome
        );
        if let Some(detail) = &record.detail {
            println!("    {}", detail.dimmed());
        }
    }
    Ok(())
}
