//! `triage` command-line front end.
//!
//! Every command prints a JSON result on stdout. Logging goes to stderr and
//! is controlled by `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use triage_engine::batch::{BatchOptions, CancelFlag};
use triage_engine::config::load_config;
use triage_engine::rules::{CorrectionRequest, RuleLearning, RuleRequest};
use triage_engine::types::{AutomationLevel, Channel, NewConversation, RuleScope};
use triage_engine::{ReviewPath, TriageEngine, TriageError};

#[derive(Parser, Debug)]
#[clap(name = "triage")]
#[clap(about = "Reclassify inbound conversations and manage learned sender rules")]
struct Args {
    /// Config file (default ~/.triage/config.json)
    #[clap(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reclassify a page of a workspace, or the whole workspace with --all
    Batch {
        #[clap(long)]
        workspace: String,
        #[clap(long, value_enum, default_value = "fast")]
        mode: Mode,
        /// Report what would change without writing
        #[clap(long)]
        dry_run: bool,
        #[clap(long, default_value = "0")]
        offset: usize,
        #[clap(long)]
        limit: Option<usize>,
        /// Keep paging until the workspace is exhausted
        #[clap(long)]
        all: bool,
        /// Review against the triage-agent threshold
        #[clap(long)]
        triage_agent: bool,
    },
    /// Re-triage a single conversation
    Reclassify {
        id: String,
        #[clap(long)]
        dry_run: bool,
        /// Rules only; never call the classifier
        #[clap(long)]
        skip_llm: bool,
        /// Use a matching sender rule instead of asking the classifier
        #[clap(long)]
        prefer_rules: bool,
        /// Review against the triage-agent threshold
        #[clap(long)]
        triage_agent: bool,
        /// Reclassify even if a reviewer already decided it
        #[clap(long)]
        force: bool,
    },
    /// Record a human correction
    Correct {
        id: String,
        classification: String,
        #[clap(long)]
        by: String,
        #[clap(long)]
        requires_reply: Option<bool>,
        /// Create or update a sender rule at this scope right away
        #[clap(long, value_enum)]
        rule: Option<Scope>,
    },
    /// Confirm the current classification of a conversation
    Confirm {
        id: String,
        #[clap(long)]
        by: String,
    },
    /// Store an inbound message
    Ingest {
        #[clap(long)]
        workspace: String,
        #[clap(long)]
        sender: String,
        #[clap(long)]
        body: String,
        #[clap(long)]
        subject: Option<String>,
        #[clap(long, value_enum, default_value = "email")]
        channel: ChannelArg,
    },
    /// Manage sender rules
    Rules {
        #[clap(subcommand)]
        command: RulesCommand,
    },
    /// Print the active classification taxonomy
    Taxonomy,
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    List {
        #[clap(long)]
        workspace: String,
        /// Include deactivated rules
        #[clap(long)]
        all: bool,
    },
    Add {
        #[clap(long)]
        workspace: String,
        /// `user@domain` or `*@domain`
        #[clap(long)]
        pattern: String,
        #[clap(long)]
        classification: String,
        #[clap(long)]
        requires_reply: Option<bool>,
        #[clap(long, value_enum, default_value = "draft-first")]
        automation: Automation,
        #[clap(long)]
        tone: Option<String>,
    },
    Deactivate {
        id: String,
    },
    /// Insert the configured onboarding rules
    Seed {
        #[clap(long)]
        workspace: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    /// Apply sender rules only
    Fast,
    /// Full classifier re-analysis
    Full,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Scope {
    Email,
    Domain,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ChannelArg {
    Email,
    Sms,
    Chat,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Automation {
    Auto,
    DraftFirst,
    AlwaysReview,
}

fn review_path(triage_agent: bool) -> ReviewPath {
    if triage_agent {
        ReviewPath::TriageAgent
    } else {
        ReviewPath::Message
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => log::error!("Failed to serialize output: {}", e),
    }
}

async fn run(args: Args) -> Result<(), TriageError> {
    let config = load_config(args.config.as_deref())?;
    let engine = TriageEngine::from_config(config)?;

    match args.command {
        Command::Batch {
            workspace,
            mode,
            dry_run,
            offset,
            limit,
            all,
            triage_agent,
        } => {
            let mut options = match mode {
                Mode::Fast => BatchOptions::fast(),
                Mode::Full => BatchOptions::full(),
            };
            options.dry_run = dry_run;
            options.offset = offset;
            options.limit = limit;
            options.review_path = review_path(triage_agent);
            if all {
                let summary = engine.run_all(&workspace, &options, &CancelFlag::new()).await?;
                print_json(&summary);
            } else {
                let report = engine.run_batch(&workspace, &options).await?;
                print_json(&report);
            }
        }
        Command::Reclassify {
            id,
            dry_run,
            skip_llm,
            prefer_rules,
            triage_agent,
            force,
        } => {
            let mut options = engine.reclassify_options(review_path(triage_agent));
            options.dry_run = dry_run;
            options.skip_llm = skip_llm;
            options.prefer_rules = prefer_rules;
            options.respect_reviews = !force;
            let outcome = engine.reclassify(&id, &options).await?;
            print_json(&outcome);
        }
        Command::Correct {
            id,
            classification,
            by,
            requires_reply,
            rule,
        } => {
            let learning = match rule {
                Some(Scope::Email) => RuleLearning::Explicit {
                    scope: RuleScope::Email,
                },
                Some(Scope::Domain) => RuleLearning::Explicit {
                    scope: RuleScope::Domain,
                },
                None => RuleLearning::Implicit,
            };
            let outcome = engine.record_correction(&CorrectionRequest {
                conversation_id: id,
                new_classification: classification,
                corrected_by: by,
                requires_reply,
                learning,
            })?;
            print_json(&outcome);
        }
        Command::Confirm { id, by } => {
            print_json(&engine.confirm_review(&id, &by)?);
        }
        Command::Ingest {
            workspace,
            sender,
            body,
            subject,
            channel,
        } => {
            let channel = match channel {
                ChannelArg::Email => Channel::Email,
                ChannelArg::Sms => Channel::Sms,
                ChannelArg::Chat => Channel::Chat,
            };
            let conversation = engine.insert_conversation(&NewConversation {
                workspace_id: workspace,
                channel,
                sender_email: sender,
                subject,
                body,
                ..NewConversation::default()
            })?;
            print_json(&conversation);
        }
        Command::Rules { command } => match command {
            RulesCommand::List { workspace, all } => {
                print_json(&engine.list_rules(&workspace, all)?);
            }
            RulesCommand::Add {
                workspace,
                pattern,
                classification,
                requires_reply,
                automation,
                tone,
            } => {
                let automation_level = match automation {
                    Automation::Auto => AutomationLevel::Auto,
                    Automation::DraftFirst => AutomationLevel::DraftFirst,
                    Automation::AlwaysReview => AutomationLevel::AlwaysReview,
                };
                let (rule, _) = engine.create_rule(&RuleRequest {
                    workspace_id: workspace,
                    pattern,
                    classification,
                    requires_reply,
                    automation_level,
                    tone_preference: tone,
                })?;
                print_json(&rule);
            }
            RulesCommand::Deactivate { id } => {
                print_json(&engine.deactivate_rule(&id)?);
            }
            RulesCommand::Seed { workspace } => {
                print_json(&engine.seed_default_rules(&workspace)?);
            }
        },
        Command::Taxonomy => {
            print_json(&engine.taxonomy().entries());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
