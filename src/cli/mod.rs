pub mod commands;
pub mod due;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::{Page, PostStatus};
use crate::generator::Style;

#[derive(Parser)]
#[command(name = "postflow")]
#[command(about = "Author, schedule and publish short-form posts", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/postflow/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(flatten)]
    Operator(OperatorCommand),
    /// Run the scheduler in the foreground and read commands from stdin
    Run {
        /// Log file path (default: stderr)
        #[arg(short, long)]
        log: Option<PathBuf>,
    },
    /// Stop the running scheduler
    Stop,
    /// Check scheduler status
    Status,
}

/// Commands available both from the shell and on the scheduler's console.
#[derive(Subcommand, Debug)]
pub enum OperatorCommand {
    /// Create, schedule and publish posts
    Post {
        #[command(subcommand)]
        action: PostAction,
    },
    /// Manage topic presets for generation
    Topic {
        #[command(subcommand)]
        action: TopicAction,
    },
    /// Generate post content with AI
    Generate {
        /// Generate from a saved topic preset
        #[arg(long, conflicts_with = "improve")]
        topic: Option<i64>,

        /// Improve an existing draft; the prompt becomes the instruction
        #[arg(long)]
        improve: Option<i64>,

        #[arg(long, value_enum, default_value_t = Style::Professional)]
        style: Style,

        /// Save the result as a new draft (or into the improved draft)
        #[arg(long)]
        save: bool,

        /// What to write about
        prompt: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum PostAction {
    /// Create a post; it stays a draft unless --at is given
    New {
        /// Attach an image file
        #[arg(long)]
        media: Option<PathBuf>,

        /// Due time: RFC 3339, "YYYY-MM-DD HH:MM" (UTC) or "+30m", "+2h", "+1d"
        #[arg(long)]
        at: Option<String>,

        #[arg(required = true)]
        content: Vec<String>,
    },
    /// Replace the content of a draft or failed post
    Edit {
        id: i64,
        #[arg(required = true)]
        content: Vec<String>,
    },
    /// Show one post with its thread preview
    Show { id: i64 },
    /// List posts, newest first
    List {
        /// Only posts with this status (draft, scheduled, published, failed)
        #[arg(long)]
        status: Option<PostStatus>,

        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = Page::DEFAULT_LIMIT)]
        limit: usize,
    },
    /// List scheduled posts by due time
    Scheduled,
    /// Schedule a draft or failed post
    Schedule { id: i64, at: String },
    /// Move a scheduled post to a new due time
    Reschedule { id: i64, at: String },
    /// Return a scheduled post to draft
    Cancel { id: i64 },
    /// Publish a draft or failed post now
    Publish { id: i64 },
    /// Delete a post that is not published
    Delete { id: i64 },
    /// Post counts by status
    Stats,
}

#[derive(Subcommand, Debug)]
pub enum TopicAction {
    /// Add a topic preset (3-30 characters)
    Add {
        #[arg(required = true)]
        label: Vec<String>,
    },
    /// List topic presets
    List,
    /// Remove one topic preset
    Remove { id: i64 },
    /// Remove all topic presets
    Clear,
}

/// One line typed on the scheduler console.
#[derive(Parser, Debug)]
#[command(name = "postflow", no_binary_name = true, disable_version_flag = true)]
pub struct ConsoleLine {
    #[command(subcommand)]
    pub command: ConsoleCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConsoleCommand {
    #[command(flatten)]
    Operator(OperatorCommand),
    /// Stop the scheduler
    #[command(alias = "exit")]
    Quit,
}

impl ConsoleLine {
    /// Parse a console line. Double quotes group words into one argument.
    pub fn parse_line(line: &str) -> Result<ConsoleCommand, clap::Error> {
        Self::try_parse_from(split_args(line)).map(|parsed| parsed.command)
    }
}

fn split_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut pending = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                pending = true;
            }
            c if c.is_whitespace() && !quoted => {
                if pending {
                    args.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }
    if pending {
        args.push(current);
    }
    args
}
