use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use glaze_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use glaze_contracts::session::Sender;
use glaze_engine::session::{ActionOutcome, SessionController};
use glaze_engine::source::{ImageRef, Normalizer};
use glaze_engine::{
    DryrunCollaborator, EditCollaborator, LogoRequest, OpenAiCollaborator, PromptRequest,
};

#[derive(Debug, Parser)]
#[command(name = "glaze", version, about = "Chat-driven AI image editing sessions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Logo(LogoArgs),
    Prompt(PromptArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    /// Session directory for artifacts and the event journal.
    #[arg(long, default_value = "glaze-session")]
    out: PathBuf,
    /// Image to upload before the first prompt.
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long, default_value = "openai")]
    collaborator: String,
}

#[derive(Debug, Parser)]
struct LogoArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "minimalist")]
    style: String,
    #[arg(long, default_value = "glaze-session")]
    out: PathBuf,
    #[arg(long, default_value = "openai")]
    collaborator: String,
}

#[derive(Debug, Parser)]
struct PromptArgs {
    /// Terse description to expand into a full prompt.
    text: String,
    /// Optional image reference (path, URL, or data URI) for context.
    #[arg(long)]
    image: Option<String>,
    #[arg(long, default_value = "openai")]
    collaborator: String,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("glaze error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Logo(args) => run_logo(args),
        Command::Prompt(args) => run_prompt(args),
    }
}

fn select_collaborator(name: &str) -> Result<Box<dyn EditCollaborator>> {
    match name {
        "openai" => Ok(Box::new(OpenAiCollaborator::new())),
        "dryrun" => Ok(Box::new(DryrunCollaborator)),
        other => bail!("unknown collaborator '{other}' (expected openai or dryrun)"),
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let collaborator = select_collaborator(&args.collaborator)?;
    let mut session = SessionController::new(&args.out, collaborator);
    println!("Glaze chat started. Type /help for commands.");

    if let Some(image) = &args.image {
        let outcome = session.upload_file(image);
        report(&session, outcome);
    }

    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        match intent.action.as_str() {
            "noop" => continue,
            "quit" => break,
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
            }
            "upload" => {
                match value_as_non_empty_string(intent.command_args.get("path")) {
                    Some(path) => {
                        let outcome = session.upload_file(Path::new(&path));
                        report(&session, outcome);
                    }
                    None => println!("/upload requires a path"),
                }
            }
            "download" => {
                let dir = value_as_non_empty_string(intent.command_args.get("path"))
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("."));
                match session.download_current(&dir) {
                    Ok(path) => println!("Saved {}", path.display()),
                    Err(err) => println!("Download failed: {err}"),
                }
            }
            "set_dimensions" => {
                if intent.command_args.get("clear").is_some() {
                    session.clear_dimensions();
                    println!("Dimensions cleared");
                } else if let (Some(width), Some(height)) = (
                    value_as_u32(intent.command_args.get("width")),
                    value_as_u32(intent.command_args.get("height")),
                ) {
                    let outcome = session.update_dimensions(width, height);
                    if outcome == ActionOutcome::Committed {
                        println!("Dimensions set to {width}x{height}");
                    } else {
                        report(&session, outcome);
                    }
                } else {
                    println!("/size expects WxH with positive integers, or clear");
                }
            }
            "resize" => {
                let outcome = session.resize_current();
                report(&session, outcome);
            }
            "regenerate" => {
                let outcome = session.regenerate();
                report(&session, outcome);
            }
            "view_previous" => {
                let outcome = session.view_previous();
                report_position(&session, outcome);
            }
            "view_next" => {
                let outcome = session.view_next();
                report_position(&session, outcome);
            }
            "show_history" => show_history(&session),
            "fill_empty_space" => {
                let text = value_as_non_empty_string(intent.command_args.get("text"));
                match text {
                    Some(text) => {
                        let outcome = session.fill_empty_space(&text);
                        report(&session, outcome);
                    }
                    None => println!("/fill requires a description"),
                }
            }
            "expand_prompt" => {
                let text = value_as_non_empty_string(intent.command_args.get("text"));
                match text {
                    Some(text) => match session.expand_prompt(&text) {
                        Ok(expanded) => println!("{expanded}"),
                        Err(err) => println!("Prompt expansion failed: {err}"),
                    },
                    None => println!("/prompt requires text to expand"),
                }
            }
            "unknown" => {
                let command = value_as_non_empty_string(intent.command_args.get("command"))
                    .unwrap_or_default();
                println!("Unknown command: /{command}");
            }
            _ => {
                let prompt = intent.prompt.unwrap_or_else(|| input.to_string());
                let outcome = session.send_message(&prompt);
                report(&session, outcome);
            }
        }
    }

    Ok(())
}

fn report(session: &SessionController, outcome: ActionOutcome) {
    match outcome {
        ActionOutcome::Committed => {
            if let Some(message) = session
                .transcript()
                .messages()
                .iter()
                .rev()
                .find(|message| message.sender == Sender::Assistant)
            {
                println!("{}", message.content);
                if let Some(url) = &message.image_url {
                    println!("  image: {}", summarize_url(url));
                }
            }
        }
        ActionOutcome::NoOp => println!("Nothing to do."),
        ActionOutcome::Rejected(message) | ActionOutcome::Failed(message) => {
            println!("{message}");
        }
    }
}

fn report_position(session: &SessionController, outcome: ActionOutcome) {
    match outcome {
        ActionOutcome::Committed => {
            if let Some(index) = session.history().current_index() {
                println!("Viewing version {} of {}", index + 1, session.history().len());
            }
        }
        _ => println!("Nothing to do."),
    }
}

fn show_history(session: &SessionController) {
    let history = session.history();
    if history.is_empty() {
        println!("No versions yet. Upload an image with /upload <path>.");
        return;
    }
    for (index, version) in history.versions().iter().enumerate() {
        let marker = if Some(index) == history.current_index() {
            "*"
        } else {
            " "
        };
        let label = version
            .prompt
            .as_deref()
            .or(version.feedback.as_deref())
            .unwrap_or("original upload");
        println!(
            "{marker} {} {} ({})",
            index + 1,
            label,
            summarize_url(&version.url)
        );
    }
}

// Data URIs are too long to echo back in full.
fn summarize_url(url: &str) -> String {
    if url.starts_with("data:") {
        format!("data URI, {} chars", url.len())
    } else {
        url.to_string()
    }
}

fn run_logo(args: LogoArgs) -> Result<i32> {
    let collaborator = select_collaborator(&args.collaborator)?;
    let outcome = collaborator
        .generate_logo(&LogoRequest {
            session_dir: args.out.clone(),
            prompt: args.prompt.clone(),
            style: args.style.clone(),
        })
        .with_context(|| format!("logo generation failed for '{}'", args.prompt))?;
    println!("{}", outcome.explanation);
    println!("{}", outcome.image_url);
    Ok(0)
}

fn run_prompt(args: PromptArgs) -> Result<i32> {
    let collaborator = select_collaborator(&args.collaborator)?;
    let image = match &args.image {
        Some(reference) => {
            let source = ImageRef::from_text(reference)
                .with_context(|| format!("unusable image reference '{reference}'"))?;
            Some(
                Normalizer::new()
                    .resolve(&source)
                    .with_context(|| format!("failed loading image '{reference}'"))?,
            )
        }
        None => None,
    };
    let expanded = collaborator
        .generate_prompt(&PromptRequest {
            input_text: args.text.clone(),
            image,
        })
        .context("prompt expansion failed")?;
    println!("{expanded}");
    Ok(0)
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn value_as_u32(value: Option<&Value>) -> Option<u32> {
    value.and_then(Value::as_u64).and_then(|v| u32::try_from(v).ok())
}
