use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, NO_ARG_COMMANDS, PATH_ARG_COMMANDS, SIZE_COMMAND, TEXT_ARG_COMMANDS,
};

/// A chat line resolved into a session action plus its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_single_path_arg(arg: &str) -> String {
    if arg.trim().is_empty() {
        return String::new();
    }
    let parts = match shell_words::split(arg) {
        Ok(parts) => parts,
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    };
    let parts: Vec<String> = parts.into_iter().filter(|value| !value.is_empty()).collect();
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

/// Parses a `WxH` size argument. Returns `None` when the argument does not
/// name two positive integers.
fn parse_size_dims(arg: &str) -> Option<(u32, u32)> {
    let normalized = arg.trim().to_ascii_lowercase();
    let (left, right) = normalized.split_once('x')?;
    let width = left.trim().parse::<u32>().ok()?;
    let height = right.trim().parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let remainder = &slash_tail[command_len..];
            let arg = if remainder.is_empty() {
                ""
            } else {
                remainder.trim()
            };

            if command == SIZE_COMMAND.command {
                let mut intent = Intent::new(SIZE_COMMAND.action, text);
                if arg.is_empty() || arg.eq_ignore_ascii_case("clear") {
                    intent.command_args.insert("clear".to_string(), Value::Bool(true));
                } else if let Some((width, height)) = parse_size_dims(arg) {
                    intent
                        .command_args
                        .insert("width".to_string(), Value::Number(width.into()));
                    intent
                        .command_args
                        .insert("height".to_string(), Value::Number(height.into()));
                } else {
                    intent
                        .command_args
                        .insert("invalid".to_string(), Value::String(arg.to_string()));
                }
                return intent;
            }

            if let Some(action) = find_action(&command, PATH_ARG_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "path".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, TEXT_ARG_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent
                    .command_args
                    .insert("text".to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("stylize", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn free_text_becomes_a_stylize_intent() {
        let intent = parse_intent("  make it look like a painting  ");
        assert_eq!(intent.action, "stylize");
        assert_eq!(intent.prompt.as_deref(), Some("make it look like a painting"));
    }

    #[test]
    fn blank_input_is_a_noop() {
        assert_eq!(parse_intent("   ").action, "noop");
        assert_eq!(parse_intent("").action, "noop");
    }

    #[test]
    fn upload_takes_a_quoted_path() {
        let intent = parse_intent("/upload \"/tmp/my cat.png\"");
        assert_eq!(intent.action, "upload");
        assert_eq!(intent.command_args["path"], json!("/tmp/my cat.png"));
    }

    #[test]
    fn size_parses_dimensions() {
        let intent = parse_intent("/size 920x430");
        assert_eq!(intent.action, "set_dimensions");
        assert_eq!(intent.command_args["width"], json!(920));
        assert_eq!(intent.command_args["height"], json!(430));
    }

    #[test]
    fn size_clear_and_bare_size_reset_dimensions() {
        assert_eq!(parse_intent("/size clear").command_args["clear"], json!(true));
        assert_eq!(parse_intent("/size").command_args["clear"], json!(true));
    }

    #[test]
    fn size_flags_non_numeric_dimensions() {
        let intent = parse_intent("/size 920xwide");
        assert_eq!(intent.action, "set_dimensions");
        assert_eq!(intent.command_args["invalid"], json!("920xwide"));
        assert!(!intent.command_args.contains_key("width"));
    }

    #[test]
    fn size_rejects_zero_dimensions() {
        let intent = parse_intent("/size 0x430");
        assert_eq!(intent.command_args["invalid"], json!("0x430"));
    }

    #[test]
    fn fill_carries_the_raw_prompt_text() {
        let intent = parse_intent("/fill a starry night sky");
        assert_eq!(intent.action, "fill_empty_space");
        assert_eq!(intent.command_args["text"], json!("a starry night sky"));
    }

    #[test]
    fn no_arg_commands_resolve_to_actions() {
        assert_eq!(parse_intent("/prev").action, "view_previous");
        assert_eq!(parse_intent("/next").action, "view_next");
        assert_eq!(parse_intent("/regenerate").action, "regenerate");
        assert_eq!(parse_intent("/regen").action, "regenerate");
        assert_eq!(parse_intent("/resize").action, "resize");
        assert_eq!(parse_intent("/history").action, "show_history");
        assert_eq!(parse_intent("/exit").action, "quit");
    }

    #[test]
    fn unknown_command_keeps_its_argument() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }
}
