use thiserror::Error;

/// Canned prompts offered by `/example <n>`.
pub const EXAMPLE_PROMPTS: [&str; 3] = [
    "Please introduce yourself, including your abilities and characteristics.",
    "What is artificial intelligence? Please explain briefly.",
    "Write a simple C++ program that implements a calculator.",
];

/// One line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Prompt(String),
    /// Send the previous prompt again.
    Retry,
    /// Send `EXAMPLE_PROMPTS[n - 1]`.
    Example(usize),
    Stop,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("Please enter a question or instruction.")]
    Blank,
    #[error("Unknown command {0}. Commands: /stop, /retry, /example <1-3>, /quit")]
    UnknownCommand(String),
    #[error("Choose an example between 1 and {}.", EXAMPLE_PROMPTS.len())]
    NoSuchExample,
}

pub fn parse_line(line: &str) -> Result<Input, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(InputError::Blank);
    }

    let Some(command) = line.strip_prefix('/') else {
        return Ok(Input::Prompt(line.to_string()));
    };

    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("stop"), None) => Ok(Input::Stop),
        (Some("retry"), None) => Ok(Input::Retry),
        (Some("quit") | Some("exit"), None) => Ok(Input::Quit),
        (Some("example"), arg) => {
            let index = arg
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|n| (1..=EXAMPLE_PROMPTS.len()).contains(n))
                .ok_or(InputError::NoSuchExample)?;
            Ok(Input::Example(index))
        }
        _ => Err(InputError::UnknownCommand(line.to_string())),
    }
}

/// Prompt for `/example <index>`, 1-based.
pub fn example_prompt(index: usize) -> Option<&'static str> {
    index
        .checked_sub(1)
        .and_then(|i| EXAMPLE_PROMPTS.get(i))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_trimmed_prompt() {
        assert_eq!(
            parse_line("  What is Rust?\n"),
            Ok(Input::Prompt("What is Rust?".to_string()))
        );
    }

    #[test]
    fn test_blank_input_is_rejected() {
        assert_eq!(parse_line(""), Err(InputError::Blank));
        assert_eq!(parse_line(" \t "), Err(InputError::Blank));
    }

    #[test]
    fn test_commands() {
        assert_eq!(parse_line("/stop"), Ok(Input::Stop));
        assert_eq!(parse_line("/retry"), Ok(Input::Retry));
        assert_eq!(parse_line("/quit"), Ok(Input::Quit));
        assert_eq!(parse_line("/exit"), Ok(Input::Quit));
        assert_eq!(parse_line("/example 2"), Ok(Input::Example(2)));
    }

    #[test]
    fn test_example_bounds() {
        assert_eq!(parse_line("/example"), Err(InputError::NoSuchExample));
        assert_eq!(parse_line("/example 0"), Err(InputError::NoSuchExample));
        assert_eq!(parse_line("/example 4"), Err(InputError::NoSuchExample));
        assert_eq!(parse_line("/example two"), Err(InputError::NoSuchExample));
    }

    #[test]
    fn test_unknown_command() {
        let err = parse_line("/stop now").unwrap_err();
        assert_eq!(err, InputError::UnknownCommand("/stop now".to_string()));
        assert!(err.to_string().contains("/example <1-3>"));
    }

    #[test]
    fn test_example_prompt_lookup() {
        assert_eq!(example_prompt(1), Some(EXAMPLE_PROMPTS[0]));
        assert_eq!(example_prompt(3), Some(EXAMPLE_PROMPTS[2]));
        assert_eq!(example_prompt(0), None);
        assert_eq!(example_prompt(4), None);
    }
}
