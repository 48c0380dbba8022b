//! Rendering query results for people and for scripts.

use clap::ValueEnum;
use serde_json::Value;
use std::fmt;
use tracing::info;

/// How a query action shows its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Log lines, colored on a terminal
    #[default]
    Human,
    /// One comma-separated line
    Csv,
    /// One space-separated line, safe for `for x in $(...)`
    Bash,
    /// The result as JSON
    Json,
}

impl OutputFormat {
    /// Pick the format from the three boolean flags; the last one wins.
    pub fn from_flags(csv: bool, bash: bool, json: bool) -> Self {
        if json {
            Self::Json
        } else if bash {
            Self::Bash
        } else if csv {
            Self::Csv
        } else {
            Self::Human
        }
    }

    /// Script formats keep the console quiet apart from the result.
    pub fn is_machine_readable(&self) -> bool {
        !matches!(self, Self::Human)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Human => "human",
            Self::Csv => "csv",
            Self::Bash => "bash",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

/// Render a result as the text to print. Human output is `None`; it goes
/// through the log instead.
pub fn render(format: OutputFormat, items: &[String], value: &Value) -> Option<String> {
    match format {
        OutputFormat::Human => None,
        OutputFormat::Csv => Some(items.join(",")),
        OutputFormat::Bash => Some(items.join(" ")),
        OutputFormat::Json => Some(serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())),
    }
}

/// Show a result in the requested format.
pub fn show(format: OutputFormat, human: &[String], items: &[String], value: &Value) {
    match render(format, items, value) {
        Some(text) => println!("{}", text),
        None => {
            for line in human {
                info!("{}", line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false, false), OutputFormat::Csv);
        assert_eq!(OutputFormat::from_flags(true, true, false), OutputFormat::Bash);
        assert_eq!(OutputFormat::from_flags(false, false, true), OutputFormat::Json);
        assert!(!OutputFormat::Human.is_machine_readable());
    }

    #[test]
    fn test_render() {
        let items = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let value = json!([1, 2, 3]);
        assert_eq!(render(OutputFormat::Csv, &items, &value).unwrap(), "1,2,3");
        assert_eq!(render(OutputFormat::Bash, &items, &value).unwrap(), "1 2 3");
        assert!(render(OutputFormat::Json, &items, &value).unwrap().starts_with('['));
        assert!(render(OutputFormat::Human, &items, &value).is_none());
    }
}
