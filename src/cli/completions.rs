//! Shell completion scripts.

use clap::CommandFactory;
use clap_complete::{generate, Shell};
use std::io::{self, Write};

use crate::cli::Cli;

/// Write the completion script for `shell` to stdout.
pub fn generate_completions(shell: Shell) {
    let mut stdout = io::stdout().lock();
    let _ = stdout.write_all(completion_script(shell).as_bytes());
}

pub fn completion_script(shell: Shell) -> String {
    let mut buf = Vec::new();
    generate(shell, &mut Cli::command(), env!("CARGO_PKG_NAME"), &mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bash_completions_list_subcommands() {
        let script = completion_script(Shell::Bash);
        assert!(script.contains("sfctl"));
        assert!(script.contains("volume-extend"));
    }
}
