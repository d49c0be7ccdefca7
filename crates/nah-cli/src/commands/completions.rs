use super::EXIT_SUCCESS;
use clap::{Command, CommandFactory};
use clap_complete::Shell;
use std::io::Write;

/// Completion script for `shell`, registered under the command's own name.
fn render(shell: Shell, mut cmd: Command) -> Vec<u8> {
    let name = cmd.get_name().to_owned();
    let mut buf = Vec::new();
    clap_complete::generate(shell, &mut cmd, name, &mut buf);
    buf
}

pub fn run<C: CommandFactory>(shell: Shell) -> Result<u8, String> {
    let script = render(shell, C::command());
    std::io::stdout()
        .lock()
        .write_all(&script)
        .map_err(|e| format!("failed to write completions: {e}"))?;
    Ok(EXIT_SUCCESS)
}
