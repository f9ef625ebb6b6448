//! sforge - command-line tool for assembling sprite animations

use std::process::ExitCode;

use spriteforge::cli;

fn main() -> ExitCode {
    cli::run()
}
