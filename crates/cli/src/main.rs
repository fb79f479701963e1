use std::process::ExitCode;

fn main() -> ExitCode {
    matchgate_cli::run()
}
