use std::process::ExitCode;

fn main() -> ExitCode {
    probatio_cli::run()
}
