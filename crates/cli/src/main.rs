use std::process::ExitCode;

fn main() -> ExitCode {
    depot_cli::run()
}
