use std::process::ExitCode;

fn main() -> ExitCode {
    shelfgap_cli::run()
}
