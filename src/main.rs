use std::process::ExitCode;

fn main() -> ExitCode {
    questfusion::cli::run()
}
