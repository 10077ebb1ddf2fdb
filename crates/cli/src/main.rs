use std::process::ExitCode;

fn main() -> ExitCode {
    markup_cli::run()
}
