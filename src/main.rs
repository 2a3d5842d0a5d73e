use keypack::cli;
use std::process::ExitCode;

fn main() -> ExitCode {
    match cli::run_cli() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            for cause in e.chain().skip(1) {
                eprintln!("Caused by: {}", cause);
            }
            ExitCode::FAILURE
        }
    }
}
