use std::process::ExitCode;

fn main() -> ExitCode {
    match stellar_ensemble::app::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
