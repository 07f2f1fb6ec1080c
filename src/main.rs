use std::process::ExitCode;

fn main() -> ExitCode {
    comic_sage_lib::run()
}
