use std::{env, io::Read as _, process::ExitCode};

use yov::{CliOptions, NativeHost, Program};

const HELP: &str = "\
yov [flags] <script> [args...]

flags:
  -analyze      type-check and lower the script, then stop without running it
  -trace        log compiler pass boundaries and runtime sweeps to stderr
  -user_assert  ask for confirmation before calls that request it
  -no_user      never ask for confirmation, fail instead
  -wait_end     wait for Enter before exiting
  -help, -h     print this message
  -version, -v  print the interpreter version

script arguments are given as `name=value`, or a bare `name` for `true`.";

fn main() -> ExitCode {
    let mut args = env::args();
    args.next(); // argv[0]
    let args: Vec<String> = args.collect();

    if args.iter().any(|a| a == "-help" || a == "-h") {
        println!("{HELP}");
        return ExitCode::SUCCESS;
    }
    if args.iter().any(|a| a == "-version" || a == "-v") {
        println!("yov {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let options = match CliOptions::parse_args(args) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("error: {err}\n\n{HELP}");
            return ExitCode::FAILURE;
        }
    };

    let wait_end = options.wait_end;
    let mut host = NativeHost::new(options.no_user);
    let code = Program::run(&options, &mut host);

    if wait_end {
        println!("press enter to continue...");
        let mut buf = [0u8; 1];
        let _ = std::io::stdin().read(&mut buf);
    }

    u8::try_from(code.clamp(0, i32::from(u8::MAX))).map_or(ExitCode::FAILURE, ExitCode::from)
}
