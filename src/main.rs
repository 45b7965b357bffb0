use std::process::exit;

use tracing::Level;
use tracing_subscriber::EnvFilter;

use minixrun::core68k::Core68k;
use minixrun::emulation::{Machine, System};

// sysexits(3) codes for pre-exec failures.
const EX_USAGE: i32 = 64;
const EX_OSERR: i32 = 71;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let (tool, args) = match parse_args() {
        Some(parsed) => parsed,
        None => {
            eprintln!("usage: minixrun <guest-path-to-executable> [args ...]");
            exit(EX_USAGE);
        }
    };

    // The guest sees its own path as argv[0]; only MINIX_-prefixed host
    // environment variables cross over, stripped of the prefix.
    let guest_args: Vec<String> = std::iter::once(tool.clone()).chain(args).collect();
    let env: Vec<String> = std::env::vars().map(|(k, v)| format!("{k}={v}")).collect();

    let mut machine = Machine::new(System::from_env(), Core68k::new(), tool, guest_args, env);

    match machine.run() {
        Ok(status) => exit(status),
        Err(err) => {
            eprintln!("minixrun: {err:#}");
            exit(EX_OSERR);
        }
    }
}

fn parse_args() -> Option<(String, Vec<String>)> {
    let mut args = std::env::args().skip(1);
    let tool = args.next()?;
    Some((tool, args.collect()))
}
