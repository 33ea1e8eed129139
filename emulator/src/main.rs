mod grammar;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;
use std::time::Duration;

use sampler_core::config::SamplerConfig;
use sampler_core::notify::ReadingBridge;
use sampler_core::sim::SimulatedBench;

use session::{ConsoleSink, Session};

fn main() -> io::Result<()> {
    let config = parse_config().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: sampler-emulator [--settle-ms <ms>]");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();

    let bench = SimulatedBench::new();
    let bridge = ReadingBridge::with_sink(ConsoleSink::default());
    let mut session = Session::with_config(&bench, &bridge, config)
        .map_err(|err| io::Error::other(format!("bring-up failed: {err}")))?;
    let mut line = String::new();

    writeln!(
        writer,
        "Voltage Sampler Emulator ready. Type `help` for commands or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for response in session.handle_command(trimmed) {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_config() -> Result<SamplerConfig, String> {
    let mut args = env::args().skip(1);
    let Some(arg) = args.next() else {
        return Ok(SamplerConfig::default());
    };

    let value = if let Some(value) = arg.strip_prefix("--settle-ms=") {
        value.to_string()
    } else if arg == "--settle-ms" {
        args.next()
            .ok_or_else(|| "Expected value after --settle-ms".to_string())?
    } else {
        return Err(format!("Unknown argument `{arg}`"));
    };

    let millis: u64 = value
        .parse()
        .map_err(|_| format!("Invalid settle time `{value}`"))?;
    Ok(SamplerConfig::default().with_settle(Duration::from_millis(millis)))
}
