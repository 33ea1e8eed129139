//! Runs canned console scripts and prints the transcripts.

#[allow(dead_code)]
#[path = "../grammar.rs"]
mod grammar;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use std::io::{self, Write};

use sampler_core::notify::ReadingBridge;
use sampler_core::sim::SimulatedBench;

use session::{ConsoleSink, Session};

const SCRIPTS: &[(&str, &[&str])] = &[
    (
        "steady",
        &[
            "connect 1",
            "subscribe",
            "advance 5",
            "pulse 2048 128",
            "pulse 4095 128",
            "status",
        ],
    ),
    (
        "disconnect",
        &["connect 2", "subscribe", "pulse 1024 40", "disconnect", "status"],
    ),
    (
        "fault",
        &["connect 3", "fail converter", "subscribe", "subscribe", "status"],
    ),
];

fn main() -> io::Result<()> {
    let stdout = io::stdout();
    let mut writer = stdout.lock();

    for (name, script) in SCRIPTS {
        writeln!(writer, "## {name}")?;
        let bench = SimulatedBench::new();
        let bridge = ReadingBridge::with_sink(ConsoleSink::default());
        let mut session = Session::new(&bench, &bridge)
            .map_err(|err| io::Error::other(format!("bring-up failed: {err}")))?;

        for line in *script {
            writeln!(writer, "> {line}")?;
            for response in session.handle_command(line) {
                writeln!(writer, "{response}")?;
            }
        }
        writeln!(writer)?;
    }

    Ok(())
}
