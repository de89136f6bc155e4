mod cli;
mod repl;

use clap::Parser;
use cli::{Cli, Command};
use libmemscan::{CheatEngine, CheatModeConfig, Endian, NumericType, ScanLevel};
use owo_colors::OwoColorize;
use repl::{ColorFrontend, Repl};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Attach { pid, r#type, unaligned } => {
            let numeric_type = NumericType::parse(&r#type)
                .ok_or_else(|| anyhow::anyhow!("unknown numeric type '{}'", r#type))?;

            println!("{} attaching to pid={}", "[info]".bright_cyan(), pid);

            let config = CheatModeConfig {
                numeric_type,
                endian: Endian::Native,
                scan_level: if unaligned { ScanLevel::All } else { ScanLevel::Aligned },
                ..CheatModeConfig::default()
            };

            let engine = CheatEngine::attach(pid, config, Box::new(ColorFrontend))?;
            println!("{} attached, type={}", "[done]".bright_cyan(), numeric_type.name());

            Repl::new(engine).run()?;
        }
    }
    Ok(())
}
