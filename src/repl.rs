//! REPL (Read-Eval-Print Loop) for interactive memory scanning.

use anyhow::Result;
use libmemscan::{CheatEngine, EngineError, Endian, Frontend, MemoryRegion, NumericType, Operator, ScanLevel, Value};
use owo_colors::OwoColorize;
use std::io::{self, Write};

/// Colorized [`Frontend`] for the interactive prompt. Plain-text output
/// (e.g. for embedding `libmemscan` elsewhere) is [`libmemscan::StdoutFrontend`].
pub struct ColorFrontend;

impl Frontend for ColorFrontend {
    fn info(&self, message: &str) {
        println!("{} {message}", "[info]".bright_cyan());
    }

    fn warn(&self, message: &str) {
        println!("{} {message}", "[warn]".yellow());
    }

    fn error(&self, err: &EngineError) {
        println!("{} {err}", "[error]".bright_red());
    }

    fn regions_found(&self, regions: &[MemoryRegion]) {
        println!(
            "{} found {} region(s) to scan",
            "[info]".bright_cyan(),
            regions.len().to_string().bright_green()
        );
    }

    fn scan_done(&self, matches_count: usize, elapsed: std::time::Duration) {
        println!(
            "{} {} match(es), done in {}",
            "[done]".bright_cyan(),
            matches_count.to_string().bright_green(),
            format!("{:.6}s", elapsed.as_secs_f64()).bright_black()
        );
    }

    fn match_entry(&self, addr: usize, value: &Value) {
        println!("  {} = {}", format!("{addr:#016x}").bright_yellow(), value.to_string().bright_green());
    }

    fn freeze_entry(&self, addr: usize, ty: NumericType, value: &Value) {
        println!(
            "  {} [{}] = {} {}",
            format!("{addr:#016x}").bright_yellow(),
            ty.name().cyan(),
            value.to_string().bright_green(),
            "(frozen)".bright_black()
        );
    }
}

pub struct Repl {
    engine: CheatEngine,
}

impl Repl {
    pub fn new(engine: CheatEngine) -> Self {
        Self { engine }
    }

    pub fn run(&mut self) -> Result<()> {
        println!("{}", "=== memscan interactive session ===".bright_yellow().bold());
        println!("{} Type 'help' for available commands", "[info]".bright_cyan());
        println!();

        loop {
            self.engine.poll_freeze_failures();

            print!("{} ", ">".bright_yellow().bold());
            io::stdout().flush()?;

            let mut input = String::new();
            if io::stdin().read_line(&mut input)? == 0 {
                break; // EOF
            }
            let input = input.trim();
            if input.is_empty() {
                continue;
            }

            match self.handle_command(input) {
                Ok(should_continue) => {
                    if !should_continue {
                        break;
                    }
                }
                Err(e) => println!("{} {}", "[error]".bright_red(), e),
            }
        }

        self.engine.unfreeze_all();
        Ok(())
    }

    fn handle_command(&mut self, input: &str) -> Result<bool> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.is_empty() {
            return Ok(true);
        }

        match parts[0] {
            "help" | "h" => self.print_help(),
            "pid" | "p" => println!("{} {}", "[info]".bright_cyan(), self.engine.pid()),
            "scan" | "sc" => self.cmd_scan(&parts[1..])?,
            "reset" | "r" => {
                self.engine.reset_scan();
                println!("{} scan reset", "[done]".bright_cyan());
            }
            "list" | "l" => {
                let max = parts.get(1).and_then(|s| s.parse::<usize>().ok()).or(Some(20));
                self.engine.list(max);
            }
            "matchcount" | "mc" => {
                println!("{} {}", "[info]".bright_cyan(), self.engine.matchcount());
            }
            "update" | "u" => self.engine.update()?,
            "write" | "w" => {
                let value = parts.get(1).ok_or_else(|| anyhow::anyhow!("usage: write <value>"))?;
                let n = self.engine.write(value)?;
                println!("{} wrote {} address(es)", "[done]".bright_cyan(), n.to_string().bright_green());
            }
            "readat" | "ra" => {
                let addr = parse_address(parts.get(1).ok_or_else(|| anyhow::anyhow!("usage: readat <addr>"))?)?;
                match self.engine.readat(addr) {
                    Some(v) => println!("{} {addr:#x} = {v}", "[info]".bright_cyan()),
                    None => println!("{} short read at {addr:#x}", "[error]".bright_red()),
                }
            }
            "read_arr" | "rr" => {
                let addr = parse_address(parts.get(1).ok_or_else(|| anyhow::anyhow!("usage: read_arr <addr> <len>"))?)?;
                let len: usize = parts
                    .get(2)
                    .ok_or_else(|| anyhow::anyhow!("usage: read_arr <addr> <len>"))?
                    .parse()?;
                let (bytes, res) = self.engine.read_arr(addr, len);
                res?;
                let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
                println!("{} {}", "[info]".bright_cyan(), hex.join(" "));
            }
            "writeat" | "wa" => {
                let addr = parse_address(parts.get(1).ok_or_else(|| anyhow::anyhow!("usage: writeat <addr> <value>"))?)?;
                let value = parts.get(2).ok_or_else(|| anyhow::anyhow!("usage: writeat <addr> <value>"))?;
                let n = self.engine.writeat(addr, value)?;
                println!("{} wrote {} byte(s) at {addr:#x}", "[done]".bright_cyan(), n);
            }
            "endian" | "en" => {
                let mode = parts.get(1).ok_or_else(|| anyhow::anyhow!("usage: endian <native|swapped>"))?;
                let endian = match *mode {
                    "native" => Endian::Native,
                    "swapped" => Endian::Swapped,
                    other => anyhow::bail!("unknown endian mode '{other}'"),
                };
                self.engine.set_endian(endian);
                println!("{} endian set to {mode}", "[done]".bright_cyan());
            }
            "scan_level" | "sl" => {
                let level = parts.get(1).ok_or_else(|| anyhow::anyhow!("usage: scan_level <aligned|all>"))?;
                let scan_level = match *level {
                    "aligned" => ScanLevel::Aligned,
                    "all" => ScanLevel::All,
                    other => anyhow::bail!("unknown scan level '{other}'"),
                };
                self.engine.set_scan_level(scan_level);
                println!("{} scan level set to {level}", "[done]".bright_cyan());
            }
            "type" | "ty" => {
                let ty = parts.get(1).ok_or_else(|| anyhow::anyhow!("usage: type <i8|u8|...|f64>"))?;
                let numeric_type = NumericType::parse(ty).ok_or_else(|| anyhow::anyhow!("unknown type '{ty}'"))?;
                self.engine.set_numeric_type(numeric_type);
                println!("{} type set to {ty}", "[done]".bright_cyan());
            }
            "freeze_at" | "fa" => {
                let addr = parse_address(parts.get(1).ok_or_else(|| anyhow::anyhow!("usage: freeze_at <addr>"))?)?;
                self.engine.freeze_at(addr)?;
                println!("{} froze {addr:#x}", "[done]".bright_cyan());
            }
            "freeze_at_val" | "fav" => {
                let addr = parse_address(parts.get(1).ok_or_else(|| anyhow::anyhow!("usage: freeze_at_val <addr> <value>"))?)?;
                let value = parts.get(2).ok_or_else(|| anyhow::anyhow!("usage: freeze_at_val <addr> <value>"))?;
                self.engine.freeze_at_val(addr, value)?;
                println!("{} froze {addr:#x} to {value}", "[done]".bright_cyan());
            }
            "unfreeze_at" | "ua" => {
                let addr = parse_address(parts.get(1).ok_or_else(|| anyhow::anyhow!("usage: unfreeze_at <addr>"))?)?;
                self.engine.unfreeze_at(addr);
                println!("{} unfroze {addr:#x}", "[done]".bright_cyan());
            }
            "freeze_all" | "fza" => {
                self.engine.freeze_all()?;
                println!("{} froze every current match", "[done]".bright_cyan());
            }
            "unfreeze_all" | "uza" => {
                self.engine.unfreeze_all();
                println!("{} unfroze every address", "[done]".bright_cyan());
            }
            "freeze_list" | "fl" => self.engine.freeze_list(),
            "quit" | "q" | "exit" => {
                println!("{} exiting...", "[info]".bright_cyan());
                return Ok(false);
            }
            other => {
                println!("{} unknown command: {other}", "[error]".bright_red());
                println!("Type 'help' for available commands");
            }
        }

        Ok(true)
    }

    fn cmd_scan(&mut self, args: &[&str]) -> Result<()> {
        let op_str = args.first().ok_or_else(|| anyhow::anyhow!("usage: scan <op> [value]"))?;
        let op = match *op_str {
            "eq" => Operator::Equal,
            "ne" => Operator::NotEqual,
            "gt" => Operator::Greater,
            "lt" => Operator::Less,
            "ge" => Operator::GreaterOrEqual,
            "le" => Operator::LessOrEqual,
            "changed" => Operator::Changed,
            "unchanged" => Operator::Unchanged,
            "inc" | "increased" => Operator::Increased,
            "dec" | "decreased" => Operator::Decreased,
            "any" => Operator::Any,
            other => anyhow::bail!("unknown scan operator '{other}'"),
        };
        let rhs = args.get(1).copied();
        self.engine.scan(op, rhs)?;
        Ok(())
    }

    fn print_help(&self) {
        println!("{}", "Available commands:".bright_yellow().bold());
        println!("  {} - show this help", "help, h".green());
        println!("  {} - first/next scan (eq, ne, gt, lt, ge, le, changed, unchanged, inc, dec, any)", "scan <op> [value]".green());
        println!("  {} - discard the current scan", "reset, r".green());
        println!("  {} - list current matches (default 20)", "list, l [max]".green());
        println!("  {} - print the match count", "matchcount, mc".green());
        println!("  {} - re-read matches without filtering", "update, u".green());
        println!("  {} - write value to every match", "write, w <value>".green());
        println!("  {} - read one value at an address", "readat, ra <addr>".green());
        println!("  {} - read raw bytes at an address", "read_arr, rr <addr> <len>".green());
        println!("  {} - write one value at an address", "writeat, wa <addr> <value>".green());
        println!("  {} - set endian mode", "endian, en <native|swapped>".green());
        println!("  {} - set alignment mode", "scan_level, sl <aligned|all>".green());
        println!("  {} - set numeric type (clears the current scan)", "type, ty <type>".green());
        println!("  {} - freeze an address to its live value", "freeze_at, fa <addr>".green());
        println!("  {} - freeze an address to a given value", "freeze_at_val, fav <addr> <value>".green());
        println!("  {} - stop freezing an address", "unfreeze_at, ua <addr>".green());
        println!("  {} - freeze every current match", "freeze_all, fza".green());
        println!("  {} - stop every freeze worker", "unfreeze_all, uza".green());
        println!("  {} - list frozen addresses", "freeze_list, fl".green());
        println!("  {} - print the attached pid", "pid, p".green());
        println!("  {} - exit the session", "quit, q, exit".green());
    }
}

fn parse_address(s: &str) -> Result<usize> {
    if let Some(hex) = s.strip_prefix("0x") {
        Ok(usize::from_str_radix(hex, 16)?)
    } else {
        Ok(s.parse()?)
    }
}
