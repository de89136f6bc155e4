use clap::{builder::styling::AnsiColor, Parser, Subcommand};

/// memscan -- inspect and mutate a running POSIX process's virtual memory.
#[derive(Parser, Debug)]
#[command(
    name = "memscan",
    bin_name = "memscan",
    about = "A live-memory cheat engine for Linux processes",
    version,
    propagate_version = true,
    arg_required_else_help = true,
    styles = clap::builder::Styles::styled()
        .header(AnsiColor::BrightYellow.on_default())
        .usage(AnsiColor::BrightYellow.on_default())
        .literal(AnsiColor::BrightGreen.on_default())
        .placeholder(AnsiColor::BrightCyan.on_default())
)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Attach to a running process and open the interactive scan prompt
    Attach {
        /// Target process id
        pid: i32,

        /// Initial numeric type (i8, u8, i16, u16, i32, u32, i64, u64, f32, f64)
        #[arg(short = 't', long, default_value = "i32")]
        r#type: String,

        /// Use byte-level scanning instead of alignment-restricted scanning
        #[arg(long)]
        unaligned: bool,
    },
}
