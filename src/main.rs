use clap::Parser;

mod commands;
mod output;

use commands::sync::{self, SyncArgs};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "qsync")]
#[command(version = VERSION)]
#[command(about = "Sync a project tree to a remote host with lifecycle commands")]
struct Cli {
    #[command(flatten)]
    sync: SyncArgs,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let (json_result, exit_code) = output::map_cmd_result_to_json(sync::run(cli.sync));
    let _ = output::print_json_result(json_result);

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
