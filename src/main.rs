use anyhow::{Context, Result};
use clap::Parser;
use colored::control as color_control;
use db_migrate::cli::commands::migrate::{MigrateCommand, MigrateCommandHandler};
use db_migrate::cli::Cli;
use std::env;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// 割り込みで強制終了したときの終了コード（128 + SIGINT）
const INTERRUPT_EXIT_CODE: i32 = 130;

/// Ctrl-C を受けたときの動作
#[derive(Debug, PartialEq, Eq)]
enum InterruptAction {
    StopAfterCurrentScript,
    Exit,
}

fn main() {
    // CLIをパースして実行
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    // 非同期ランタイムを作成して実行
    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create Tokio runtime")
        .unwrap_or_else(|e| {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        });

    let result = runtime.block_on(run_command(cli));

    match result {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

/// ログ出力を初期化する
///
/// `RUST_LOG` が設定されていればそれを優先する。ログは標準エラー出力に書き出す。
fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "db_migrate=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// コマンドを実行する
async fn run_command(cli: Cli) -> Result<String> {
    // --no-color フラグの処理
    if cli.no_color {
        color_control::set_override(false);
    }

    let project_path = env::current_dir()?;

    // Ctrl-C でスクリプト間の停止を要求する
    let cancellation = CancellationToken::new();
    let interrupt = cancellation.clone();
    tokio::spawn(async move {
        // 2回目の Ctrl-C では実行中のスクリプトを待たずに終了する
        while tokio::signal::ctrl_c().await.is_ok() {
            match interrupt_action(&interrupt) {
                InterruptAction::StopAfterCurrentScript => {
                    warn!("Interrupt received, stopping after the current script (press Ctrl-C again to abort)");
                }
                InterruptAction::Exit => {
                    warn!("Second interrupt received, aborting");
                    process::exit(INTERRUPT_EXIT_CODE);
                }
            }
        }
    });

    let command = MigrateCommand {
        project_path,
        connection_string: cli.connection_string,
        provider: cli.provider,
        scripts_path: cli.scripts,
        config_path: cli.config,
        ensure_db_exists: cli.ensure_db_exists,
        hash_check: cli.hash_check,
        no_transaction: cli.no_transaction,
        format: cli.format,
        cancellation: Some(cancellation),
    };

    MigrateCommandHandler::new().execute(&command).await
}

/// 割り込みの回数に応じた動作を決める
///
/// 1回目はキャンセルを要求し、キャンセル済みなら即時終了とする。
fn interrupt_action(cancellation: &CancellationToken) -> InterruptAction {
    if cancellation.is_cancelled() {
        InterruptAction::Exit
    } else {
        cancellation.cancel();
        InterruptAction::StopAfterCurrentScript
    }
}
