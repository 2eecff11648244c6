use clap::Parser;

use code_runner::config::{CliArgs, Config};
use code_runner::engine::ExecutionEngine;
use code_runner::web_server::build_server;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let config: Config = cli.to_config()?;

    let engine = ExecutionEngine::from_config(&config);
    log::info!(
        "Workspaces under {}, run timeout {:?}, compile timeout {:?}, output cap {} chars",
        engine.workspace_root().display(),
        engine.limits().run_timeout,
        engine.limits().compile_timeout,
        engine.limits().max_output_chars
    );
    log::warn!("Submissions run without OS-level isolation - deploy only behind trusted callers");

    let server = build_server(config.server, engine)?;
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    server_handle.stop(true).await;

    log::info!("Shutdown complete");
    Ok(())
}
