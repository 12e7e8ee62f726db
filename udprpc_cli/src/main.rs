use clap::Parser;
use log::*;
use udprpc::{RpcConfig, UdpRpc};
use udprpc_cli::config::{CallCommand, CliCommand, Config, ServeCommand};
use udprpc_cli::demo_handler::{demo_handler, METHODS};

#[tokio::main]
async fn main() {
    env_logger::init();
    let config: Config = Config::parse();
    let (global_options, command) = config.to_parts();

    let result = match global_options.rpc_config() {
        Ok(rpc_config) => match command {
            CliCommand::Serve(serve_command) => serve(serve_command, rpc_config).await,
            CliCommand::Call(call_command) => call(call_command, rpc_config).await,
            CliCommand::Notify(notify_command) => notify(notify_command, rpc_config).await,
        },
        Err(err) => Err(err.into()),
    };

    match result {
        Ok(()) => {}
        Err(err) => {
            eprintln!("** Error ** \n {err}");
            std::process::exit(1);
        }
    }
}

async fn serve(cmd: ServeCommand, config: RpcConfig) -> Result<(), anyhow::Error> {
    let mut engine = UdpRpc::with_config(cmd.port, config);
    engine.register(demo_handler);
    engine.start().await?;
    let port = engine.local_port().unwrap_or(cmd.port);
    info!("Serving {} on UDP port {port}", METHODS.join(", "));
    println!("Listening on port {port}. Press Ctrl-C to stop.");
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Could not listen for Ctrl-C: {err}");
    }
    info!("Shutting down");
    engine.stop().await?;
    println!("Bye :)");
    Ok(())
}

async fn call(cmd: CallCommand, config: RpcConfig) -> Result<(), anyhow::Error> {
    let mut engine = UdpRpc::with_config(cmd.port, config);
    engine.start().await?;
    let params = cmd.json_params();
    debug!("Calling '{}' on {} with {params:?}", cmd.method, cmd.destination);
    let outcome = engine.send(&cmd.method, params, cmd.destination).await;
    engine.stop().await?;
    let result = outcome?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn notify(cmd: CallCommand, config: RpcConfig) -> Result<(), anyhow::Error> {
    let mut engine = UdpRpc::with_config(cmd.port, config);
    engine.start().await?;
    let outcome = engine.notify(&cmd.method, cmd.json_params(), cmd.destination).await;
    engine.stop().await?;
    outcome?;
    println!("Notification '{}' sent to {}", cmd.method, cmd.destination);
    Ok(())
}
