use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use log::info;
use rpc_query_key::transport::Headers;
use rpc_query_key::{
    call_unary, hash_key, CallOptions, Config, MethodDescriptor, QueryInput, Struct, Transport,
    TransportRegistry, SKIP,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Print the query key and key hash for a method and input
    Key {
        /// `package.Service/Method`
        method: String,
        #[arg(long, default_value = "{}")]
        input: String,
        #[arg(long)]
        skip: bool,
        #[arg(long)]
        page_param_key: Option<String>,
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },
    /// Make one unary call and print the response
    Call {
        /// `package.Service/Method`
        method: String,
        #[arg(long, default_value = "{}")]
        input: String,
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got \"{}\"", s))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn parse_input(input: &str) -> anyhow::Result<Struct> {
    match serde_json::from_str::<serde_json::Value>(input).context("Input is not valid JSON")? {
        serde_json::Value::Object(fields) => Ok(Struct(fields)),
        other => Err(anyhow!("Input must be a JSON object, got {}", other)),
    }
}

fn main_key_command(
    config: &Config,
    method: &str,
    input: &str,
    skip: bool,
    page_param_key: Option<&str>,
    headers: &Headers,
) -> anyhow::Result<()> {
    let method = MethodDescriptor::<Struct, Struct>::from_path(method)?;
    let input: QueryInput<Struct> = if skip {
        SKIP.into()
    } else {
        QueryInput::Ready(parse_input(input)?)
    };
    let transport: Arc<dyn Transport> = Arc::new(config.transport(reqwest::Client::new()));
    let factory = config.key_factory(Arc::new(TransportRegistry::new()));

    let key = match page_param_key {
        Some(page_param_key) => {
            factory.build_infinite_key(&method, &input, &transport, page_param_key, headers)?
        }
        None => factory.build_key(&method, &input, &transport, headers)?,
    };
    println!("{}", serde_json::to_string_pretty(&key)?);
    println!("{}", hash_key(&key));
    Ok(())
}

async fn main_call_command(
    config: &Config,
    method: &str,
    input: &str,
    headers: Headers,
) -> anyhow::Result<()> {
    let method = MethodDescriptor::<Struct, Struct>::from_path(method)?;
    let input = parse_input(input)?;
    let transport: Arc<dyn Transport> = Arc::new(config.transport(reqwest::Client::new()));

    let signal = CancellationToken::new();
    let mut options = CallOptions::default().with_signal(signal.clone());
    options.timeout = config.timeout();
    options.headers = headers;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling call");
            signal.cancel();
        }
    });

    info!("Calling {} at {}", method.path(), config.base_url);
    let output = call_unary(&transport, &method, Some(&input), options)?.await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Key {
            method,
            input,
            skip,
            page_param_key,
            headers,
        } => main_key_command(
            &config,
            &method,
            &input,
            skip,
            page_param_key.as_deref(),
            &headers,
        ),
        Commands::Call {
            method,
            input,
            headers,
        } => main_call_command(&config, &method, &input, headers).await,
    }
}
